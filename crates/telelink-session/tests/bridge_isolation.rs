//! Peripheral failures stay local to their own worker.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use telelink_frame::CONTROL;
use telelink_link::{CharacteristicLink, Link, LinkState, MemoryCharacteristic, MemoryPeripheral};
use telelink_session::{
    BridgeConfig, ControlCommand, Forward, InboundHandler, Outbox, Peripheral, PeripheralBridge,
    RetryConfig, Route, RoutingTable, PERIPHERAL_RECONFIGURE, PERIPHERAL_SETUP,
};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

fn node(name: &str) -> (Peripheral, MemoryPeripheral) {
    let (central, device) = MemoryCharacteristic::pair(name);
    let link: Arc<dyn Link> = Arc::new(CharacteristicLink::new(name, central));
    (Peripheral::new(name, link), device)
}

fn bridge_config(setup_on_connect: bool) -> BridgeConfig {
    BridgeConfig {
        retry: RetryConfig {
            delay_ms: 20,
            ..RetryConfig::default()
        },
        setup_delay_ms: 0,
        setup_on_connect,
        ..BridgeConfig::default()
    }
}

fn two_node_bridge(setup_on_connect: bool) -> (PeripheralBridge, MemoryPeripheral, MemoryPeripheral) {
    let (a, device_a) = node("esp-a");
    let (b, device_b) = node("esp-b");
    let routes = RoutingTable::new(
        [
            (
                0x11,
                Route {
                    peripheral: 0,
                    identifier: 0x01,
                },
            ),
            (
                0x12,
                Route {
                    peripheral: 1,
                    identifier: 0x01,
                },
            ),
        ],
        2,
    )
    .unwrap();
    let bridge = PeripheralBridge::new(
        vec![a, b],
        routes,
        &bridge_config(setup_on_connect),
        &CancellationToken::new(),
    )
    .unwrap();
    (bridge, device_a, device_b)
}

async fn wait_for_state(bridge: &PeripheralBridge, index: usize, state: LinkState) {
    timeout(Duration::from_secs(2), async {
        while bridge.status()[index].state != state {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("peripheral {index} never reached {state}"));
}

#[tokio::test]
async fn failed_peripheral_does_not_block_the_other() {
    let (bridge, device_a, device_b) = two_node_bridge(false);
    bridge.connect_all().await;
    wait_for_state(&bridge, 0, LinkState::Connected).await;
    wait_for_state(&bridge, 1, LinkState::Connected).await;

    assert_eq!(
        bridge.forward(0x11, Bytes::from_static(&[90])),
        Forward::Queued { peripheral: 0 }
    );
    let frame = device_a.next_write().await.unwrap();
    assert_eq!((frame.identifier, frame.payload.as_ref()), (0x01, &[90u8][..]));

    device_a.disconnect();
    timeout(Duration::from_secs(2), async {
        while bridge.status()[0].state == LinkState::Connected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(
        bridge.forward(0x11, Bytes::from_static(&[10])),
        Forward::Unavailable { peripheral: 0 }
    );
    assert_eq!(
        bridge.forward(0x12, Bytes::from_static(&[45])),
        Forward::Queued { peripheral: 1 }
    );
    let frame = device_b.next_write().await.unwrap();
    assert_eq!((frame.identifier, frame.payload.as_ref()), (0x01, &[45u8][..]));

    let (outbox, mut upstream) = Outbox::channel(8);
    bridge.set_upstream(Some(outbox));
    device_b.notify(0x21, &[1, 2, 3]);
    let telemetry = timeout(Duration::from_secs(2), upstream.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(telemetry.identifier, 0x21);
    assert_eq!(telemetry.payload.as_ref(), &[1, 2, 3]);

    device_a.come_online();
    wait_for_state(&bridge, 0, LinkState::Connected).await;
    assert_eq!(
        bridge.forward(0x11, Bytes::from_static(&[120])),
        Forward::Queued { peripheral: 0 }
    );
    let frame = device_a.next_write().await.unwrap();
    assert_eq!(frame.payload.as_ref(), &[120]);

    bridge.shutdown().await;
    assert!(bridge
        .status()
        .iter()
        .all(|status| status.state == LinkState::Disconnected));
}

#[tokio::test]
async fn setup_and_reconfigure_reach_every_peripheral() {
    let (bridge, device_a, device_b) = two_node_bridge(true);
    bridge.on_control(ControlCommand::ConnectPeripherals).await;

    for device in [&device_a, &device_b] {
        let frame = timeout(Duration::from_secs(2), device.next_write())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame.identifier, CONTROL);
        assert_eq!(frame.payload.as_ref(), &[PERIPHERAL_SETUP]);
    }

    bridge.on_control(ControlCommand::Reconfigure).await;
    for device in [&device_a, &device_b] {
        let frame = timeout(Duration::from_secs(2), device.next_write())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame.identifier, CONTROL);
        assert_eq!(frame.payload.as_ref(), &[PERIPHERAL_RECONFIGURE]);
    }

    // Peripheral control frames are not relayed to the host.
    let (outbox, mut upstream) = Outbox::channel(8);
    bridge.set_upstream(Some(outbox));
    device_a.notify(CONTROL, &[7]);
    device_a.notify(0x30, &[1]);
    let telemetry = timeout(Duration::from_secs(2), upstream.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(telemetry.identifier, 0x30);

    bridge.on_control(ControlCommand::Shutdown).await;
    assert_eq!(bridge.status()[1].state, LinkState::Disconnected);
}

#[tokio::test]
async fn unrouted_records_are_left_to_the_session() {
    let (bridge, _device_a, _device_b) = two_node_bridge(false);
    assert!(!bridge.on_unregistered(0x40, &Bytes::from_static(&[1])).await);
    assert!(bridge.on_unregistered(0x11, &Bytes::from_static(&[1])).await);
}
