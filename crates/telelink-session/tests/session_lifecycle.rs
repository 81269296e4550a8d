//! Session teardown under link failure, over a scripted link and over TCP.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use telelink_frame::{Frame, CONTROL};
use telelink_link::{Endpoints, Link, LinkError, LinkState, RetryPolicy, Role, StreamLink};
use telelink_record::{ElementType, RecordRegistry};
use telelink_session::{
    ControlCommand, EndReason, FieldSupervisor, HostSupervisor, InboundHandler, ScheduleConfig,
    ScheduleEntry, Session, SessionConfig, SessionError, SessionState,
};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Link whose inbound side is fed by the test and whose sends never finish.
struct ScriptedLink {
    state: Mutex<LinkState>,
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<Result<Frame, LinkError>>>,
    closes: AtomicUsize,
}

impl ScriptedLink {
    fn connected() -> (Arc<Self>, mpsc::UnboundedSender<Result<Frame, LinkError>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let link = Arc::new(Self {
            state: Mutex::new(LinkState::Connected),
            inbound: tokio::sync::Mutex::new(rx),
            closes: AtomicUsize::new(0),
        });
        (link, tx)
    }

    fn set_state(&self, state: LinkState) {
        *self.state.lock().unwrap() = state;
    }
}

#[async_trait]
impl Link for ScriptedLink {
    async fn connect(&self) -> telelink_link::Result<Endpoints> {
        self.set_state(LinkState::Connected);
        Ok(Endpoints {
            local: "scripted".into(),
            remote: "scripted".into(),
        })
    }

    async fn send(&self, _identifier: u8, _payload: &[u8]) -> telelink_link::Result<()> {
        std::future::pending().await
    }

    async fn receive(&self) -> telelink_link::Result<Frame> {
        let next = self.inbound.lock().await.recv().await;
        match next {
            Some(Ok(frame)) => Ok(frame),
            Some(Err(err)) => {
                self.set_state(LinkState::Faulted);
                Err(err)
            }
            None => std::future::pending().await,
        }
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.set_state(LinkState::Disconnected);
    }

    fn state(&self) -> LinkState {
        *self.state.lock().unwrap()
    }

    fn role(&self) -> Role {
        Role::Client
    }

    fn address(&self) -> &str {
        "scripted"
    }
}

fn busy_config() -> SessionConfig {
    SessionConfig {
        schedule: ScheduleConfig {
            tick_ms: 5,
            entries: vec![ScheduleEntry {
                identifier: 0x01,
                every: 1,
            }],
        },
        media_interval_ms: 5,
        ..SessionConfig::default()
    }
}

fn servo_registry() -> Arc<RecordRegistry> {
    let registry = Arc::new(RecordRegistry::new());
    registry.define(0x01, ElementType::Uint8, 2).unwrap();
    registry
}

#[tokio::test]
async fn fault_ends_session_while_sends_are_stuck() {
    let (link, script) = ScriptedLink::connected();
    let (media_tx, media_rx) = mpsc::channel(4);
    media_tx.send(Bytes::from_static(&[0xAB; 16])).await.unwrap();

    let session = Session::new(link.clone(), servo_registry(), busy_config()).with_media(media_rx);
    let mut states = session.watch_state();
    let running = tokio::spawn(session.run());

    // Let the outbound and media loops block inside send.
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(*states.borrow_and_update(), SessionState::Active);

    script
        .send(Err(LinkError::LinkFaulted("reset by peer".into())))
        .unwrap();

    let report = timeout(Duration::from_secs(2), running)
        .await
        .expect("session must end promptly")
        .unwrap();
    assert!(matches!(report.reason, EndReason::Faulted(LinkError::LinkFaulted(_))));
    assert!(report.reason.is_recoverable());
    assert_eq!(report.sent, 0);
    assert_eq!(*states.borrow(), SessionState::Closed);
    assert_eq!(link.state(), LinkState::Disconnected);
    assert!(link.closes.load(Ordering::SeqCst) >= 1);
    drop(media_tx);
}

#[tokio::test]
async fn peer_close_is_recoverable() {
    let (link, script) = ScriptedLink::connected();
    let session = Session::new(link.clone(), servo_registry(), busy_config());
    script.send(Err(LinkError::ConnectionClosed)).unwrap();

    let report = timeout(Duration::from_secs(2), session.run()).await.unwrap();
    assert!(matches!(report.reason, EndReason::PeerClosed));
    assert!(report.reason.is_recoverable());
}

#[derive(Default)]
struct Recorder {
    commands: Mutex<Vec<ControlCommand>>,
}

#[async_trait]
impl InboundHandler for Recorder {
    async fn on_control(&self, command: ControlCommand) {
        self.commands.lock().unwrap().push(command);
    }
}

#[tokio::test]
async fn shutdown_command_reaches_handler_then_ends_session() {
    let (link, script) = ScriptedLink::connected();
    let recorder = Arc::new(Recorder::default());
    let session = Session::new(link, servo_registry(), SessionConfig::default())
        .with_handler(recorder.clone());

    script.send(Ok(Frame::new(CONTROL, vec![3u8]))).unwrap();
    script.send(Ok(Frame::new(CONTROL, vec![0u8]))).unwrap();

    let report = timeout(Duration::from_secs(2), session.run()).await.unwrap();
    assert!(matches!(report.reason, EndReason::Shutdown));
    assert!(!report.reason.is_recoverable());
    assert_eq!(
        *recorder.commands.lock().unwrap(),
        vec![ControlCommand::Reconfigure, ControlCommand::Shutdown]
    );
}

#[tokio::test]
async fn parent_cancel_stops_session() {
    let (link, _script) = ScriptedLink::connected();
    let parent = CancellationToken::new();
    let session =
        Session::new(link, servo_registry(), busy_config()).with_parent(&parent);
    let running = tokio::spawn(session.run());

    tokio::time::sleep(Duration::from_millis(20)).await;
    parent.cancel();
    let report = timeout(Duration::from_secs(2), running).await.unwrap().unwrap();
    assert!(matches!(report.reason, EndReason::Cancelled));
}

struct Collect(mpsc::UnboundedSender<(u8, Vec<i64>)>);

#[async_trait]
impl InboundHandler for Collect {
    async fn on_record(&self, identifier: u8, _payload: &Bytes, values: &[i64]) {
        let _ = self.0.send((identifier, values.to_vec()));
    }
}

#[tokio::test]
async fn host_and_field_exchange_records_over_tcp() {
    let field_registry = servo_registry();
    let (records_tx, mut records_rx) = mpsc::unbounded_channel();
    let field = Arc::new(
        FieldSupervisor::bind("127.0.0.1:0", field_registry, SessionConfig::default())
            .await
            .unwrap()
            .with_handler(Arc::new(Collect(records_tx))),
    );
    let addr = field.local_addr().unwrap();
    let field_task = tokio::spawn({
        let field = Arc::clone(&field);
        async move { field.run().await }
    });

    let host_registry = servo_registry();
    let servo = host_registry.handle(0x01).unwrap();
    host_registry.update(servo, &[7, 9]).unwrap();
    let host_link: Arc<dyn Link> = Arc::new(StreamLink::client(addr.to_string()));
    let host = Arc::new(HostSupervisor::new(
        host_link,
        host_registry,
        SessionConfig {
            schedule: ScheduleConfig {
                tick_ms: 20,
                entries: vec![ScheduleEntry {
                    identifier: 0x01,
                    every: 1,
                }],
            },
            ..SessionConfig::default()
        },
        RetryPolicy::fixed(Duration::from_millis(50)),
    ));
    let mut outboxes = host.outboxes();
    let host_task = tokio::spawn({
        let host = Arc::clone(&host);
        async move { host.run().await }
    });

    let (identifier, values) = timeout(Duration::from_secs(2), records_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(identifier, 0x01);
    assert_eq!(values, vec![7, 9]);

    let outbox = timeout(
        Duration::from_secs(2),
        outboxes.wait_for(|outbox| outbox.is_some()),
    )
    .await
    .unwrap()
    .unwrap()
    .clone()
    .unwrap();
    outbox.command(ControlCommand::Shutdown).await.unwrap();

    let summary = timeout(Duration::from_secs(2), field_task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(summary.sessions, 1);
    assert!(matches!(
        summary.last.map(|report| report.reason),
        Some(EndReason::Shutdown)
    ));

    host.cancel_token().cancel();
    let host_summary = timeout(Duration::from_secs(2), host_task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(host_summary.sessions >= 1);
}

#[tokio::test]
async fn host_surfaces_initial_connect_failure() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let link: Arc<dyn Link> = Arc::new(StreamLink::client(addr.to_string()));
    let host = HostSupervisor::new(
        link,
        servo_registry(),
        SessionConfig::default(),
        RetryPolicy::fixed(Duration::from_millis(10)),
    );
    let result = timeout(Duration::from_secs(6), host.run()).await.unwrap();
    assert!(matches!(
        result,
        Err(SessionError::Link(LinkError::ConnectionRefused { .. }))
    ));
}

#[tokio::test]
async fn host_reconnects_after_field_drops_connection() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let link: Arc<dyn Link> = Arc::new(StreamLink::client(addr.to_string()));
    let host = Arc::new(HostSupervisor::new(
        link,
        servo_registry(),
        SessionConfig::default(),
        RetryPolicy::fixed(Duration::from_millis(50)),
    ));
    let cancel = host.cancel_token();
    let running = tokio::spawn({
        let host = Arc::clone(&host);
        async move { host.run().await }
    });

    let (first, _) = timeout(Duration::from_secs(2), listener.accept())
        .await
        .expect("host should connect")
        .unwrap();
    drop(first);

    let (_second, _) = timeout(Duration::from_secs(2), listener.accept())
        .await
        .expect("host should reconnect after the field unit hangs up")
        .unwrap();
    let mut outboxes = host.outboxes();
    timeout(Duration::from_secs(2), outboxes.wait_for(Option::is_some))
        .await
        .expect("second session should start")
        .unwrap();

    cancel.cancel();
    let summary = timeout(Duration::from_secs(2), running)
        .await
        .expect("host should stop on cancel")
        .unwrap()
        .expect("reconnect path must not surface an error");
    assert_eq!(summary.sessions, 2);
    assert!(matches!(
        summary.last.map(|report| report.reason),
        Some(EndReason::Cancelled)
    ));
}
