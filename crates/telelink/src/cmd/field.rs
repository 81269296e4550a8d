use std::sync::Arc;

use telelink_link::{Link, StreamConfig, StreamLink};
use telelink_record::RecordRegistry;
use telelink_session::{
    FieldConfig, FieldSupervisor, Peripheral, PeripheralBridge, RoutingTable,
};
use tracing::info;

use crate::cmd::{interrupt_token, FieldArgs};
use crate::exit::{load_json, record_error, session_error, CliResult, SUCCESS};
use crate::output::{print_summary, OutputFormat};

pub async fn run(args: FieldArgs, format: OutputFormat) -> CliResult<i32> {
    let mut config: FieldConfig = load_json(&args.config)?;
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    config
        .validate()
        .map_err(|err| session_error("invalid field config", err))?;
    let registry = RecordRegistry::from_specs(&config.records)
        .map_err(|err| record_error("invalid record table", err))?;

    let cancel = interrupt_token();
    let mut supervisor = FieldSupervisor::bind(&config.listen, Arc::new(registry), config.session.clone())
        .await
        .map_err(|err| session_error("bind failed", err))?
        .with_parent(&cancel);

    if !config.bridge.peripherals.is_empty() {
        let bridge = build_bridge(&config, &cancel)?;
        if !args.no_connect {
            bridge.connect_all().await;
        }
        supervisor = supervisor.with_bridge(bridge);
    }

    let summary = supervisor
        .run()
        .await
        .map_err(|err| session_error("field unit stopped", err))?;
    info!(sessions = summary.sessions, "field unit stopped");
    print_summary("field", &summary, format);
    Ok(SUCCESS)
}

fn build_bridge(
    config: &FieldConfig,
    cancel: &tokio_util::sync::CancellationToken,
) -> CliResult<PeripheralBridge> {
    let stream = StreamConfig {
        connect_timeout: Some(config.bridge.connect_timeout()),
        ..StreamConfig::default()
    };
    let peripherals = config
        .bridge
        .peripherals
        .iter()
        .map(|p| {
            let link: Arc<dyn Link> =
                Arc::new(StreamLink::client(p.address.clone()).with_config(stream.clone()));
            Peripheral::new(p.name.clone(), link)
        })
        .collect::<Vec<_>>();
    let routes = RoutingTable::from_config(&config.bridge.routes, peripherals.len())
        .map_err(|err| session_error("invalid routes", err))?;
    PeripheralBridge::new(peripherals, routes, &config.bridge, cancel)
        .map_err(|err| session_error("bridge setup failed", err))
}
