use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use telelink_link::{StreamConfig, StreamLink};
use telelink_record::RecordRegistry;
use telelink_session::{ControlCommand, HostConfig, HostSupervisor, InboundHandler};
use tracing::{debug, info};

use crate::cmd::{interrupt_token, HostArgs};
use crate::exit::{load_json, record_error, session_error, CliResult, SUCCESS};
use crate::output::{print_record, print_summary, OutputFormat};

/// Prints every record the field unit sends.
struct PrintRecords {
    format: OutputFormat,
}

#[async_trait]
impl InboundHandler for PrintRecords {
    async fn on_record(&self, identifier: u8, _payload: &Bytes, values: &[i64]) {
        print_record(identifier, values, self.format);
    }

    async fn on_control(&self, command: ControlCommand) {
        info!(%command, "field unit sent a control command");
    }

    async fn on_media(&self, payload: Bytes) {
        debug!(size = payload.len(), "media frame");
    }
}

pub async fn run(args: HostArgs, format: OutputFormat) -> CliResult<i32> {
    let mut config: HostConfig = load_json(&args.config)?;
    if let Some(address) = args.address {
        config.address = address;
    }
    config
        .validate()
        .map_err(|err| session_error("invalid host config", err))?;
    let registry = RecordRegistry::from_specs(&config.records)
        .map_err(|err| record_error("invalid record table", err))?;

    let link = StreamLink::client(config.address.clone()).with_config(StreamConfig {
        connect_timeout: Some(config.connect_timeout()),
        ..StreamConfig::default()
    });
    let cancel = interrupt_token();
    let supervisor = HostSupervisor::new(
        Arc::new(link),
        Arc::new(registry),
        config.session.clone(),
        config.retry.policy(),
    )
    .with_on_connect(config.on_connect.clone())
    .with_handler(Arc::new(PrintRecords { format }))
    .with_parent(&cancel);

    let summary = supervisor
        .run()
        .await
        .map_err(|err| session_error("host stopped", err))?;
    print_summary("host", &summary, format);
    Ok(SUCCESS)
}
