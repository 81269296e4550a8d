use std::path::PathBuf;

use clap::{Args, Subcommand};
use tokio_util::sync::CancellationToken;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod field;
pub mod host;
pub mod listen;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the field unit: accept the host link and bridge peripherals.
    Field(FieldArgs),
    /// Run the host controller against a field unit.
    Host(HostArgs),
    /// Send a single frame.
    Send(SendArgs),
    /// Accept one peer and print received frames.
    Listen(ListenArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub async fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Field(args) => field::run(args, format).await,
        Command::Host(args) => host::run(args, format).await,
        Command::Send(args) => send::run(args).await,
        Command::Listen(args) => listen::run(args, format).await,
        Command::Version(args) => version::run(args),
    }
}

/// Token cancelled on Ctrl-C.
pub(crate) fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    let on_signal = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, stopping");
            on_signal.cancel();
        }
    });
    token
}

#[derive(Args, Debug)]
pub struct FieldArgs {
    /// JSON field unit configuration.
    #[arg(long, short = 'c', value_name = "FILE")]
    pub config: PathBuf,
    /// Override the listen address from the config.
    #[arg(long, value_name = "ADDR")]
    pub listen: Option<String>,
    /// Wait for the host's connect command before connecting peripherals.
    #[arg(long)]
    pub no_connect: bool,
}

#[derive(Args, Debug)]
pub struct HostArgs {
    /// JSON host configuration.
    #[arg(long, short = 'c', value_name = "FILE")]
    pub config: PathBuf,
    /// Override the field unit address from the config.
    #[arg(long, value_name = "ADDR")]
    pub address: Option<String>,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Address to connect to, `host:port`.
    pub address: String,
    /// Frame identifier (decimal or 0x-prefixed hex).
    #[arg(long, value_parser = send::parse_identifier, required_unless_present = "command")]
    pub id: Option<u8>,
    /// Payload as hex digits, e.g. `5a00ff`.
    #[arg(long, conflicts_with = "command")]
    pub hex: Option<String>,
    /// Send a control command instead of a record.
    #[arg(long, value_parser = send::parse_command, conflicts_with = "id")]
    pub command: Option<telelink_session::ControlCommand>,
    /// Connection timeout (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Address to bind, `host:port`.
    pub address: String,
    /// Exit after receiving N frames.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
