use std::fmt;
use std::io;
use std::path::Path;

use telelink_link::LinkError;
use telelink_record::RecordError;
use telelink_session::SessionError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound => USAGE,
        io::ErrorKind::ConnectionRefused | io::ErrorKind::AddrInUse => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn link_error(context: &str, err: LinkError) -> CliError {
    let code = match &err {
        LinkError::Timeout { .. } => TIMEOUT,
        LinkError::PayloadTooLarge { .. } => DATA_INVALID,
        LinkError::Cancelled => FAILURE,
        LinkError::ConnectionRefused { .. }
        | LinkError::Connect { .. }
        | LinkError::ConnectionClosed
        | LinkError::Truncated { .. }
        | LinkError::LinkFaulted(_)
        | LinkError::NotConnected => TRANSPORT_ERROR,
        LinkError::AlreadyConnected => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn record_error(context: &str, err: RecordError) -> CliError {
    CliError::new(DATA_INVALID, format!("{context}: {err}"))
}

pub fn session_error(context: &str, err: SessionError) -> CliError {
    match err {
        SessionError::Link(err) => link_error(context, err),
        SessionError::Record(err) => record_error(context, err),
        SessionError::Listener(err) => io_error(context, err),
        SessionError::Config(_) | SessionError::Routing(_) => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

/// Read and parse a JSON config document.
pub fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> CliResult<T> {
    let file = std::fs::File::open(path)
        .map_err(|err| io_error(&format!("failed opening {}", path.display()), err))?;
    serde_json::from_reader(io::BufReader::new(file)).map_err(|err| {
        CliError::new(
            DATA_INVALID,
            format!("{} is not a valid config: {err}", path.display()),
        )
    })
}
