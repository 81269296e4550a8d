use std::time::Duration;

use telelink_frame::CONTROL;
use telelink_link::{Link, StreamConfig, StreamLink};
use telelink_session::ControlCommand;
use tracing::info;

use crate::cmd::SendArgs;
use crate::exit::{link_error, CliError, CliResult, SUCCESS, USAGE};

pub async fn run(args: SendArgs) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let (identifier, payload) = match (args.command, args.id) {
        (Some(command), _) => (CONTROL, command.payload().to_vec()),
        (None, Some(id)) => (id, parse_hex(args.hex.as_deref().unwrap_or(""))?),
        (None, None) => return Err(CliError::new(USAGE, "either --id or --command is required")),
    };

    let link = StreamLink::client(args.address).with_config(StreamConfig {
        connect_timeout: Some(timeout),
        ..StreamConfig::default()
    });
    let endpoints = link
        .connect()
        .await
        .map_err(|err| link_error("connect failed", err))?;
    let sent = link.send(identifier, &payload).await;
    link.close().await;
    sent.map_err(|err| link_error("send failed", err))?;

    info!(%endpoints, identifier = %format_args!("{identifier:#04x}"), size = payload.len(), "frame sent");
    Ok(SUCCESS)
}

pub fn parse_identifier(input: &str) -> Result<u8, String> {
    let input = input.trim();
    let parsed = match input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
    {
        Some(digits) => u8::from_str_radix(digits, 16),
        None => input.parse(),
    };
    parsed.map_err(|_| format!("invalid identifier {input:?}: expected 0-255 or 0x00-0xff"))
}

pub fn parse_command(input: &str) -> Result<ControlCommand, String> {
    ControlCommand::ALL
        .into_iter()
        .find(|command| command.to_string() == input.trim().replace('-', "_"))
        .ok_or_else(|| {
            let names: Vec<String> = ControlCommand::ALL.iter().map(|c| c.to_string()).collect();
            format!("unknown command {input:?}: expected one of {}", names.join(", "))
        })
}

fn parse_hex(input: &str) -> CliResult<Vec<u8>> {
    let digits: String = input
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();
    hex::decode(&digits)
        .map_err(|err| CliError::new(USAGE, format!("--hex is not valid hex ({err}): {input}")))
}

fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_accept_decimal_and_hex() {
        assert_eq!(parse_identifier("17"), Ok(17));
        assert_eq!(parse_identifier("0x11"), Ok(0x11));
        assert_eq!(parse_identifier("0XFF"), Ok(0xFF));
        assert!(parse_identifier("256").is_err());
        assert!(parse_identifier("0xzz").is_err());
    }

    #[test]
    fn commands_parse_by_name() {
        assert_eq!(parse_command("shutdown"), Ok(ControlCommand::Shutdown));
        assert_eq!(
            parse_command("connect-peripherals"),
            Ok(ControlCommand::ConnectPeripherals)
        );
        assert!(parse_command("reboot").is_err());
    }

    #[test]
    fn hex_payloads() {
        assert_eq!(parse_hex("5a00ff").unwrap(), vec![0x5A, 0x00, 0xFF]);
        assert_eq!(parse_hex("5a:00 ff").unwrap(), vec![0x5A, 0x00, 0xFF]);
        assert_eq!(parse_hex("").unwrap(), Vec::<u8>::new());
        assert_eq!(parse_hex("abc").unwrap_err().code, USAGE);
        assert_eq!(parse_hex("zz").unwrap_err().code, USAGE);
    }

    #[test]
    fn durations() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("3s").unwrap(), Duration::from_secs(3));
        assert_eq!(parse_duration("2").unwrap(), Duration::from_secs(2));
        assert!(parse_duration("0s").is_err());
    }
}
