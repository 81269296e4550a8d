use std::io::IsTerminal;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use telelink_frame::{identifier_name, Frame};
use telelink_session::SupervisorSummary;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct FrameOutput<'a> {
    identifier: u8,
    kind: &'a str,
    payload_size: usize,
    payload: String,
    peer: &'a str,
    timestamp: String,
}

#[derive(Serialize)]
struct RecordOutput<'a> {
    identifier: u8,
    values: &'a [i64],
    timestamp: String,
}

#[derive(Serialize)]
struct SummaryOutput<'a> {
    role: &'a str,
    sessions: u32,
    last_reason: Option<String>,
    sent: u64,
    received: u64,
    dropped: u64,
}

pub fn print_frame(frame: &Frame, peer: &str, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&FrameOutput {
            identifier: frame.identifier,
            kind: identifier_name(frame.identifier),
            payload_size: frame.payload.len(),
            payload: hex::encode(&frame.payload),
            peer,
            timestamp: now_unix_seconds(),
        }),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["ID", "KIND", "SIZE", "PEER", "PAYLOAD"])
                .add_row(vec![
                    format!("{:#04x}", frame.identifier),
                    identifier_name(frame.identifier).to_string(),
                    frame.payload.len().to_string(),
                    peer.to_string(),
                    hex::encode(&frame.payload),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => println!(
            "id={:#04x} ({}) size={} peer={} payload={}",
            frame.identifier,
            identifier_name(frame.identifier),
            frame.payload.len(),
            peer,
            hex::encode(&frame.payload)
        ),
    }
}

pub fn print_record(identifier: u8, values: &[i64], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&RecordOutput {
            identifier,
            values,
            timestamp: now_unix_seconds(),
        }),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["RECORD", "VALUES"])
                .add_row(vec![format!("{identifier:#04x}"), join(values)]);
            println!("{table}");
        }
        OutputFormat::Pretty => println!("record={identifier:#04x} values=[{}]", join(values)),
    }
}

pub fn print_summary(role: &str, summary: &SupervisorSummary, format: OutputFormat) {
    let last = summary.last.as_ref();
    let out = SummaryOutput {
        role,
        sessions: summary.sessions,
        last_reason: last.map(|report| report.reason.to_string()),
        sent: last.map_or(0, |report| report.sent),
        received: last.map_or(0, |report| report.received),
        dropped: last.map_or(0, |report| report.dropped),
    };
    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["ROLE", "SESSIONS", "LAST END", "SENT", "RECEIVED", "DROPPED"])
                .add_row(vec![
                    out.role.to_string(),
                    out.sessions.to_string(),
                    out.last_reason.clone().unwrap_or_else(|| "-".to_string()),
                    out.sent.to_string(),
                    out.received.to_string(),
                    out.dropped.to_string(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => println!(
            "role={} sessions={} last={} sent={} received={} dropped={}",
            out.role,
            out.sessions,
            out.last_reason.as_deref().unwrap_or("-"),
            out.sent,
            out.received,
            out.dropped
        ),
    }
}

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn join(values: &[i64]) -> String {
    values
        .iter()
        .map(i64::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
