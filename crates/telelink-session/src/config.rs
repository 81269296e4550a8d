//! Structured configuration consumed by sessions, supervisors and bridges.
//!
//! Every struct deserializes with serde and fills missing fields with
//! defaults. Top-level configs expose `validate()`.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use telelink_frame::{CONTROL, MEDIA};
use telelink_link::RetryPolicy;
use telelink_record::RecordSpec;

use crate::control::ControlCommand;
use crate::error::{Result, SessionError};
use crate::outbox::DEFAULT_OUTBOX_CAPACITY;

/// Send `identifier` on every `every`-th tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub identifier: u8,
    #[serde(default = "default_every")]
    pub every: u32,
}

fn default_every() -> u32 {
    1
}

/// Outbound record cadence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Tick period in milliseconds.
    pub tick_ms: u64,
    pub entries: Vec<ScheduleEntry>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            tick_ms: 100,
            entries: Vec::new(),
        }
    }
}

impl ScheduleConfig {
    /// Tick period, never shorter than 1 ms. Configs that skip `validate`
    /// still get a usable timer.
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }

    /// Identifiers due on tick number `tick` (0-based).
    pub fn due(&self, tick: u64) -> impl Iterator<Item = u8> + '_ {
        self.entries
            .iter()
            .filter(move |entry| tick % u64::from(entry.every.max(1)) == 0)
            .map(|entry| entry.identifier)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tick_ms == 0 {
            return Err(SessionError::Config("schedule tick_ms must be > 0".into()));
        }
        for entry in &self.entries {
            if entry.identifier == MEDIA || entry.identifier == CONTROL {
                return Err(SessionError::Config(format!(
                    "schedule entry {:#04x} uses a reserved identifier",
                    entry.identifier
                )));
            }
            if entry.every == 0 {
                return Err(SessionError::Config(format!(
                    "schedule entry {:#04x} has every = 0",
                    entry.identifier
                )));
            }
        }
        Ok(())
    }
}

/// Per-session settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub schedule: ScheduleConfig,
    /// Minimum spacing between media frames in milliseconds.
    pub media_interval_ms: u64,
    pub outbox_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            schedule: ScheduleConfig::default(),
            media_interval_ms: 100,
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
        }
    }
}

impl SessionConfig {
    pub fn media_interval(&self) -> Duration {
        Duration::from_millis(self.media_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        self.schedule.validate()?;
        if self.outbox_capacity == 0 {
            return Err(SessionError::Config("outbox_capacity must be > 0".into()));
        }
        Ok(())
    }
}

/// Reconnect delay settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub delay_ms: u64,
    /// Upper bound for the doubling delay. Equal to `delay_ms` (or unset)
    /// means a fixed delay.
    pub max_delay_ms: Option<u64>,
    /// Total attempts per outage. `None` retries until cancelled.
    pub max_attempts: Option<u32>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            delay_ms: 2_500,
            max_delay_ms: None,
            max_attempts: None,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        let delay = Duration::from_millis(self.delay_ms);
        let policy = match self.max_delay_ms {
            Some(max) => RetryPolicy::exponential(delay, Duration::from_millis(max)),
            None => RetryPolicy::fixed(delay),
        };
        match self.max_attempts {
            Some(attempts) => policy.with_max_attempts(attempts),
            None => policy,
        }
    }
}

/// One peripheral node reachable from the field unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeripheralConfig {
    pub name: String,
    pub address: String,
}

/// Host identifier → (peripheral index, peripheral identifier).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
    pub host_identifier: u8,
    pub peripheral: usize,
    pub peripheral_identifier: u8,
}

/// Peripheral bridge settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub peripherals: Vec<PeripheralConfig>,
    pub routes: Vec<RouteConfig>,
    pub retry: RetryConfig,
    pub connect_timeout_ms: u64,
    /// Settle time between a peripheral connecting and its setup record.
    pub setup_delay_ms: u64,
    /// Send the setup record after every (re)connect.
    pub setup_on_connect: bool,
    /// Frames queued per peripheral before new ones are dropped.
    pub queue_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            peripherals: Vec::new(),
            routes: Vec::new(),
            retry: RetryConfig::default(),
            connect_timeout_ms: 10_000,
            setup_delay_ms: 2_000,
            setup_on_connect: true,
            queue_capacity: 32,
        }
    }
}

impl BridgeConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn setup_delay(&self) -> Duration {
        Duration::from_millis(self.setup_delay_ms)
    }

    pub fn validate(&self) -> Result<()> {
        for (index, peripheral) in self.peripherals.iter().enumerate() {
            if self.peripherals[..index]
                .iter()
                .any(|other| other.name == peripheral.name)
            {
                return Err(SessionError::Config(format!(
                    "duplicate peripheral name {:?}",
                    peripheral.name
                )));
            }
        }
        if self.queue_capacity == 0 {
            return Err(SessionError::Config("queue_capacity must be > 0".into()));
        }
        crate::routing::RoutingTable::from_config(&self.routes, self.peripherals.len())?;
        Ok(())
    }
}

/// Host controller settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Field unit address, `host:port`.
    pub address: String,
    pub connect_timeout_ms: u64,
    pub records: Vec<RecordSpec>,
    pub session: SessionConfig,
    pub retry: RetryConfig,
    /// Commands sent at the start of every session.
    pub on_connect: Vec<ControlCommand>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:5000".to_string(),
            connect_timeout_ms: 5_000,
            records: Vec::new(),
            session: SessionConfig::default(),
            retry: RetryConfig::default(),
            on_connect: Vec::new(),
        }
    }
}

impl HostConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.address.is_empty() {
            return Err(SessionError::Config("host address is empty".into()));
        }
        validate_records(&self.records)?;
        validate_schedule_records(&self.session, &self.records)?;
        self.session.validate()
    }
}

/// Field unit settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldConfig {
    /// Listen address for the host link, `host:port`.
    pub listen: String,
    pub records: Vec<RecordSpec>,
    pub session: SessionConfig,
    pub bridge: BridgeConfig,
}

impl Default for FieldConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:5000".to_string(),
            records: Vec::new(),
            session: SessionConfig::default(),
            bridge: BridgeConfig::default(),
        }
    }
}

impl FieldConfig {
    pub fn validate(&self) -> Result<()> {
        if self.listen.is_empty() {
            return Err(SessionError::Config("listen address is empty".into()));
        }
        validate_records(&self.records)?;
        validate_schedule_records(&self.session, &self.records)?;
        self.session.validate()?;
        self.bridge.validate()
    }
}

fn validate_records(records: &[RecordSpec]) -> Result<()> {
    for (index, spec) in records.iter().enumerate() {
        if spec.identifier == MEDIA {
            return Err(SessionError::Config(
                "record identifier 0x00 is reserved for media".into(),
            ));
        }
        if spec.length == 0 {
            return Err(SessionError::Config(format!(
                "record {:#04x} has length 0",
                spec.identifier
            )));
        }
        if records[..index]
            .iter()
            .any(|other| other.identifier == spec.identifier)
        {
            return Err(SessionError::Config(format!(
                "record {:#04x} defined twice",
                spec.identifier
            )));
        }
    }
    Ok(())
}

fn validate_schedule_records(session: &SessionConfig, records: &[RecordSpec]) -> Result<()> {
    for entry in &session.schedule.entries {
        if !records.iter().any(|spec| spec.identifier == entry.identifier) {
            return Err(SessionError::Config(format!(
                "schedule entry {:#04x} has no record definition",
                entry.identifier
            )));
        }
    }
    Ok(())
}
