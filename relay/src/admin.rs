//! Slash commands typed into the chat and the relay tunables they adjust

use shared::{HOUSEKEEPING_MS, SWEEP_MS};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AdminError {
    #[error("Unknown command /{0}")]
    UnknownCommand(String),

    #[error("Usage: {0}")]
    Usage(&'static str),

    #[error("Unknown setting '{0}' (allowed: housekeeping_ms, latency_ms, sweep_ms)")]
    UnknownKey(String),

    #[error("Invalid value '{value}' for {key}")]
    InvalidValue { key: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    /// Restore the startup layout and resend the table to everyone
    Reset,
    /// Disconnect every participant with this name
    Boot(String),
    Set { key: String, value: u64 },
}

impl AdminCommand {
    /// Parses a chat line starting with `/`
    pub fn parse(text: &str) -> Result<Self, AdminError> {
        let body = text.trim().trim_start_matches('/');
        let (verb, rest) = match body.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (body, ""),
        };

        match verb {
            "reset" => Ok(AdminCommand::Reset),
            "boot" => {
                if rest.is_empty() {
                    return Err(AdminError::Usage("/boot <name>"));
                }
                Ok(AdminCommand::Boot(rest.to_string()))
            }
            "set" => {
                let mut parts = rest.split_whitespace();
                let (Some(key), Some(value), None) = (parts.next(), parts.next(), parts.next())
                else {
                    return Err(AdminError::Usage("/set <key> <value>"));
                };
                let value = value.parse().map_err(|_| AdminError::InvalidValue {
                    key: key.to_string(),
                    value: value.to_string(),
                })?;
                Ok(AdminCommand::Set {
                    key: key.to_string(),
                    value,
                })
            }
            other => Err(AdminError::UnknownCommand(other.to_string())),
        }
    }
}

/// Relay-wide settings; only `/set` changes them at runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tunables {
    /// Period of the outbound flush
    pub housekeeping_ms: u64,
    /// Minimum age of a relayed batch before it is flushed
    pub latency_ms: u64,
    /// Period of the full-state sweep
    pub sweep_ms: u64,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            housekeeping_ms: HOUSEKEEPING_MS,
            latency_ms: 0,
            sweep_ms: SWEEP_MS,
        }
    }
}

impl Tunables {
    pub const KEYS: [&'static str; 3] = ["housekeeping_ms", "latency_ms", "sweep_ms"];

    /// Changes one allow-listed setting; nothing changes on error
    pub fn set(&mut self, key: &str, value: u64) -> Result<(), AdminError> {
        let invalid = || AdminError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        };

        match key {
            "housekeeping_ms" if value == 0 => Err(invalid()),
            "housekeeping_ms" => {
                self.housekeeping_ms = value;
                Ok(())
            }
            "latency_ms" => {
                self.latency_ms = value;
                Ok(())
            }
            "sweep_ms" if value == 0 => Err(invalid()),
            "sweep_ms" => {
                self.sweep_ms = value;
                Ok(())
            }
            other => Err(AdminError::UnknownKey(other.to_string())),
        }
    }

    pub fn housekeeping(&self) -> Duration {
        Duration::from_millis(self.housekeeping_ms)
    }

    pub fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }

    pub fn sweep(&self) -> Duration {
        Duration::from_millis(self.sweep_ms)
    }
}

impl fmt::Display for Tunables {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "housekeeping_ms={} latency_ms={} sweep_ms={}",
            self.housekeeping_ms, self.latency_ms, self.sweep_ms
        )
    }
}
