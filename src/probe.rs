//! Service status probe for systemd units.
//!
//! Asks `systemctl show` for the unit's `ActiveState` and
//! `ActiveEnterTimestampMonotonic`, then subtracts the activation timestamp
//! from the kernel's monotonic uptime (`/proc/uptime`) to get how long the
//! unit has been running.

use crate::detector::{ProbeReading, ACTIVE_STATE};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

const ENTER_TIMESTAMP_KEY: &str = "ActiveEnterTimestampMonotonic";
const ACTIVE_STATE_KEY: &str = "ActiveState";

/// Errors that abort the current run: no decision is made, no state written.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("systemctl show {unit} timed out after {timeout:?}")]
    Timeout { unit: String, timeout: Duration },
    #[error("systemctl show failed: {status}: {stderr}")]
    CommandFailed { status: String, stderr: String },
    #[error("parse {key}={value:?}: {reason}")]
    Parse {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("missing {0} in systemctl output")]
    MissingField(&'static str),
    #[error("read {}: {source}", .path.display())]
    UptimeRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("unexpected uptime format in {}: {content:?}", .path.display())]
    UptimeFormat { path: PathBuf, content: String },
}

/// Narrow view of the supervisor: current uptime and state for a unit.
#[async_trait]
pub trait StatusProbe: Send + Sync {
    async fn read(&self, unit: &str) -> Result<ProbeReading, ProbeError>;
}

/// The two properties consumed from `systemctl show`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitProperties {
    /// Monotonic microseconds at which the unit last became active, 0 if never.
    pub active_enter_us: u64,
    pub active_state: String,
}

/// Probe backed by the `systemctl` binary and the kernel uptime file.
#[derive(Debug, Clone)]
pub struct SystemctlProbe {
    program: PathBuf,
    uptime_path: PathBuf,
    timeout: Duration,
}

impl SystemctlProbe {
    pub fn new(timeout: Duration) -> Self {
        Self {
            program: PathBuf::from("systemctl"),
            uptime_path: PathBuf::from("/proc/uptime"),
            timeout,
        }
    }

    /// Use a different `systemctl` executable.
    #[allow(dead_code)]
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Read kernel uptime from somewhere other than `/proc/uptime`.
    #[allow(dead_code)]
    pub fn with_uptime_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.uptime_path = path.into();
        self
    }

    /// Run `systemctl show`, killing it if it outlives the timeout.
    async fn show(&self, unit: &str) -> Result<String, ProbeError> {
        let program = self.program.display().to_string();
        tracing::debug!(%program, unit, timeout = ?self.timeout, "querying unit status");

        let output = Command::new(&self.program)
            .arg("show")
            .arg(unit)
            .args(["-p", ENTER_TIMESTAMP_KEY, "-p", ACTIVE_STATE_KEY])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, output).await {
            Ok(result) => result.map_err(|e| ProbeError::Spawn { program, source: e })?,
            Err(_) => {
                return Err(ProbeError::Timeout {
                    unit: unit.to_string(),
                    timeout: self.timeout,
                })
            }
        };

        if !output.status.success() {
            return Err(ProbeError::CommandFailed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl StatusProbe for SystemctlProbe {
    async fn read(&self, unit: &str) -> Result<ProbeReading, ProbeError> {
        let stdout = self.show(unit).await?;
        let props = parse_show_output(&stdout)?;

        if props.active_state != ACTIVE_STATE || props.active_enter_us == 0 {
            return Ok(ProbeReading {
                uptime_ms: 0,
                active_state: props.active_state,
            });
        }

        let boot_us = read_boot_uptime_us(&self.uptime_path)?;
        let uptime_us = boot_us.saturating_sub(props.active_enter_us);
        tracing::debug!(
            unit,
            boot_us,
            active_enter_us = props.active_enter_us,
            uptime_us,
            "computed unit uptime"
        );

        Ok(ProbeReading {
            uptime_ms: uptime_us / 1000,
            active_state: props.active_state,
        })
    }
}

/// Parse `Key=Value` lines from `systemctl show`. Unknown keys are ignored.
pub fn parse_show_output(output: &str) -> Result<UnitProperties, ProbeError> {
    let mut active_enter_us = None;
    let mut active_state = None;

    for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        match key {
            ENTER_TIMESTAMP_KEY => {
                let parsed = value.parse::<u64>().map_err(|e| ProbeError::Parse {
                    key: ENTER_TIMESTAMP_KEY,
                    value: value.to_string(),
                    reason: e.to_string(),
                })?;
                active_enter_us = Some(parsed);
            }
            ACTIVE_STATE_KEY => active_state = Some(value.to_string()),
            _ => {}
        }
    }

    let active_enter_us = active_enter_us.ok_or(ProbeError::MissingField(ENTER_TIMESTAMP_KEY))?;
    let active_state = active_state
        .filter(|s| !s.is_empty())
        .ok_or(ProbeError::MissingField(ACTIVE_STATE_KEY))?;

    Ok(UnitProperties {
        active_enter_us,
        active_state,
    })
}

/// Seconds since boot (first field of the uptime file) as microseconds.
fn read_boot_uptime_us(path: &Path) -> Result<u64, ProbeError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ProbeError::UptimeRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    let format_err = || ProbeError::UptimeFormat {
        path: path.to_path_buf(),
        content: contents.trim().to_string(),
    };

    let seconds: f64 = contents
        .split_whitespace()
        .next()
        .and_then(|field| field.parse().ok())
        .filter(|s: &f64| s.is_finite() && *s >= 0.0)
        .ok_or_else(format_err)?;

    Ok((seconds * 1_000_000.0) as u64)
}
