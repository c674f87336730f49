//! Reading and forcing the audio server's clock through `pw-metadata`.

use std::sync::Arc;
use std::time::Duration;

use crate::{AppConfig, CommandRunner, ToolError};

const METADATA_NAMESPACE: &str = "settings";
const METADATA_SUBJECT: &str = "0";

/// Clock metadata keys this controller forces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockKey {
    ForceRate,
    ForceQuantum,
}

impl ClockKey {
    pub fn as_str(self) -> &'static str {
        match self {
            ClockKey::ForceRate => "clock.force-rate",
            ClockKey::ForceQuantum => "clock.force-quantum",
        }
    }
}

/// Thin wrapper over the metadata and device-status tools.
///
/// The public methods never fail; `try_*` variants keep the reason for
/// callers that want to log it.
pub struct ClockController {
    runner: Arc<dyn CommandRunner>,
    metadata: String,
    status: String,
    timeout: Duration,
}

impl ClockController {
    pub fn new(config: &AppConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            metadata: config.tools.metadata.clone(),
            status: config.tools.status.clone(),
            timeout: config.command_timeout,
        }
    }

    pub fn set_rate(&self, rate: u32) -> bool {
        self.set(ClockKey::ForceRate, rate)
    }

    pub fn set_quantum(&self, size: u32) -> bool {
        self.set(ClockKey::ForceQuantum, size)
    }

    pub fn get_rate(&self) -> Option<u32> {
        self.get(ClockKey::ForceRate)
    }

    pub fn get_quantum(&self) -> Option<u32> {
        self.get(ClockKey::ForceQuantum)
    }

    /// Line describing the currently selected sink, for display only.
    pub fn device_info(&self) -> Option<String> {
        match self.runner.run(&self.status, &["status"], self.timeout) {
            Ok(output) => find_default_sink(&output.stdout),
            Err(err) => {
                tracing::debug!(error = %err, kind = err.kind(), "device status unavailable");
                None
            }
        }
    }

    pub fn try_set(&self, key: ClockKey, value: u32) -> Result<(), ToolError> {
        let value = value.to_string();
        self.runner.run(
            &self.metadata,
            &["-n", METADATA_NAMESPACE, METADATA_SUBJECT, key.as_str(), value.as_str()],
            self.timeout,
        )?;
        Ok(())
    }

    pub fn try_get(&self, key: ClockKey) -> Result<Option<u32>, ToolError> {
        let output = self
            .runner
            .run(&self.metadata, &["-n", METADATA_NAMESPACE], self.timeout)?;
        parse_metadata_value(&output.stdout, key.as_str())
            .map_err(|reason| ToolError::bad_output(&self.metadata, reason))
    }

    fn set(&self, key: ClockKey, value: u32) -> bool {
        match self.try_set(key, value) {
            Ok(()) => {
                tracing::info!(key = key.as_str(), value, "clock metadata updated");
                true
            }
            Err(err) => {
                tracing::warn!(key = key.as_str(), value, error = %err, kind = err.kind(), "failed to update clock metadata");
                false
            }
        }
    }

    fn get(&self, key: ClockKey) -> Option<u32> {
        self.try_get(key).unwrap_or_else(|err| {
            tracing::debug!(key = key.as_str(), error = %err, kind = err.kind(), "failed to read clock metadata");
            None
        })
    }
}

/// Extracts `V` from the first `key='K' value='V' type='T'` line naming `key`.
///
/// The value is the fourth field when the line is split on `'`. Lines with
/// too few fields are skipped; a non-numeric value is an error.
pub fn parse_metadata_value(output: &str, key: &str) -> Result<Option<u32>, String> {
    for line in output.lines().filter(|line| line.contains(key)) {
        let fields: Vec<&str> = line.split('\'').collect();
        if let Some(value) = fields.get(3) {
            return value
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| format!("non-numeric value {value:?} for {key}"));
        }
    }
    Ok(None)
}

fn find_default_sink(status: &str) -> Option<String> {
    status
        .lines()
        .find(|line| line.contains("* ") && line.contains("Sink"))
        .map(|line| line.trim().to_string())
}
