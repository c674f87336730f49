//! Discovery of the sample rates the attached audio hardware supports.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::{AppConfig, CommandRunner, ToolError};

/// Rates offered when nothing better is known, and the candidates tested
/// against `{min, max}` ranges.
pub const COMMON_RATES: [u32; 6] = [44_100, 48_000, 88_200, 96_000, 176_400, 192_000];

/// `type` value identifying a node object in the dump.
pub const NODE_INTERFACE: &str = "PipeWire:Interface:Node";

const MEDIA_CLASS_KEY: &str = "media.class";
const AUDIO_CLASSES: [&str; 2] = ["Audio/Sink", "Audio/Source"];

/// Ascending, duplicate-free, never-empty list of sample rates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilitySet {
    rates: Vec<u32>,
}

impl CapabilitySet {
    pub fn fallback() -> Self {
        Self {
            rates: COMMON_RATES.to_vec(),
        }
    }

    /// Builds a set from detected rates, substituting the fallback catalogue
    /// when nothing was detected.
    pub fn from_detected(rates: BTreeSet<u32>) -> Self {
        if rates.is_empty() {
            Self::fallback()
        } else {
            Self {
                rates: rates.into_iter().collect(),
            }
        }
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.rates
    }

    pub fn contains(&self, rate: u32) -> bool {
        self.rates.binary_search(&rate).is_ok()
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.rates.iter().copied()
    }
}

impl Default for CapabilitySet {
    fn default() -> Self {
        Self::fallback()
    }
}

/// Runs the dump tool and derives a [`CapabilitySet`] from its output.
pub struct CapabilityProber {
    runner: Arc<dyn CommandRunner>,
    program: String,
    timeout: Duration,
}

impl CapabilityProber {
    pub fn new(config: &AppConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            program: config.tools.dump.clone(),
            timeout: config.command_timeout,
        }
    }

    /// Never fails: any tool or parse problem yields the fallback catalogue.
    pub fn probe(&self) -> CapabilitySet {
        match self.detect() {
            Ok(rates) if rates.is_empty() => {
                tracing::info!("no audio node advertised a sample rate, using common rates");
                CapabilitySet::fallback()
            }
            Ok(rates) => {
                let set = CapabilitySet::from_detected(rates);
                tracing::debug!(rates = ?set.as_slice(), "detected hardware sample rates");
                set
            }
            Err(err) => {
                tracing::warn!(error = %err, kind = err.kind(), "capability probe failed, using common rates");
                CapabilitySet::fallback()
            }
        }
    }

    /// Raw detection result, keeping the reason a probe failed.
    pub fn detect(&self) -> Result<BTreeSet<u32>, ToolError> {
        let output = self.runner.run(&self.program, &[], self.timeout)?;
        let descriptors: Vec<Value> = serde_json::from_str(&output.stdout)
            .map_err(|err| ToolError::bad_output(&self.program, err.to_string()))?;
        Ok(extract_rates(&descriptors))
    }
}

/// Collects the rates advertised by audio sink and source nodes.
pub fn extract_rates(descriptors: &[Value]) -> BTreeSet<u32> {
    let mut rates = BTreeSet::new();

    for descriptor in descriptors.iter().filter(|d| is_audio_node(d)) {
        let formats = descriptor
            .pointer("/info/params/EnumFormat")
            .and_then(Value::as_array);

        for format in formats.into_iter().flatten() {
            collect_format_rates(format, &mut rates);
        }
    }

    rates
}

fn is_audio_node(descriptor: &Value) -> bool {
    if descriptor.get("type").and_then(Value::as_str) != Some(NODE_INTERFACE) {
        return false;
    }

    let media_class = descriptor
        .get("info")
        .and_then(|info| info.get("props"))
        .and_then(|props| props.get(MEDIA_CLASS_KEY))
        .and_then(Value::as_str)
        .unwrap_or_default();

    AUDIO_CLASSES.iter().any(|class| media_class.contains(class))
}

fn collect_format_rates(format: &Value, rates: &mut BTreeSet<u32>) {
    match format.get("rate") {
        Some(Value::Number(number)) => {
            if let Some(rate) = positive_rate(number.as_u64()) {
                rates.insert(rate);
            }
        }
        Some(Value::Object(range)) => {
            let min = range_bound(range.get("min"));
            let max = range_bound(range.get("max"));
            if let (Some(min), Some(max)) = (min, max) {
                rates.extend(
                    COMMON_RATES
                        .iter()
                        .filter(|r| (min..=max).contains(&f64::from(**r))),
                );
            }
        }
        _ => {}
    }
}

/// Range bounds may be written as floats; any positive number counts.
fn range_bound(value: Option<&Value>) -> Option<f64> {
    value
        .and_then(Value::as_f64)
        .filter(|v| *v > 0.0)
}

fn positive_rate(value: Option<u64>) -> Option<u32> {
    value
        .and_then(|v| u32::try_from(v).ok())
        .filter(|v| *v > 0)
}
