//! Orchestration of stored preferences, hardware capabilities and the live
//! clock.

use std::sync::Arc;

use crate::{
    AppConfig, CapabilityProber, CapabilitySet, ClockController, CommandRunner, LoadOrigin,
    Preferences, SettingsStore,
};

/// Buffer sizes offered to the user, in frames.
pub const BUFFER_SIZES: [u32; 7] = [32, 64, 128, 256, 512, 1024, 2048];

/// Which halves of an apply reached the audio server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyReport {
    pub rate_applied: bool,
    pub quantum_applied: bool,
}

impl ApplyReport {
    pub fn is_complete(&self) -> bool {
        self.rate_applied && self.quantum_applied
    }
}

/// Clock values as the audio server currently reports them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveState {
    pub rate: Option<u32>,
    pub quantum: Option<u32>,
    pub device: Option<String>,
}

/// Keeps the persisted [`Preferences`] and the audio server in step.
///
/// Not meant for concurrent callers; change requests are expected one at a
/// time.
pub struct ReconciliationEngine {
    store: SettingsStore,
    prober: CapabilityProber,
    clock: ClockController,
    preferences: Preferences,
    capabilities: CapabilitySet,
}

impl ReconciliationEngine {
    /// Builds the engine without touching disk or the audio server.
    pub fn new(config: &AppConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            store: SettingsStore::new(config),
            prober: CapabilityProber::new(config, runner.clone()),
            clock: ClockController::new(config, runner),
            preferences: config.defaults,
            capabilities: CapabilitySet::fallback(),
        }
    }

    /// Loads preferences, probes the hardware and applies the stored values.
    ///
    /// The stored rate is applied even when the probe does not list it. A
    /// failed apply is logged and reported; the engine is usable either way.
    pub fn initialize(&mut self) -> ApplyReport {
        let (preferences, origin) = self.store.load_with_origin();
        self.preferences = preferences;
        if origin == LoadOrigin::Defaulted {
            self.store.save(&self.preferences);
        }

        self.capabilities = self.prober.probe();
        if !self.capabilities.contains(preferences.sample_rate) {
            tracing::info!(
                rate = preferences.sample_rate,
                supported = ?self.capabilities.as_slice(),
                "stored sample rate is not advertised by the hardware, applying anyway"
            );
        }

        let report = self.apply();
        if !report.is_complete() {
            tracing::warn!(?report, ?preferences, "audio server does not reflect stored settings");
        }
        report
    }

    /// Refreshes the in-memory record from the store without applying it.
    pub fn load_preferences(&mut self) -> Preferences {
        self.preferences = self.store.load();
        self.preferences
    }

    /// Re-reads the store and pushes it to the audio server again.
    pub fn reapply(&mut self) -> ApplyReport {
        self.load_preferences();
        tracing::info!(preferences = ?self.preferences, "reapplying stored settings");
        self.apply()
    }

    /// Forces a new sample rate. The record is updated and persisted only
    /// when the audio server accepted the value.
    pub fn change_rate(&mut self, rate: u32) -> bool {
        if rate == 0 {
            tracing::warn!("rejecting zero sample rate");
            return false;
        }
        if !self.clock.set_rate(rate) {
            return false;
        }
        self.preferences.sample_rate = rate;
        self.persist();
        true
    }

    /// Forces a new quantum; same contract as [`Self::change_rate`].
    pub fn change_quantum(&mut self, size: u32) -> bool {
        if size == 0 {
            tracing::warn!("rejecting zero buffer size");
            return false;
        }
        if !self.clock.set_quantum(size) {
            return false;
        }
        self.preferences.buffer_size = size;
        self.persist();
        true
    }

    pub fn refresh_capabilities(&mut self) -> &CapabilitySet {
        self.capabilities = self.prober.probe();
        &self.capabilities
    }

    pub fn preferences(&self) -> Preferences {
        self.preferences
    }

    pub fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    pub fn live_state(&self) -> LiveState {
        LiveState {
            rate: self.clock.get_rate(),
            quantum: self.clock.get_quantum(),
            device: self.clock.device_info(),
        }
    }

    fn apply(&self) -> ApplyReport {
        ApplyReport {
            rate_applied: self.clock.set_rate(self.preferences.sample_rate),
            quantum_applied: self.clock.set_quantum(self.preferences.buffer_size),
        }
    }

    fn persist(&self) {
        if !self.store.save(&self.preferences) {
            tracing::warn!(
                preferences = ?self.preferences,
                "change applied to the audio server but could not be persisted"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;
    use crate::command::fake::{Reply, ScriptedRunner};
    use crate::COMMON_RATES;

    const DUMP: &str = r#"[{
        "type": "PipeWire:Interface:Node",
        "info": {
            "props": { "media.class": "Audio/Sink" },
            "params": { "EnumFormat": [{ "rate": 44100 }, { "rate": 48000 }] }
        }
    }]"#;

    fn engine(runner: ScriptedRunner) -> (TempDir, AppConfig, Arc<ScriptedRunner>, ReconciliationEngine) {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::with_config_dir(dir.path().join("pipewire-controller"));
        let runner = Arc::new(runner);
        let engine = ReconciliationEngine::new(&config, runner.clone());
        (dir, config, runner, engine)
    }

    fn accepting() -> ScriptedRunner {
        ScriptedRunner::new()
            .on_program("pw-metadata", Reply::Ok(String::new()))
            .on_program("pw-dump", Reply::Ok(DUMP.into()))
    }

    #[test]
    fn construction_has_no_side_effects() {
        let (_dir, config, runner, engine) = engine(accepting());
        assert!(runner.calls().is_empty());
        assert!(!config.paths.settings_file.exists());
        assert_eq!(engine.preferences(), Preferences::default());
    }

    #[test]
    fn initialize_applies_stored_preferences() {
        let (_dir, config, runner, mut engine) = engine(accepting());
        SettingsStore::new(&config).save(&Preferences::new(96_000, 128));

        let report = engine.initialize();

        assert!(report.is_complete());
        assert_eq!(engine.preferences(), Preferences::new(96_000, 128));
        assert_eq!(engine.capabilities().as_slice(), &[44_100, 48_000]);
        assert!(runner
            .calls()
            .contains(&"pw-metadata -n settings 0 clock.force-rate 96000".to_string()));
        assert!(runner
            .calls()
            .contains(&"pw-metadata -n settings 0 clock.force-quantum 128".to_string()));
    }

    #[test]
    fn initialize_persists_defaults_on_first_start() {
        let (_dir, config, _runner, mut engine) = engine(accepting());

        engine.initialize();

        assert_eq!(
            SettingsStore::new(&config).load_with_origin(),
            (Preferences::default(), LoadOrigin::Stored)
        );
    }

    #[test]
    fn initialize_completes_when_apply_fails() {
        let (_dir, _config, _runner, mut engine) = engine(
            ScriptedRunner::new()
                .on("pw-metadata -n settings 0 clock.force-rate 48000", Reply::Timeout)
                .on_program("pw-metadata", Reply::Ok(String::new())),
        );

        let report = engine.initialize();

        assert_eq!(
            report,
            ApplyReport {
                rate_applied: false,
                quantum_applied: true
            }
        );
        assert_eq!(engine.preferences(), Preferences::default());
        assert_eq!(engine.capabilities().as_slice(), &COMMON_RATES);
    }

    #[test]
    fn accepted_change_is_persisted() {
        let (_dir, config, _runner, mut engine) = engine(accepting());
        engine.initialize();

        assert!(engine.change_rate(44_100));
        assert!(engine.change_quantum(1024));

        let expected = Preferences::new(44_100, 1024);
        assert_eq!(engine.preferences(), expected);
        assert_eq!(SettingsStore::new(&config).load(), expected);
    }

    #[test]
    fn rejected_change_leaves_memory_and_disk_untouched() {
        let (_dir, config, _runner, mut engine) = engine(
            ScriptedRunner::new()
                .on("pw-metadata -n settings 0 clock.force-rate 192000", Reply::Fail)
                .on("pw-metadata -n settings 0 clock.force-quantum 64", Reply::Timeout)
                .on_program("pw-metadata", Reply::Ok(String::new())),
        );
        engine.initialize();
        let before = fs::read(&config.paths.settings_file).unwrap();

        assert!(!engine.change_rate(192_000));
        assert!(!engine.change_quantum(64));
        assert!(!engine.change_rate(0));

        assert_eq!(engine.preferences(), Preferences::default());
        assert_eq!(fs::read(&config.paths.settings_file).unwrap(), before);
    }

    #[test]
    fn reapply_picks_up_external_edits() {
        let (_dir, config, runner, mut engine) = engine(accepting());
        engine.initialize();
        SettingsStore::new(&config).save(&Preferences::new(88_200, 2048));

        assert!(engine.reapply().is_complete());
        assert_eq!(engine.preferences(), Preferences::new(88_200, 2048));
        assert!(runner
            .calls()
            .contains(&"pw-metadata -n settings 0 clock.force-rate 88200".to_string()));
    }

    #[test]
    fn live_state_reads_back_server_values() {
        let (_dir, _config, _runner, engine) = engine(
            ScriptedRunner::new()
                .on(
                    "pw-metadata -n settings",
                    Reply::Ok("key='clock.force-rate' value='48000' type=''\nkey='clock.force-quantum' value='512' type=''\n".into()),
                )
                .on("wpctl status", Reply::Ok(" *   51. Audio/Sink speakers\n".into())),
        );

        assert_eq!(
            engine.live_state(),
            LiveState {
                rate: Some(48_000),
                quantum: Some(512),
                device: Some("*   51. Audio/Sink speakers".into()),
            }
        );
    }

    #[test]
    fn refresh_capabilities_reprobes() {
        let (_dir, _config, runner, mut engine) = engine(accepting());
        assert_eq!(engine.capabilities(), &CapabilitySet::fallback());

        assert_eq!(engine.refresh_capabilities().as_slice(), &[44_100, 48_000]);
        assert_eq!(runner.calls(), vec!["pw-dump"]);
    }
}
