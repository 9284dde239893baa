#![allow(dead_code)]

use watchrun::config::{ConfigFile, RawConfigFile};
use watchrun::types::TriggerWhileBuildingBehaviour;

/// Builder for `ConfigFile` to simplify test setup.
///
/// Starts from the same defaults as an empty `Watchrun.toml` plus the two
/// required build settings.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new(cmd: &str, artifact: &str) -> Self {
        let mut config = RawConfigFile::default();
        config.build.cmd = cmd.to_string();
        config.build.artifact = Some(artifact.to_string());
        Self { config }
    }

    pub fn root(mut self, root: &str) -> Self {
        self.config.watch.root = root.to_string();
        self
    }

    pub fn include(mut self, pattern: &str) -> Self {
        self.config.watch.include.push(pattern.to_string());
        self
    }

    pub fn ignore(mut self, pattern: &str) -> Self {
        self.config.watch.ignore.push(pattern.to_string());
        self
    }

    pub fn without_default_ignores(mut self) -> Self {
        self.config.watch.use_default_ignores = false;
        self
    }

    pub fn use_hash(mut self, val: bool) -> Self {
        self.config.watch.use_hash = val;
        self
    }

    pub fn debounce(mut self, dur: &str) -> Self {
        self.config.watch.debounce = dur.to_string();
        self
    }

    pub fn artifact_pattern(mut self, pattern: &str) -> Self {
        self.config.build.artifact_pattern = Some(pattern.to_string());
        self
    }

    pub fn while_building(mut self, behaviour: TriggerWhileBuildingBehaviour) -> Self {
        self.config.build.while_building = behaviour;
        self
    }

    pub fn initial_build(mut self, val: bool) -> Self {
        self.config.build.initial_build = val;
        self
    }

    pub fn arg(mut self, arg: &str) -> Self {
        self.config.process.args.push(arg.to_string());
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.config
            .process
            .env
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn stop_timeout(mut self, dur: &str) -> Self {
        self.config.process.stop_timeout = dur.to_string();
        self
    }

    pub fn startup_grace(mut self, dur: &str) -> Self {
        self.config.process.startup_grace = dur.to_string();
        self
    }

    pub fn keep_running_during_build(mut self, val: bool) -> Self {
        self.config.process.keep_running_during_build = val;
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}
