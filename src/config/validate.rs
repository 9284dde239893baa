// src/config/validate.rs

use std::path::PathBuf;
use std::time::Duration;

use globset::Glob;
use regex::Regex;

use crate::config::model::{
    BuildConfig, ConfigFile, ProcessConfig, RawConfigFile, WatchConfig,
};
use crate::errors::{Result, WatchrunError};
use crate::watch::patterns::DEFAULT_IGNORES;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::WatchrunError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        let watch = validate_watch(&raw)?;
        let build = validate_build(&raw)?;
        let process = validate_process(&raw)?;
        Ok(ConfigFile::new_unchecked(watch, build, process))
    }
}

fn validate_watch(cfg: &RawConfigFile) -> Result<WatchConfig> {
    let section = &cfg.watch;

    let debounce = parse_duration(&section.debounce)
        .map_err(|e| config_error(format!("[watch].debounce: {e}")))?;
    if debounce.is_zero() {
        return Err(config_error(
            "[watch].debounce must be greater than zero".to_string(),
        ));
    }

    for pattern in section.include.iter().chain(section.ignore.iter()) {
        Glob::new(pattern)
            .map_err(|e| config_error(format!("invalid glob pattern '{pattern}': {e}")))?;
    }

    let mut ignore = section.ignore.clone();
    if section.use_default_ignores {
        for default in DEFAULT_IGNORES {
            if !ignore.iter().any(|p| p == default) {
                ignore.push(default.to_string());
            }
        }
    }

    Ok(WatchConfig {
        root: PathBuf::from(&section.root),
        include: section.include.clone(),
        ignore,
        use_hash: section.use_hash,
        debounce,
    })
}

fn validate_build(cfg: &RawConfigFile) -> Result<BuildConfig> {
    let section = &cfg.build;

    if section.cmd.trim().is_empty() {
        return Err(config_error(
            "[build].cmd must be set (in the config file or with --cmd)".to_string(),
        ));
    }

    if section.artifact.is_none() && section.artifact_pattern.is_none() {
        return Err(config_error(
            "[build] needs either `artifact` or `artifact_pattern`".to_string(),
        ));
    }

    if let Some(pattern) = &section.artifact_pattern {
        let re = Regex::new(pattern).map_err(|e| {
            config_error(format!("[build].artifact_pattern is not a valid regex: {e}"))
        })?;
        if re.captures_len() < 2 {
            return Err(config_error(format!(
                "[build].artifact_pattern '{pattern}' must contain a capture group for the artifact path"
            )));
        }
    }

    Ok(BuildConfig {
        cmd: section.cmd.clone(),
        artifact: section.artifact.as_ref().map(PathBuf::from),
        artifact_pattern: section.artifact_pattern.clone(),
        while_building: section.while_building,
        initial_build: section.initial_build,
    })
}

fn validate_process(cfg: &RawConfigFile) -> Result<ProcessConfig> {
    let section = &cfg.process;

    let stop_timeout = parse_duration(&section.stop_timeout)
        .map_err(|e| config_error(format!("[process].stop_timeout: {e}")))?;
    let startup_grace = parse_duration(&section.startup_grace)
        .map_err(|e| config_error(format!("[process].startup_grace: {e}")))?;

    Ok(ProcessConfig {
        args: section.args.clone(),
        env: section.env.clone(),
        stop_timeout,
        startup_grace,
        keep_running_during_build: section.keep_running_during_build,
    })
}

fn config_error(msg: String) -> WatchrunError {
    WatchrunError::ConfigError(msg)
}

/// Parse a simple duration string like `"3s"`, `"250ms"`, `"1m"`, `"2h"`.
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    // Find the boundary between digits and suffix.
    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| format!("duration '{s}' is missing a unit suffix"))?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;
    let unit = unit_part.trim().to_lowercase();

    let secs_per_unit = match unit.as_str() {
        "ms" => return Ok(Duration::from_millis(value)),
        "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        _ => {
            return Err(format!(
                "unsupported duration unit '{}'; expected ms, s, m, or h",
                unit
            ))
        }
    };

    value
        .checked_mul(secs_per_unit)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("duration '{s}' is too large"))
}
