// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Configuration of the `crashdump` command
//!
//! ```toml
//! [log]
//! mode = "stderr-terminal"
//! level = "info"
//!
//! [crashdump]
//! timeout_secs = 300
//! log_tail_lines = 1000
//! ```
//!
//! Both sections are optional.

use camino::Utf8Path;
use camino::Utf8PathBuf;
use dropshot::ConfigLogging;
use dropshot::ConfigLoggingLevel;
use serde::Deserialize;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_log")]
    pub log: ConfigLogging,
    #[serde(default)]
    pub crashdump: CrashdumpSettings,
}

/// Settings of the crashdump itself.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CrashdumpSettings {
    /// Cancel the remaining network steps after this many seconds
    pub timeout_secs: Option<u64>,
    /// Lines kept from the end of each Kubernetes container log; every
    /// line is kept when unset
    pub log_tail_lines: Option<i64>,
}

impl CrashdumpSettings {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

fn default_log() -> ConfigLogging {
    ConfigLogging::StderrTerminal { level: ConfigLoggingLevel::Info }
}

impl Default for Config {
    fn default() -> Self {
        Config { log: default_log(), crashdump: CrashdumpSettings::default() }
    }
}

impl Config {
    /// Reads and validates a TOML configuration file.
    pub fn from_file(
        path: impl AsRef<Utf8Path>,
    ) -> Result<Config, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|error| ConfigError::Read { path: path.into(), error })?;
        let config: Config = toml::from_str(&contents)
            .map_err(|error| ConfigError::Parse { path: path.into(), error })?;
        config.validate().map_err(|reason| ConfigError::Invalid {
            path: path.into(),
            reason,
        })?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        if let Some(lines) = self.crashdump.log_tail_lines {
            if lines <= 0 {
                return Err(format!(
                    "log_tail_lines must be positive, got {lines}"
                ));
            }
        }
        if self.crashdump.timeout_secs == Some(0) {
            return Err("timeout_secs must be positive".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read crashdump config {path}")]
    Read {
        path: Utf8PathBuf,
        #[source]
        error: std::io::Error,
    },

    #[error("failed to parse crashdump config {path}")]
    Parse {
        path: Utf8PathBuf,
        #[source]
        error: toml::de::Error,
    },

    #[error("invalid crashdump config {path}: {reason}")]
    Invalid { path: Utf8PathBuf, reason: String },
}

#[cfg(test)]
mod test {
    use super::*;
    use camino_tempfile::Utf8TempDir;

    fn write_config(dir: &Utf8TempDir, contents: &str) -> Utf8PathBuf {
        let path = dir.path().join("crashdump.toml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_config_from_file() {
        let dir = Utf8TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
            [log]
            mode = "file"
            level = "debug"
            path = "/tmp/crashdump.log"
            if_exists = "append"

            [crashdump]
            timeout_secs = 90
            log_tail_lines = 500
            "#,
        );

        let config = Config::from_file(&path).unwrap();
        match config.log {
            ConfigLogging::File { level, path, .. } => {
                assert!(matches!(level, ConfigLoggingLevel::Debug));
                assert_eq!(path.as_str(), "/tmp/crashdump.log");
            }
            other => panic!("unexpected log config: {other:?}"),
        }
        assert_eq!(config.crashdump.timeout(), Some(Duration::from_secs(90)));
        assert_eq!(config.crashdump.log_tail_lines, Some(500));
    }

    #[test]
    fn test_sections_are_optional() {
        let dir = Utf8TempDir::new().unwrap();
        let path = write_config(&dir, "[crashdump]\nlog_tail_lines = 20\n");
        let config = Config::from_file(&path).unwrap();
        assert!(matches!(config.log, ConfigLogging::StderrTerminal { .. }));
        assert_eq!(config.crashdump.log_tail_lines, Some(20));
        assert_eq!(config.crashdump.timeout(), None);

        let path = write_config(&dir, "");
        let config = Config::from_file(&path).unwrap();
        assert!(config.crashdump.log_tail_lines.is_none());
    }

    #[test]
    fn test_config_errors() {
        let dir = Utf8TempDir::new().unwrap();
        let missing = dir.path().join("missing.toml");
        let err = Config::from_file(&missing).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));

        let path = write_config(&dir, "[log]\nmode = \"stderr-terminal\"\n");
        let err = Config::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));

        let path = write_config(&dir, "[crashdump]\nworkers = 4\n");
        let err = Config::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));

        let path = write_config(&dir, "[crashdump]\nlog_tail_lines = 0\n");
        let err = Config::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }), "{err}");
        assert!(
            err.to_string().ends_with("log_tail_lines must be positive, got 0"),
            "{err}"
        );
    }
}
