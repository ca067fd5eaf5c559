// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Parsing of talosconfig files

use crate::Error;
use base64::Engine;
use camino::Utf8Path;
use camino::Utf8PathBuf;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Port `apid` listens on when an endpoint does not name one.
pub const DEFAULT_PORT: u16 = 50000;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Contents of a talosconfig file
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct TalosConfig {
    /// Name of the selected context
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub contexts: BTreeMap<String, ContextConfig>,
}

/// A single named context: where to reach the cluster and which
/// credentials to present.
///
/// Certificate material is stored as base64-encoded PEM.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct ContextConfig {
    #[serde(default)]
    pub endpoints: Vec<String>,
    #[serde(default)]
    pub nodes: Vec<String>,
    #[serde(default)]
    pub ca: String,
    #[serde(default)]
    pub crt: String,
    #[serde(default)]
    pub key: String,
}

impl TalosConfig {
    /// Load a `TalosConfig` from the given YAML file
    pub fn from_file<P: AsRef<Utf8Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|error| {
            Error::ConfigIo { error, path: path.to_owned() }
        })?;
        serde_yaml::from_str(&data).map_err(|error| Error::ConfigParse {
            error,
            path: path.to_owned(),
        })
    }

    /// Returns where talosctl looks for its configuration: `$TALOSCONFIG`
    /// if set, otherwise `~/.talos/config`.
    pub fn default_path() -> Option<Utf8PathBuf> {
        if let Ok(path) = std::env::var("TALOSCONFIG") {
            if !path.is_empty() {
                return Some(Utf8PathBuf::from(path));
            }
        }
        let home = std::env::var("HOME").ok()?;
        Some(Utf8PathBuf::from(home).join(".talos").join("config"))
    }

    /// Resolves the named context, or the selected one when `name` is
    /// `None`, into a [`ClientConfig`].
    pub fn client_config(
        &self,
        name: Option<&str>,
    ) -> Result<ClientConfig, Error> {
        let name = match name.or(self.context.as_deref()) {
            Some(name) => name,
            None => return Err(Error::NoContext),
        };
        let context = self
            .contexts
            .get(name)
            .ok_or_else(|| Error::UnknownContext(name.to_string()))?;
        if context.endpoints.is_empty() {
            return Err(Error::NoEndpoints(name.to_string()));
        }

        let decode = |field: &'static str, value: &str| {
            base64::engine::general_purpose::STANDARD
                .decode(value.trim())
                .map_err(|error| Error::Certificate {
                    context: name.to_string(),
                    field,
                    error,
                })
        };

        Ok(ClientConfig {
            endpoints: context.endpoints.clone(),
            ca_pem: decode("ca", &context.ca)?,
            crt_pem: decode("crt", &context.crt)?,
            key_pem: decode("key", &context.key)?,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        })
    }
}

/// Everything needed to open a connection to the machine API.
#[derive(Clone)]
pub struct ClientConfig {
    pub endpoints: Vec<String>,
    pub ca_pem: Vec<u8>,
    pub crt_pem: Vec<u8>,
    pub key_pem: Vec<u8>,
    pub connect_timeout: Duration,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("endpoints", &self.endpoints)
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use camino_tempfile::Utf8TempDir;

    const TALOSCONFIG: &str = r#"
context: demo
contexts:
  demo:
    endpoints:
      - 10.5.0.2
    nodes:
      - 10.5.0.2
      - 10.5.0.3
    ca: Q0EgUEVN
    crt: Q1JUIFBFTQ==
    key: S0VZIFBFTQ==
  other:
    endpoints: []
"#;

    fn write_config(dir: &Utf8TempDir, contents: &str) -> Utf8PathBuf {
        let path = dir.path().join("config");
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_selected_context() {
        let dir = Utf8TempDir::new().unwrap();
        let config =
            TalosConfig::from_file(write_config(&dir, TALOSCONFIG)).unwrap();
        assert_eq!(config.context.as_deref(), Some("demo"));
        assert_eq!(config.contexts["demo"].nodes.len(), 2);

        let client = config.client_config(None).unwrap();
        assert_eq!(client.endpoints, vec!["10.5.0.2".to_string()]);
        assert_eq!(client.ca_pem, b"CA PEM");
        assert_eq!(client.crt_pem, b"CRT PEM");
        assert_eq!(client.key_pem, b"KEY PEM");
    }

    #[test]
    fn test_context_errors() {
        let config: TalosConfig = serde_yaml::from_str(TALOSCONFIG).unwrap();
        assert!(matches!(
            config.client_config(Some("missing")),
            Err(Error::UnknownContext(name)) if name == "missing"
        ));
        assert!(matches!(
            config.client_config(Some("other")),
            Err(Error::NoEndpoints(_))
        ));
        assert!(matches!(
            TalosConfig::default().client_config(None),
            Err(Error::NoContext)
        ));
    }

    #[test]
    fn test_bad_certificate() {
        let mut config: TalosConfig =
            serde_yaml::from_str(TALOSCONFIG).unwrap();
        config.contexts.get_mut("demo").unwrap().key = "%%%".to_string();
        let err = config.client_config(None).unwrap_err();
        assert!(
            matches!(err, Error::Certificate { field: "key", .. }),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn test_missing_file() {
        let dir = Utf8TempDir::new().unwrap();
        let err =
            TalosConfig::from_file(dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, Error::ConfigIo { .. }));

        let path = write_config(&dir, "contexts: [");
        let err = TalosConfig::from_file(path).unwrap_err();
        assert!(matches!(err, Error::ConfigParse { .. }));
    }
}
