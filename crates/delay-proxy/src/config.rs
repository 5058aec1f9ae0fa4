//! Assembles a [`ProxyConfig`] from defaults, an optional key-value file,
//! environment variables, and CLI flags, in increasing priority order.

use std::fs;
use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    MissingPort(&'static str),
}

/// Fully resolved configuration the orchestrator needs to start.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyConfig {
    pub ingress_port: u16,
    pub egress_port: u16,
    pub initial_hold_secs: Option<f64>,
}

/// One layer's worth of settings; any field may be absent, letting a later
/// (higher-priority) layer supply it instead.
#[derive(Debug, Default, Clone)]
pub struct PartialConfig {
    pub ingress_port: Option<u16>,
    pub egress_port: Option<u16>,
    pub initial_hold_secs: Option<f64>,
}

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    ingress_port: Option<u16>,
    egress_port: Option<u16>,
    initial_hold_secs: Option<f64>,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies `layer` on top of whatever has been set so far: a present
    /// field in `layer` overwrites a lower layer's value, an absent one
    /// leaves the existing value untouched.
    pub fn apply(&mut self, layer: PartialConfig) -> &mut Self {
        if let Some(v) = layer.ingress_port {
            self.ingress_port = Some(v);
        }
        if let Some(v) = layer.egress_port {
            self.egress_port = Some(v);
        }
        if let Some(v) = layer.initial_hold_secs {
            self.initial_hold_secs = Some(v);
        }
        self
    }

    pub fn build(self) -> Result<ProxyConfig, ConfigError> {
        Ok(ProxyConfig {
            ingress_port: self.ingress_port.ok_or(ConfigError::MissingPort("ingress_port"))?,
            egress_port: self.egress_port.ok_or(ConfigError::MissingPort("egress_port"))?,
            initial_hold_secs: self.initial_hold_secs,
        })
    }
}

/// Reads a flat `key = value` file (`#`-prefixed comments, blank lines
/// ignored). A missing file or an unparseable value is logged at WARN and
/// treated as absent rather than failing the whole load.
pub fn from_file(path: &Path) -> PartialConfig {
    let mut partial = PartialConfig::default();
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "could not read config file");
            return partial;
        }
    };

    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            tracing::warn!(line, "ignoring malformed config line");
            continue;
        };
        let key = key.trim();
        let value = value.trim();
        match key {
            "ingress_port" => match value.parse() {
                Ok(v) => partial.ingress_port = Some(v),
                Err(_) => tracing::warn!(value, "config[ingress_port] is not a valid port"),
            },
            "egress_port" => match value.parse() {
                Ok(v) => partial.egress_port = Some(v),
                Err(_) => tracing::warn!(value, "config[egress_port] is not a valid port"),
            },
            "initial_hold_secs" => match value.parse() {
                Ok(v) => partial.initial_hold_secs = Some(v),
                Err(_) => tracing::warn!(value, "config[initial_hold_secs] is not a number"),
            },
            other => tracing::warn!(key = other, "ignoring unknown config key"),
        }
    }

    partial
}

/// Reads `DELAY_PROXY_INGRESS_PORT`, `DELAY_PROXY_EGRESS_PORT`, and
/// `DELAY_PROXY_HOLD_SECS`. Same absent-on-error policy as [`from_file`].
pub fn from_env() -> PartialConfig {
    let mut partial = PartialConfig::default();

    if let Ok(v) = std::env::var("DELAY_PROXY_INGRESS_PORT") {
        match v.parse() {
            Ok(port) => partial.ingress_port = Some(port),
            Err(_) => tracing::warn!(value = %v, "DELAY_PROXY_INGRESS_PORT is not a valid port"),
        }
    }
    if let Ok(v) = std::env::var("DELAY_PROXY_EGRESS_PORT") {
        match v.parse() {
            Ok(port) => partial.egress_port = Some(port),
            Err(_) => tracing::warn!(value = %v, "DELAY_PROXY_EGRESS_PORT is not a valid port"),
        }
    }
    if let Ok(v) = std::env::var("DELAY_PROXY_HOLD_SECS") {
        match v.parse() {
            Ok(secs) => partial.initial_hold_secs = Some(secs),
            Err(_) => tracing::warn!(value = %v, "DELAY_PROXY_HOLD_SECS is not a number"),
        }
    }

    partial
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn missing_port_fails_to_build() {
        let err = ConfigBuilder::new().build().unwrap_err();
        assert!(matches!(err, ConfigError::MissingPort("ingress_port")));
    }

    #[test]
    fn later_layer_overrides_earlier_one() {
        let mut builder = ConfigBuilder::new();
        builder.apply(PartialConfig {
            ingress_port: Some(1000),
            egress_port: Some(2000),
            initial_hold_secs: None,
        });
        builder.apply(PartialConfig {
            ingress_port: Some(1111),
            egress_port: None,
            initial_hold_secs: Some(0.5),
        });
        let config = builder.build().unwrap();
        assert_eq!(config.ingress_port, 1111);
        assert_eq!(config.egress_port, 2000);
        assert_eq!(config.initial_hold_secs, Some(0.5));
    }

    #[test]
    fn file_parses_flat_key_value_pairs() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# comment\ningress_port = 9001\negress_port=9002\ninitial_hold_secs = 0.25").unwrap();
        let partial = from_file(file.path());
        assert_eq!(partial.ingress_port, Some(9001));
        assert_eq!(partial.egress_port, Some(9002));
        assert_eq!(partial.initial_hold_secs, Some(0.25));
    }

    #[test]
    fn missing_file_yields_empty_partial() {
        let partial = from_file(Path::new("/nonexistent/delay-proxy.conf"));
        assert_eq!(partial.ingress_port, None);
    }

    #[test]
    fn unparseable_value_is_ignored_not_fatal() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "ingress_port = not-a-number").unwrap();
        let partial = from_file(file.path());
        assert_eq!(partial.ingress_port, None);
    }
}
