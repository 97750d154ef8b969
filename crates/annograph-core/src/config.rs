//! # Graph Configuration
//!
//! Defaults applied to new graphs, read from TOML:
//!
//! ```toml
//! offset_units = "s"
//! offset_granularity = 0.001
//! default_confidence = 50
//! ordinal_minimum = 1
//! ```
//!
//! Every key is optional. `ANNOGRAPH_OFFSET_GRANULARITY` and
//! `ANNOGRAPH_OFFSET_UNITS` override the file when set.

use crate::primitives::{CONFIDENCE_DEFAULT, DEFAULT_OFFSET_UNITS, DEFAULT_ORDINAL_MINIMUM};
use crate::types::GraphError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Environment variable overriding [`GraphConfig::offset_granularity`].
pub const ENV_OFFSET_GRANULARITY: &str = "ANNOGRAPH_OFFSET_GRANULARITY";

/// Environment variable overriding [`GraphConfig::offset_units`].
pub const ENV_OFFSET_UNITS: &str = "ANNOGRAPH_OFFSET_UNITS";

/// Settings a [`crate::Graph`] is created with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GraphConfig {
    /// Unit of anchor offsets, e.g. `"s"` or `"char"`.
    pub offset_units: String,
    /// Offsets closer than this are the same offset. `None` means exact.
    pub offset_granularity: Option<f64>,
    /// Confidence given to anchors the graph creates itself.
    pub default_confidence: i32,
    /// First ordinal of every child group.
    pub ordinal_minimum: i32,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            offset_units: DEFAULT_OFFSET_UNITS.to_string(),
            offset_granularity: None,
            default_confidence: CONFIDENCE_DEFAULT,
            ordinal_minimum: DEFAULT_ORDINAL_MINIMUM,
        }
    }
}

impl GraphConfig {
    /// Parse TOML text. Environment overrides are not applied.
    pub fn from_toml_str(text: &str) -> Result<Self, GraphError> {
        let config: Self =
            toml::from_str(text).map_err(|e| GraphError::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file and apply the environment overrides.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, GraphError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            GraphError::ConfigError(format!("Cannot read {}: {e}", path.display()))
        })?;
        let mut config = Self::from_toml_str(&text)?;
        config.apply_env()?;
        debug!(path = %path.display(), ?config, "graph configuration loaded");
        Ok(config)
    }

    /// Defaults plus the environment overrides.
    pub fn from_env() -> Result<Self, GraphError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Apply `ANNOGRAPH_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), GraphError> {
        self.apply_overrides(
            std::env::var(ENV_OFFSET_GRANULARITY).ok().as_deref(),
            std::env::var(ENV_OFFSET_UNITS).ok().as_deref(),
        )
    }

    fn apply_overrides(
        &mut self,
        granularity: Option<&str>,
        units: Option<&str>,
    ) -> Result<(), GraphError> {
        if let Some(raw) = granularity.map(str::trim).filter(|r| !r.is_empty()) {
            let value: f64 = raw.parse().map_err(|_| {
                GraphError::ConfigError(format!("{ENV_OFFSET_GRANULARITY} is not a number: {raw}"))
            })?;
            self.offset_granularity = Some(value);
        }
        if let Some(units) = units.map(str::trim).filter(|u| !u.is_empty()) {
            self.offset_units = units.to_string();
        }
        self.validate()
    }

    fn validate(&self) -> Result<(), GraphError> {
        if let Some(g) = self.offset_granularity {
            if !g.is_finite() || g <= 0.0 {
                return Err(GraphError::ConfigError(format!(
                    "offset_granularity must be a positive number, got {g}"
                )));
            }
        }
        if self.ordinal_minimum < 0 {
            return Err(GraphError::ConfigError(format!(
                "ordinal_minimum must not be negative, got {}",
                self.ordinal_minimum
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_text_gives_defaults() {
        let config = GraphConfig::from_toml_str("").expect("parse");
        assert_eq!(config, GraphConfig::default());
        assert_eq!(config.offset_units, "s");
        assert_eq!(config.ordinal_minimum, 1);
    }

    #[test]
    fn partial_text_keeps_other_defaults() {
        let config = GraphConfig::from_toml_str("offset_granularity = 0.005\n").expect("parse");
        assert_eq!(config.offset_granularity, Some(0.005));
        assert_eq!(config.default_confidence, CONFIDENCE_DEFAULT);
    }

    #[test]
    fn bad_values_are_config_errors() {
        assert!(matches!(
            GraphConfig::from_toml_str("offset_granularity = -1.0"),
            Err(GraphError::ConfigError(_))
        ));
        assert!(matches!(
            GraphConfig::from_toml_str("colour = \"blue\""),
            Err(GraphError::ConfigError(_))
        ));
    }

    #[test]
    fn overrides_replace_file_values() {
        let mut config = GraphConfig::from_toml_str("offset_units = \"char\"").expect("parse");
        config
            .apply_overrides(Some("0.01"), Some("ms"))
            .expect("overrides");
        assert_eq!(config.offset_granularity, Some(0.01));
        assert_eq!(config.offset_units, "ms");

        assert!(config.apply_overrides(Some("fast"), None).is_err());
        config.apply_overrides(Some("  "), None).expect("blank is ignored");
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "offset_units = \"char\"\nordinal_minimum = 0").expect("write");

        let config = GraphConfig::from_file(file.path()).expect("load");
        assert_eq!(config.ordinal_minimum, 0);
        assert!(GraphConfig::from_file(file.path().with_extension("missing")).is_err());
    }

    #[test]
    fn graph_uses_config() {
        let config = GraphConfig {
            offset_granularity: Some(0.1),
            ordinal_minimum: 0,
            ..GraphConfig::default()
        };
        let mut graph = crate::Graph::with_config("g1", &config);
        assert_eq!(graph.offset_granularity(), Some(0.1));
        let anchor = graph.create_anchor_at(1.0, None).expect("anchor");
        assert_eq!(
            graph.anchor(&anchor).and_then(|a| a.confidence),
            Some(CONFIDENCE_DEFAULT)
        );
    }
}
