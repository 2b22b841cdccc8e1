//! Reconciler configuration.
//!
//! [`LinkManyConfig`] can be loaded from `config/linkmany.toml` or environment
//! variables using [`LinkManyConfig::load()`], then turned into a reconciler
//! with [`LinkMany::from_config`](crate::LinkMany::from_config).
//!
//! The file keeps its settings under a `[linkmany]` section. Environment
//! variables use the `LINKMANY` prefix and `__` as separator:
//!
//! - without a `[linkmany]` section anywhere, top-level keys are read, so
//!   `LINKMANY__RELATION=groups` and `LINKMANY__EXTRA_COLUMNS__NOTE=test` work
//! - when the file has the section, env overrides must address it:
//!   `LINKMANY__LINKMANY__RELATION=groups`
//!
//! ```toml
//! [linkmany]
//! relation = "data_groups"
//! reference_attribute = "data_group_ids"
//! delete_on_unlink = true
//!
//! [linkmany.extra_columns]
//! note = "test"
//! ```

use config::{Config, ConfigError, Environment, File, FileFormat};
use sea_query::Value;
use serde::Deserialize;
use std::collections::BTreeMap;

const CONFIG_FILE: &str = "config/linkmany.toml";
const SECTION: &str = "linkmany";

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LinkManyConfig {
    /// Name of the many-to-many relation to manage
    #[serde(default)]
    pub relation: String,
    /// Virtual attribute the host exposes the reference keys as
    #[serde(default)]
    pub reference_attribute: Option<String>,
    #[serde(default = "default_delete_on_unlink")]
    pub delete_on_unlink: bool,
    #[serde(default)]
    pub strict_resolution: bool,
    /// Literal extra junction columns
    #[serde(default)]
    pub extra_columns: BTreeMap<String, serde_json::Value>,
}

fn default_delete_on_unlink() -> bool {
    true
}

impl Default for LinkManyConfig {
    fn default() -> Self {
        Self {
            relation: String::new(),
            reference_attribute: None,
            delete_on_unlink: default_delete_on_unlink(),
            strict_resolution: false,
            extra_columns: BTreeMap::new(),
        }
    }
}

impl LinkManyConfig {
    /// Load the `[linkmany]` section from `config/linkmany.toml`, falling back to env vars.
    ///
    /// Environment variables use the `LINKMANY` prefix and `__` as the nesting
    /// separator; see the module docs for the exact variable names.
    pub fn load() -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::with_name(CONFIG_FILE).required(false))
            .add_source(Environment::with_prefix("LINKMANY").separator("__"));

        let settings = match builder.build() {
            Ok(cfg) => cfg,
            Err(err) => {
                // Unreadable file: warn and retry with the environment only
                if std::path::Path::new(CONFIG_FILE).exists() {
                    log::warn!("failed to load {CONFIG_FILE}, falling back to env: {err}");
                }
                Config::builder()
                    .add_source(Environment::with_prefix("LINKMANY").separator("__"))
                    .build()
                    .map_err(|env_err| {
                        ConfigError::Message(format!(
                            "Failed to load configuration from file and env: {err}, then env-only error: {env_err}"
                        ))
                    })?
            }
        };

        Self::from_settings(&settings)
    }

    /// Parse the `[linkmany]` section from a TOML document
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?;
        Self::from_settings(&settings)
    }

    fn from_settings(settings: &Config) -> Result<Self, ConfigError> {
        let loaded = match settings.get::<LinkManyConfig>(SECTION) {
            Err(ConfigError::NotFound(_)) => settings.clone().try_deserialize::<LinkManyConfig>(),
            other => other,
        };
        loaded.map_err(|e| {
            ConfigError::Message(format!(
                "LinkMany configuration could not be loaded from file or environment: {e}"
            ))
        })
    }

    /// Extra columns converted to SeaQuery values, in column-name order
    pub fn extra_column_values(&self) -> Vec<(String, Value)> {
        self.extra_columns
            .iter()
            .map(|(name, value)| (name.clone(), json_to_value(value)))
            .collect()
    }
}

fn json_to_value(value: &serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::from(None::<String>),
        serde_json::Value::Bool(b) => Value::from(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::from(i)
            } else if let Some(u) = n.as_u64() {
                Value::from(u)
            } else {
                Value::from(n.as_f64().unwrap_or_default())
            }
        }
        serde_json::Value::String(s) => Value::from(s.clone()),
        // Arrays and tables go into JSON columns as-is
        other => Value::from(other.clone()),
    }
}
