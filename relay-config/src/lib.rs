//! Loader for the sink configuration with YAML + environment overlays.
//!
//! Files are merged first, then `RELAY_`-prefixed environment variables
//! (nested keys separated by `__`, e.g. `RELAY_ENDPOINT__URL`), and
//! finally `${VAR}` placeholders inside string values are expanded. The
//! merged tree deserializes into [`RelayConfig`]; structural problems
//! surface here, cross-field rules via [`RelayConfig::validate`].
use config::{Config, ConfigError, Environment, File};
use serde_json::Value;
use std::path::Path;

mod schema;

pub use schema::{
    ApiKeyLocation, AuthConfig, BehaviourConfig, BrokerConfig, EndpointConfig, ErrorMode,
    ErrorTopicConfig, HeaderForwardConfig, HttpMethod, NullValueMode, RelayConfig,
    ResponseTopicConfig, RetryConfig, ValueFormat,
};

const MAXIMUM_ENV_EXPANSION_DEPTH: usize = 8;

fn expand_env_in_value(v: &mut Value) {
    match v {
        Value::String(s) => {
            if s.contains('$') {
                let mut cur = std::mem::take(s);
                for _ in 0..MAXIMUM_ENV_EXPANSION_DEPTH {
                    let expanded = match shellexpand::env(&cur) {
                        Ok(cow) => cow.into_owned(),
                        Err(_) => cur.clone(),
                    };
                    if expanded == cur {
                        break;
                    }
                    cur = expanded;
                }
                *s = cur;
            }
        }
        Value::Array(arr) => arr.iter_mut().for_each(expand_env_in_value),
        Value::Object(obj) => obj.values_mut().for_each(expand_env_in_value),
        _ => {}
    }
}

/// Builder hiding the `config` crate wiring (file + env overrides).
pub struct RelayConfigLoader {
    builder: config::ConfigBuilder<config::builder::DefaultState>,
}

impl Default for RelayConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayConfigLoader {
    /// Start with the standard sources: `RELAY_` env overrides on top of
    /// whatever files get attached.
    pub fn new() -> Self {
        let builder =
            Config::builder().add_source(Environment::with_prefix("RELAY").separator("__"));
        Self { builder }
    }

    /// Attach a YAML/TOML/JSON file; the `config` crate infers format by suffix.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.builder = self.builder.add_source(File::from(path.as_ref()).required(true));
        self
    }

    /// Merge an inline YAML snippet (tests, CLI overrides).
    ///
    /// ```
    /// use relay_config::RelayConfigLoader;
    ///
    /// let cfg = RelayConfigLoader::new()
    ///     .with_yaml_str(
    ///         r#"
    /// endpoint:
    ///   url: "https://api.example.com/ingest"
    /// broker:
    ///   bootstrap_servers: "localhost:9092"
    ///   topics: ["events"]
    /// "#,
    ///     )
    ///     .load()
    ///     .expect("valid config");
    ///
    /// assert_eq!(cfg.endpoint.url, "https://api.example.com/ingest");
    /// assert!(cfg.retry.enabled);
    /// ```
    pub fn with_yaml_str(mut self, yaml: &str) -> Self {
        self.builder = self
            .builder
            .add_source(File::from_str(yaml, config::FileFormat::Yaml));
        self
    }

    /// Consume the builder and deserialize the merged sources.
    ///
    /// `${VAR}` placeholders are expanded recursively (bounded depth, so
    /// cyclic definitions terminate) before the typed deserialize.
    pub fn load(self) -> Result<RelayConfig, ConfigError> {
        let cfg = self.builder.build()?;

        let mut v: Value = cfg.try_deserialize()?;
        expand_env_in_value(&mut v);

        let typed: RelayConfig =
            serde_json::from_value(v).map_err(|e| ConfigError::Message(e.to_string()))?;

        Ok(typed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn expands_simple_string() {
        temp_env::with_var("ENDPOINT_TOKEN", Some("s3cr3t"), || {
            let mut v = json!("Bearer ${ENDPOINT_TOKEN}");
            expand_env_in_value(&mut v);
            assert_eq!(v, json!("Bearer s3cr3t"));
        });
    }

    #[test]
    fn expands_nested_structures() {
        temp_env::with_vars([("HOST", Some("api.internal")), ("PORT", Some("8443"))], || {
            let mut v = json!({
                "endpoint": { "url": "https://${HOST}:${PORT}/v1" },
                "topics": ["a-${HOST}", 7, null]
            });
            expand_env_in_value(&mut v);
            assert_eq!(
                v,
                json!({
                    "endpoint": { "url": "https://api.internal:8443/v1" },
                    "topics": ["a-api.internal", 7, null]
                })
            );
        });
    }

    #[test]
    fn expansion_terminates_on_cycles() {
        temp_env::with_vars([("A", Some("${B}")), ("B", Some("${A}"))], || {
            let mut v = json!("x=${A}");
            expand_env_in_value(&mut v);
            // The cycle is left unresolved rather than looping forever.
            assert!(v.as_str().unwrap().contains("${"));
        });
    }

    #[test]
    fn unknown_vars_are_left_as_is() {
        let mut v = json!("token=${RELAY_DOES_NOT_EXIST}");
        expand_env_in_value(&mut v);
        assert_eq!(v, json!("token=${RELAY_DOES_NOT_EXIST}"));
    }
}
