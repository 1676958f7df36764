use serde::{Deserialize, Serialize};

/// Registry host used when a reference names no registry.
pub const DEFAULT_REGISTRY: &str = "r8.im";

/// Environment variables consulted, in order, for a registry token.
pub const TOKEN_ENV_VARS: [&str; 2] = ["REPLICATE_API_TOKEN", "COG_TOKEN"];

/// Settings shared by every command, resolved once from flags and environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct YoloConfig {
    /// Registry host (e.g. "r8.im")
    pub registry: String,

    /// Registry token, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl Default for YoloConfig {
    fn default() -> Self {
        Self {
            registry: DEFAULT_REGISTRY.to_string(),
            token: None,
        }
    }
}

impl YoloConfig {
    /// Build a config from an explicit registry and token, falling back to
    /// the token environment variables when no token is given.
    pub fn new(registry: impl Into<String>, token: Option<String>) -> Self {
        Self {
            registry: registry.into(),
            token: resolve_token_with(token, |key| std::env::var(key).ok()),
        }
    }

    /// Prefix `reference` with the configured registry unless it already names it.
    pub fn ensure_registry(&self, reference: &str) -> String {
        if reference.contains(&self.registry) {
            reference.to_string()
        } else {
            format!("{}/{}", self.registry, reference)
        }
    }
}

/// Pick the explicit token, else the first non-empty token variable.
pub fn resolve_token_with<F>(explicit: Option<String>, lookup: F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    explicit.filter(|t| !t.is_empty()).or_else(|| {
        TOKEN_ENV_VARS
            .iter()
            .filter_map(|key| lookup(key))
            .find(|t| !t.is_empty())
    })
}

/// Where a finished image goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishMode {
    /// Push to the registry named by the repo tag
    #[default]
    Push,
    /// Load into the local image store
    Local,
}

/// What the layered builder does when a content-layer task fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerFailurePolicy {
    /// Fail the whole build at the barrier
    #[default]
    Abort,
    /// Drop the failed slot and assemble the rest
    Skip,
}

/// Options for the parallel layered builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BuildOptions {
    /// Publish target
    #[serde(default)]
    pub publish: PublishMode,

    /// Handling of failed content-layer tasks
    #[serde(default)]
    pub on_layer_failure: LayerFailurePolicy,
}

impl BuildOptions {
    /// Options selecting the publish target from the `--local` flag.
    pub fn with_local(local: bool) -> Self {
        Self {
            publish: if local {
                PublishMode::Local
            } else {
                PublishMode::Push
            },
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = YoloConfig::default();
        assert_eq!(config.registry, "r8.im");
        assert!(config.token.is_none());
    }

    #[test]
    fn test_ensure_registry_adds_prefix() {
        let config = YoloConfig::default();
        assert_eq!(config.ensure_registry("owner/model"), "r8.im/owner/model");
    }

    #[test]
    fn test_ensure_registry_keeps_existing() {
        let config = YoloConfig::default();
        assert_eq!(
            config.ensure_registry("r8.im/owner/model@sha256:abc"),
            "r8.im/owner/model@sha256:abc"
        );
    }

    #[test]
    fn test_resolve_token_prefers_explicit() {
        let token = resolve_token_with(Some("explicit".to_string()), |_| {
            Some("env".to_string())
        });
        assert_eq!(token.as_deref(), Some("explicit"));
    }

    #[test]
    fn test_resolve_token_env_order() {
        let env: HashMap<&str, &str> =
            [("REPLICATE_API_TOKEN", "replicate"), ("COG_TOKEN", "cog")].into();
        let token = resolve_token_with(None, |key| env.get(key).map(|v| v.to_string()));
        assert_eq!(token.as_deref(), Some("replicate"));
    }

    #[test]
    fn test_resolve_token_falls_through_empty() {
        let env: HashMap<&str, &str> = [("REPLICATE_API_TOKEN", ""), ("COG_TOKEN", "cog")].into();
        let token = resolve_token_with(Some(String::new()), |key| {
            env.get(key).map(|v| v.to_string())
        });
        assert_eq!(token.as_deref(), Some("cog"));
    }

    #[test]
    fn test_resolve_token_none() {
        assert!(resolve_token_with(None, |_| None).is_none());
    }

    #[test]
    fn test_build_options_with_local() {
        assert_eq!(BuildOptions::with_local(true).publish, PublishMode::Local);
        assert_eq!(BuildOptions::with_local(false).publish, PublishMode::Push);
        assert_eq!(
            BuildOptions::with_local(true).on_layer_failure,
            LayerFailurePolicy::Abort
        );
    }

    #[test]
    fn test_build_options_deserialize() {
        let opts: BuildOptions =
            serde_json::from_str(r#"{"publish":"local","on_layer_failure":"skip"}"#).unwrap();
        assert_eq!(opts.publish, PublishMode::Local);
        assert_eq!(opts.on_layer_failure, LayerFailurePolicy::Skip);
    }
}
