use std::path::Path;

use serde::Deserialize;

use crate::types::Channel;

/// Root application configuration. Loaded from environment variables
/// with the prefix `FLOW_BUILDER__` and an optional TOML config file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub channels: ChannelRules,
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResolverConfig {
    #[serde(default = "default_resolver_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_placeholder_name")]
    pub placeholder_name: String,
    #[serde(default = "default_placeholder_description")]
    pub placeholder_description: String,
    #[serde(default = "default_display_width")]
    pub default_display_width: String,
}

/// Channel business rules: which channels carry content that downstream
/// branches depend on. A template change on one of these channels flags the
/// owning step for audience re-resolution.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelRules {
    #[serde(default = "default_refresh_on")]
    pub refresh_on: Vec<Channel>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GraphConfig {
    /// Upper bound on branches per step. `None` leaves fan-out unbounded.
    #[serde(default)]
    pub max_triggers_per_node: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventsConfig {
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_filter")]
    pub filter: String,
    #[serde(default = "default_log_json")]
    pub json: bool,
}

// Default functions
fn default_resolver_timeout_ms() -> u64 {
    3000
}
fn default_placeholder_name() -> String {
    "Please define audience".to_string()
}
fn default_placeholder_description() -> String {
    "Please define".to_string()
}
fn default_display_width() -> String {
    "350px".to_string()
}
fn default_refresh_on() -> Vec<Channel> {
    Channel::ALL.to_vec()
}
fn default_broadcast_capacity() -> usize {
    256
}
fn default_log_filter() -> String {
    "campaign_journey=info,campaign_flow_builder=info".to_string()
}
fn default_log_json() -> bool {
    true
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_resolver_timeout_ms(),
            placeholder_name: default_placeholder_name(),
            placeholder_description: default_placeholder_description(),
            default_display_width: default_display_width(),
        }
    }
}

impl Default for ChannelRules {
    fn default() -> Self {
        Self {
            refresh_on: default_refresh_on(),
        }
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            broadcast_capacity: default_broadcast_capacity(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: default_log_json(),
        }
    }
}

impl ChannelRules {
    /// Rules under which no channel triggers re-resolution.
    pub fn none() -> Self {
        Self {
            refresh_on: Vec::new(),
        }
    }

    pub fn only(channels: impl IntoIterator<Item = Channel>) -> Self {
        Self {
            refresh_on: channels.into_iter().collect(),
        }
    }

    pub fn refreshes(&self, channel: Channel) -> bool {
        self.refresh_on.contains(&channel)
    }
}

impl AppConfig {
    /// Load configuration from environment variables and optional config file.
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let builder = builder.add_source(
            config::Environment::with_prefix("FLOW_BUILDER")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("channels.refresh_on"),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.resolver.timeout_ms, 3000);
        assert_eq!(config.resolver.placeholder_name, "Please define audience");
        assert_eq!(config.resolver.default_display_width, "350px");
        assert!(config.graph.max_triggers_per_node.is_none());
        assert!(Channel::ALL.iter().all(|c| config.channels.refreshes(*c)));
    }

    #[test]
    fn test_channel_rules_subset() {
        let rules = ChannelRules::only([Channel::Email]);
        assert!(rules.refreshes(Channel::Email));
        assert!(!rules.refreshes(Channel::Sms));
        assert!(!ChannelRules::none().refreshes(Channel::Email));
    }

    #[test]
    fn test_load_layers_env_over_file() {
        let path = std::env::temp_dir().join(format!("flow-builder-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(
            &path,
            "[resolver]\ntimeout_ms = 500\nplaceholder_name = \"Pick a segment\"\n\n[graph]\nmax_triggers_per_node = 8\n",
        )
        .unwrap();
        // Only this test touches FLOW_BUILDER__* variables.
        std::env::set_var("FLOW_BUILDER__CHANNELS__REFRESH_ON", "email,push");
        std::env::set_var("FLOW_BUILDER__GRAPH__MAX_TRIGGERS_PER_NODE", "3");

        let loaded = AppConfig::load(Some(&path));

        std::env::remove_var("FLOW_BUILDER__CHANNELS__REFRESH_ON");
        std::env::remove_var("FLOW_BUILDER__GRAPH__MAX_TRIGGERS_PER_NODE");
        std::fs::remove_file(&path).unwrap();

        let config = loaded.unwrap();
        assert_eq!(config.channels.refresh_on, vec![Channel::Email, Channel::Push]);
        assert_eq!(config.graph.max_triggers_per_node, Some(3));
        assert_eq!(config.resolver.timeout_ms, 500);
        assert_eq!(config.resolver.placeholder_name, "Pick a segment");
        assert_eq!(config.resolver.default_display_width, "350px");
        assert_eq!(config.events.broadcast_capacity, 256);
    }

    #[test]
    fn test_load_missing_file_is_an_error() {
        let path = std::env::temp_dir().join(format!("flow-builder-missing-{}.toml", uuid::Uuid::new_v4()));
        assert!(AppConfig::load(Some(&path)).is_err());
    }

    #[test]
    fn test_deserialize_partial_sections() {
        let config: AppConfig = serde_json::from_value(serde_json::json!({
            "channels": { "refresh_on": ["email", "push"] },
            "graph": { "max_triggers_per_node": 4 }
        }))
        .unwrap();
        assert!(config.channels.refreshes(Channel::Push));
        assert!(!config.channels.refreshes(Channel::Chat));
        assert_eq!(config.graph.max_triggers_per_node, Some(4));
        assert_eq!(config.events.broadcast_capacity, 256);
    }
}
