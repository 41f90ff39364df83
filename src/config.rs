use std::{
    fmt::{Debug, Display, Formatter},
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use anyhow::Context;
use clap::Parser;
use serde::{Deserialize, Deserializer};

#[derive(Parser, Debug, Clone)]
#[clap(about = "Ensure a topic and a set of queues exist in a broker namespace")]
pub struct Opts {
    /// Path to a toml transport configuration
    #[clap(short, long, env = "BUSPROV_CONFIG")]
    pub config: Option<PathBuf>,

    /// Overrides the connection string from the configuration file.
    #[clap(long, env = "BUSPROV_CONNECTION_STRING", hide_env_values = true)]
    pub connection_string: Option<String>,

    /// Overrides the topic name from the configuration file.
    #[clap(short, long, env = "BUSPROV_TOPIC")]
    pub topic: Option<EntityName>,

    /// Print the provisioning report as json on stdout.
    #[clap(long)]
    pub json: bool,

    /// Queues to ensure, appended after the ones listed in the configuration file.
    pub queues: Vec<EntityName>,
}

impl Opts {
    /// Load the configuration file (if any) and apply command line overrides on top.
    pub fn transport_config(&self) -> anyhow::Result<TransportConfig> {
        let mut config = match &self.config {
            Some(path) => TransportConfig::from_file(path)?,
            None => TransportConfig::default(),
        };
        if let Some(connection_string) = &self.connection_string {
            config.connection_string = connection_string.clone();
        }
        if let Some(topic) = &self.topic {
            config.topic_name = topic.clone();
        }
        config.queues.extend(self.queues.iter().cloned());
        config.validate()?;
        Ok(config)
    }
}

#[derive(Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TransportConfig {
    #[serde(default)]
    pub connection_string: String,
    #[serde(default = "default_topic_name")]
    pub topic_name: EntityName,
    /// Maximum entity size in gigabytes.
    #[serde(default = "default_entity_maximum_size")]
    pub entity_maximum_size: u32,
    #[serde(default, deserialize_with = "deserialize_humantime")]
    pub auto_delete_on_idle: Option<Duration>,
    #[serde(default)]
    pub enable_partitioning: bool,
    #[serde(default)]
    pub queues: Vec<EntityName>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connection_string: String::new(),
            topic_name: default_topic_name(),
            entity_maximum_size: default_entity_maximum_size(),
            auto_delete_on_idle: None,
            enable_partitioning: false,
            queues: Vec::new(),
        }
    }
}

impl TransportConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path).with_context(|| {
            format!("failed to read transport config at {}", path.to_string_lossy())
        })?;
        toml::from_str(&contents)
            .with_context(|| format!("invalid transport config at {}", path.to_string_lossy()))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            !self.connection_string.trim().is_empty(),
            "a connection string is required, set it in the config file or BUSPROV_CONNECTION_STRING"
        );
        anyhow::ensure!(
            self.entity_maximum_size >= 1,
            "entity_maximum_size must be at least 1 (GB)"
        );
        if let Some(idle) = self.auto_delete_on_idle {
            anyhow::ensure!(
                idle >= Duration::from_secs(5 * 60),
                "auto_delete_on_idle must be at least 5 minutes"
            );
        }
        Ok(())
    }

    /// Queue names in configured order, exact duplicates removed keeping the first
    /// occurrence. Names differing only in case are kept: AMQP brokers treat them as
    /// different queues, Service Bus reports the second one as already existing.
    pub fn queue_names(&self) -> Vec<EntityName> {
        let mut seen = std::collections::HashSet::new();
        self.queues
            .iter()
            .filter(|name| seen.insert(name.as_str()))
            .cloned()
            .collect()
    }
}

impl Debug for TransportConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // connection strings carry keys
        f.debug_struct("TransportConfig")
            .field("connection_string", &"<redacted>")
            .field("topic_name", &self.topic_name)
            .field("entity_maximum_size", &self.entity_maximum_size)
            .field("auto_delete_on_idle", &self.auto_delete_on_idle)
            .field("enable_partitioning", &self.enable_partitioning)
            .field("queues", &self.queues)
            .finish()
    }
}

fn default_topic_name() -> EntityName {
    EntityName("bundle-1".to_string())
}

fn default_entity_maximum_size() -> u32 {
    5
}

fn deserialize_humantime<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    raw.map(|s| humantime::parse_duration(&s).map_err(serde::de::Error::custom))
        .transpose()
}

/// Valid entity names:
///   must not be empty
///   contain at most 260 characters
///   contain only ascii letters, digits, '.', '-', '_' or '/'
///   start and end with a letter or digit
///   not contain an empty path segment ("//")
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct EntityName(String);

impl EntityName {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl FromStr for EntityName {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        anyhow::ensure!(!s.is_empty(), "entity name cannot be an empty string");
        anyhow::ensure!(s.len() <= 260, "entity name must be <= 260 characters");
        anyhow::ensure!(
            s.chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '/')),
            "entity name {s:?} must contain only letters, digits, '.', '-', '_' or '/'"
        );
        anyhow::ensure!(
            s.starts_with(|c: char| c.is_ascii_alphanumeric()),
            "entity name {s:?} must start with a letter or digit"
        );
        anyhow::ensure!(
            s.ends_with(|c: char| c.is_ascii_alphanumeric()),
            "entity name {s:?} must end with a letter or digit"
        );
        anyhow::ensure!(
            !s.contains("//"),
            "entity name {s:?} must not contain empty path segments"
        );
        Ok(Self(s.to_string()))
    }
}

impl<'de> Deserialize<'de> for EntityName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl Debug for EntityName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Display for EntityName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
