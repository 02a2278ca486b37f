//! Replica configuration.

use anyhow::{bail, Context, Result};
use hlcsync_core::hlc::DEFAULT_MAX_DRIFT_MS;
use hlcsync_core::OwnerId;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Replica configuration.
#[derive(Debug, Clone)]
pub struct ReplicaConfig {
    /// Node ID for a fresh store; random if unset
    pub node_id: Option<Uuid>,

    /// Owner identity passed to the sync peer
    pub owner: OwnerId,

    /// Maximum tolerated clock drift in milliseconds
    pub max_drift_ms: u64,

    /// Sync configuration
    pub sync: SyncConfig,

    /// Persistence configuration
    pub persistence: PersistenceConfig,
}

/// How mutations reach the sync peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Protobuf over HTTP POST
    Http,
    /// Protobuf over MQTT
    Mqtt,
    /// Sync disabled
    None,
}

impl FromStr for TransportKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "http" => Ok(Self::Http),
            "mqtt" => Ok(Self::Mqtt),
            "none" => Ok(Self::None),
            other => bail!("unknown transport '{other}' (expected http, mqtt or none)"),
        }
    }
}

/// Sync configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Transport type
    pub transport: TransportKind,

    /// Sync peer endpoint (for HTTP)
    pub sync_url: String,

    /// MQTT broker URL (for MQTT)
    pub mqtt_broker: String,

    /// Request timeout, also how long the CLI waits for an answer
    pub timeout: Duration,

    /// Capacity of the sync queue
    pub queue_capacity: usize,
}

/// Storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    /// `SQLite` file
    Sqlite,
    /// Process memory; lost on exit
    Memory,
}

impl FromStr for StoreKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sqlite" => Ok(Self::Sqlite),
            "memory" => Ok(Self::Memory),
            other => bail!("unknown store '{other}' (expected sqlite or memory)"),
        }
    }
}

/// Persistence configuration.
#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    /// Store type
    pub store_type: StoreKind,

    /// Database path (for SQLite)
    pub db_path: PathBuf,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            node_id: None,
            owner: OwnerId::new("default"),
            max_drift_ms: DEFAULT_MAX_DRIFT_MS,
            sync: SyncConfig {
                transport: TransportKind::None,
                sync_url: "http://localhost:4000/sync".to_string(),
                mqtt_broker: "tcp://localhost:1883".to_string(),
                timeout: Duration::from_secs(5),
                queue_capacity: 100,
            },
            persistence: PersistenceConfig {
                store_type: StoreKind::Sqlite,
                db_path: PathBuf::from("./hlcsync.db"),
            },
        }
    }
}

impl ReplicaConfig {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `HLCSYNC_NODE_ID`: Node UUID for a fresh store
    /// - `HLCSYNC_OWNER_ID`: Owner identifier
    /// - `HLCSYNC_MAX_DRIFT_MS`: Maximum clock drift
    /// - `HLCSYNC_TRANSPORT`: "http", "mqtt" or "none"
    /// - `HLCSYNC_SYNC_URL`: Sync peer endpoint
    /// - `HLCSYNC_MQTT_BROKER`: MQTT broker URL
    /// - `HLCSYNC_SYNC_TIMEOUT_MS`: Sync request timeout
    /// - `HLCSYNC_STORE`: "sqlite" or "memory"
    /// - `HLCSYNC_DB_PATH`: SQLite database path
    ///
    /// # Errors
    ///
    /// Returns error if a variable is set to an invalid value.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(id) = var("HLCSYNC_NODE_ID") {
            config.node_id = Some(Uuid::parse_str(&id).context("Invalid HLCSYNC_NODE_ID")?);
        }

        if let Some(owner) = var("HLCSYNC_OWNER_ID") {
            config.owner = OwnerId::new(owner);
        }

        if let Some(drift) = var("HLCSYNC_MAX_DRIFT_MS") {
            config.max_drift_ms = drift.parse().context("Invalid HLCSYNC_MAX_DRIFT_MS")?;
        }

        if let Some(transport) = var("HLCSYNC_TRANSPORT") {
            config.sync.transport = transport.parse().context("Invalid HLCSYNC_TRANSPORT")?;
        }

        if let Some(url) = var("HLCSYNC_SYNC_URL") {
            config.sync.sync_url = url;
        }

        if let Some(mqtt) = var("HLCSYNC_MQTT_BROKER") {
            config.sync.mqtt_broker = mqtt;
        }

        if let Some(timeout) = var("HLCSYNC_SYNC_TIMEOUT_MS") {
            let millis: u64 = timeout.parse().context("Invalid HLCSYNC_SYNC_TIMEOUT_MS")?;
            config.sync.timeout = Duration::from_millis(millis);
        }

        if let Some(store) = var("HLCSYNC_STORE") {
            config.persistence.store_type = store.parse().context("Invalid HLCSYNC_STORE")?;
        }

        if let Some(db_path) = var("HLCSYNC_DB_PATH") {
            config.persistence.db_path = PathBuf::from(db_path);
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults_without_environment() {
        let config = ReplicaConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.max_drift_ms, 60_000);
        assert_eq!(config.sync.transport, TransportKind::None);
        assert_eq!(config.persistence.store_type, StoreKind::Sqlite);
        assert!(config.node_id.is_none());
    }

    #[test]
    fn reads_every_variable() {
        let node_id = Uuid::new_v4();
        let node = node_id.to_string();
        let config = ReplicaConfig::from_lookup(lookup(&[
            ("HLCSYNC_NODE_ID", node.as_str()),
            ("HLCSYNC_OWNER_ID", "owner-a"),
            ("HLCSYNC_MAX_DRIFT_MS", "5000"),
            ("HLCSYNC_TRANSPORT", "mqtt"),
            ("HLCSYNC_SYNC_URL", "https://sync.example/sync"),
            ("HLCSYNC_MQTT_BROKER", "mqtt://broker:1884"),
            ("HLCSYNC_SYNC_TIMEOUT_MS", "250"),
            ("HLCSYNC_STORE", "memory"),
            ("HLCSYNC_DB_PATH", "/tmp/replica.db"),
        ]))
        .unwrap();

        assert_eq!(config.node_id, Some(node_id));
        assert_eq!(config.owner, OwnerId::new("owner-a"));
        assert_eq!(config.max_drift_ms, 5000);
        assert_eq!(config.sync.transport, TransportKind::Mqtt);
        assert_eq!(config.sync.sync_url, "https://sync.example/sync");
        assert_eq!(config.sync.mqtt_broker, "mqtt://broker:1884");
        assert_eq!(config.sync.timeout, Duration::from_millis(250));
        assert_eq!(config.persistence.store_type, StoreKind::Memory);
        assert_eq!(config.persistence.db_path, PathBuf::from("/tmp/replica.db"));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(ReplicaConfig::from_lookup(lookup(&[("HLCSYNC_NODE_ID", "nope")])).is_err());
        assert!(ReplicaConfig::from_lookup(lookup(&[("HLCSYNC_TRANSPORT", "smtp")])).is_err());
        assert!(ReplicaConfig::from_lookup(lookup(&[("HLCSYNC_MAX_DRIFT_MS", "-1")])).is_err());
    }
}
