//! Charge point configuration store
//!
//! An ordered list of key/value/readonly entries, seeded once at
//! construction. Entries are never added or removed afterwards; only
//! their values change, through ChangeConfiguration and SendLocalList.

use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::SimulatorConfig;
use crate::ocpp::types::{ConfigurationStatus, KeyValue};

/// Key of the entry mutated by SendLocalList
pub const LOCAL_AUTH_LIST_KEY: &str = "LocalAuthListEnabled";

/// Simulated hardware read latency for GetConfiguration
const READ_LATENCY: Duration = Duration::from_millis(150);

/// One configuration entry
#[derive(Debug, Clone)]
pub struct ConfigurationEntry {
    pub key: String,
    pub readonly: bool,
    pub value: String,
}

impl ConfigurationEntry {
    fn new(key: &str, readonly: bool, value: impl Into<String>) -> Self {
        Self {
            key: key.to_string(),
            readonly,
            value: value.into(),
        }
    }
}

/// The configuration key-value store
pub struct ConfigurationStore {
    entries: Mutex<Vec<ConfigurationEntry>>,
}

impl ConfigurationStore {
    /// Seed the fixed entry set from the simulator configuration
    pub fn new(config: &SimulatorConfig) -> Self {
        let entries = vec![
            ConfigurationEntry::new(LOCAL_AUTH_LIST_KEY, false, "true"),
            ConfigurationEntry::new(
                "HeartbeatInterval",
                false,
                config.heartbeat_interval.as_secs().to_string(),
            ),
            ConfigurationEntry::new("ResetRetries", false, "1"),
            ConfigurationEntry::new(
                "MeterValueSampleInterval",
                false,
                config.telemetry_interval.as_secs().to_string(),
            ),
            ConfigurationEntry::new("NumberOfConnectors", true, "1"),
            ConfigurationEntry::new("ChargePointVendor", true, config.vendor.clone()),
            ConfigurationEntry::new("ChargePointModel", true, config.model.clone()),
            ConfigurationEntry::new(
                "ChargePointSerialNumber",
                true,
                config.serial_number.clone().unwrap_or_default(),
            ),
        ];

        Self {
            entries: Mutex::new(entries),
        }
    }

    /// Return all entries, after a short simulated hardware read delay
    pub async fn get(&self) -> Vec<ConfigurationEntry> {
        tokio::time::sleep(READ_LATENCY).await;
        self.entries.lock().clone()
    }

    /// Update the value of a single entry, matched by key. Readonly
    /// entries are refused.
    pub fn set(&self, key: &str, value: &str) -> ConfigurationStatus {
        let mut entries = self.entries.lock();

        match entries.iter_mut().find(|e| e.key == key) {
            Some(entry) if entry.readonly => {
                debug!("Rejecting ChangeConfiguration for readonly key {}", key);
                ConfigurationStatus::Rejected
            }
            Some(entry) => {
                info!("Configuration {} = {}", key, value);
                entry.value = value.to_string();
                ConfigurationStatus::Accepted
            }
            None => {
                debug!("Unknown configuration key {}", key);
                ConfigurationStatus::NotSupported
            }
        }
    }

    /// Replace the local authorization list entry, leaving all others
    /// untouched
    pub fn set_local_authorization_list(&self, value: &str) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.iter_mut().find(|e| e.key == LOCAL_AUTH_LIST_KEY) {
            info!("Local authorization list updated");
            entry.value = value.to_string();
        }
    }

    /// Wire representation for GetConfiguration responses
    pub async fn key_values(&self) -> Vec<KeyValue> {
        self.get()
            .await
            .into_iter()
            .map(|e| KeyValue {
                key: e.key,
                readonly: e.readonly,
                value: Some(e.value),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ConfigurationStore {
        ConfigurationStore::new(&SimulatorConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_seeded_entries() {
        let store = store();
        let entries = store.get().await;

        let keys: Vec<&str> = entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "LocalAuthListEnabled",
                "HeartbeatInterval",
                "ResetRetries",
                "MeterValueSampleInterval",
                "NumberOfConnectors",
                "ChargePointVendor",
                "ChargePointModel",
                "ChargePointSerialNumber",
            ]
        );
        assert!(entries[4].readonly);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_updates_only_matching_key() {
        let store = store();
        let before = store.get().await;

        assert_eq!(
            store.set("HeartbeatInterval", "60"),
            ConfigurationStatus::Accepted
        );

        let after = store.get().await;
        for (b, a) in before.iter().zip(after.iter()) {
            if b.key == "HeartbeatInterval" {
                assert_eq!(a.value, "60");
            } else {
                assert_eq!(a.value, b.value);
            }
        }
    }

    #[test]
    fn test_set_rejects_readonly() {
        let store = store();
        assert_eq!(
            store.set("ChargePointVendor", "mallory"),
            ConfigurationStatus::Rejected
        );
    }

    #[test]
    fn test_set_unknown_key() {
        let store = store();
        assert_eq!(
            store.set("NoSuchKey", "1"),
            ConfigurationStatus::NotSupported
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_auth_list_only_changes_its_entry() {
        let store = store();
        let before = store.get().await;

        store.set_local_authorization_list("[\"CAFE01\"]");

        let after = store.get().await;
        for (b, a) in before.iter().zip(after.iter()) {
            if b.key == LOCAL_AUTH_LIST_KEY {
                assert_eq!(a.value, "[\"CAFE01\"]");
            } else {
                assert_eq!(a.value, b.value);
            }
        }
    }
}
