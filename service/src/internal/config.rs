use std::net::SocketAddr;
use std::path::PathBuf;

use hex::FromHex;
use sealed_common::Address;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing {0} env var")]
    Missing(&'static str),

    #[error("{var} is invalid: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Server settings, read from the environment (and `.env`, when the binary loads it).
#[derive(Clone)]
pub struct ServiceConfig {
    pub listen_addr: SocketAddr,
    pub db_path: PathBuf,
    /// Identity of the ledger itself; always on the ACL of every stored password.
    pub contract_address: Address,
    /// X25519 secret of the local protected computation backend.
    pub network_key: [u8; 32],
    pub event_capacity: usize,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any key/value source; `from_env` is this over the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let listen_addr: SocketAddr = match lookup("REPORTS_LISTEN_ADDR") {
            Some(v) => v.parse().map_err(|e| invalid("REPORTS_LISTEN_ADDR", e))?,
            None => SocketAddr::from(([127, 0, 0, 1], 3001)),
        };
        let db_path = lookup("REPORTS_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("reports.db"));
        let contract_address: Address = required(&lookup, "REPORTS_CONTRACT_ADDRESS")?
            .parse()
            .map_err(|e| invalid("REPORTS_CONTRACT_ADDRESS", e))?;
        let network_key = hex_32(&lookup, "COPROCESSOR_NETWORK_KEY")?;
        let event_capacity: usize = match lookup("REPORTS_EVENT_CAPACITY") {
            Some(v) => v.parse().map_err(|e| invalid("REPORTS_EVENT_CAPACITY", e))?,
            None => 1024,
        };

        Ok(ServiceConfig {
            listen_addr,
            db_path,
            contract_address,
            network_key,
            event_capacity,
        })
    }
}

// Secrets stay out of logs.
impl std::fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("listen_addr", &self.listen_addr)
            .field("db_path", &self.db_path)
            .field("contract_address", &self.contract_address)
            .field("event_capacity", &self.event_capacity)
            .finish_non_exhaustive()
    }
}

fn invalid(var: &'static str, e: impl std::fmt::Display) -> ConfigError {
    ConfigError::Invalid {
        var,
        reason: e.to_string(),
    }
}

fn required(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<String, ConfigError> {
    lookup(var).ok_or(ConfigError::Missing(var))
}

fn hex_32(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<[u8; 32], ConfigError> {
    let value = required(lookup, var)?;
    <[u8; 32]>::from_hex(value.trim_start_matches("0x"))
        .map_err(|_| invalid(var, "must be 32 bytes, hex encoded (ex: `1234...abcd`)"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    const CONTRACT: &str = "0x5fbdb2315678afecb367f032d93f642f64180aa3";

    #[test]
    fn defaults_apply() {
        let key = format!("0x{}", "11".repeat(32));
        let config = ServiceConfig::from_lookup(env(&[
            ("REPORTS_CONTRACT_ADDRESS", CONTRACT),
            ("COPROCESSOR_NETWORK_KEY", &key),
        ]))
        .unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:3001".parse().unwrap());
        assert_eq!(config.db_path, PathBuf::from("reports.db"));
        assert_eq!(config.contract_address.to_string(), CONTRACT);
        assert_eq!(config.network_key, [0x11; 32]);
        assert_eq!(config.event_capacity, 1024);
    }

    #[test]
    fn missing_and_malformed_values_are_reported() {
        let err = ServiceConfig::from_lookup(env(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("REPORTS_CONTRACT_ADDRESS")));

        let err = ServiceConfig::from_lookup(env(&[
            ("REPORTS_CONTRACT_ADDRESS", CONTRACT),
            ("COPROCESSOR_NETWORK_KEY", "abcd"),
        ]))
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                var: "COPROCESSOR_NETWORK_KEY",
                ..
            }
        ));
    }

    #[test]
    fn debug_hides_secrets() {
        let key = "ab".repeat(32);
        let config = ServiceConfig::from_lookup(env(&[
            ("REPORTS_CONTRACT_ADDRESS", CONTRACT),
            ("COPROCESSOR_NETWORK_KEY", &key),
        ]))
        .unwrap();
        assert!(!format!("{config:?}").contains(&key));
    }
}
