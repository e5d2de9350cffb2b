//! Node configuration: resolved from an optional TOML file, then
//! overridden by explicit values (in practice, CLI flags), in that
//! priority order - CLI > file > built-in default. Modeled on the
//! serde-plus-TOML configuration shape used elsewhere in the corpus this
//! was grounded on.

use std::fmt;
use std::path::Path;

use rand::RngCore;
use serde::Deserialize;

use crate::wire::types::DEFAULT_TTL;

/// On-disk configuration file shape. Every field is optional so a file can
/// override just the fields it cares about.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    pub device_uuid_hex: Option<String>,
    pub network_key: Option<String>,
    pub listen_addr: Option<String>,
    #[serde(default)]
    pub static_peers: Vec<String>,
    pub default_ttl: Option<u8>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(path.display().to_string(), e.to_string()))?;
        toml::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read config file {0}: {1}")]
    Read(String, String),
    #[error("could not parse config file: {0}")]
    Parse(String),
    #[error("device_uuid_hex must decode to exactly 6 bytes")]
    BadDeviceUuid,
}

/// Fully resolved runtime configuration for one node.
#[derive(Clone)]
pub struct NodeConfig {
    pub device_uuid: [u8; 6],
    pub network_key: Vec<u8>,
    pub listen_addr: String,
    pub static_peers: Vec<String>,
    pub default_ttl: u8,
}

impl fmt::Debug for NodeConfig {
    /// Redacts the network key - it must never land in logs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeConfig")
            .field("device_uuid", &hex::encode(self.device_uuid))
            .field("network_key", &"<redacted>")
            .field("listen_addr", &self.listen_addr)
            .field("static_peers", &self.static_peers)
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}

impl NodeConfig {
    /// Builds a config from a parsed file plus override values (CLI
    /// flags), applying the CLI > file > default priority. `None`
    /// overrides mean "use the file's value, or the default".
    pub fn resolve(
        file: ConfigFile,
        device_uuid_hex: Option<String>,
        network_key: Option<String>,
        listen_addr: Option<String>,
        static_peers: Vec<String>,
        default_ttl: Option<u8>,
    ) -> Result<Self, ConfigError> {
        let device_uuid_hex = device_uuid_hex.or(file.device_uuid_hex);
        let device_uuid = match device_uuid_hex {
            Some(s) => {
                let bytes = hex::decode(s.trim()).map_err(|_| ConfigError::BadDeviceUuid)?;
                let arr: [u8; 6] = bytes.try_into().map_err(|_| ConfigError::BadDeviceUuid)?;
                arr
            }
            None => random_device_uuid(),
        };

        let network_key = network_key
            .or(file.network_key)
            .unwrap_or_else(|| "DisasterMeshNet!".to_string())
            .into_bytes();

        let listen_addr = listen_addr
            .or(file.listen_addr)
            .unwrap_or_else(|| "0.0.0.0:7420".to_string());

        let static_peers = if static_peers.is_empty() { file.static_peers } else { static_peers };

        let default_ttl = default_ttl.or(file.default_ttl).unwrap_or(DEFAULT_TTL);

        Ok(Self {
            device_uuid,
            network_key,
            listen_addr,
            static_peers,
            default_ttl,
        })
    }

    pub fn device_uuid_hex(&self) -> String {
        hex::encode(self.device_uuid)
    }
}

/// 6 random bytes, used when no device identifier is externally supplied.
fn random_device_uuid() -> [u8; 6] {
    let mut bytes = [0u8; 6];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_in_every_field() {
        let cfg = NodeConfig::resolve(ConfigFile::default(), None, None, None, Vec::new(), None).unwrap();
        assert_eq!(cfg.device_uuid.len(), 6);
        assert_eq!(cfg.default_ttl, DEFAULT_TTL);
        assert_eq!(cfg.listen_addr, "0.0.0.0:7420");
    }

    #[test]
    fn cli_override_wins_over_file() {
        let file = ConfigFile {
            listen_addr: Some("127.0.0.1:1111".into()),
            ..Default::default()
        };
        let cfg = NodeConfig::resolve(file, None, None, Some("127.0.0.1:2222".into()), Vec::new(), None).unwrap();
        assert_eq!(cfg.listen_addr, "127.0.0.1:2222");
    }

    #[test]
    fn rejects_malformed_device_uuid() {
        let err = NodeConfig::resolve(ConfigFile::default(), Some("not-hex".into()), None, None, Vec::new(), None)
            .unwrap_err();
        assert!(matches!(err, ConfigError::BadDeviceUuid));
    }
}
