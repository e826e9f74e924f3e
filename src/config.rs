// src/config.rs
//
// SimConfig: every tunable knob for a simulation run, layered from
// defaults, an optional TOML file, then CLI overrides — the same
// lowest-to-highest precedence shape as the teacher's config loader, with
// a CLI layer added on top since this crate's entry point is a CLI rather
// than a long-running service.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DhtError, Result};
use crate::kademlia::KademliaConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub k: usize,
    pub alpha: u32,
    pub maintenance_period: u64,
    pub bucket_refresh_period: u64,
    pub link_limit: usize,
    pub node_count: usize,
    pub seed: Option<u64>,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            k: 20,
            alpha: 3,
            maintenance_period: 10_000,
            bucket_refresh_period: 1_000,
            link_limit: 64 * 1024,
            node_count: 50,
            seed: None,
        }
    }
}

impl SimConfig {
    /// Layers a TOML file over the defaults. Missing fields in the file
    /// keep their default value, courtesy of `#[serde(default)]`.
    pub fn load_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| DhtError::ConfigRead {
            path: path.display().to_string(),
            source,
        })?;
        let cfg: SimConfig = toml::from_str(&content).map_err(|source| DhtError::ConfigParse {
            path: path.display().to_string(),
            source,
        })?;
        Ok(cfg)
    }

    pub fn kademlia_config(&self) -> KademliaConfig {
        KademliaConfig {
            k: self.k,
            alpha: self.alpha,
            maintenance_period: self.maintenance_period,
            bucket_refresh_period: self.bucket_refresh_period,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_spec() {
        let cfg = SimConfig::default();
        assert_eq!(cfg.k, 20);
        assert_eq!(cfg.alpha, 3);
        assert_eq!(cfg.maintenance_period, 10_000);
        assert_eq!(cfg.bucket_refresh_period, 1_000);
        assert_eq!(cfg.seed, None);
    }

    #[test]
    fn file_overrides_merge_over_defaults() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("dhtsim-test-config-{}.toml", std::process::id()));
        std::fs::write(&path, "k = 8\nseed = 42\n").unwrap();
        let cfg = SimConfig::load_file(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(cfg.k, 8);
        assert_eq!(cfg.seed, Some(42));
        // untouched fields keep their default
        assert_eq!(cfg.alpha, 3);
    }

    #[test]
    fn missing_file_is_a_config_read_error() {
        let path = Path::new("/nonexistent/dhtsim-config.toml");
        assert!(matches!(SimConfig::load_file(path), Err(DhtError::ConfigRead { .. })));
    }
}
