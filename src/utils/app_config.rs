use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;
use std::sync::{RwLockReadGuard, RwLockWriteGuard};

use config::{Environment, Source};
use lazy_static::lazy_static;

use super::error::Result;

static DEFAULT_CONFIG: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/resources/default_config.toml"));

/// A named table under `presets`, merged on top of everything else when selected
#[derive(Debug, Clone, serde::Deserialize)]
struct Preset(HashMap<String, config::Value>);

impl config::Source for Preset {
    fn clone_into_box(&self) -> Box<dyn Source + Send + Sync> {
        Box::new(self.clone())
    }

    fn collect(&self) -> std::result::Result<HashMap<String, config::Value>, config::ConfigError> {
        let mut kv = self.0.clone();
        // a preset can not select further presets
        kv.remove("presets");
        Ok(kv)
    }
}

/// Layered configuration: embedded defaults, `CARBONSIM_*` env, user file, preset
pub struct AppConfig(config::Config);

impl AppConfig {
    pub fn new() -> Self {
        Self(config::Config::new())
    }

    pub fn setup(&mut self) -> Result<&mut Self> {
        self.0
            .merge(config::File::from_str(DEFAULT_CONFIG, config::FileFormat::Toml))?;

        self.0.merge(Environment::with_prefix("CARBONSIM").separator("__"))?;

        Ok(self)
    }

    /// Load config from a file
    pub fn use_file(&mut self, path: &Path) -> Result<&mut Self> {
        self.0.merge(config::File::from(path))?;
        Ok(self)
    }

    /// Load preset
    pub fn use_preset(&mut self, name: &str) -> Result<&mut Self> {
        let preset: Preset = self.get(format!("presets.{}", name))?;
        self.0.merge(preset)?;
        Ok(self)
    }

    /// Get a single value and deserialize to the given type
    pub fn get<T, K>(&self, key: K) -> Result<T>
    where
        // DeserializeOwned: the read guard on CONFIG is released before the value is used
        T: serde::de::DeserializeOwned,
        K: AsRef<str>,
    {
        Ok(self.0.get(key.as_ref())?)
    }

    /// Deserialize the whole configuration into the given type
    pub fn fetch<T>(&self) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let t = self.0.clone().try_into()?;
        Ok(t)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::new()
    }
}

lazy_static! {
    /// global AppConfig instance
    static ref CONFIG: RwLock<AppConfig> = RwLock::new(AppConfig::new());
}

/// Merge defaults and environment into the global instance
pub fn setup() -> Result<()> {
    config_mut().setup()?;
    Ok(())
}

/// global AppConfig instance
pub fn config() -> RwLockReadGuard<'static, AppConfig> {
    CONFIG.read().unwrap()
}

/// mutable global AppConfig instance
pub fn config_mut() -> RwLockWriteGuard<'static, AppConfig> {
    CONFIG.write().unwrap()
}

pub mod prelude {
    pub use super::{config, config_mut};
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    fn test_config() -> AppConfig {
        let mut config = AppConfig::new();
        config.setup().unwrap();
        config
            .use_file(Path::new(concat!(
                env!("CARGO_MANIFEST_DIR"),
                "/resources/test_config.toml"
            )))
            .unwrap();

        config
    }

    #[test]
    fn file_overrides_defaults() {
        let config = test_config();

        #[derive(Deserialize)]
        struct Provisioner {
            scheduler: String,
            horizon_hours: usize,
        }
        #[derive(Deserialize)]
        struct Fragment {
            seed: String,
            provisioner: Provisioner,
        }

        let frag: Fragment = config.fetch().unwrap();

        assert_eq!(frag.seed, "test seed");
        assert_eq!(frag.provisioner.scheduler, "latency");
        assert_eq!(frag.provisioner.horizon_hours, 6);
    }

    #[test]
    fn untouched_defaults_survive() {
        let config = test_config();

        let capacity: f64 = config.get("provisioner.server_capacity").unwrap();
        let mode: String = config.get("workload.mode").unwrap();

        assert!((capacity - 10.0).abs() < f64::EPSILON);
        assert_eq!(mode, "trace");
    }

    #[test]
    fn preset() {
        let mut config = test_config();

        let scheduler: String = config.get("provisioner.scheduler").unwrap();
        assert_eq!(scheduler, "latency");

        config.use_preset("replay_short").unwrap();
        let scheduler: String = config.get("provisioner.scheduler").unwrap();
        assert_eq!(scheduler, "replay");

        let horizon: usize = config.get("provisioner.horizon_hours").unwrap();
        assert_eq!(horizon, 2);
    }
}
