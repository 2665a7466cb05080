//! Platform configuration, loaded from `drydock.yaml`.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub const CONFIG_FILE: &str = "drydock.yaml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Public address of this control plane, exported to units as
    /// `TSURU_HOST`.
    #[serde(default = "default_host")]
    pub host: String,

    /// Default unit-quota limit stamped on new apps. Absent means new apps
    /// get an unlimited unit quota.
    #[serde(default)]
    pub units_per_app: Option<u32>,

    /// Default app-quota limit stamped on new users. Absent means
    /// unlimited.
    #[serde(default)]
    pub apps_per_user: Option<u32>,
}

fn default_host() -> String {
    "http://localhost:8080".to_string()
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            units_per_app: None,
            apps_per_user: None,
        }
    }
}

impl PlatformConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let config: PlatformConfig = serde_yaml::from_str(&data)?;
        Ok(config)
    }

    /// Load from `path`, falling back to defaults when the file is absent.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(path)
    }
}
