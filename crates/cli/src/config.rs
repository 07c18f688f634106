//! YAML application configuration
//!
//! One section per pipeline stage, all optional. A missing file section
//! falls back to the stage defaults, so a config file only needs the
//! values it changes.

use anyhow::{Context as _, Result};
use harvest_arm_sim::ArmConfig;
use harvest_detector::DetectorConfig;
use harvest_enhancer::EnhancerConfig;
use harvest_fusion::FusionConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration for the whole pipeline
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub enhancer: EnhancerConfig,
    pub fusion: FusionConfig,
    pub detector: DetectorConfig,
    pub arm: ArmConfig,
}

/// Load an [`AppConfig`] from a YAML file
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let config: AppConfig = serde_yaml::from_str(&text).context("Invalid configuration")?;
    Ok(config)
}
