//! Controller configuration
//!
//! Stored as JSON; a missing file means defaults (no metadata, no latency).

use crate::error::Result;
use crate::hooks::{FixedLatency, JitterLatency, Latency, NoLatency};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Controller-level metadata and latency policy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub repo_icon_class_name: Option<String>,
    pub org_icon_class_name: Option<String>,
    pub latency: LatencyConfig,
}

/// Serializable form of the stock latency policies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LatencyConfig {
    #[default]
    None,
    Fixed { millis: u64 },
    Jitter { mean_millis: u64 },
}

impl LatencyConfig {
    pub fn build(&self) -> Arc<dyn Latency> {
        match *self {
            LatencyConfig::None => Arc::new(NoLatency),
            LatencyConfig::Fixed { millis } => Arc::new(FixedLatency(Duration::from_millis(millis))),
            LatencyConfig::Jitter { mean_millis } => Arc::new(JitterLatency {
                mean: Duration::from_millis(mean_millis),
            }),
        }
    }
}

impl ControllerConfig {
    /// Load from a JSON file, or defaults if it does not exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    /// Write atomically via a temporary file
    pub fn save(&self, path: &Path) -> Result<()> {
        let tmp_path = path.with_extension("tmp");
        let data = serde_json::to_string_pretty(self)?;
        fs::write(&tmp_path, data)?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    }
}
