//! Settings of the HTTP metrics layer

use serde::{Deserialize, Serialize};

/// HTTP request metrics, read from the `[metrics]` config section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,

    /// Record the request duration histogram
    pub enable_histograms: bool,

    /// Routes never counted; health checks and the scrape endpoint by default
    pub excluded_paths: Vec<String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            enable_histograms: true,
            excluded_paths: vec![
                "/health".to_string(),
                "/health/live".to_string(),
                "/health/ready".to_string(),
                "/metrics".to_string(),
            ],
        }
    }
}

impl MetricsConfig {
    pub fn is_path_excluded(&self, path: &str) -> bool {
        self.excluded_paths.iter().any(|p| p == path)
    }
}
