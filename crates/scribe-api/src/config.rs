//! API configuration.

use std::path::PathBuf;

use scribe_models::{DEFAULT_OVERLAP_SECS, DEFAULT_SLICE_SECS};

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// CORS origins
    pub cors_origins: Vec<String>,
    /// Max request body size
    pub max_body_size: usize,
    /// Environment (development/production)
    pub environment: String,
    /// Default slice length for new jobs
    pub chunk_slice_secs: f64,
    /// Default backward overlap for new jobs
    pub chunk_overlap_secs: f64,
    /// Serve `/metrics`
    pub metrics_enabled: bool,
    /// Scratch space for duration probes
    pub work_dir: PathBuf,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: vec!["*".to_string()],
            max_body_size: 1024 * 1024, // 1MB
            environment: "development".to_string(),
            chunk_slice_secs: DEFAULT_SLICE_SECS,
            chunk_overlap_secs: DEFAULT_OVERLAP_SECS,
            metrics_enabled: true,
            work_dir: PathBuf::from("/tmp/scribe-api"),
        }
    }
}

impl ApiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("API_HOST").unwrap_or(defaults.host),
            port: std::env::var("API_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(defaults.cors_origins),
            max_body_size: std::env::var("MAX_BODY_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_body_size),
            environment: std::env::var("ENVIRONMENT").unwrap_or(defaults.environment),
            chunk_slice_secs: std::env::var("CHUNK_SLICE_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.chunk_slice_secs),
            chunk_overlap_secs: std::env::var("CHUNK_OVERLAP_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.chunk_overlap_secs),
            metrics_enabled: std::env::var("METRICS_ENABLED")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.metrics_enabled),
            work_dir: std::env::var("API_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
        }
    }

    /// Check if running in production mode.
    pub fn is_production(&self) -> bool {
        self.environment.to_lowercase() == "production"
    }
}
