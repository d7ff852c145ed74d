//! Application Configuration
//!
//! Tunable thresholds for every pipeline stage, stored in TOML format.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::scan::DispatchPolicy;

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Live frame analysis settings
    pub analyzer: AnalyzerSettings,
    /// Auto-capture debounce settings
    pub auto_capture: AutoCaptureSettings,
    /// Image normalization settings
    pub normalizer: NormalizerSettings,
    /// Recognition dispatch settings
    pub recognition: RecognitionSettings,
    /// Consensus and plausibility settings
    pub consensus: ConsensusSettings,
}

/// Frame quality analyzer thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerSettings {
    /// Interval between analysis ticks
    pub tick_interval_ms: u64,
    /// Width the guide crop is scaled to before analysis
    pub analysis_width: u32,
    /// Lower bound of the adaptive edge threshold (gradient magnitude)
    pub edge_floor: f32,
    /// Minimum fraction of analysis pixels that must be edges
    pub min_edge_density: f32,
    /// Minimum bounding box coverage of the analysis area
    pub min_coverage: f64,
    /// Maximum bounding box coverage of the analysis area
    pub max_coverage: f64,
    /// Maximum deviation of the principal axis from vertical, in degrees
    pub max_tilt_degrees: f64,
    /// Maximum center offset, normalized by the half extent
    pub max_center_offset: f64,
    /// Minimum Laplacian variance
    pub min_focus: f64,
    /// Upper bound on edge pixels sampled for tilt estimation
    pub max_tilt_samples: usize,
}

impl Default for AnalyzerSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: 280,
            analysis_width: 320,
            edge_floor: 40.0,
            min_edge_density: 0.004,
            min_coverage: 0.55,
            max_coverage: 0.94,
            max_tilt_degrees: 9.0,
            max_center_offset: 0.14,
            min_focus: 60.0,
            max_tilt_samples: 2000,
        }
    }
}

impl AnalyzerSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

/// Auto-capture debounce settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoCaptureSettings {
    /// Consecutive ready frames required before capture
    pub min_stable_frames: u32,
    /// Minimum time since the first ready frame
    pub min_stable_delay_ms: u64,
}

impl Default for AutoCaptureSettings {
    fn default() -> Self {
        Self {
            min_stable_frames: 3,
            min_stable_delay_ms: 750,
        }
    }
}

impl AutoCaptureSettings {
    pub fn min_stable_delay(&self) -> Duration {
        Duration::from_millis(self.min_stable_delay_ms)
    }
}

/// Image normalizer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerSettings {
    /// Maximum length of the long edge after normalization
    pub max_long_edge: u32,
    /// Maximum long edge of the preview attached to results (0 disables it)
    pub preview_max_edge: u32,
}

impl Default for NormalizerSettings {
    fn default() -> Self {
        Self {
            max_long_edge: 1600,
            preview_max_edge: 480,
        }
    }
}

/// Recognition dispatch settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionSettings {
    /// Upper bound on concurrent recognition workers
    pub max_workers: usize,
    /// Whether to sample every variant or stop at the first dated one
    pub dispatch: DispatchPolicy,
    /// Binarization cutoffs, as multiples of the mean luma, one per filter pass
    pub cutoff_factors: [f32; 3],
    /// Tesseract executable (searched on PATH when unset)
    pub tesseract_path: Option<PathBuf>,
    /// Tesseract language list
    pub languages: String,
    /// Per-call engine timeout
    pub timeout_secs: u64,
}

impl Default for RecognitionSettings {
    fn default() -> Self {
        Self {
            max_workers: 4,
            dispatch: DispatchPolicy::Exhaustive,
            cutoff_factors: [0.85, 1.0, 1.15],
            tesseract_path: None,
            languages: "por+eng".to_string(),
            timeout_secs: 20,
        }
    }
}

impl RecognitionSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Consensus and plausibility settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusSettings {
    /// Youngest accepted age, in whole years
    pub min_age: u32,
    /// Oldest accepted age, in whole years
    pub max_age: u32,
}

impl Default for ConsensusSettings {
    fn default() -> Self {
        Self {
            min_age: 18,
            max_age: 90,
        }
    }
}

/// Get the configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    let proj_dirs = directories::ProjectDirs::from("com", "idscan", "IdScan")
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

    let config_dir = proj_dirs.config_dir().to_path_buf();
    std::fs::create_dir_all(&config_dir)?;

    Ok(config_dir)
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Load configuration from `path`, or from the default location, falling back to defaults
pub fn load_or_default(path: Option<&Path>) -> AppConfig {
    let path = match path {
        Some(p) => Some(p.to_path_buf()),
        None => get_config_dir().ok().map(|dir| dir.join("config.toml")),
    };

    if let Some(path) = path {
        if path.exists() {
            match load_config(&path) {
                Ok(config) => {
                    info!("Loaded configuration from {:?}", path);
                    return config;
                }
                Err(e) => tracing::warn!("Ignoring unreadable config {:?}: {}", path, e),
            }
        }
    }
    info!("Using default configuration");
    AppConfig::default()
}
