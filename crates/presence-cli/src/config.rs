use anyhow::Context;
use presence_core::session::{DEFAULT_DOWNSCALE, DEFAULT_MAX_DROPPED_FRAMES, DEFAULT_SAMPLE_STRIDE};
use presence_core::{MatchPolicy, SessionConfig, Settings};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Runtime configuration: defaults, then an optional TOML file, then
/// `PRESENCE_*` environment variables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// V4L2 device path.
    pub camera_device: String,
    pub capture_width: u32,
    pub capture_height: u32,
    /// Frames discarded after opening the camera (auto exposure settling).
    pub warmup_frames: usize,
    /// Directory containing `det_10g.onnx` and `w600k_r50.onnx`.
    pub model_dir: PathBuf,
    pub known_faces_dir: PathBuf,
    pub ledger_path: PathBuf,
    /// Match every Nth captured frame.
    pub sample_stride: u32,
    pub downscale: u32,
    /// Maximum distance for a match, in the extractor's metric (cosine for
    /// the ArcFace models).
    pub tolerance: f32,
    /// Minimum `1 - min(1, d)` for a match.
    pub confidence_floor: f32,
    pub max_dropped_frames: u32,
}

impl Default for Config {
    fn default() -> Self {
        let policy = MatchPolicy::default();
        Self {
            camera_device: "/dev/video0".to_string(),
            capture_width: 640,
            capture_height: 480,
            warmup_frames: 10,
            model_dir: PathBuf::from("models"),
            known_faces_dir: PathBuf::from("known_faces"),
            ledger_path: PathBuf::from("attendance.csv"),
            sample_stride: DEFAULT_SAMPLE_STRIDE,
            downscale: DEFAULT_DOWNSCALE,
            tolerance: policy.tolerance,
            confidence_floor: policy.confidence_floor,
            max_dropped_frames: DEFAULT_MAX_DROPPED_FRAMES,
        }
    }
}

impl Config {
    /// Resolve the configuration for this process.
    ///
    /// `file` wins over `PRESENCE_CONFIG`. A named file that cannot be read
    /// or parsed is an error; no file at all means defaults.
    pub fn load(file: Option<&Path>) -> anyhow::Result<Self> {
        let file = file
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("PRESENCE_CONFIG").map(PathBuf::from));

        let mut config = match file {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.normalize();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Self = toml::from_str(&text)
            .with_context(|| format!("parsing config {}", path.display()))?;
        tracing::debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// Override fields from `PRESENCE_*` variables. Unparseable values are ignored.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("PRESENCE_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = var("PRESENCE_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = var("PRESENCE_KNOWN_FACES_DIR") {
            self.known_faces_dir = PathBuf::from(v);
        }
        if let Some(v) = var("PRESENCE_LEDGER_PATH") {
            self.ledger_path = PathBuf::from(v);
        }
        self.capture_width = env_parse(&var, "PRESENCE_CAPTURE_WIDTH", self.capture_width);
        self.capture_height = env_parse(&var, "PRESENCE_CAPTURE_HEIGHT", self.capture_height);
        self.warmup_frames = env_parse(&var, "PRESENCE_WARMUP_FRAMES", self.warmup_frames);
        self.sample_stride = env_parse(&var, "PRESENCE_SAMPLE_STRIDE", self.sample_stride);
        self.downscale = env_parse(&var, "PRESENCE_DOWNSCALE", self.downscale);
        self.tolerance = env_parse(&var, "PRESENCE_TOLERANCE", self.tolerance);
        self.confidence_floor = env_parse(&var, "PRESENCE_CONFIDENCE_FLOOR", self.confidence_floor);
        self.max_dropped_frames =
            env_parse(&var, "PRESENCE_MAX_DROPPED_FRAMES", self.max_dropped_frames);
    }

    /// Clamp values the pipeline cannot use.
    pub fn normalize(&mut self) {
        let defaults = Self::default();
        if self.sample_stride == 0 {
            tracing::warn!("sample_stride must be at least 1; using 1");
            self.sample_stride = 1;
        }
        if self.downscale == 0 {
            tracing::warn!("downscale must be at least 1; using 1");
            self.downscale = 1;
        }
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            tracing::warn!(tolerance = self.tolerance, "invalid tolerance; using default");
            self.tolerance = defaults.tolerance;
        }
        if !self.confidence_floor.is_finite() || !(0.0..=1.0).contains(&self.confidence_floor) {
            tracing::warn!(
                confidence_floor = self.confidence_floor,
                "confidence_floor outside [0, 1]; clamping"
            );
            self.confidence_floor = if self.confidence_floor.is_finite() {
                self.confidence_floor.clamp(0.0, 1.0)
            } else {
                defaults.confidence_floor
            };
        }
        if self.capture_width == 0 || self.capture_height == 0 {
            tracing::warn!(
                width = self.capture_width,
                height = self.capture_height,
                "invalid capture size; using 640x480"
            );
            self.capture_width = defaults.capture_width;
            self.capture_height = defaults.capture_height;
        }
    }

    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            sample_stride: self.sample_stride,
            downscale: self.downscale,
            max_dropped_frames: self.max_dropped_frames,
            policy: MatchPolicy {
                tolerance: self.tolerance,
                confidence_floor: self.confidence_floor,
            },
        }
    }

    pub fn settings(&self) -> Settings {
        Settings {
            known_faces_dir: self.known_faces_dir.clone(),
            ledger_path: self.ledger_path.clone(),
            session: self.session(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
    current: T,
) -> T {
    match var(key) {
        Some(raw) => match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(key, value = %raw, "ignoring unparseable environment value");
                current
            }
        },
        None => current,
    }
}
