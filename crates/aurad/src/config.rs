use aura_core::types::DEFAULT_SIMILARITY_THRESHOLD;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Which message bus the daemon registers on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    Session,
    System,
}

impl FromStr for BusKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "session" => Ok(BusKind::Session),
            "system" => Ok(BusKind::System),
            other => Err(format!("unknown bus '{other}' (expected session or system)")),
        }
    }
}

/// Daemon configuration: optional TOML file, then `AURA_*` environment overrides.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the model files.
    pub model_dir: PathBuf,
    /// SCRFD detector file name within `model_dir`.
    pub detector_model: String,
    /// ArcFace embedder file name within `model_dir`.
    pub embedder_model: String,
    /// SeetaFace cascade file name within `model_dir`.
    pub cascade_model: String,
    /// Cosine similarity at or above which a face is recognized.
    pub similarity_threshold: f32,
    /// Caller-side limit on each engine request.
    pub request_timeout_secs: u64,
    pub bus: BusKind,
}

impl Default for Config {
    fn default() -> Self {
        Self::defaults_with(&env_lookup)
    }
}

impl Config {
    fn defaults_with(lookup: &dyn Fn(&str) -> Option<String>) -> Self {
        Self {
            model_dir: default_model_dir(lookup),
            detector_model: "det_10g.onnx".into(),
            embedder_model: "w600k_r50.onnx".into(),
            cascade_model: "seeta_fd_frontal_v1.0.bin".into(),
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            request_timeout_secs: 60,
            bus: BusKind::Session,
        }
    }

    /// Load from `AURA_CONFIG` (if set) and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(&env_lookup)
    }

    pub fn load_with(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = match lookup("AURA_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::defaults_with(lookup),
        };
        config.apply_env_with(lookup);
        Ok(config)
    }

    /// Fields missing from the file take their defaults.
    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    fn parse_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Override fields from `AURA_*` variables. Unparseable values are logged and ignored.
    pub fn apply_env_with(&mut self, lookup: &dyn Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup("AURA_MODEL_DIR") {
            self.model_dir = PathBuf::from(dir);
        }
        if let Some(name) = lookup("AURA_DETECTOR_MODEL") {
            self.detector_model = name;
        }
        if let Some(name) = lookup("AURA_EMBEDDER_MODEL") {
            self.embedder_model = name;
        }
        if let Some(name) = lookup("AURA_CASCADE_MODEL") {
            self.cascade_model = name;
        }
        if let Some(t) = parsed(lookup, "AURA_SIMILARITY_THRESHOLD") {
            self.similarity_threshold = t;
        }
        if let Some(secs) = parsed(lookup, "AURA_REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = secs;
        }
        if let Some(bus) = parsed(lookup, "AURA_BUS") {
            self.bus = bus;
        }

        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            tracing::warn!(
                threshold = self.similarity_threshold,
                "similarity threshold outside [0, 1], using default"
            );
            self.similarity_threshold = DEFAULT_SIMILARITY_THRESHOLD;
        }
    }

    pub fn detector_model_path(&self) -> PathBuf {
        self.model_dir.join(&self.detector_model)
    }

    pub fn embedder_model_path(&self) -> PathBuf {
        self.model_dir.join(&self.embedder_model)
    }

    pub fn cascade_model_path(&self) -> PathBuf {
        self.model_dir.join(&self.cascade_model)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn parsed<T>(lookup: &dyn Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = lookup(key)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(key, value = %raw, error = %e, "ignoring invalid environment value");
            None
        }
    }
}

/// `$XDG_DATA_HOME/aura/models`, falling back to `~/.local/share/aura/models`.
fn default_model_dir(lookup: &dyn Fn(&str) -> Option<String>) -> PathBuf {
    lookup("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("aura/models")
}
