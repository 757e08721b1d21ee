use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Engine configuration.
///
/// Resolved once at startup (defaults, then an optional TOML file named by
/// `ROLLCALL_CONFIG`, then `ROLLCALL_*` environment variables) and passed by
/// reference to each component. Never changes while the engine runs.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory of enrollment images named `<roll>_<Name>.<ext>`.
    pub enrollment_dir: PathBuf,
    /// CSV attendance table.
    pub attendance_path: PathBuf,
    /// Maximum embedding distance for a positive match. Smaller is stricter.
    pub distance_threshold: f32,
    /// Frames are shrunk by this factor before detection.
    pub downsample_factor: f32,
    /// Capture device index (`/dev/video<N>`).
    pub camera_index: u32,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Consecutive failed frame reads tolerated before the loop stops.
    pub capture_failure_limit: u32,
    /// Stop after this many frames; 0 runs until stopped.
    pub max_frames: u64,
    /// Where to write the annotated overlay frame, if anywhere.
    pub snapshot_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enrollment_dir: PathBuf::from("Training_images"),
            attendance_path: PathBuf::from("Attendance.csv"),
            distance_threshold: 0.5,
            downsample_factor: 0.25,
            camera_index: 0,
            model_dir: default_model_dir(),
            capture_failure_limit: 1,
            max_frames: 0,
            snapshot_path: None,
        }
    }
}

impl Config {
    /// Defaults, overlaid by the `ROLLCALL_CONFIG` file and then the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let base = match std::env::var_os("ROLLCALL_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        let config = base.with_env();
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file; missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Apply `ROLLCALL_*` environment overrides.
    pub fn with_env(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup (environment-shaped).
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let path = |key: &str| lookup(key).map(PathBuf::from);
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<f64>().ok());

        if let Some(p) = path("ROLLCALL_ENROLLMENT_DIR") {
            self.enrollment_dir = p;
        }
        if let Some(p) = path("ROLLCALL_ATTENDANCE_PATH") {
            self.attendance_path = p;
        }
        if let Some(p) = path("ROLLCALL_MODEL_DIR") {
            self.model_dir = p;
        }
        if let Some(p) = path("ROLLCALL_SNAPSHOT_PATH") {
            self.snapshot_path = Some(p);
        }
        if let Some(v) = parsed("ROLLCALL_DISTANCE_THRESHOLD") {
            self.distance_threshold = v as f32;
        }
        if let Some(v) = parsed("ROLLCALL_DOWNSAMPLE_FACTOR") {
            self.downsample_factor = v as f32;
        }
        self.camera_index = env_parse(&lookup, "ROLLCALL_CAMERA_INDEX", self.camera_index);
        self.capture_failure_limit =
            env_parse(&lookup, "ROLLCALL_CAPTURE_FAILURE_LIMIT", self.capture_failure_limit);
        self.max_frames = env_parse(&lookup, "ROLLCALL_MAX_FRAMES", self.max_frames);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.distance_threshold.is_nan() || self.distance_threshold < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "distance_threshold must be a non-negative number, got {}",
                self.distance_threshold
            )));
        }
        if self.downsample_factor.is_nan()
            || self.downsample_factor <= 0.0
            || self.downsample_factor > 1.0
        {
            return Err(ConfigError::Invalid(format!(
                "downsample_factor must be in (0, 1], got {}",
                self.downsample_factor
            )));
        }
        if self.capture_failure_limit == 0 {
            return Err(ConfigError::Invalid(
                "capture_failure_limit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// V4L2 device path for `camera_index`.
    pub fn camera_device(&self) -> String {
        format!("/dev/video{}", self.camera_index)
    }
}

/// `$XDG_DATA_HOME/rollcall/models`, falling back to `~/.local/share`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall/models")
}

fn env_parse<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.enrollment_dir, PathBuf::from("Training_images"));
        assert_eq!(config.attendance_path, PathBuf::from("Attendance.csv"));
        assert_eq!(config.distance_threshold, 0.5);
        assert_eq!(config.downsample_factor, 0.25);
        assert_eq!(config.camera_index, 0);
        assert_eq!(config.camera_device(), "/dev/video0");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_partial_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            distance_threshold = 0.6
            camera_index = 2
            snapshot_path = "/tmp/overlay.jpg"
            "#,
        )
        .unwrap();
        assert_eq!(config.distance_threshold, 0.6);
        assert_eq!(config.camera_index, 2);
        assert_eq!(config.snapshot_path, Some(PathBuf::from("/tmp/overlay.jpg")));
        assert_eq!(config.downsample_factor, 0.25);
    }

    #[test]
    fn test_overrides_win_and_bad_values_are_ignored() {
        let vars: HashMap<&str, &str> = [
            ("ROLLCALL_ATTENDANCE_PATH", "/srv/att.csv"),
            ("ROLLCALL_DOWNSAMPLE_FACTOR", "0.5"),
            ("ROLLCALL_CAMERA_INDEX", "not-a-number"),
            ("ROLLCALL_MAX_FRAMES", "100"),
        ]
        .into_iter()
        .collect();

        let config = Config::default().with_overrides(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.attendance_path, PathBuf::from("/srv/att.csv"));
        assert_eq!(config.downsample_factor, 0.5);
        assert_eq!(config.camera_index, 0);
        assert_eq!(config.max_frames, 100);
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let bad_factor = Config { downsample_factor: 0.0, ..Config::default() };
        assert!(bad_factor.validate().is_err());

        let bad_threshold = Config { distance_threshold: f32::NAN, ..Config::default() };
        assert!(bad_threshold.validate().is_err());

        let no_failures = Config { capture_failure_limit: 0, ..Config::default() };
        assert!(no_failures.validate().is_err());
    }

    #[test]
    fn test_from_file_missing() {
        assert!(matches!(
            Config::from_file(Path::new("/nonexistent/rollcall.toml")),
            Err(ConfigError::Read { .. })
        ));
    }
}
