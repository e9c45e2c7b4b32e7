use anyhow::{Context, Result};
use roster_core::matcher::{DEFAULT_FRAME_SCALE, DEFAULT_SIMILARITY_THRESHOLD};
use roster_core::SessionConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Kiosk configuration.
///
/// Layered as: built-in defaults, then an optional TOML file, then
/// `ROSTER_*` environment variables, then command-line flags.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Directory of reference images, one person per file.
    pub gallery_dir: PathBuf,
    /// Attendance ledger CSV (append-only).
    pub ledger_path: PathBuf,
    /// Leaderboard CSV, rewritten after every new event.
    pub leaderboard_path: PathBuf,
    /// V4L2 device path.
    pub camera_device: String,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Cosine similarity needed for a positive match.
    pub similarity_threshold: f32,
    /// Downscale factor applied to frames before detection.
    pub frame_scale: f32,
    /// Frames discarded after opening the camera (exposure settling).
    pub warmup_frames: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gallery_dir: PathBuf::from("known_faces"),
            ledger_path: PathBuf::from("sheet.csv"),
            leaderboard_path: PathBuf::from("attendance_leaderboard.csv"),
            camera_device: "/dev/video0".to_string(),
            model_dir: default_model_dir(),
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            frame_scale: DEFAULT_FRAME_SCALE,
            warmup_frames: 4,
        }
    }
}

impl Config {
    /// Load from `file` (or `$ROSTER_CONFIG`) and the process environment.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let file = file
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("ROSTER_CONFIG").map(PathBuf::from));

        let mut config = match file {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Override fields from `ROSTER_*` variables. Unparsable numbers are
    /// reported and ignored.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("ROSTER_GALLERY_DIR") {
            self.gallery_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("ROSTER_LEDGER_PATH") {
            self.ledger_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("ROSTER_LEADERBOARD_PATH") {
            self.leaderboard_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("ROSTER_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = lookup("ROSTER_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        parse_into(&lookup, "ROSTER_SIMILARITY_THRESHOLD", &mut self.similarity_threshold);
        parse_into(&lookup, "ROSTER_FRAME_SCALE", &mut self.frame_scale);
        parse_into(&lookup, "ROSTER_WARMUP_FRAMES", &mut self.warmup_frames);
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            ledger_path: self.ledger_path.clone(),
            leaderboard_path: self.leaderboard_path.clone(),
        }
    }
}

fn parse_into<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.parse() {
        Ok(value) => *slot = value,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparsable setting"),
    }
}

fn default_model_dir() -> PathBuf {
    std::env::var_os("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let home = std::env::var_os("HOME").unwrap_or_else(|| "/tmp".into());
            PathBuf::from(home).join(".local/share")
        })
        .join("roster/models")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_use_kiosk_file_names() {
        let config = Config::default();
        assert_eq!(config.gallery_dir, PathBuf::from("known_faces"));
        assert_eq!(config.ledger_path, PathBuf::from("sheet.csv"));
        assert_eq!(config.leaderboard_path, PathBuf::from("attendance_leaderboard.csv"));
        assert_eq!(config.frame_scale, 0.25);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env(env(&[
            ("ROSTER_LEDGER_PATH", "/var/lib/roster/ledger.csv"),
            ("ROSTER_CAMERA_DEVICE", "/dev/video2"),
            ("ROSTER_SIMILARITY_THRESHOLD", "0.55"),
            ("ROSTER_WARMUP_FRAMES", "0"),
        ]));
        assert_eq!(config.ledger_path, PathBuf::from("/var/lib/roster/ledger.csv"));
        assert_eq!(config.camera_device, "/dev/video2");
        assert_eq!(config.similarity_threshold, 0.55);
        assert_eq!(config.warmup_frames, 0);
    }

    #[test]
    fn test_bad_number_keeps_previous_value() {
        let mut config = Config::default();
        config.apply_env(env(&[("ROSTER_FRAME_SCALE", "quarter")]));
        assert_eq!(config.frame_scale, DEFAULT_FRAME_SCALE);
    }

    #[test]
    fn test_toml_file_partial() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roster.toml");
        std::fs::write(&path, "gallery_dir = \"/srv/faces\"\nwarmup_frames = 10\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.gallery_dir, PathBuf::from("/srv/faces"));
        assert_eq!(config.warmup_frames, 10);
        assert_eq!(config.ledger_path, PathBuf::from("sheet.csv"));
    }

    #[test]
    fn test_toml_unknown_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roster.toml");
        std::fs::write(&path, "ledger = \"x.csv\"\n").unwrap();
        assert!(Config::from_file(&path).is_err());
    }
}
