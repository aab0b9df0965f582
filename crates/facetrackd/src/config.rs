use anyhow::Context;
use facetrack_core::attendance::DEFAULT_PUNCH_COOLDOWN_SECS;
use facetrack_core::DEFAULT_MATCH_THRESHOLD;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Which message bus the daemon registers on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    Session,
    System,
}

impl BusKind {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "session" => Some(Self::Session),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Path to the ArcFace ONNX model.
    pub model_path: PathBuf,
    /// Path to the SCRFD face detector ONNX model.
    pub detector_model_path: PathBuf,
    /// Minimum mean confidence for a positive match.
    pub match_threshold: f32,
    /// Minimum seconds between two punches of the same employee.
    pub punch_cooldown_secs: u64,
    pub bus: BusKind,
}

/// Optional overrides read from the TOML file named by `FACETRACK_CONFIG`.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    db_path: Option<PathBuf>,
    model_path: Option<PathBuf>,
    detector_model_path: Option<PathBuf>,
    match_threshold: Option<f32>,
    punch_cooldown_secs: Option<u64>,
    bus: Option<BusKind>,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("facetrack");

        let model_dir = facetrack_core::default_model_dir();
        Self {
            db_path: data_dir.join("facetrack.db"),
            model_path: model_dir.join("w600k_r50.onnx"),
            detector_model_path: model_dir.join("det_10g.onnx"),
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            punch_cooldown_secs: DEFAULT_PUNCH_COOLDOWN_SECS,
            bus: BusKind::Session,
        }
    }
}

impl Config {
    /// Defaults, then the optional TOML file, then `FACETRACK_*` environment variables.
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Self::default();
        if let Ok(path) = std::env::var("FACETRACK_CONFIG") {
            config.apply_file(Path::new(&path))?;
        }
        config.apply_env();
        Ok(config)
    }

    fn apply_file(&mut self, path: &Path) -> anyhow::Result<()> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        self.apply_toml(&text)
            .with_context(|| format!("parsing config {}", path.display()))?;
        tracing::info!(path = %path.display(), "config file applied");
        Ok(())
    }

    fn apply_toml(&mut self, text: &str) -> Result<(), toml::de::Error> {
        let file: FileConfig = toml::from_str(text)?;
        if let Some(v) = file.db_path {
            self.db_path = v;
        }
        if let Some(v) = file.model_path {
            self.model_path = v;
        }
        if let Some(v) = file.detector_model_path {
            self.detector_model_path = v;
        }
        if let Some(v) = file.match_threshold {
            self.match_threshold = v;
        }
        if let Some(v) = file.punch_cooldown_secs {
            self.punch_cooldown_secs = v;
        }
        if let Some(v) = file.bus {
            self.bus = v;
        }
        Ok(())
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("FACETRACK_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("FACETRACK_MODEL_PATH") {
            self.model_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("FACETRACK_DETECTOR_PATH") {
            self.detector_model_path = PathBuf::from(v);
        }
        self.match_threshold = env_parse("FACETRACK_MATCH_THRESHOLD", self.match_threshold);
        self.punch_cooldown_secs = env_parse("FACETRACK_PUNCH_COOLDOWN_SECS", self.punch_cooldown_secs);
        if let Ok(v) = std::env::var("FACETRACK_BUS") {
            match BusKind::parse(&v) {
                Some(bus) => self.bus = bus,
                None => tracing::warn!(value = %v, "ignoring unknown FACETRACK_BUS"),
            }
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.match_threshold, 0.6);
        assert_eq!(config.punch_cooldown_secs, 60);
        assert_eq!(config.bus, BusKind::Session);
        assert!(config.db_path.ends_with("facetrack/facetrack.db"));
        assert!(config.model_path.ends_with("w600k_r50.onnx"));
        assert!(config.detector_model_path.ends_with("det_10g.onnx"));
    }

    #[test]
    fn test_toml_overrides_only_given_keys() {
        let mut config = Config::default();
        let model_path = config.model_path.clone();
        config
            .apply_toml(
                r#"
                db_path = "/var/lib/facetrack/att.db"
                match_threshold = 0.7
                bus = "system"
                "#,
            )
            .unwrap();
        assert_eq!(config.db_path, PathBuf::from("/var/lib/facetrack/att.db"));
        assert_eq!(config.match_threshold, 0.7);
        assert_eq!(config.bus, BusKind::System);
        assert_eq!(config.model_path, model_path);
        assert_eq!(config.punch_cooldown_secs, 60);
    }

    #[test]
    fn test_toml_rejects_unknown_keys() {
        let mut config = Config::default();
        assert!(config.apply_toml("threshold = 0.5").is_err());
    }

    #[test]
    fn test_config_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facetrackd.toml");
        std::fs::write(&path, "punch_cooldown_secs = 5\n").unwrap();
        let mut config = Config::default();
        config.apply_file(&path).unwrap();
        assert_eq!(config.punch_cooldown_secs, 5);
        assert!(config.apply_file(&dir.path().join("missing.toml")).is_err());
    }

    // The only test that touches FACETRACK_* variables, so parallel tests
    // cannot observe them.
    #[test]
    fn test_env_overlays_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facetrackd.toml");
        std::fs::write(
            &path,
            "match_threshold = 0.7\npunch_cooldown_secs = 5\nbus = \"system\"\n",
        )
        .unwrap();

        let vars = [
            ("FACETRACK_CONFIG", path.to_str().unwrap()),
            ("FACETRACK_DB_PATH", "/srv/facetrack/att.db"),
            ("FACETRACK_DETECTOR_PATH", "/srv/models/scrfd.onnx"),
            ("FACETRACK_MATCH_THRESHOLD", "0.8"),
            ("FACETRACK_PUNCH_COOLDOWN_SECS", "soon"),
            ("FACETRACK_BUS", "tcp"),
        ];
        for (key, value) in vars {
            std::env::set_var(key, value);
        }
        let loaded = Config::load();
        for (key, _) in vars {
            std::env::remove_var(key);
        }
        let config = loaded.unwrap();

        // Environment wins over the file.
        assert_eq!(config.match_threshold, 0.8);
        assert_eq!(config.db_path, PathBuf::from("/srv/facetrack/att.db"));
        assert_eq!(config.detector_model_path, PathBuf::from("/srv/models/scrfd.onnx"));
        // Unparsable or unknown values keep what the file set.
        assert_eq!(config.punch_cooldown_secs, 5);
        assert_eq!(config.bus, BusKind::System);
    }

    #[test]
    fn test_bus_kind_parse() {
        assert_eq!(BusKind::parse("System"), Some(BusKind::System));
        assert_eq!(BusKind::parse("session"), Some(BusKind::Session));
        assert_eq!(BusKind::parse("tcp"), None);
    }
}
