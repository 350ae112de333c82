use anyhow::{Context, Result};
use rollcall_core::{DetectionParams, LabelSource};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const CASCADE_FILE: &str = "haarcascade_frontalface_default.xml";

/// Where OpenCV packages usually install their cascades.
const SYSTEM_CASCADE_DIRS: &[&str] = &[
    "/usr/share/opencv4/haarcascades",
    "/usr/share/opencv/haarcascades",
    "/usr/local/share/opencv4/haarcascades",
];

const SYSTEM_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
];

/// CLI configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root for the database and model (default: `$XDG_DATA_HOME/rollcall`).
    pub data_dir: PathBuf,
    /// Path to the SQLite student database.
    pub db_path: PathBuf,
    /// Path of the trained model file.
    pub model_path: PathBuf,
    /// OpenCV frontal face Haar cascade XML.
    pub cascade_path: PathBuf,
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    pub camera_width: u32,
    pub camera_height: u32,
    /// TrueType font for captions; captions are drawn without text when unset.
    pub font_path: Option<PathBuf>,
    /// Mirror live frames horizontally before recognition.
    pub mirror: bool,
    /// How model labels are mapped to display names.
    pub label_source: LabelSource,
    pub recognition: DetectionParams,
    pub training: DetectionParams,
}

/// Optional TOML file named by `ROLLCALL_CONFIG`, overriding detection settings.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    recognition: Option<DetectionParams>,
    training: Option<DetectionParams>,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Result<Self> {
        let data_dir = std::env::var("ROLLCALL_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                std::env::var("XDG_DATA_HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| {
                        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                        PathBuf::from(home).join(".local/share")
                    })
                    .join("rollcall")
            });

        let db_path = env_path("ROLLCALL_DB_PATH").unwrap_or_else(|| data_dir.join("students.db"));
        let model_path =
            env_path("ROLLCALL_MODEL_PATH").unwrap_or_else(|| data_dir.join("trainer").join("trainer.yml"));
        let cascade_path = env_path("ROLLCALL_CASCADE_PATH").unwrap_or_else(|| default_cascade(&data_dir));
        let font_path = env_path("ROLLCALL_FONT_PATH").or_else(|| {
            SYSTEM_FONTS
                .iter()
                .map(PathBuf::from)
                .find(|p| p.exists())
        });

        let label_source = match std::env::var("ROLLCALL_LABEL_SOURCE") {
            Ok(v) => v.parse().map_err(anyhow::Error::msg)?,
            Err(_) => LabelSource::default(),
        };

        let mut config = Self {
            data_dir,
            db_path,
            model_path,
            cascade_path,
            camera_device: std::env::var("ROLLCALL_CAMERA_DEVICE")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            camera_width: env_u32("ROLLCALL_CAMERA_WIDTH", 640),
            camera_height: env_u32("ROLLCALL_CAMERA_HEIGHT", 480),
            font_path,
            mirror: env_bool("ROLLCALL_MIRROR", true),
            label_source,
            recognition: DetectionParams::recognition(),
            training: DetectionParams::training(),
        };

        if let Some(path) = env_path("ROLLCALL_CONFIG") {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            config
                .apply_overrides(&text)
                .with_context(|| format!("invalid config file {}", path.display()))?;
        }
        Ok(config)
    }

    fn apply_overrides(&mut self, text: &str) -> Result<()> {
        let file: FileConfig = toml::from_str(text)?;
        if let Some(params) = file.recognition {
            params.validate()?;
            self.recognition = params;
        }
        if let Some(params) = file.training {
            params.validate()?;
            self.training = params;
        }
        Ok(())
    }
}

fn default_cascade(data_dir: &Path) -> PathBuf {
    let local = data_dir.join(CASCADE_FILE);
    if local.exists() {
        return local;
    }
    SYSTEM_CASCADE_DIRS
        .iter()
        .map(|dir| Path::new(dir).join(CASCADE_FILE))
        .find(|p| p.exists())
        .unwrap_or(local)
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| parse_bool(&v).unwrap_or(default))
        .unwrap_or(default)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
