use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ingest::SourceSettings;
use crate::pipeline::DecisionSettings;
use crate::transport::{ServerConfig, SessionSettings};

const DEFAULT_CAMERA_INDEX: u32 = 0;
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_FPS: u32 = 10;
const DEFAULT_RETRY_DELAY_MS: u64 = 1000;
const DEFAULT_DETECTOR: &str = "tract";
const DEFAULT_MODEL_PATH: &str = "yolov8n.onnx";
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_CONFIDENCE: f32 = 0.25;
const DEFAULT_IOU: f32 = 0.45;
const DEFAULT_PROXIMITY: f64 = 1.1;
const DEFAULT_COOLDOWN_SECS: f64 = 4.0;
const DEFAULT_ALERT_TEXT: &str = "Put the phone down";
const DEFAULT_CUE_PATH: &str = "alert.mp3";
const DEFAULT_PLAYER: [&str; 5] = ["ffplay", "-nodisp", "-autoexit", "-loglevel", "quiet"];
const DEFAULT_ADDR: &str = "0.0.0.0:5000";
const DEFAULT_JPEG_QUALITY: u8 = 80;
const DEFAULT_MAX_STREAMS: usize = 1;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct TouchwatchdConfigFile {
    source: Option<SourceConfigFile>,
    detector: Option<DetectorConfigFile>,
    alert: Option<AlertConfigFile>,
    stream: Option<StreamConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SourceConfigFile {
    camera_index: Option<u32>,
    uri: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
    retry_delay_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    input_size: Option<u32>,
    confidence_threshold: Option<f32>,
    iou_threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct AlertConfigFile {
    proximity: Option<f64>,
    cooldown_secs: Option<f64>,
    text: Option<String>,
    cue_path: Option<PathBuf>,
    player: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct StreamConfigFile {
    addr: Option<String>,
    jpeg_quality: Option<u8>,
    max_streams: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TouchwatchdConfig {
    pub source: SourceConfig,
    pub detector: DetectorConfig,
    pub alert: AlertConfig,
    pub stream: StreamConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceConfig {
    pub camera_index: u32,
    /// Takes precedence over `camera_index` when set.
    pub uri: Option<String>,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
    pub retry_delay: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectorConfig {
    pub backend: String,
    pub model_path: PathBuf,
    pub input_size: u32,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlertConfig {
    pub proximity: f64,
    pub cooldown: Duration,
    pub text: String,
    pub cue_path: PathBuf,
    pub player: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    pub addr: String,
    pub jpeg_quality: u8,
    pub max_streams: usize,
}

impl SourceConfig {
    pub fn resolved_uri(&self) -> String {
        self.uri
            .clone()
            .unwrap_or_else(|| SourceSettings::camera_uri(self.camera_index))
    }
}

impl TouchwatchdConfig {
    /// Load from `TOUCHWATCH_CONFIG` (if set), then environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("TOUCHWATCH_CONFIG")
            .ok()
            .filter(|path| !path.trim().is_empty());
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => TouchwatchdConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: TouchwatchdConfigFile) -> Result<Self> {
        let source = file.source.unwrap_or_default();
        let detector = file.detector.unwrap_or_default();
        let alert = file.alert.unwrap_or_default();
        let stream = file.stream.unwrap_or_default();

        Ok(Self {
            source: SourceConfig {
                camera_index: source.camera_index.unwrap_or(DEFAULT_CAMERA_INDEX),
                uri: source.uri.filter(|uri| !uri.trim().is_empty()),
                width: source.width.unwrap_or(DEFAULT_WIDTH),
                height: source.height.unwrap_or(DEFAULT_HEIGHT),
                target_fps: source.target_fps.unwrap_or(DEFAULT_FPS),
                retry_delay: Duration::from_millis(
                    source.retry_delay_ms.unwrap_or(DEFAULT_RETRY_DELAY_MS),
                ),
            },
            detector: DetectorConfig {
                backend: detector
                    .backend
                    .unwrap_or_else(|| DEFAULT_DETECTOR.to_string()),
                model_path: detector
                    .model_path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH)),
                input_size: detector.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
                confidence_threshold: detector
                    .confidence_threshold
                    .unwrap_or(DEFAULT_CONFIDENCE),
                iou_threshold: detector.iou_threshold.unwrap_or(DEFAULT_IOU),
            },
            alert: AlertConfig {
                proximity: alert.proximity.unwrap_or(DEFAULT_PROXIMITY),
                cooldown: cooldown_from_secs(alert.cooldown_secs.unwrap_or(DEFAULT_COOLDOWN_SECS))?,
                text: alert.text.unwrap_or_else(|| DEFAULT_ALERT_TEXT.to_string()),
                cue_path: alert
                    .cue_path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_CUE_PATH)),
                player: alert
                    .player
                    .unwrap_or_else(|| DEFAULT_PLAYER.iter().map(|s| s.to_string()).collect()),
            },
            stream: StreamConfig {
                addr: stream.addr.unwrap_or_else(|| DEFAULT_ADDR.to_string()),
                jpeg_quality: stream.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
                max_streams: stream.max_streams.unwrap_or(DEFAULT_MAX_STREAMS),
            },
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(index) = env_value("TOUCHWATCH_CAMERA_INDEX") {
            self.source.camera_index = index.parse().map_err(|_| {
                anyhow!("TOUCHWATCH_CAMERA_INDEX must be a non-negative integer")
            })?;
        }
        if let Some(uri) = env_value("TOUCHWATCH_SOURCE") {
            self.source.uri = Some(uri);
        }
        if let Some(backend) = env_value("TOUCHWATCH_DETECTOR") {
            self.detector.backend = backend;
        }
        if let Some(path) = env_value("TOUCHWATCH_MODEL_PATH") {
            self.detector.model_path = PathBuf::from(path);
        }
        if let Some(proximity) = env_value("TOUCHWATCH_PROXIMITY") {
            self.alert.proximity = proximity
                .parse()
                .map_err(|_| anyhow!("TOUCHWATCH_PROXIMITY must be a number"))?;
        }
        if let Some(cooldown) = env_value("TOUCHWATCH_COOLDOWN_SECS") {
            let seconds: f64 = cooldown
                .parse()
                .map_err(|_| anyhow!("TOUCHWATCH_COOLDOWN_SECS must be a number of seconds"))?;
            self.alert.cooldown = cooldown_from_secs(seconds)?;
        }
        if let Some(text) = env_value("TOUCHWATCH_ALERT_TEXT") {
            self.alert.text = text;
        }
        if let Some(path) = env_value("TOUCHWATCH_ALERT_CUE") {
            self.alert.cue_path = PathBuf::from(path);
        }
        if let Some(addr) = env_value("TOUCHWATCH_ADDR") {
            self.stream.addr = addr;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !self.alert.proximity.is_finite() || self.alert.proximity <= 1.0 {
            return Err(anyhow!(
                "proximity must be a finite number greater than 1.0 (got {})",
                self.alert.proximity
            ));
        }
        if self.alert.text.trim().is_empty() {
            return Err(anyhow!("alert text must not be empty"));
        }
        if self
            .alert
            .player
            .first()
            .map_or(true, |program| program.trim().is_empty())
        {
            return Err(anyhow!("alert player command must not be empty"));
        }
        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!("capture width and height must be greater than zero"));
        }
        if !(1..=100).contains(&self.stream.jpeg_quality) {
            return Err(anyhow!("jpeg_quality must be between 1 and 100"));
        }
        if self.stream.max_streams == 0 {
            return Err(anyhow!("max_streams must be at least 1"));
        }
        self.stream
            .addr
            .parse::<SocketAddr>()
            .with_context(|| format!("invalid listen address '{}'", self.stream.addr))?;
        check_unit_interval("confidence_threshold", self.detector.confidence_threshold)?;
        check_unit_interval("iou_threshold", self.detector.iou_threshold)?;
        if self.detector.input_size == 0 {
            return Err(anyhow!("detector input_size must be greater than zero"));
        }
        Ok(())
    }

    pub fn source_settings(&self) -> SourceSettings {
        SourceSettings {
            uri: self.source.resolved_uri(),
            width: self.source.width,
            height: self.source.height,
            target_fps: self.source.target_fps,
        }
    }

    pub fn decision_settings(&self) -> DecisionSettings {
        DecisionSettings {
            proximity: self.alert.proximity,
            cooldown: self.alert.cooldown,
            alert_text: self.alert.text.clone(),
        }
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            decision: self.decision_settings(),
            source: self.source_settings(),
            jpeg_quality: self.stream.jpeg_quality,
            retry_delay: self.source.retry_delay,
        }
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            addr: self.stream.addr.clone(),
            max_streams: self.stream.max_streams,
        }
    }
}

fn read_config_file(path: &Path) -> Result<TouchwatchdConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn cooldown_from_secs(seconds: f64) -> Result<Duration> {
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(anyhow!(
            "cooldown must be a finite, non-negative number of seconds (got {})",
            seconds
        ));
    }
    Duration::try_from_secs_f64(seconds).map_err(|e| anyhow!("invalid cooldown {}: {}", seconds, e))
}

fn check_unit_interval(name: &str, value: f32) -> Result<()> {
    if value.is_finite() && value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(anyhow!("{} must be in (0, 1] (got {})", name, value))
    }
}
