//! YAML 配置
//!
//! 启动时加载一次，之后只读。`get("a.b.c")` 做点分路径查找，
//! 各子系统再从中构造自己的强类型视图。

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{info, warn};
use serde_yaml::Value;
use thiserror::Error;

use crate::core::capture::CaptureRequest;
use crate::core::extraction::{PromptSpec, Validator};
use crate::core::inference::BackendConfig;
use crate::core::queue::QueueDirs;
use crate::core::scheduler::CaptureMode;

pub const DEFAULT_CONFIG_PATH: &str = "config/config.yaml";
pub const REQUIRED_SECTIONS: [&str; 5] = ["camera", "capture", "llm", "database", "logging"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Missing required configuration section: {0}")]
    MissingSection(String),
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },
}

impl ConfigError {
    fn invalid(key: &str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CameraSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub rotation: u32,
    /// gst 源元素名
    pub source: String,
}

impl CameraSettings {
    pub fn request(&self) -> CaptureRequest {
        CaptureRequest {
            width: self.width,
            height: self.height,
            fps: self.fps,
            rotation: self.rotation,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaptureSettings {
    pub mode: CaptureMode,
    pub interval: Duration,
    pub dirs: QueueDirs,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LlmSettings {
    pub backend: BackendConfig,
    /// 文档顺序即每张图片的执行顺序
    pub prompts: Vec<PromptSpec>,
    pub required_keys: Vec<(String, Vec<String>)>,
}

impl LlmSettings {
    pub fn validator(&self) -> Validator {
        self.required_keys
            .iter()
            .fold(Validator::new(), |v, (ty, keys)| v.with_required(ty, keys.clone()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseSettings {
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Settings {
    root: Value,
    source: Option<PathBuf>,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut settings = Self::from_yaml_str(&text)?;
        settings.source = Some(path.to_path_buf());
        info!("⚙️ Configuration loaded from {}", path.display());
        Ok(settings)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let root: Value = serde_yaml::from_str(text)?;
        for section in REQUIRED_SECTIONS {
            if root.get(section).is_none() {
                return Err(ConfigError::MissingSection(section.to_string()));
            }
        }
        Ok(Self { root, source: None })
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// 点分路径查找，任一段不存在即 `None`
    pub fn get(&self, key_path: &str) -> Option<&Value> {
        key_path
            .split('.')
            .try_fold(&self.root, |node, key| match node {
                Value::Mapping(map) => map.get(key),
                _ => None,
            })
    }

    pub fn get_str(&self, key_path: &str, default: &str) -> String {
        match self.get(key_path) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => default.to_string(),
        }
    }

    pub fn get_u64(&self, key_path: &str, default: u64) -> Result<u64, ConfigError> {
        match self.get(key_path) {
            None | Some(Value::Null) => Ok(default),
            Some(Value::Number(n)) => n
                .as_u64()
                .ok_or_else(|| ConfigError::invalid(key_path, "expected a non-negative integer")),
            Some(Value::String(s)) => s
                .trim()
                .parse()
                .map_err(|_| ConfigError::invalid(key_path, format!("'{}' is not an integer", s))),
            Some(_) => Err(ConfigError::invalid(key_path, "expected an integer")),
        }
    }

    pub fn get_f64(&self, key_path: &str, default: f64) -> Result<f64, ConfigError> {
        match self.get(key_path) {
            None | Some(Value::Null) => Ok(default),
            Some(Value::Number(n)) => n
                .as_f64()
                .ok_or_else(|| ConfigError::invalid(key_path, "expected a number")),
            Some(Value::String(s)) => s
                .trim()
                .parse()
                .map_err(|_| ConfigError::invalid(key_path, format!("'{}' is not a number", s))),
            Some(_) => Err(ConfigError::invalid(key_path, "expected a number")),
        }
    }

    pub fn camera(&self) -> Result<CameraSettings, ConfigError> {
        let resolution = self.get_str("camera.resolution", "1280x720");
        let (width, height) = parse_resolution(&resolution)
            .ok_or_else(|| ConfigError::invalid("camera.resolution", format!("'{}' is not WxH", resolution)))?;

        let fps = self.get_u64("camera.fps", 30)?;
        if fps == 0 {
            return Err(ConfigError::invalid("camera.fps", "must be positive"));
        }
        let rotation = self.get_u64("camera.rotation", 0)?;
        if ![0, 90, 180, 270].contains(&rotation) {
            return Err(ConfigError::invalid(
                "camera.rotation",
                format!("{} is not one of 0, 90, 180, 270", rotation),
            ));
        }

        Ok(CameraSettings {
            width,
            height,
            fps: u32::try_from(fps)
                .map_err(|_| ConfigError::invalid("camera.fps", format!("{} is out of range", fps)))?,
            rotation: rotation as u32,
            source: self.get_str("camera.source", "nvarguscamerasrc"),
        })
    }

    pub fn capture(&self) -> Result<CaptureSettings, ConfigError> {
        let mode_text = self.get_str("capture.mode", "manual");
        let mode = mode_text
            .parse::<CaptureMode>()
            .map_err(|reason| ConfigError::invalid("capture.mode", reason))?;

        let interval = self.get_u64("capture.interval", 30)?;
        if interval == 0 {
            return Err(ConfigError::invalid("capture.interval", "must be at least 1 second"));
        }

        Ok(CaptureSettings {
            mode,
            interval: Duration::from_secs(interval),
            dirs: QueueDirs {
                input: PathBuf::from(self.get_str("capture.storage_paths.input", "data/input")),
                processed: PathBuf::from(
                    self.get_str("capture.storage_paths.processed", "data/processed"),
                ),
                failed: PathBuf::from(self.get_str("capture.storage_paths.failed", "data/failed")),
            },
        })
    }

    pub fn llm(&self) -> Result<LlmSettings, ConfigError> {
        let model = self.get_str("llm.model", "granite3.2-vision:2b");
        let timeout_secs = self.get_f64("llm.timeout", 90.0)?;
        if !timeout_secs.is_finite() || timeout_secs <= 0.0 {
            return Err(ConfigError::invalid("llm.timeout", "must be a positive number of seconds"));
        }
        let timeout = Duration::from_secs_f64(timeout_secs);

        let backend = match self.get_str("llm.provider", "ollama").to_ascii_lowercase().as_str() {
            "ollama" | "local" => BackendConfig::Ollama {
                host: self.get_str("llm.ollama_host", "http://localhost:11434"),
                model,
                timeout,
            },
            "openai" | "cloud" => {
                let key_env = self.get_str("llm.api_key_env", "OPENAI_API_KEY");
                let api_key = match self.get("llm.api_key") {
                    Some(Value::String(key)) => Some(key.clone()),
                    _ => env::var(&key_env).ok(),
                };
                if api_key.is_none() {
                    warn!("⚠️ {} is not set, requests will be sent without a key", key_env);
                }
                BackendConfig::OpenAiCompatible {
                    api_base: self.get_str("llm.api_base", "https://api.openai.com/v1"),
                    model,
                    api_key,
                    timeout,
                }
            }
            other => {
                return Err(ConfigError::invalid(
                    "llm.provider",
                    format!("unknown provider '{}', expected ollama|openai", other),
                ))
            }
        };

        Ok(LlmSettings {
            backend,
            prompts: self.prompts()?,
            required_keys: self.required_keys()?,
        })
    }

    fn prompts(&self) -> Result<Vec<PromptSpec>, ConfigError> {
        let map = match self.get("llm.prompts") {
            None | Some(Value::Null) => return Ok(Vec::new()),
            Some(Value::Mapping(map)) => map,
            Some(_) => return Err(ConfigError::invalid("llm.prompts", "expected a mapping")),
        };

        map.iter()
            .map(|(k, v)| match (k.as_str(), v.as_str()) {
                (Some(ty), Some(prompt)) => Ok(PromptSpec::new(ty, prompt)),
                _ => Err(ConfigError::invalid(
                    "llm.prompts",
                    "keys and values must be strings",
                )),
            })
            .collect()
    }

    fn required_keys(&self) -> Result<Vec<(String, Vec<String>)>, ConfigError> {
        let map = match self.get("llm.required_keys") {
            None | Some(Value::Null) => return Ok(Vec::new()),
            Some(Value::Mapping(map)) => map,
            Some(_) => return Err(ConfigError::invalid("llm.required_keys", "expected a mapping")),
        };

        let mut out = Vec::with_capacity(map.len());
        for (k, v) in map {
            let ty = k
                .as_str()
                .ok_or_else(|| ConfigError::invalid("llm.required_keys", "type names must be strings"))?;
            let keys = match v {
                Value::Sequence(items) => items
                    .iter()
                    .map(|item| item.as_str().map(str::to_string))
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(|| {
                        ConfigError::invalid("llm.required_keys", format!("{}: keys must be strings", ty))
                    })?,
                Value::Null => Vec::new(),
                _ => {
                    return Err(ConfigError::invalid(
                        "llm.required_keys",
                        format!("{}: expected a list", ty),
                    ))
                }
            };
            out.push((ty.to_string(), keys));
        }
        Ok(out)
    }

    pub fn database(&self) -> DatabaseSettings {
        DatabaseSettings {
            path: PathBuf::from(self.get_str("database.path", "data/f1_data.db")),
        }
    }

    pub fn log_level(&self) -> String {
        self.get_str("logging.level", "INFO")
    }
}

fn parse_resolution(text: &str) -> Option<(u32, u32)> {
    let (w, h) = text.trim().split_once(['x', 'X'])?;
    let width = w.trim().parse().ok()?;
    let height = h.trim().parse().ok()?;
    (width > 0 && height > 0).then_some((width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
camera:
  resolution: "1920x1080"
  fps: 30
  rotation: 180
capture:
  mode: both
  interval: 10
  storage_paths:
    input: /tmp/pw/input
    processed: /tmp/pw/processed
    failed: /tmp/pw/failed
llm:
  provider: ollama
  model: llava:7b
  timeout: 45
  prompts:
    timing_table: "Read the timing tower"
    current_lap: "Read the lap counter"
  required_keys:
    tire_info: [compound]
database:
  path: /tmp/pw/f1.db
logging:
  level: DEBUG
"#;

    #[test]
    fn test_dotted_lookup() {
        let settings = Settings::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(settings.get_str("llm.model", "x"), "llava:7b");
        assert_eq!(settings.get_u64("capture.interval", 30).unwrap(), 10);
        assert!(settings.get("llm.nothing.here").is_none());
        assert_eq!(settings.get_str("camera.fps", "0"), "30");
        assert_eq!(settings.get_f64("llm.timeout", 1.0).unwrap(), 45.0);
    }

    #[test]
    fn test_missing_section_rejected() {
        let err = Settings::from_yaml_str("camera: {}\ncapture: {}\nllm: {}\ndatabase: {}\n").unwrap_err();
        assert!(matches!(err, ConfigError::MissingSection(ref s) if s == "logging"));
        assert_eq!(err.to_string(), "Missing required configuration section: logging");
    }

    #[test]
    fn test_typed_views() {
        let settings = Settings::from_yaml_str(SAMPLE).unwrap();

        let camera = settings.camera().unwrap();
        assert_eq!((camera.width, camera.height, camera.rotation), (1920, 1080, 180));
        assert_eq!(camera.source, "nvarguscamerasrc");

        let capture = settings.capture().unwrap();
        assert_eq!(capture.mode, CaptureMode::Both);
        assert_eq!(capture.interval, Duration::from_secs(10));
        assert_eq!(capture.dirs.failed, PathBuf::from("/tmp/pw/failed"));

        let llm = settings.llm().unwrap();
        assert_eq!(llm.backend.timeout(), Duration::from_secs(45));
        let order: Vec<&str> = llm.prompts.iter().map(|p| p.extraction_type.as_str()).collect();
        assert_eq!(order, vec!["timing_table", "current_lap"]);
        assert_eq!(llm.validator().keys_for("tire_info"), vec!["compound".to_string()]);
        assert_eq!(llm.validator().keys_for("current_lap"), vec!["lap_number".to_string()]);

        assert_eq!(settings.database().path, PathBuf::from("/tmp/pw/f1.db"));
        assert_eq!(settings.log_level(), "DEBUG");
    }

    #[test]
    fn test_defaults_and_invalid_values() {
        let minimal = "camera: {}\ncapture: {}\nllm: {}\ndatabase: {}\nlogging: {}\n";
        let settings = Settings::from_yaml_str(minimal).unwrap();
        assert_eq!(settings.camera().unwrap().request(), CaptureRequest::default());
        assert_eq!(settings.capture().unwrap().mode, CaptureMode::Manual);
        assert_eq!(settings.capture().unwrap().dirs.input, PathBuf::from("data/input"));
        assert_eq!(settings.llm().unwrap().backend.model(), "granite3.2-vision:2b");
        assert!(settings.llm().unwrap().prompts.is_empty());
        assert_eq!(settings.database().path, PathBuf::from("data/f1_data.db"));

        let bad = "camera: {rotation: 45}\ncapture: {mode: hourly}\nllm: {provider: magic}\ndatabase: {}\nlogging: {}\n";
        let settings = Settings::from_yaml_str(bad).unwrap();
        assert!(settings.camera().is_err());
        assert!(settings.capture().is_err());
        assert!(settings.llm().is_err());
    }

    #[test]
    fn test_numeric_ranges() {
        let text = "camera: {fps: 4294967296}\ncapture: {}\nllm: {timeout: 0.5}\ndatabase: {}\nlogging: {}\n";
        let settings = Settings::from_yaml_str(text).unwrap();
        assert!(matches!(
            settings.camera(),
            Err(ConfigError::Invalid { ref key, .. }) if key == "camera.fps"
        ));
        assert_eq!(
            settings.llm().unwrap().backend.timeout(),
            Duration::from_millis(500)
        );

        let zero = "camera: {}\ncapture: {}\nllm: {timeout: 0}\ndatabase: {}\nlogging: {}\n";
        assert!(Settings::from_yaml_str(zero).unwrap().llm().is_err());
    }

    #[test]
    fn test_openai_provider() {
        let text = "camera: {}\ncapture: {}\nllm:\n  provider: openai\n  api_base: http://127.0.0.1:9/v1\n  api_key: sk-test\n  model: gpt-4o-mini\ndatabase: {}\nlogging: {}\n";
        let llm = Settings::from_yaml_str(text).unwrap().llm().unwrap();
        match llm.backend {
            BackendConfig::OpenAiCompatible { api_base, api_key, model, .. } => {
                assert_eq!(api_base, "http://127.0.0.1:9/v1");
                assert_eq!(api_key.as_deref(), Some("sk-test"));
                assert_eq!(model, "gpt-4o-mini");
            }
            other => panic!("unexpected backend {:?}", other),
        }
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, SAMPLE).unwrap();
        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.source(), Some(path.as_path()));
        assert!(matches!(
            Settings::load(&dir.path().join("missing.yaml")),
            Err(ConfigError::Read { .. })
        ));
    }
}
