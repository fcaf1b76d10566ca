use serde::Deserialize;
use starface_core::{PipelineConfig, WaveletSource};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid value {value:?} for {key}")]
    InvalidEnv { key: &'static str, value: String },
    #[error(transparent)]
    Pipeline(#[from] starface_core::config::ConfigError),
}

/// Daemon configuration.
///
/// Layered: built-in defaults, then the TOML file named by `STARFACE_CONFIG`,
/// then `STARFACE_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listen address (default: 127.0.0.1:5000).
    pub bind_addr: SocketAddr,
    /// Log filter used when `RUST_LOG` is unset.
    pub log_level: String,
    /// Ceiling on HTTP request bodies.
    pub max_request_bytes: usize,
    /// CORS origins; `*` allows any.
    pub allowed_origins: Vec<String>,
    /// Classification worker threads.
    pub workers: usize,
    /// Deadline for one classification request.
    pub request_timeout_secs: u64,
    pub pipeline: PipelineConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 5000)),
            log_level: "info".into(),
            max_request_bytes: 16 * 1024 * 1024,
            allowed_origins: vec!["*".into()],
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            request_timeout_secs: 30,
            pipeline: PipelineConfig::default(),
        }
    }
}

impl Config {
    /// Load from the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Load with an arbitrary variable source.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = match var("STARFACE_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_env(&var)?;
        config.pipeline.validate()?;
        if config.workers == 0 {
            config.workers = 1;
        }
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(toml::from_str(&text)?)
    }

    fn apply_env(&mut self, var: &impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        match var("STARFACE_BIND_ADDR") {
            Some(addr) => self.bind_addr = parse("STARFACE_BIND_ADDR", addr)?,
            None => {
                if let Some(port) = var("PORT") {
                    self.bind_addr.set_port(parse("PORT", port)?);
                }
            }
        }
        if let Some(level) = var("STARFACE_LOG_LEVEL").or_else(|| var("LOG_LEVEL")) {
            self.log_level = level.to_lowercase();
        }
        env_parse(var, "STARFACE_MAX_REQUEST_BYTES", &mut self.max_request_bytes)?;
        if let Some(origins) = var("STARFACE_ALLOWED_ORIGINS") {
            self.allowed_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(String::from)
                .collect();
        }
        env_parse(var, "STARFACE_WORKERS", &mut self.workers)?;
        env_parse(var, "STARFACE_REQUEST_TIMEOUT_SECS", &mut self.request_timeout_secs)?;

        let p = &mut self.pipeline;
        env_path(var, "STARFACE_ARTIFACTS_DIR", &mut p.artifacts_dir);
        env_string(var, "STARFACE_MODEL_FILE", &mut p.model_file);
        env_string(var, "STARFACE_CLASS_DICTIONARY_FILE", &mut p.class_dictionary_file);
        env_path(var, "STARFACE_FACE_CASCADE", &mut p.face_cascade_path);
        env_path(var, "STARFACE_EYE_CASCADE", &mut p.eye_cascade_path);
        env_parse(var, "STARFACE_MAX_IMAGE_BYTES", &mut p.max_image_bytes)?;
        env_parse(var, "STARFACE_MAX_FACES", &mut p.max_faces)?;
        env_parse(var, "STARFACE_SCALE_FACTOR", &mut p.scale_factor)?;
        env_parse(var, "STARFACE_MIN_NEIGHBORS", &mut p.min_neighbors)?;
        env_string(var, "STARFACE_WAVELET", &mut p.wavelet);
        env_parse(var, "STARFACE_WAVELET_LEVEL", &mut p.wavelet_level)?;
        env_parse::<WaveletSource>(var, "STARFACE_WAVELET_SOURCE", &mut p.wavelet_source)?;
        Ok(())
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs)
    }
}

fn parse<T: FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    let parsed: Result<T, _> = value.trim().parse();
    parsed.map_err(|_| ConfigError::InvalidEnv { key, value })
}

fn env_parse<T: FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    slot: &mut T,
) -> Result<(), ConfigError> {
    if let Some(value) = var(key) {
        *slot = parse(key, value)?;
    }
    Ok(())
}

fn env_string(var: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut String) {
    if let Some(value) = var(key) {
        *slot = value;
    }
}

fn env_path(var: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut PathBuf) {
    if let Some(value) = var(key) {
        *slot = PathBuf::from(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let c = Config::from_vars(vars(&[])).unwrap();
        assert_eq!(c.bind_addr.to_string(), "127.0.0.1:5000");
        assert_eq!(c.log_level, "info");
        assert_eq!(c.max_request_bytes, 16 * 1024 * 1024);
        assert_eq!(c.allowed_origins, vec!["*"]);
        assert_eq!(c.request_timeout_secs, 30);
        assert!(c.workers >= 1);
        assert_eq!(c.pipeline, PipelineConfig::default());
    }

    #[test]
    fn test_port_overrides_default_port_only() {
        let c = Config::from_vars(vars(&[("PORT", "8080")])).unwrap();
        assert_eq!(c.bind_addr.to_string(), "127.0.0.1:8080");
    }

    #[test]
    fn test_bind_addr_wins_over_port() {
        let c = Config::from_vars(vars(&[("STARFACE_BIND_ADDR", "0.0.0.0:9000"), ("PORT", "8080")])).unwrap();
        assert_eq!(c.bind_addr.to_string(), "0.0.0.0:9000");
    }

    #[test]
    fn test_env_overrides_pipeline() {
        let c = Config::from_vars(vars(&[
            ("STARFACE_ARTIFACTS_DIR", "/srv/starface"),
            ("STARFACE_MAX_FACES", "3"),
            ("STARFACE_SCALE_FACTOR", "1.2"),
            ("STARFACE_WAVELET_SOURCE", "resized"),
            ("LOG_LEVEL", "DEBUG"),
            ("STARFACE_ALLOWED_ORIGINS", "http://a.test, http://b.test,"),
        ]))
        .unwrap();
        assert_eq!(c.pipeline.artifacts_dir, PathBuf::from("/srv/starface"));
        assert_eq!(c.pipeline.max_faces, 3);
        assert_eq!(c.pipeline.scale_factor, 1.2);
        assert_eq!(c.pipeline.wavelet_source, WaveletSource::Resized);
        assert_eq!(c.log_level, "debug");
        assert_eq!(c.allowed_origins, vec!["http://a.test", "http://b.test"]);
    }

    #[test]
    fn test_unparseable_env_is_an_error() {
        let err = Config::from_vars(vars(&[("STARFACE_MAX_FACES", "many")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { key: "STARFACE_MAX_FACES", .. }));
    }

    #[test]
    fn test_invalid_pipeline_value_rejected() {
        let err = Config::from_vars(vars(&[("STARFACE_WAVELET", "sym5")])).unwrap_err();
        assert!(matches!(err, ConfigError::Pipeline(_)));
    }

    #[test]
    fn test_toml_layer() {
        let c: Config = toml::from_str(
            r#"
            bind_addr = "0.0.0.0:5001"
            workers = 2

            [pipeline]
            artifacts_dir = "/opt/artifacts"
            min_neighbors = 4
            "#,
        )
        .unwrap();
        assert_eq!(c.bind_addr.port(), 5001);
        assert_eq!(c.workers, 2);
        assert_eq!(c.pipeline.artifacts_dir, PathBuf::from("/opt/artifacts"));
        assert_eq!(c.pipeline.min_neighbors, 4);
        assert_eq!(c.pipeline.max_faces, 10);
        assert_eq!(c.request_timeout_secs, 30);
    }

    #[test]
    fn test_missing_config_file() {
        let err = Config::from_vars(vars(&[("STARFACE_CONFIG", "/nonexistent/starface.toml")])).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
