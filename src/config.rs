use std::env;
use std::path::PathBuf;

use crate::error::StartupError;

/// Hugging Face identifier of the bundled sentiment model.
pub const MODEL_NAME: &str = "distilbert-base-uncased-finetuned-sst-2-english";

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    /// Directory holding `model.onnx`, `tokenizer.json` and optionally `config.json`.
    pub model_dir: PathBuf,
    pub max_body_bytes: usize,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, StartupError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, StartupError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let port = match lookup("SENTIMENT_PORT") {
            Some(raw) => raw
                .parse()
                .map_err(|_| StartupError::Config(format!("SENTIMENT_PORT={raw} is not a port")))?,
            None => DEFAULT_PORT,
        };
        let max_body_bytes = match lookup("SENTIMENT_MAX_BODY_BYTES") {
            Some(raw) => raw.parse().map_err(|_| {
                StartupError::Config(format!("SENTIMENT_MAX_BODY_BYTES={raw} is not a byte count"))
            })?,
            None => DEFAULT_MAX_BODY_BYTES,
        };

        Ok(Self {
            host: lookup("SENTIMENT_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port,
            model_dir: lookup("SENTIMENT_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("models").join(MODEL_NAME)),
            max_body_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_when_environment_is_empty() {
        let cfg = ServiceConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.model_dir, PathBuf::from("models").join(MODEL_NAME));
        assert_eq!(cfg.max_body_bytes, 16 * 1024 * 1024);
    }

    #[test]
    fn overrides_are_applied() {
        let cfg = ServiceConfig::from_lookup(lookup_from(&[
            ("SENTIMENT_HOST", "0.0.0.0"),
            ("SENTIMENT_PORT", "9000"),
            ("SENTIMENT_MODEL_DIR", "/opt/sst2"),
            ("SENTIMENT_MAX_BODY_BYTES", "1024"),
        ]))
        .unwrap();
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.model_dir, PathBuf::from("/opt/sst2"));
        assert_eq!(cfg.max_body_bytes, 1024);
    }

    #[test]
    fn bad_port_is_a_startup_error() {
        let err = ServiceConfig::from_lookup(lookup_from(&[("SENTIMENT_PORT", "eighty")]))
            .unwrap_err();
        assert!(matches!(err, StartupError::Config(_)));
    }
}
