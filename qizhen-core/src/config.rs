use std::path::PathBuf;

use crate::error::ConfigError;
use crate::subjects::SubjectProfile;

pub const DEFAULT_BASE_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";
pub const DEFAULT_CHAT_MODEL: &str = "qwen-max";
pub const DEFAULT_VISION_MODEL: &str = "qwen-vl-max";
pub const DEFAULT_FALLBACK_MODEL: &str = "qwen-turbo";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-v2";
pub const DEFAULT_PORT: u16 = 5000;

/// Runtime configuration, read from the environment once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: String,
    pub base_url: String,
    pub chat_model: String,
    pub vision_model: String,
    pub fallback_model: String,
    pub embedding_model: String,
    /// Directory holding one index directory per subject
    pub index_root: PathBuf,
    /// Where uploaded images are staged while a request runs
    pub upload_dir: PathBuf,
    pub tesseract_cmd: String,
    /// Slugs of the subjects to serve
    pub subjects: Vec<String>,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let api_key = get("DASHSCOPE_API_KEY").ok_or(ConfigError::MissingApiKey)?;

        let port = match get("PORT") {
            Some(raw) => raw.parse::<u16>().map_err(|e| ConfigError::InvalidValue {
                name: "PORT",
                reason: e.to_string(),
            })?,
            None => DEFAULT_PORT,
        };

        let subjects = match get("QIZHEN_SUBJECTS") {
            Some(raw) => {
                let slugs: Vec<String> = raw
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
                for slug in &slugs {
                    if SubjectProfile::by_slug(slug).is_none() {
                        return Err(ConfigError::UnknownSubject(slug.clone()));
                    }
                }
                slugs
            }
            None => SubjectProfile::builtin()
                .iter()
                .map(|s| s.slug.to_string())
                .collect(),
        };

        Ok(Self {
            api_key,
            base_url: get("DASHSCOPE_BASE_URL")
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            chat_model: get("QIZHEN_CHAT_MODEL").unwrap_or_else(|| DEFAULT_CHAT_MODEL.to_string()),
            vision_model: get("QIZHEN_VISION_MODEL")
                .unwrap_or_else(|| DEFAULT_VISION_MODEL.to_string()),
            fallback_model: get("QIZHEN_FALLBACK_MODEL")
                .unwrap_or_else(|| DEFAULT_FALLBACK_MODEL.to_string()),
            embedding_model: get("QIZHEN_EMBEDDING_MODEL")
                .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
            index_root: get("QIZHEN_INDEX_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data")),
            upload_dir: get("UPLOAD_FOLDER")
                .map(PathBuf::from)
                .unwrap_or_else(std::env::temp_dir),
            tesseract_cmd: get("TESSERACT_CMD").unwrap_or_else(|| "tesseract".to_string()),
            subjects,
            port,
        })
    }

    /// Index directory for one subject.
    pub fn index_dir(&self, subject: &SubjectProfile) -> PathBuf {
        self.index_root.join(subject.index_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn missing_api_key_fails_fast() {
        let err = Config::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingApiKey));

        let err = Config::from_lookup(lookup(&[("DASHSCOPE_API_KEY", "   ")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingApiKey));
    }

    #[test]
    fn defaults_apply() {
        let config = Config::from_lookup(lookup(&[("DASHSCOPE_API_KEY", "sk-test")])).unwrap();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.chat_model, "qwen-max");
        assert_eq!(config.vision_model, "qwen-vl-max");
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.subjects.len(), SubjectProfile::builtin().len());
        assert_eq!(config.tesseract_cmd, "tesseract");
    }

    #[test]
    fn overrides_and_subject_selection() {
        let config = Config::from_lookup(lookup(&[
            ("DASHSCOPE_API_KEY", "sk-test"),
            ("DASHSCOPE_BASE_URL", "http://localhost:9000/v1/"),
            ("PORT", "8080"),
            ("QIZHEN_SUBJECTS", "jindaishi, maogai"),
            ("QIZHEN_INDEX_ROOT", "/srv/indexes"),
        ]))
        .unwrap();
        assert_eq!(config.base_url, "http://localhost:9000/v1");
        assert_eq!(config.port, 8080);
        assert_eq!(config.subjects, vec!["jindaishi", "maogai"]);
        let subject = SubjectProfile::by_slug("jindaishi").unwrap();
        assert_eq!(
            config.index_dir(subject),
            PathBuf::from("/srv/indexes/database_agent_jindaishi")
        );
    }

    #[test]
    fn rejects_bad_values() {
        let err = Config::from_lookup(lookup(&[("DASHSCOPE_API_KEY", "k"), ("PORT", "http")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { name: "PORT", .. }));

        let err = Config::from_lookup(lookup(&[
            ("DASHSCOPE_API_KEY", "k"),
            ("QIZHEN_SUBJECTS", "physics"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownSubject(s) if s == "physics"));
    }
}
