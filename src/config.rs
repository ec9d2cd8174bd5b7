use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub evaluation: EvaluationConfig,
    #[serde(default)]
    pub audit: AuditConfig,
}

/// Metrics and cutoffs to report
#[derive(Debug, Clone, Deserialize)]
pub struct EvaluationConfig {
    pub metrics: MetricsSetting,
    pub topk: TopKSetting,
}

/// `metrics = "Recall"` or `metrics = ["Recall", "NDCG"]`.
///
/// Anything else deserializes into `Invalid` so the evaluator can reject it as
/// a configuration error with the offending value.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum MetricsSetting {
    Single(String),
    List(Vec<String>),
    Invalid(toml::Value),
}

impl From<&str> for MetricsSetting {
    fn from(name: &str) -> Self {
        MetricsSetting::Single(name.to_string())
    }
}

impl From<Vec<&str>> for MetricsSetting {
    fn from(names: Vec<&str>) -> Self {
        MetricsSetting::List(names.into_iter().map(String::from).collect())
    }
}

/// `topk = 10` or `topk = [10, 20]`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum TopKSetting {
    Single(i64),
    List(Vec<i64>),
    Invalid(toml::Value),
}

impl From<i64> for TopKSetting {
    fn from(k: i64) -> Self {
        TopKSetting::Single(k)
    }
}

impl From<Vec<i64>> for TopKSetting {
    fn from(ks: Vec<i64>) -> Self {
        TopKSetting::List(ks)
    }
}

/// Recommendation audit file configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_dataset")]
    pub dataset: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Audit test passes whose index is a multiple of this.
    #[serde(default = "default_every")]
    pub every: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            output_dir: default_output_dir(),
            dataset: default_dataset(),
            model: default_model(),
            every: default_every(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("recommend_topk")
}

fn default_dataset() -> String {
    "dataset".to_string()
}

fn default_model() -> String {
    "model".to_string()
}

fn default_every() -> usize {
    1
}

impl Config {
    /// Load configuration from file
    ///
    /// Loads environment variables from .env file (if present) before loading config.
    /// Looks for config file in this order:
    /// 1. Path specified in TOPKEVAL_CONFIG environment variable
    /// 2. ./config.toml in current directory
    pub fn load() -> Result<Self> {
        // .env is optional
        let _ = dotenv::dotenv();

        let config_path = std::env::var("TOPKEVAL_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.toml"));

        Self::load_from(&config_path)
    }

    /// Load and validate a specific config file.
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        Self::from_toml_str(&config_str)
            .with_context(|| format!("Invalid config file: {}", config_path.display()))
    }

    /// Parse and validate configuration text without touching the environment.
    pub fn from_toml_str(config_str: &str) -> Result<Self> {
        let config: Config = toml::from_str(config_str).context("Failed to parse config TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.audit.enabled {
            if self.audit.every == 0 {
                anyhow::bail!("audit.every must be greater than 0");
            }
            if self.audit.dataset.trim().is_empty() || self.audit.model.trim().is_empty() {
                anyhow::bail!("audit.dataset and audit.model must not be empty when audit is enabled");
            }
        }

        // Metric names and cutoffs fail fast here rather than at evaluation time
        crate::eval::TopKEvaluator::from_config(self)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Serialize config tests that mutate process-wide env so they don't race.
    static CONFIG_TEST_LOCK: Mutex<()> = Mutex::new(());

    const BASIC: &str = r#"
[evaluation]
metrics = ["Recall", "NDCG"]
topk = [10, 20]
"#;

    #[test]
    fn test_parse_lists() {
        let config = Config::from_toml_str(BASIC).unwrap();
        assert_eq!(
            config.evaluation.metrics,
            MetricsSetting::List(vec!["Recall".to_string(), "NDCG".to_string()])
        );
        assert_eq!(config.evaluation.topk, TopKSetting::List(vec![10, 20]));
        assert!(!config.audit.enabled);
        assert_eq!(config.audit.every, 1);
    }

    #[test]
    fn test_parse_single_values() {
        let config = Config::from_toml_str(
            r#"
[evaluation]
metrics = "precision"
topk = 5
"#,
        )
        .unwrap();
        assert_eq!(config.evaluation.metrics, MetricsSetting::from("precision"));
        assert_eq!(config.evaluation.topk, TopKSetting::Single(5));
    }

    #[test]
    fn test_rejects_bad_topk() {
        for topk in ["0", "-1", "2.5", "[5, 0]", "[]", "\"ten\""] {
            let text = format!("[evaluation]\nmetrics = \"recall\"\ntopk = {}\n", topk);
            let err = Config::from_toml_str(&text).unwrap_err();
            assert!(
                format!("{:#}", err).contains("Configuration error"),
                "topk = {}: {:#}",
                topk,
                err
            );
        }
    }

    #[test]
    fn test_rejects_bad_metrics() {
        for metrics in ["\"auc\"", "[]", "3", "[\"recall\", 4]"] {
            let text = format!("[evaluation]\nmetrics = {}\ntopk = 10\n", metrics);
            assert!(Config::from_toml_str(&text).is_err(), "metrics = {}", metrics);
        }
    }

    #[test]
    fn test_audit_section() {
        let config = Config::from_toml_str(
            r#"
[evaluation]
metrics = "recall"
topk = 10

[audit]
enabled = true
output_dir = "out"
dataset = "baby"
model = "LightGCN"
every = 3
"#,
        )
        .unwrap();
        assert!(config.audit.enabled);
        assert_eq!(config.audit.output_dir, PathBuf::from("out"));
        assert_eq!(config.audit.every, 3);
    }

    #[test]
    fn test_audit_every_zero_rejected() {
        let text = format!("{}\n[audit]\nenabled = true\nevery = 0\n", BASIC);
        assert!(Config::from_toml_str(&text).is_err());
    }

    #[test]
    fn test_config_load_from_env() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("eval.toml");
        fs::write(&config_path, BASIC).unwrap();

        let original = std::env::var("TOPKEVAL_CONFIG").ok();
        std::env::set_var("TOPKEVAL_CONFIG", &config_path);
        let config = Config::load();
        std::env::remove_var("TOPKEVAL_CONFIG");
        if let Some(v) = original {
            std::env::set_var("TOPKEVAL_CONFIG", v);
        }

        let config = config.unwrap();
        assert_eq!(config.evaluation.topk, TopKSetting::List(vec![10, 20]));
    }

    #[test]
    fn test_config_invalid_path() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let original = std::env::var("TOPKEVAL_CONFIG").ok();
        std::env::set_var("TOPKEVAL_CONFIG", "nonexistent.toml");
        let config = Config::load();
        assert!(config.is_err());
        std::env::remove_var("TOPKEVAL_CONFIG");
        if let Some(v) = original {
            std::env::set_var("TOPKEVAL_CONFIG", v);
        }
    }
}
