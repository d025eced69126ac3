//! Config - engine 設定
//!
//! serde で読み込める素の struct。既定値は運用実績のある値を採用しています。
//! 検証は `MailTimeBuilder::build` で一度だけ行います（Fail-fast）。
//!
//! ```toml
//! prefix = "notifications"
//! strategy = "balancer"
//! max_attempts = 10
//!
//! [concat]
//! enabled = true
//! delay_ms = 30000
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::MailTimeError;

/// Whether this process also drains the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Enqueue only. Never ticks, needs no transports.
    Producer,
    #[default]
    ProducerConsumer,
}

impl Mode {
    pub fn is_consumer(self) -> bool {
        matches!(self, Mode::ProducerConsumer)
    }
}

/// Transport selection policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Stick to the task's transport, move on after `fails_to_next` failures.
    #[default]
    Backup,
    /// Round-robin across transports, process-local cursor.
    Balancer,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcatConfig {
    pub enabled: bool,
    pub delay_ms: u64,
    pub delimiter: String,
    pub subject: String,
}

impl Default for ConcatConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            delay_ms: 60_000,
            delimiter: "<hr>".to_string(),
            subject: "Multiple notifications".to_string(),
        }
    }
}

impl ConcatConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MailTimeConfig {
    /// Storage and scheduler namespace.
    pub prefix: String,
    pub mode: Mode,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub tick_interval_ms: u64,
    pub tick_concurrency: usize,
    /// Outer template applied to the final HTML body.
    pub template: String,
    pub concat: ConcatConfig,
    pub strategy: Strategy,
    pub fails_to_next: u32,
    pub keep_history: bool,
    /// Static sender used when a message has no `from`.
    pub from: Option<String>,
}

impl Default for MailTimeConfig {
    fn default() -> Self {
        Self {
            prefix: "default".to_string(),
            mode: Mode::default(),
            max_attempts: 60,
            retry_delay_ms: 60_000,
            backoff_multiplier: 1.0,
            tick_interval_ms: 1_536,
            tick_concurrency: 1,
            template: "{{{html}}}".to_string(),
            concat: ConcatConfig::default(),
            strategy: Strategy::default(),
            fails_to_next: 4,
            keep_history: false,
            from: None,
        }
    }
}

impl MailTimeConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, MailTimeError> {
        toml::from_str(input).map_err(|e| MailTimeError::config(format!("invalid TOML: {e}")))
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, MailTimeError> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path)
            .map_err(|e| MailTimeError::config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&input)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// 値の範囲チェック。transport の有無など構成要素の検証は builder 側。
    pub fn validate(&self) -> Result<(), MailTimeError> {
        if self.prefix.trim().is_empty() {
            return Err(MailTimeError::config("`prefix` must not be empty"));
        }
        if self.max_attempts == 0 {
            return Err(MailTimeError::config("`max_attempts` must be at least 1"));
        }
        if self.retry_delay_ms == 0 {
            return Err(MailTimeError::config("`retry_delay_ms` must be greater than zero"));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(MailTimeError::config(
                "`backoff_multiplier` must be a finite number >= 1.0",
            ));
        }
        if self.tick_interval_ms == 0 {
            return Err(MailTimeError::config("`tick_interval_ms` must be greater than zero"));
        }
        if self.tick_concurrency == 0 {
            return Err(MailTimeError::config("`tick_concurrency` must be at least 1"));
        }
        if self.fails_to_next == 0 {
            return Err(MailTimeError::config("`fails_to_next` must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn defaults_match_documented_values() {
        let config = MailTimeConfig::default();
        assert_eq!(config.prefix, "default");
        assert_eq!(config.mode, Mode::ProducerConsumer);
        assert_eq!(config.max_attempts, 60);
        assert_eq!(config.retry_delay(), Duration::from_secs(60));
        assert_eq!(config.tick_interval(), Duration::from_millis(1536));
        assert_eq!(config.template, "{{{html}}}");
        assert_eq!(config.strategy, Strategy::Backup);
        assert_eq!(config.fails_to_next, 4);
        assert!(!config.concat.enabled);
        assert_eq!(config.concat.delimiter, "<hr>");
        assert_eq!(config.concat.subject, "Multiple notifications");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults_for_the_rest() {
        let config = MailTimeConfig::from_toml_str(
            r#"
            prefix = "notifications"
            mode = "producer"
            strategy = "balancer"
            keep_history = true

            [concat]
            enabled = true
            delay_ms = 30000
            "#,
        )
        .unwrap();

        assert_eq!(config.prefix, "notifications");
        assert_eq!(config.mode, Mode::Producer);
        assert_eq!(config.strategy, Strategy::Balancer);
        assert!(config.keep_history);
        assert!(config.concat.enabled);
        assert_eq!(config.concat.delay(), Duration::from_secs(30));
        assert_eq!(config.concat.delimiter, "<hr>");
        assert_eq!(config.max_attempts, 60);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = MailTimeConfig::from_toml_str("retries = 3").unwrap_err();
        assert!(matches!(err, MailTimeError::Config(_)));
    }

    #[rstest]
    #[case::empty_prefix(MailTimeConfig { prefix: " ".into(), ..Default::default() })]
    #[case::zero_attempts(MailTimeConfig { max_attempts: 0, ..Default::default() })]
    #[case::zero_retry_delay(MailTimeConfig { retry_delay_ms: 0, ..Default::default() })]
    #[case::shrinking_backoff(MailTimeConfig { backoff_multiplier: 0.5, ..Default::default() })]
    #[case::zero_interval(MailTimeConfig { tick_interval_ms: 0, ..Default::default() })]
    #[case::zero_concurrency(MailTimeConfig { tick_concurrency: 0, ..Default::default() })]
    #[case::zero_threshold(MailTimeConfig { fails_to_next: 0, ..Default::default() })]
    fn invalid_values_fail_validation(#[case] config: MailTimeConfig) {
        assert!(matches!(config.validate(), Err(MailTimeError::Config(_))));
    }
}
