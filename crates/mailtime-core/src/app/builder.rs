//! MailTimeBuilder - engine の構築とワイヤリング
//!
//! # Fail-fast 設計
//! - 設定値の範囲チェック（`MailTimeConfig::validate`）
//! - storage adapter は必須
//! - consumer モードでは transport が 1 つ以上必須
//! - build() 成功時に store を engine に bind する

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use crate::domain::MailTimeError;
use crate::ports::{
    Clock, EventSink, FromResolver, IdGenerator, NoopEventSink, QueueBinding, StaticFrom,
    SystemClock, TaskStore, Transport, UlidGenerator,
};

use super::compiler::MailCompiler;
use super::config::{MailTimeConfig, Mode, Strategy};
use super::engine::{Inner, MailTime};
use super::retry::RetryPolicy;
use super::transport_pool::TransportPool;

/// # 使用例
/// ```ignore
/// let mail = MailTimeBuilder::new()
///     .prefix("notifications")
///     .store(Arc::new(InMemoryTaskStore::new()))
///     .transport(smtp)
///     .concat(true)
///     .build()?;
/// ```
#[derive(Default)]
pub struct MailTimeBuilder {
    config: MailTimeConfig,
    store: Option<Arc<dyn TaskStore>>,
    transports: Vec<Arc<dyn Transport>>,
    from: Option<Arc<dyn FromResolver>>,
    events: Option<Arc<dyn EventSink>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
}

impl MailTimeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every configuration value at once (e.g. loaded from TOML).
    pub fn config(mut self, config: MailTimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.prefix = prefix.into();
        self
    }

    pub fn mode(mut self, mode: Mode) -> Self {
        self.config.mode = mode;
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.config.max_attempts = max_attempts;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.config.retry_delay_ms = duration_ms(delay);
        self
    }

    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.config.backoff_multiplier = multiplier;
        self
    }

    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.config.tick_interval_ms = duration_ms(interval);
        self
    }

    pub fn tick_concurrency(mut self, concurrency: usize) -> Self {
        self.config.tick_concurrency = concurrency;
        self
    }

    pub fn template(mut self, template: impl Into<String>) -> Self {
        self.config.template = template.into();
        self
    }

    pub fn concat(mut self, enabled: bool) -> Self {
        self.config.concat.enabled = enabled;
        self
    }

    pub fn concat_delay(mut self, delay: Duration) -> Self {
        self.config.concat.delay_ms = duration_ms(delay);
        self
    }

    pub fn concat_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.config.concat.delimiter = delimiter.into();
        self
    }

    pub fn concat_subject(mut self, subject: impl Into<String>) -> Self {
        self.config.concat.subject = subject.into();
        self
    }

    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.config.strategy = strategy;
        self
    }

    pub fn fails_to_next(mut self, fails_to_next: u32) -> Self {
        self.config.fails_to_next = fails_to_next;
        self
    }

    pub fn keep_history(mut self, keep_history: bool) -> Self {
        self.config.keep_history = keep_history;
        self
    }

    /// Static sender for messages without `from`.
    pub fn from(mut self, from: impl Into<String>) -> Self {
        self.config.from = Some(from.into());
        self
    }

    pub fn store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transports.push(transport);
        self
    }

    pub fn transports<I>(mut self, transports: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn Transport>>,
    {
        self.transports.extend(transports);
        self
    }

    /// Takes precedence over [`MailTimeBuilder::from`].
    pub fn from_resolver(mut self, resolver: Arc<dyn FromResolver>) -> Self {
        self.from = Some(resolver);
        self
    }

    pub fn event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn build(self) -> Result<MailTime, MailTimeError> {
        let config = self.config;
        config.validate()?;

        let store = self
            .store
            .ok_or_else(|| MailTimeError::config("a storage adapter is required"))?;
        if config.mode.is_consumer() && self.transports.is_empty() {
            return Err(MailTimeError::config(
                "at least one transport is required in producer_consumer mode",
            ));
        }

        let from = self.from.or_else(|| {
            config
                .from
                .clone()
                .map(|from| Arc::new(StaticFrom(from)) as Arc<dyn FromResolver>)
        });
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));

        store.bind(QueueBinding {
            max_attempts: config.max_attempts,
            keep_history: config.keep_history,
            concat_enabled: config.concat.enabled,
        });

        let inner = Inner {
            pool: TransportPool::new(self.transports, config.strategy, config.fails_to_next),
            compiler: MailCompiler::new(
                config.template.clone(),
                config.concat.delimiter.clone(),
                config.concat.subject.clone(),
                from,
            ),
            retry: RetryPolicy {
                base_delay: config.retry_delay(),
                multiplier: config.backoff_multiplier,
            },
            events: self.events.unwrap_or_else(|| Arc::new(NoopEventSink)),
            store,
            clock,
            ids,
            scheduler: OnceLock::new(),
            config,
        };
        Ok(MailTime::from_inner(inner))
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
