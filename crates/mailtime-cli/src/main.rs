use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::time::{Duration, sleep};
use tracing::info;
use tracing_subscriber::EnvFilter;

use mailtime_core::domain::MailMessage;
use mailtime_core::impls::{InMemoryTaskStore, LocalScheduler};
use mailtime_core::ports::{CallbackSink, SendReport, Transport, TransportError};
use mailtime_core::{MailRequest, MailTime, MailTimeConfig};

/// 送信せずにログへ出すだけの transport。最初の `failures` 回はわざと失敗する
struct ConsoleTransport {
    remaining_failures: AtomicU32,
}

impl ConsoleTransport {
    fn new(failures: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(failures),
        }
    }
}

#[async_trait]
impl Transport for ConsoleTransport {
    fn name(&self) -> &str {
        "console"
    }

    async fn send(&self, message: &MailMessage) -> Result<SendReport, TransportError> {
        let left = self.remaining_failures.load(Ordering::Relaxed);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return Err(TransportError::Connection(format!(
                "intentional failure (left={left})"
            )));
        }

        info!(
            to = %message.to,
            from = ?message.from,
            subject = ?message.subject,
            "console mail sent"
        );
        if let Some(text) = &message.text {
            println!("---\n{text}\n---");
        }
        Ok(SendReport::accepted(message.to.addresses()))
    }
}

/// 短い retry / tick と concatenation 有効の設定
fn demo_config() -> MailTimeConfig {
    let mut config = MailTimeConfig::default();
    config.retry_delay_ms = 500;
    config.tick_interval_ms = 200;
    config.concat.enabled = true;
    config.concat.delay_ms = 1_000;
    config.from = Some("mailtime-demo@localhost".to_string());
    config
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // (A) 設定：引数に TOML ファイルがあればそれを使う
    let config = match std::env::args().nth(1) {
        Some(path) => MailTimeConfig::from_toml_file(path)?,
        None => demo_config(),
    };

    // (B) engine を組み立てる（store / transport / hooks）
    let events = CallbackSink::new()
        .on_sent(|task, report| {
            info!(task_id = %task.id, accepted = ?report.accepted, "delivered");
        })
        .on_error(|task, error, resolution| {
            info!(task_id = %task.id, error = %error, ?resolution, "delivery failed");
        });

    let mail = MailTime::builder()
        .config(config)
        .store(Arc::new(InMemoryTaskStore::new()))
        .transport(Arc::new(ConsoleTransport::new(1)))
        .event_sink(Arc::new(events))
        .build()?;

    // (C) 投入：同じ宛先への 2 通は concatenation でまとまる
    for name in ["Rita", "Sam"] {
        let id = mail
            .enqueue(
                MailRequest::new("demo@localhost")
                    .subject("Hello")
                    .text("Hello, {{name}}!")
                    .html("<p>Hello, {{name}}!</p>")
                    .field("name", name),
            )
            .await?;
        info!(task_id = %id, name, "enqueued");
    }

    // (D) tick を scheduler に登録して、ctrl-c か timeout まで回す
    let scheduler = Arc::new(LocalScheduler::new());
    mail.start(scheduler.clone())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("ctrl-c received"),
        _ = sleep(Duration::from_secs(5)) => {}
    }

    let health = mail.health_check().await;
    info!(code = health.code(), ok = health.is_ok(), "queue health before shutdown");

    scheduler.shutdown_and_join().await;
    Ok(())
}
