//! mailtime-core
//!
//! Durable, at-least-once delayed email queue.
//!
//! 送信の「予約」と「実際の送信」を分離し、pending な task を共有 storage
//! （MongoDB / Redis）に永続化します。複数の worker プロセスが重複送信なしで
//! queue を消化し、失敗時は transport を切り替えながら再送します。
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（TaskId, Recipient, MailFragment, MailTask, MailMessage, errors）
//! - **ports**: 抽象化レイヤー（TaskStore, Transport, FromResolver, EventSink, RevolvingScheduler, Clock, IdGenerator）
//! - **app**: queue engine（MailTime, MailTimeBuilder, config, compiler, template, retry）
//! - **impls**: 実装（InMemoryTaskStore, MongoTaskStore, RedisTaskStore, LocalScheduler, RecordingTransport）
//!
//! ```ignore
//! let store = Arc::new(InMemoryTaskStore::new());
//! let mail = MailTime::builder()
//!     .store(store)
//!     .transport(Arc::new(smtp))
//!     .template(templates::HTML_SHELL)
//!     .build()?;
//!
//! let id = mail
//!     .enqueue(MailRequest::new("a@x.com").subject("Hi").html("<p>{{{name}}}</p>").field("name", "Rita"))
//!     .await?;
//!
//! let scheduler = Arc::new(LocalScheduler::new());
//! mail.start(scheduler.clone())?;
//! ```

pub mod app;
pub mod domain;
pub mod impls;
pub mod ports;

pub use crate::app::template as templates;
pub use crate::app::{MailTime, MailTimeBuilder, MailTimeConfig, Mode, Strategy, TickReport};
pub use crate::domain::{
    DeliveryError, MailFragment, MailMessage, MailRequest, MailTask, MailTimeError, Recipient,
    TaskId,
};
