//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部システム（MongoDB, Redis, SMTP, 分散 scheduler など）への
//! インターフェースを提供し、実装の詳細を隠蔽します。
//!
//! # 設計原則
//! - TaskStore が source of truth（正本）
//! - Transport / RevolvingScheduler は engine の外側の能力として扱う
//! - 時刻と ID はテストで差し替えられるよう trait にする

pub mod clock;
pub mod event_sink;
pub mod from_resolver;
pub mod health;
pub mod id_generator;
pub mod scheduler;
pub mod task_store;
pub mod transport;

// 主要な trait を再エクスポート
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::event_sink::{CallbackSink, EventSink, FailureResolution, NoopEventSink};
pub use self::from_resolver::{FromResolver, StaticFrom};
pub use self::health::{HealthReport, HealthStatus};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::scheduler::{RevolvingScheduler, SchedulerError, TickHandler};
pub use self::task_store::{DueTasks, PatchGuard, QueueBinding, StoreError, TaskPatch, TaskStore};
pub use self::transport::{SendReport, Transport, TransportError};
