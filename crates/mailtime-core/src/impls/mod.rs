//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryTaskStore**: テスト・開発用の正本
//! - **MongoTaskStore**: feature `mongo`
//! - **RedisTaskStore**: feature `redis`
//! - **LocalScheduler**: 単一プロセス用の interval scheduler
//! - **RecordingTransport**: 送信内容を記録する transport（テスト・demo 用）

pub mod local_scheduler;
pub mod memory;
#[cfg(feature = "mongo")]
pub mod mongo;
pub mod recording_transport;
#[cfg(feature = "redis")]
pub mod redis;

// 主要な型を再エクスポート
pub use self::local_scheduler::LocalScheduler;
pub use self::memory::InMemoryTaskStore;
#[cfg(feature = "mongo")]
pub use self::mongo::MongoTaskStore;
pub use self::recording_transport::{RecordingTransport, Reply};
#[cfg(feature = "redis")]
pub use self::redis::{RedisKeys, RedisTaskStore};
