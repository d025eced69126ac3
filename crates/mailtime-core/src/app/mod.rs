//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてアプリケーションロジックを実装します。
//!
//! # 主要コンポーネント
//! - **MailTimeBuilder**: engine の構築とワイヤリング（Fail-fast 検証）
//! - **MailTime**: queue engine（enqueue / cancel / tick / start）
//! - **MailCompiler**: fragment の merge と template の適用
//! - **TransportPool**: transport の選択（backup / balancer）
//! - **RetryPolicy**: 失敗後の再送時刻

pub mod builder;
pub mod compiler;
pub mod config;
pub mod engine;
pub mod retry;
pub mod status;
pub mod template;
pub mod transport_pool;

// 主要な型を再エクスポート
pub use self::builder::MailTimeBuilder;
pub use self::compiler::MailCompiler;
pub use self::config::{ConcatConfig, MailTimeConfig, Mode, Strategy};
pub use self::engine::MailTime;
pub use self::retry::RetryPolicy;
pub use self::status::{QueueHealth, TickReport};
pub use self::transport_pool::TransportPool;
