//! Errors - エラー型と分類
//!
//! # 分類
//! - 入力エラー（body なし、recipient 不正）: enqueue の呼び出し元に返す
//! - 設定エラー: 構築時（`MailTimeBuilder::build`）に返す
//! - storage エラー: enqueue の永続化失敗のみ呼び出し元に返す。tick 中はログに記録して吸収
//! - 配送エラー（`DeliveryError`）: 呼び出し元には返さず、EventSink にのみ通知

use thiserror::Error;

use crate::ports::scheduler::SchedulerError;
use crate::ports::task_store::StoreError;
use crate::ports::transport::TransportError;

/// Errors crossing the public API boundary.
#[derive(Debug, Error)]
pub enum MailTimeError {
    #[error("`html` nor `text` field is presented, at least one of those fields is required")]
    MissingBody,

    #[error("`to` is required and must be a non-empty address or a non-empty list of addresses")]
    InvalidRecipient,

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Storage(#[from] StoreError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

impl MailTimeError {
    pub fn config<T: Into<String>>(msg: T) -> Self {
        Self::Config(msg.into())
    }
}

/// Why a dispatch attempt failed. Observed through `EventSink::on_error`.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("transport #{index} failed: {source}")]
    Transport {
        index: usize,
        #[source]
        source: TransportError,
    },

    #[error("Message not accepted or Greeting never received")]
    NotAccepted,

    #[error("transport #{0} not available or misconfiguration is in place")]
    NoTransport(usize),

    #[error("failed to compile message: {0}")]
    Compile(String),

    #[error("dispatch panicked: {0}")]
    Panicked(String),
}
