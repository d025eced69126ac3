//! Transport port - 実際の送信（SMTP など）の抽象化
//!
//! SMTP の詳細はこの crate の責務外です。engine が必要とするのは
//! 「送る → accepted アドレス一覧 or エラー」という契約だけ。
//!
//! # 設計原則
//! - タイムアウトは transport 側の責務（engine は待ち続ける）
//! - `accepted` が空の成功は engine 側で失敗として扱う

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::MailMessage;

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("rejected by server: {0}")]
    Rejected(String),

    #[error("{0}")]
    Other(String),
}

/// What a transport reports back after a successful hand-off.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SendReport {
    pub accepted: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rejected: Vec<String>,

    /// Raw server response or message id, if the transport has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
}

impl SendReport {
    pub fn accepted<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            accepted: addresses.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }
}

/// One configured way of sending mail.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Name for logs.
    fn name(&self) -> &str;

    /// Message fields applied before any fragment (e.g. a default `from` or headers).
    fn defaults(&self) -> Option<&Map<String, Value>> {
        None
    }

    async fn send(&self, message: &MailMessage) -> Result<SendReport, TransportError>;
}
