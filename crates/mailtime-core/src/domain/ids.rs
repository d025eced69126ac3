//! Task identifiers.
//!
//! ULID ベースの ID を使います。
//!
//! ## ULID の特性
//! - **時刻でソート可能**: timestamp が先頭にあるため、生成順序でソートできる
//! - **分散生成可能**: 複数の worker プロセスが調整なしで生成できる
//! - 文字列表現（26 文字）がそのまま storage のキーになる
//!   （Redis: `<ns>:letter:<id>`, Mongo: `uuid` フィールド）

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Identifier of a queued mail task.
///
/// Returned by `MailTime::enqueue` and accepted by `MailTime::cancel`.
/// Serialized as the canonical 26-character ULID string.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Ulid);

impl TaskId {
    /// ULID から TaskId を作成
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    /// 内部の ULID を取得
    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl From<Ulid> for TaskId {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Parse error for [`TaskId`].
#[derive(Debug, thiserror::Error)]
#[error("invalid task id {input:?}: {source}")]
pub struct ParseTaskIdError {
    input: String,
    #[source]
    source: ulid::DecodeError,
}

impl FromStr for TaskId {
    type Err = ParseTaskIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s)
            .map(TaskId)
            .map_err(|source| ParseTaskIdError {
                input: s.to_string(),
                source,
            })
    }
}
