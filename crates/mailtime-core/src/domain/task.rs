//! The persisted unit of work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::fragment::{MailFragment, Recipient};
use super::ids::TaskId;
use super::state::TaskState;

/// One scheduled message, or one concatenation group of messages for the same recipient.
///
/// Field names on the wire follow the persisted layout shared by every backend
/// (`uuid`, `to`, `tries`, `sendAt`, `isSent`, ...). `sendAt` is stored as epoch
/// milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailTask {
    #[serde(rename = "uuid")]
    pub id: TaskId,

    /// Concatenation grouping key source.
    #[serde(rename = "to")]
    pub recipient: Recipient,

    /// Number of send attempts made so far (including an in-flight one).
    #[serde(rename = "tries", default)]
    pub attempts: u32,

    /// Not dispatched before this instant.
    #[serde(rename = "sendAt", with = "chrono::serde::ts_milliseconds")]
    pub scheduled_at: DateTime<Utc>,

    #[serde(rename = "isSent", default)]
    pub sent: bool,

    #[serde(rename = "isCancelled", default)]
    pub cancelled: bool,

    #[serde(rename = "isFailed", default)]
    pub failed: bool,

    /// Outer template overriding the engine default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,

    /// Transport used last, or to be used next under the backup strategy.
    #[serde(rename = "transport", default)]
    pub transport_index: usize,

    /// Subject used only when several fragments are merged.
    #[serde(rename = "concatSubject", default, skip_serializing_if = "Option::is_none")]
    pub concat_subject: Option<String>,

    /// Append-only, never empty.
    #[serde(rename = "mailOptions")]
    pub fragments: Vec<MailFragment>,
}

impl MailTask {
    /// A fresh pending task holding exactly one fragment.
    pub fn new(id: TaskId, fragment: MailFragment, scheduled_at: DateTime<Utc>) -> Self {
        Self {
            id,
            recipient: fragment.to.clone(),
            attempts: 0,
            scheduled_at,
            sent: false,
            cancelled: false,
            failed: false,
            template: None,
            transport_index: 0,
            concat_subject: None,
            fragments: vec![fragment],
        }
    }

    pub fn state(&self) -> TaskState {
        if self.cancelled {
            TaskState::Cancelled
        } else if self.failed {
            TaskState::Failed
        } else if self.sent {
            TaskState::Sent
        } else {
            TaskState::Pending
        }
    }

    /// Not sent, cancelled or failed.
    pub fn is_open(&self) -> bool {
        !self.sent && !self.cancelled && !self.failed
    }

    /// `open ∧ scheduled_at ≤ now ∧ attempts < max_attempts`
    pub fn is_due(&self, now: DateTime<Utc>, max_attempts: u32) -> bool {
        self.is_open() && self.scheduled_at <= now && self.attempts < max_attempts
    }

    /// Recipient of the first fragment, for logs.
    pub fn first_recipient(&self) -> &Recipient {
        self.fragments
            .first()
            .map(|f| &f.to)
            .unwrap_or(&self.recipient)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rstest::rstest;
    use serde_json::json;
    use ulid::Ulid;

    fn sample(now: DateTime<Utc>) -> MailTask {
        MailTask::new(
            TaskId::from_ulid(Ulid::new()),
            MailFragment::new("a@x.com").text("hello"),
            now,
        )
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn new_task_is_pending_with_one_fragment() {
        let task = sample(at());
        assert_eq!(task.state(), TaskState::Pending);
        assert_eq!(task.attempts, 0);
        assert_eq!(task.fragments.len(), 1);
        assert_eq!(task.recipient, Recipient::from("a@x.com"));
    }

    #[rstest]
    #[case::pending(false, false, false, 0, true)]
    #[case::claimed(true, false, false, 0, false)]
    #[case::cancelled(false, true, false, 0, false)]
    #[case::failed(false, false, true, 0, false)]
    #[case::attempts_exhausted(false, false, false, 3, false)]
    fn due_only_when_open_and_under_max_attempts(
        #[case] sent: bool,
        #[case] cancelled: bool,
        #[case] failed: bool,
        #[case] attempts: u32,
        #[case] due: bool,
    ) {
        let mut task = sample(at());
        task.sent = sent;
        task.cancelled = cancelled;
        task.failed = failed;
        task.attempts = attempts;
        assert_eq!(task.is_due(at(), 3), due);
    }

    #[test]
    fn not_due_before_scheduled_at() {
        let task = sample(at() + Duration::seconds(1));
        assert!(!task.is_due(at(), 3));
        assert!(task.is_due(at() + Duration::seconds(1), 3));
    }

    #[test]
    fn serializes_with_persisted_field_names() {
        let task = sample(at());
        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(value["uuid"], json!(task.id.to_string()));
        assert_eq!(value["to"], json!("a@x.com"));
        assert_eq!(value["tries"], json!(0));
        assert_eq!(value["sendAt"], json!(at().timestamp_millis()));
        assert_eq!(value["isSent"], json!(false));
        assert_eq!(value["transport"], json!(0));
        assert_eq!(value["mailOptions"][0]["text"], json!("hello"));
        assert!(value.get("template").is_none());

        let back: MailTask = serde_json::from_value(value).unwrap();
        assert_eq!(back, task);
    }
}
