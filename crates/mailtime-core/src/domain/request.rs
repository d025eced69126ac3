//! Enqueue input.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::fragment::{MailFragment, Recipient};

/// What a caller hands to `MailTime::enqueue`.
///
/// Scheduling options (`sendAt`, `template`, `concatSubject`) travel next to the
/// message fields but never end up inside the stored fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailRequest {
    #[serde(flatten)]
    pub fragment: MailFragment,

    /// Defaults to "now".
    #[serde(
        rename = "sendAt",
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_milliseconds_option"
    )]
    pub send_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,

    #[serde(rename = "concatSubject", default, skip_serializing_if = "Option::is_none")]
    pub concat_subject: Option<String>,
}

impl MailRequest {
    pub fn new(to: impl Into<Recipient>) -> Self {
        MailFragment::new(to).into()
    }

    pub fn sender(mut self, from: impl Into<String>) -> Self {
        self.fragment = self.fragment.sender(from);
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.fragment = self.fragment.subject(subject);
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.fragment = self.fragment.text(text);
        self
    }

    pub fn html(mut self, html: impl Into<String>) -> Self {
        self.fragment = self.fragment.html(html);
        self
    }

    pub fn field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fragment = self.fragment.field(key, value);
        self
    }

    pub fn send_at(mut self, at: DateTime<Utc>) -> Self {
        self.send_at = Some(at);
        self
    }

    pub fn template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    pub fn concat_subject(mut self, subject: impl Into<String>) -> Self {
        self.concat_subject = Some(subject.into());
        self
    }
}

impl From<MailFragment> for MailRequest {
    fn from(fragment: MailFragment) -> Self {
        Self {
            fragment,
            send_at: None,
            template: None,
            concat_subject: None,
        }
    }
}
