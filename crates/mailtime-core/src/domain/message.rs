//! The compiled outgoing message handed to a transport.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::fragment::Recipient;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailMessage {
    pub to: Recipient,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,

    /// Custom headers and transport-specific options, passed through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
