//! Recipients and mail fragments.
//!
//! A fragment is one caller-submitted message payload. A task owns one or more
//! fragments; concatenation appends new fragments to an open task instead of
//! opening a new one.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use super::equality::{lists_equivalent, maps_equivalent};

/// One address or a list of addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Recipient {
    One(String),
    Many(Vec<String>),
}

impl Recipient {
    /// A non-empty address, or a non-empty list of non-empty addresses.
    pub fn is_valid(&self) -> bool {
        match self {
            Recipient::One(address) => !address.trim().is_empty(),
            Recipient::Many(addresses) => {
                !addresses.is_empty() && addresses.iter().all(|a| !a.trim().is_empty())
            }
        }
    }

    pub fn addresses(&self) -> Vec<&str> {
        match self {
            Recipient::One(address) => vec![address.as_str()],
            Recipient::Many(addresses) => addresses.iter().map(String::as_str).collect(),
        }
    }

    /// Concatenation grouping key.
    ///
    /// List order must not split a group, so lists are sorted before joining.
    pub fn grouping_key(&self) -> String {
        match self {
            Recipient::One(address) => address.clone(),
            Recipient::Many(addresses) => {
                let mut sorted: Vec<&str> = addresses.iter().map(String::as_str).collect();
                sorted.sort_unstable();
                sorted.join(",")
            }
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Recipient::One(address) => Value::String(address.clone()),
            Recipient::Many(addresses) => {
                Value::Array(addresses.iter().cloned().map(Value::String).collect())
            }
        }
    }

    /// Same addresses regardless of list order.
    pub fn is_equivalent(&self, other: &Recipient) -> bool {
        match (self, other) {
            (Recipient::One(a), Recipient::One(b)) => a == b,
            (Recipient::Many(a), Recipient::Many(b)) => {
                let a: Vec<Value> = a.iter().cloned().map(Value::String).collect();
                let b: Vec<Value> = b.iter().cloned().map(Value::String).collect();
                lists_equivalent(&a, &b)
            }
            _ => false,
        }
    }
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.addresses().join(", "))
    }
}

impl From<&str> for Recipient {
    fn from(address: &str) -> Self {
        Recipient::One(address.to_string())
    }
}

impl From<String> for Recipient {
    fn from(address: String) -> Self {
        Recipient::One(address)
    }
}

impl From<Vec<String>> for Recipient {
    fn from(addresses: Vec<String>) -> Self {
        Recipient::Many(addresses)
    }
}

impl From<Vec<&str>> for Recipient {
    fn from(addresses: Vec<&str>) -> Self {
        Recipient::Many(addresses.into_iter().map(str::to_string).collect())
    }
}

/// One message payload: well-known mail fields plus arbitrary template/transport fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailFragment {
    pub to: Recipient,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,

    /// Everything else: template replacements, custom headers, transport options.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl MailFragment {
    pub fn new(to: impl Into<Recipient>) -> Self {
        Self {
            to: to.into(),
            from: None,
            subject: None,
            text: None,
            html: None,
            fields: Map::new(),
        }
    }

    pub fn sender(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn html(mut self, html: impl Into<String>) -> Self {
        self.html = Some(html.into());
        self
    }

    pub fn field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// At least one of `text` / `html` is present and non-empty.
    pub fn has_body(&self) -> bool {
        non_empty(&self.text) || non_empty(&self.html)
    }

    /// Flat view of every field, as used for placeholder lookup and merging.
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = self.fields.clone();
        map.insert("to".to_string(), self.to.to_value());
        for (key, value) in [
            ("from", &self.from),
            ("subject", &self.subject),
            ("text", &self.text),
            ("html", &self.html),
        ] {
            if let Some(value) = value {
                map.insert(key.to_string(), Value::String(value.clone()));
            }
        }
        map
    }

    /// Deep structural equality (list fields compared as multisets).
    pub fn is_equivalent(&self, other: &MailFragment) -> bool {
        maps_equivalent(&self.to_map(), &other.to_map())
    }
}

fn non_empty(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case::single(Recipient::from("a@x.com"), true)]
    #[case::blank(Recipient::from("  "), false)]
    #[case::empty_list(Recipient::Many(vec![]), false)]
    #[case::list(Recipient::from(vec!["a@x.com", "b@x.com"]), true)]
    #[case::list_with_blank(Recipient::from(vec!["a@x.com", ""]), false)]
    fn recipient_validation(#[case] recipient: Recipient, #[case] valid: bool) {
        assert_eq!(recipient.is_valid(), valid);
    }

    #[test]
    fn grouping_key_ignores_list_order() {
        let a = Recipient::from(vec!["b@x.com", "a@x.com"]);
        let b = Recipient::from(vec!["a@x.com", "b@x.com"]);
        assert_eq!(a.grouping_key(), b.grouping_key());
        assert_eq!(a.grouping_key(), "a@x.com,b@x.com");
        assert!(a.is_equivalent(&b));
    }

    #[test]
    fn recipient_deserializes_from_string_or_list() {
        let one: Recipient = serde_json::from_value(json!("a@x.com")).unwrap();
        let many: Recipient = serde_json::from_value(json!(["a@x.com"])).unwrap();
        assert_eq!(one, Recipient::from("a@x.com"));
        assert_eq!(many, Recipient::from(vec!["a@x.com"]));
    }

    #[test]
    fn has_body_requires_non_empty_text_or_html() {
        assert!(!MailFragment::new("a@x.com").has_body());
        assert!(!MailFragment::new("a@x.com").text("").has_body());
        assert!(MailFragment::new("a@x.com").text("hi").has_body());
        assert!(MailFragment::new("a@x.com").html("<p>hi</p>").has_body());
    }

    #[test]
    fn extra_fields_flatten_into_the_payload() {
        let fragment = MailFragment::new("a@x.com")
            .text("{{name}}")
            .field("name", "Rita");
        let value = serde_json::to_value(&fragment).unwrap();
        assert_eq!(value, json!({"to": "a@x.com", "text": "{{name}}", "name": "Rita"}));

        let back: MailFragment = serde_json::from_value(value).unwrap();
        assert_eq!(back, fragment);
    }

    #[test]
    fn equivalence_ignores_list_order_but_not_content() {
        let a = MailFragment::new("a@x.com")
            .text("hi")
            .field("cc", json!(["c@x.com", "d@x.com"]));
        let b = MailFragment::new("a@x.com")
            .text("hi")
            .field("cc", json!(["d@x.com", "c@x.com"]));
        let c = MailFragment::new("a@x.com").text("hello");
        assert!(a.is_equivalent(&b));
        assert!(!a.is_equivalent(&c));
    }
}
