//! MailCompiler - task の fragment 群を 1 通の送信メッセージにまとめる
//!
//! # 手順
//! 1. transport の defaults から開始（後から来たものが勝つ shallow merge）
//! 2. fragment を保存順に処理: 本文を fragment 自身の値で render し、
//!    html は delimiter、text は `\r\n` で連結。本文以外のフィールドは merge
//! 3. html があれば外側 template（task の上書き → engine 既定）で render
//! 4. fragment が複数なら subject を concat subject で上書き
//! 5. `from` が無ければ FromResolver に問い合わせる

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::domain::{DeliveryError, MailMessage, MailTask};
use crate::ports::{FromResolver, Transport};

use super::template::render;

pub struct MailCompiler {
    template: String,
    delimiter: String,
    concat_subject: String,
    from: Option<Arc<dyn FromResolver>>,
}

impl MailCompiler {
    pub fn new(
        template: impl Into<String>,
        delimiter: impl Into<String>,
        concat_subject: impl Into<String>,
        from: Option<Arc<dyn FromResolver>>,
    ) -> Self {
        Self {
            template: template.into(),
            delimiter: delimiter.into(),
            concat_subject: concat_subject.into(),
            from,
        }
    }

    pub fn compile(&self, transport: &dyn Transport, task: &MailTask) -> Result<MailMessage, DeliveryError> {
        let mut message = transport.defaults().cloned().unwrap_or_default();
        message.remove("html");
        message.remove("text");

        let mut html = String::new();
        let mut text = String::new();

        for fragment in &task.fragments {
            let mut fields = fragment.to_map();

            if let Some(body) = non_empty(fragment.html.as_deref()) {
                if !html.is_empty() {
                    html.push_str(&render(&self.delimiter, &fields));
                }
                html.push_str(&render(body, &fields));
            }
            if let Some(body) = non_empty(fragment.text.as_deref()) {
                if !text.is_empty() {
                    text.push_str("\r\n");
                }
                text.push_str(&render(body, &fields));
            }

            fields.remove("html");
            fields.remove("text");
            message.extend(fields);
        }

        if !html.is_empty() {
            message.insert("html".to_string(), Value::String(html));
            let template = task.template.as_deref().unwrap_or(&self.template);
            if !template.is_empty() {
                let wrapped = render(template, &message);
                message.insert("html".to_string(), Value::String(wrapped));
            }
        }
        if !text.is_empty() {
            message.insert("text".to_string(), Value::String(text));
        }

        if task.fragments.len() > 1 {
            let subject = non_empty(task.concat_subject.as_deref())
                .or_else(|| non_empty(Some(&self.concat_subject)));
            if let Some(subject) = subject {
                message.insert("subject".to_string(), Value::String(subject.to_string()));
            }
        }

        if !has_sender(&message) {
            if let Some(from) = self.from.as_ref().and_then(|r| r.resolve(transport)) {
                message.insert("from".to_string(), Value::String(from));
            }
        }

        serde_json::from_value(Value::Object(message)).map_err(|e| DeliveryError::Compile(e.to_string()))
    }
}

impl fmt::Debug for MailCompiler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailCompiler")
            .field("template", &self.template)
            .field("delimiter", &self.delimiter)
            .field("concat_subject", &self.concat_subject)
            .field("from", &self.from.is_some())
            .finish()
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

fn has_sender(message: &Map<String, Value>) -> bool {
    match message.get("from") {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MailFragment, Recipient, TaskId};
    use crate::impls::RecordingTransport;
    use crate::ports::StaticFrom;
    use chrono::Utc;
    use serde_json::json;
    use ulid::Ulid;

    fn compiler(template: &str) -> MailCompiler {
        MailCompiler::new(template, "<hr>", "Multiple notifications", None)
    }

    fn task(fragments: Vec<MailFragment>) -> MailTask {
        let mut fragments = fragments.into_iter();
        let first = fragments.next().unwrap();
        let mut task = MailTask::new(TaskId::from_ulid(Ulid::new()), first, Utc::now());
        task.fragments.extend(fragments);
        task
    }

    #[test]
    fn single_fragment_renders_inner_then_outer_template() {
        let transport = RecordingTransport::new("smtp");
        let task = task(vec![
            MailFragment::new("a@x.com")
                .text("{{user}}, {{baseUrl}}")
                .html("<p>Hi {{user}}, {{{ baseUrl }}}</p>")
                .field("user", "John")
                .field("baseUrl", "<b>http://example.com</b>"),
        ]);

        let message = compiler("{{{html}}} {{baseUrl}}").compile(&transport, &task).unwrap();

        assert_eq!(
            message.html.as_deref(),
            Some("<p>Hi John, <b>http://example.com</b></p> http://example.com")
        );
        assert_eq!(message.text.as_deref(), Some("John, http://example.com"));
        assert_eq!(message.to, Recipient::from("a@x.com"));
        assert_eq!(message.extra.get("user"), Some(&json!("John")));
    }

    #[test]
    fn multiple_fragments_are_joined_and_get_the_concat_subject() {
        let transport = RecordingTransport::new("smtp");
        let task = task(vec![
            MailFragment::new("a@x.com").subject("one").text("first").html("<p>1</p>"),
            MailFragment::new("a@x.com").subject("two").text("second").html("<p>2</p>"),
        ]);

        let message = compiler("<body>{{{html}}}</body>").compile(&transport, &task).unwrap();

        assert_eq!(message.html.as_deref(), Some("<body><p>1</p><hr><p>2</p></body>"));
        assert_eq!(message.text.as_deref(), Some("first\r\nsecond"));
        assert_eq!(message.subject.as_deref(), Some("Multiple notifications"));
    }

    #[test]
    fn task_overrides_win_over_engine_defaults() {
        let transport = RecordingTransport::new("smtp");
        let mut task = task(vec![
            MailFragment::new("a@x.com").html("a"),
            MailFragment::new("a@x.com").html("b"),
        ]);
        task.template = Some("[{{{html}}}]".to_string());
        task.concat_subject = Some("Digest".to_string());

        let message = compiler("{{{html}}}").compile(&transport, &task).unwrap();

        assert_eq!(message.html.as_deref(), Some("[a<hr>b]"));
        assert_eq!(message.subject.as_deref(), Some("Digest"));
        assert_eq!(message.text, None);
    }

    #[test]
    fn transport_defaults_are_overridden_by_fragments() {
        let transport = RecordingTransport::new("smtp").with_defaults(
            json!({"from": "noreply@x.com", "replyTo": "support@x.com", "subject": "default"})
                .as_object()
                .cloned()
                .unwrap(),
        );
        let task = task(vec![MailFragment::new("a@x.com").subject("Hello").text("hi")]);

        let message = compiler("{{{html}}}").compile(&transport, &task).unwrap();

        assert_eq!(message.from.as_deref(), Some("noreply@x.com"));
        assert_eq!(message.subject.as_deref(), Some("Hello"));
        assert_eq!(message.extra.get("replyTo"), Some(&json!("support@x.com")));
    }

    #[test]
    fn missing_sender_is_resolved_from_the_transport() {
        let transport = RecordingTransport::new("smtp");
        let task = task(vec![MailFragment::new("a@x.com").text("hi")]);

        let resolver = |t: &dyn Transport| Some(format!("{}@x.com", t.name()));
        let compiler = MailCompiler::new("{{{html}}}", "<hr>", "", Some(Arc::new(resolver)));
        let message = compiler.compile(&transport, &task).unwrap();
        assert_eq!(message.from.as_deref(), Some("smtp@x.com"));

        let explicit = task_with_sender();
        let compiler = MailCompiler::new("{{{html}}}", "<hr>", "", Some(Arc::new(StaticFrom("x@x.com".into()))));
        let message = compiler.compile(&transport, &explicit).unwrap();
        assert_eq!(message.from.as_deref(), Some("me@x.com"));
    }

    fn task_with_sender() -> MailTask {
        task(vec![MailFragment::new("a@x.com").sender("me@x.com").text("hi")])
    }

    #[test]
    fn malformed_fields_are_a_compile_error() {
        let transport = RecordingTransport::new("smtp");
        let task = task(vec![MailFragment::new("a@x.com").text("hi").field("from", json!(42))]);

        let err = compiler("{{{html}}}").compile(&transport, &task).unwrap_err();
        assert!(matches!(err, DeliveryError::Compile(_)));
    }
}
