//! Template rendering
//!
//! - `{{{name}}}`: 値をそのまま埋め込む（HTML エスケープなし）
//! - `{{name}}`: HTML タグを除去した値を埋め込む
//!
//! triple → double の 2 パス。値が無い / falsy な placeholder はそのまま残します。
//! 区切り記号の内側に空白 1 つまで許容します（`{{ name }}`）。

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::{Map, Value};

static TRIPLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{{3}\s?([a-zA-Z0-9\-_]+)\s?\}{3}").expect("valid regex"));

static DOUBLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{{2}\s?([a-zA-Z0-9\-_]+)\s?\}{2}").expect("valid regex"));

static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<.*?>").expect("valid regex"));

/// Minimal responsive HTML layout. `{{{html}}}` is the message body,
/// `{{subject}}` goes into the title.
pub const HTML_SHELL: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{{subject}}</title>
<style>
body{margin:0;padding:0;background:#f4f4f4;font-family:Helvetica,Arial,sans-serif;color:#222;}
.mailtime-wrap{max-width:600px;margin:0 auto;padding:24px;background:#fff;}
hr{border:0;border-top:1px solid #ddd;margin:24px 0;}
</style>
</head>
<body>
<div class="mailtime-wrap">{{{html}}}</div>
</body>
</html>"#;

pub fn render(template: &str, values: &Map<String, Value>) -> String {
    let raw = TRIPLE.replace_all(template, |caps: &Captures<'_>| {
        lookup(values, &caps[1]).unwrap_or_else(|| caps[0].to_string())
    });
    let stripped = DOUBLE.replace_all(&raw, |caps: &Captures<'_>| {
        lookup(values, &caps[1])
            .map(|value| strip_tags(&value).into_owned())
            .unwrap_or_else(|| caps[0].to_string())
    });
    stripped.into_owned()
}

pub fn strip_tags(input: &str) -> Cow<'_, str> {
    TAG.replace_all(input, "")
}

/// String form of a truthy value. `null`, `false`, `0`, `""`, lists and objects are `None`.
fn lookup(values: &Map<String, Value>, key: &str) -> Option<String> {
    match values.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) if n.as_f64() != Some(0.0) => Some(n.to_string()),
        Value::Bool(true) => Some("true".to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn values(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(map) => map,
            _ => unreachable!("test values must be an object"),
        }
    }

    #[rstest]
    #[case::raw("<p>{{{name}}}</p>", "<p><b>Rita</b></p>")]
    #[case::stripped("Hi {{name}}", "Hi Rita")]
    #[case::spaced("{{{ name }}} / {{ name }}", "<b>Rita</b> / Rita")]
    #[case::unknown_key_left_alone("{{missing}} {{{missing}}}", "{{missing}} {{{missing}}}")]
    #[case::number("{{count}} new", "3 new")]
    #[case::falsy_left_alone("{{empty}}{{zero}}{{off}}{{nothing}}", "{{empty}}{{zero}}{{off}}{{nothing}}")]
    fn renders_placeholders(#[case] template: &str, #[case] expected: &str) {
        let values = values(json!({
            "name": "<b>Rita</b>",
            "count": 3,
            "empty": "",
            "zero": 0,
            "off": false,
            "nothing": null,
        }));
        assert_eq!(render(template, &values), expected);
    }

    #[test]
    fn strips_multiline_tags() {
        assert_eq!(strip_tags("<a\nhref=\"x\">link</a>"), "link");
    }

    #[test]
    fn html_shell_wraps_body_and_subject() {
        let rendered = render(
            HTML_SHELL,
            &values(json!({"html": "<p>Hi</p>", "subject": "<i>Welcome</i>"})),
        );
        assert!(rendered.contains("<div class=\"mailtime-wrap\"><p>Hi</p></div>"));
        assert!(rendered.contains("<title>Welcome</title>"));
    }
}
