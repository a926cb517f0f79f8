//! Provider envelope unwrapping.

use super::extract::balanced_fragment;
use serde_json::Value;

/// What one envelope yielded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Unwrapped {
    /// The generated text, once unwrapped.
    pub payload: String,
    /// The provider's completion flag, when present.
    pub done: Option<bool>,
    /// A JSON fragment found inside the `response` field.
    pub nested: Option<String>,
    /// A known payload field was present.
    pub envelope: bool,
}

impl Unwrapped {
    /// Best text for the caller: a nested fragment, else the payload.
    pub fn best(&self) -> &str {
        self.nested.as_deref().unwrap_or(&self.payload)
    }

    /// The provider is still generating and nothing usable arrived yet.
    ///
    /// Only an explicit `done: false` counts; an empty payload with
    /// `done: true` or no flag at all is final.
    pub fn is_incomplete(&self) -> bool {
        self.done == Some(false) && is_near_empty(&self.payload)
    }
}

/// Fewer than this many characters after stripping whitespace and fences.
const MIN_PAYLOAD_CHARS: usize = 5;

fn is_near_empty(payload: &str) -> bool {
    let stripped: String = payload
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '`')
        .collect();
    stripped.chars().count() < MIN_PAYLOAD_CHARS || stripped.eq_ignore_ascii_case("json")
}

/// Interpret one JSON fragment as a provider envelope.
///
/// A top-level array is the payload itself. Otherwise the known payload
/// fields are probed in order: `results[0].content`, `response`, `content`,
/// `outputs`, then OpenAI-style `choices[0]`. The first non-empty one wins.
/// If a known field exists but every one is empty the payload is empty; if
/// none exists the whole value is re-serialized.
pub fn unwrap_envelope(fragment: &str) -> Result<Unwrapped, serde_json::Error> {
    let value: Value = serde_json::from_str(fragment)?;

    if value.is_array() {
        return Ok(Unwrapped {
            payload: serde_json::to_string(&value)?,
            ..Default::default()
        });
    }

    let done = value.get("done").and_then(Value::as_bool);
    let mut known_field = false;

    if let Some(content) = value.pointer("/results/0/content") {
        known_field = true;
        let text = text_of(content);
        if !text.trim().is_empty() {
            return Ok(Unwrapped {
                payload: text,
                done,
                nested: None,
                envelope: true,
            });
        }
    }

    if let Some(response) = value.get("response") {
        known_field = true;
        let text = text_of(response);
        if !text.trim().is_empty() {
            let nested = balanced_fragment(&text).map(str::to_string);
            return Ok(Unwrapped {
                payload: text,
                done,
                nested,
                envelope: true,
            });
        }
    }

    let probes = [
        value.get("content"),
        value.get("outputs"),
        value.pointer("/choices/0/message/content"),
        value.pointer("/choices/0/text"),
    ];
    for probe in probes.into_iter().flatten() {
        known_field = true;
        let text = text_of(probe);
        if !text.trim().is_empty() {
            return Ok(Unwrapped {
                payload: text,
                done,
                nested: None,
                envelope: true,
            });
        }
    }

    let payload = if known_field {
        String::new()
    } else {
        serde_json::to_string(&value)?
    };
    Ok(Unwrapped {
        payload,
        done,
        nested: None,
        envelope: known_field,
    })
}

/// Flatten a payload field to text. Arrays are treated as lists of text
/// fragments (strings or `{text}` / `{content}` objects) and concatenated.
fn text_of(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(fragment_text).collect(),
        Value::Object(map) => match map.get("text").or_else(|| map.get("content")) {
            Some(inner) => text_of(inner),
            None => value.to_string(),
        },
        other => other.to_string(),
    }
}

fn fragment_text(item: &Value) -> String {
    match item {
        Value::String(s) => s.clone(),
        Value::Object(map) => map
            .get("text")
            .or_else(|| map.get("content"))
            .map(text_of)
            .unwrap_or_default(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_array_is_the_payload() {
        let u = unwrap_envelope(r#"[ {"type": "done"} ]"#).unwrap();
        assert_eq!(u.payload, r#"[{"type":"done"}]"#);
        assert_eq!(u.done, None);
        assert_eq!(u.best(), r#"[{"type":"done"}]"#);
    }

    #[test]
    fn test_response_field_with_nested_json() {
        let u = unwrap_envelope(
            r#"{"response":"```json\n[{\"type\":\"click\",\"selector\":\"a\"}]\n```","done":true}"#,
        )
        .unwrap();
        assert_eq!(u.done, Some(true));
        assert!(u.payload.starts_with("```json"));
        assert_eq!(
            u.nested.as_deref(),
            Some(r#"[{"type":"click","selector":"a"}]"#)
        );
        assert_eq!(u.best(), r#"[{"type":"click","selector":"a"}]"#);
    }

    #[test]
    fn test_response_plain_text_has_no_nested() {
        let u = unwrap_envelope(r#"{"response":"All done.","done":true}"#).unwrap();
        assert_eq!(u.payload, "All done.");
        assert!(u.nested.is_none());
        assert_eq!(u.best(), "All done.");
    }

    #[test]
    fn test_results_content_fragments_concatenated() {
        let u = unwrap_envelope(
            r#"{"results":[{"content":["[{\"type\":", "\"done\"}]"]}]}"#,
        )
        .unwrap();
        assert_eq!(u.payload, r#"[{"type":"done"}]"#);
    }

    #[test]
    fn test_results_take_priority_over_response() {
        let u = unwrap_envelope(r#"{"results":[{"content":["A"]}],"response":"B"}"#).unwrap();
        assert_eq!(u.payload, "A");
    }

    #[test]
    fn test_empty_response_falls_through_to_content() {
        let u = unwrap_envelope(r#"{"response":"","content":"[]"}"#).unwrap();
        assert_eq!(u.payload, "[]");
    }

    #[test]
    fn test_content_blocks() {
        let u = unwrap_envelope(r#"{"content":[{"type":"text","text":"hello "},{"type":"text","text":"world"}]}"#)
            .unwrap();
        assert_eq!(u.payload, "hello world");
    }

    #[test]
    fn test_outputs_fragments() {
        let u = unwrap_envelope(r#"{"outputs":["[", "]"]}"#).unwrap();
        assert_eq!(u.payload, "[]");
    }

    #[test]
    fn test_openai_choices() {
        let u = unwrap_envelope(r#"{"choices":[{"message":{"role":"assistant","content":"[]"}}]}"#)
            .unwrap();
        assert_eq!(u.payload, "[]");
    }

    #[test]
    fn test_known_but_empty_field_is_empty_payload() {
        let u = unwrap_envelope(r#"{"response":"","done":false}"#).unwrap();
        assert_eq!(u.payload, "");
        assert_eq!(u.done, Some(false));
        assert!(u.is_incomplete());
    }

    #[test]
    fn test_unknown_shape_is_reserialized() {
        let u = unwrap_envelope(r#"{"type": "done"}"#).unwrap();
        assert_eq!(u.payload, r#"{"type":"done"}"#);
    }

    #[test]
    fn test_parse_failure_propagates() {
        assert!(unwrap_envelope("{not json}").is_err());
    }

    #[test]
    fn test_incomplete_requires_explicit_false() {
        let finished = unwrap_envelope(r#"{"response":"","done":true}"#).unwrap();
        assert!(!finished.is_incomplete());

        let no_flag = unwrap_envelope(r#"{"response":""}"#).unwrap();
        assert!(!no_flag.is_incomplete());
    }

    #[test]
    fn test_fence_only_payload_is_near_empty() {
        let u = unwrap_envelope(r#"{"response":"```json\n```","done":false}"#).unwrap();
        assert!(u.is_incomplete());

        let short = unwrap_envelope(r#"{"response":" [ ] ","done":false}"#).unwrap();
        assert!(short.is_incomplete());
    }

    #[test]
    fn test_substantial_payload_is_complete_even_when_not_done() {
        let u = unwrap_envelope(r#"{"response":"[{\"type\":\"done\"}]","done":false}"#).unwrap();
        assert!(!u.is_incomplete());
    }
}
