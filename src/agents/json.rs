//! 智能体回复的宽松 JSON 解码
//!
//! 模型回复常被 markdown 代码块包裹，夹带 `//`、`/* */` 注释或尾随逗号。
//! 解码步骤：去代码块 → 去注释 → 截取最外层对象 → 去尾随逗号 → serde_json 解析。
//! 失败不抛给调用方，而是返回带原因的 Fallback，由各智能体提供兜底值。

use serde::de::DeserializeOwned;
use serde_json::Value;

/// 解码结果：解析成功或使用兜底值
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded<T> {
    Parsed(T),
    Fallback { value: T, reason: String },
}

impl<T> Decoded<T> {
    pub fn value(&self) -> &T {
        match self {
            Decoded::Parsed(v) => v,
            Decoded::Fallback { value, .. } => value,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Decoded::Parsed(v) => v,
            Decoded::Fallback { value, .. } => value,
        }
    }

    pub fn fallback_reason(&self) -> Option<&str> {
        match self {
            Decoded::Parsed(_) => None,
            Decoded::Fallback { reason, .. } => Some(reason),
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Decoded::Fallback { .. })
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Decoded<U> {
        match self {
            Decoded::Parsed(v) => Decoded::Parsed(f(v)),
            Decoded::Fallback { value, reason } => Decoded::Fallback {
                value: f(value),
                reason,
            },
        }
    }
}

/// 从模型回复中提取 JSON 值
pub fn extract_json(raw: &str) -> Result<Value, String> {
    let body = strip_fence(raw);
    let body = strip_comments(body);
    let body = isolate_object(&body);
    let body = strip_trailing_commas(body);
    if body.trim().is_empty() {
        return Err("response contains no JSON".to_string());
    }
    serde_json::from_str(&body).map_err(|e| format!("invalid JSON: {}", e))
}

/// 解码为 T；失败时返回 fallback() 与原因
pub fn decode_or<T, F>(raw: &str, fallback: F) -> Decoded<T>
where
    T: DeserializeOwned,
    F: FnOnce() -> T,
{
    let reason = match extract_json(raw) {
        Ok(value) => match serde_json::from_value::<T>(value) {
            Ok(parsed) => return Decoded::Parsed(parsed),
            Err(e) => format!("unexpected JSON shape: {}", e),
        },
        Err(e) => e,
    };
    Decoded::Fallback {
        value: fallback(),
        reason,
    }
}

/// 去掉 ```lang ... ``` 包裹；没有代码块时原样返回
fn strip_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(open) = trimmed.find("```") else {
        return trimmed;
    };
    let after_open = &trimmed[open + 3..];
    // 只跳过紧跟的语言标记；单行代码块的内容与标记同处一行
    let tag_len = after_open
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'))
        .unwrap_or(after_open.len());
    let body = &after_open[tag_len..];
    match body.find("```") {
        Some(close) => body[..close].trim(),
        None => body.trim(),
    }
}

fn strip_comments(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            i += 1;
            continue;
        }
        match (c, chars.get(i + 1)) {
            ('"', _) => {
                in_string = true;
                out.push(c);
                i += 1;
            }
            ('/', Some('/')) => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            ('/', Some('*')) => {
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    i += 1;
                }
                i = (i + 2).min(chars.len());
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}

/// 回复前后夹带说明文字时，只保留第一个 `{` 到最后一个 `}`
fn isolate_object(text: &str) -> &str {
    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => text.trim(),
    }
}

fn strip_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            out.push(c);
            continue;
        }
        if c == '"' {
            in_string = true;
        } else if c == ',' {
            let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[test]
    fn test_plain_object() {
        assert_eq!(extract_json(r#"{"a": 1}"#).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_fenced_with_language_tag_and_prose() {
        let raw = "Sure, here is the result:\n```json\n{\"tables\": [\"Artist\"]}\n```\nLet me know.";
        assert_eq!(extract_json(raw).unwrap(), json!({"tables": ["Artist"]}));
    }

    #[test]
    fn test_single_line_fence_keeps_body() {
        assert_eq!(
            extract_json("```json {\"is_valid\": false}```").unwrap(),
            json!({"is_valid": false})
        );
        assert_eq!(
            extract_json("```{\"is_valid\": false}```").unwrap(),
            json!({"is_valid": false})
        );
    }

    #[test]
    fn test_comments_and_trailing_commas() {
        let raw = r#"{
            // relevant tables
            "tables": ["Album", "Artist",],
            /* join key */
            "relationships": [{"from": "Album.ArtistId", "to": "Artist.ArtistId"},],
        }"#;
        let value = extract_json(raw).unwrap();
        assert_eq!(value["tables"], json!(["Album", "Artist"]));
        assert_eq!(value["relationships"][0]["to"], json!("Artist.ArtistId"));
    }

    #[test]
    fn test_string_contents_untouched() {
        let raw = r#"{"url": "http://example.com/a", "note": "a, }", "c": "/* x */"}"#;
        let value = extract_json(raw).unwrap();
        assert_eq!(value["url"], json!("http://example.com/a"));
        assert_eq!(value["note"], json!("a, }"));
        assert_eq!(value["c"], json!("/* x */"));
    }

    #[test]
    fn test_escaped_quote_in_string() {
        let raw = r#"{"sql": "SELECT \"Name\" FROM Artist", "n": 1,}"#;
        let value = extract_json(raw).unwrap();
        assert_eq!(value["sql"], json!("SELECT \"Name\" FROM Artist"));
    }

    #[test]
    fn test_garbage_is_error() {
        assert!(extract_json("I cannot answer that.").is_err());
        assert!(extract_json("").is_err());
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Verdict {
        ok: bool,
    }

    #[test]
    fn test_decode_or_fallback_carries_reason() {
        let decoded = decode_or("not json", || Verdict { ok: true });
        assert!(decoded.is_fallback());
        assert!(decoded.fallback_reason().is_some());
        assert_eq!(decoded.into_value(), Verdict { ok: true });

        let decoded = decode_or(r#"{"ok": false}"#, || Verdict { ok: true });
        assert_eq!(decoded, Decoded::Parsed(Verdict { ok: false }));
    }

    #[test]
    fn test_decode_or_wrong_shape_falls_back() {
        let decoded = decode_or(r#"{"ok": "maybe"}"#, || Verdict { ok: true });
        assert!(decoded
            .fallback_reason()
            .is_some_and(|r| r.contains("unexpected JSON shape")));
    }
}
