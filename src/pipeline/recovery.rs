//! Recovery parser: pulls a JSON object out of free-form model output.
//!
//! Models wrap JSON in markdown fences, prepend chatter ("Sure! Here is…"),
//! leave trailing commas, or get cut off mid-string. The parser:
//! 1. takes the body of a fenced code block when it holds an object,
//!    falling back to the whole text
//! 2. strict-parses the span from the first `{` to the last `}`
//! 3. on failure, applies one best-effort repair pass and retries
//! 4. otherwise returns `ParseFailure`
//!
//! Pure string handling, deterministic, never panics on malformed input.

use serde_json::{Map, Value};

use crate::error::ParseFailure;

/// A parsed JSON object.
pub type JsonMap = Map<String, Value>;

/// Extract a JSON object from raw model output.
pub fn parse(raw_text: &str) -> Result<JsonMap, ParseFailure> {
    let text = raw_text.trim();
    match fenced_body(text) {
        // A fence that does not hold a parseable object is treated as prose.
        Some(body) => parse_fragment(body).or_else(|_| parse_fragment(text)),
        None => parse_fragment(text),
    }
}

fn parse_fragment(text: &str) -> Result<JsonMap, ParseFailure> {
    let Some(start) = text.find('{') else {
        return Err(ParseFailure::new("no JSON object found in output"));
    };

    // First `{` to last `}`; a cut-off object runs to the end of the text.
    let fragment = match text.rfind('}') {
        Some(end) if end > start => &text[start..=end],
        _ => &text[start..],
    };

    let strict_error = match serde_json::from_str::<Value>(fragment) {
        Ok(value) => return into_object(value),
        Err(e) => e,
    };

    let repaired = repair(fragment);
    if let Ok(value) = serde_json::from_str::<Value>(&repaired) {
        return into_object(value);
    }

    // Several objects in one reply: take the first complete one.
    let mut stream = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();
    if let Some(Ok(value @ Value::Object(_))) = stream.next() {
        return into_object(value);
    }

    Err(ParseFailure::new(format!(
        "invalid JSON after repair: {strict_error}"
    )))
}

fn into_object(value: Value) -> Result<JsonMap, ParseFailure> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(ParseFailure::new(format!(
            "top-level JSON value is not an object: {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Contents of the first fenced code block, if it holds a `{`.
fn fenced_body(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after_open = &text[open + 3..];
    // Skip an info string such as `json` up to the end of the fence line.
    let body_start = match after_open.find('\n') {
        Some(newline) if !after_open[..newline].contains('{') => newline + 1,
        _ => after_open
            .find(|c: char| !c.is_alphanumeric())
            .unwrap_or(after_open.len()),
    };
    let body = &after_open[body_start..];

    let body = match body.find("```") {
        Some(close) => body[..close].trim(),
        None => body.trim(),
    };
    body.contains('{').then_some(body)
}

/// One best-effort repair pass.
///
/// Removes trailing commas, escapes raw newlines inside strings, closes an
/// unterminated string, fills a dangling `"key":` with `null`, and closes any
/// brackets still open at the end.
fn repair(fragment: &str) -> String {
    let mut out = String::with_capacity(fragment.len() + 8);
    let mut closers: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for c in fragment.chars() {
        if in_string {
            if escaped {
                escaped = false;
                out.push(c);
            } else if c == '\\' {
                escaped = true;
                out.push(c);
            } else if c == '"' {
                in_string = false;
                out.push(c);
            } else if c == '\n' {
                out.push_str("\\n");
            } else if c != '\r' {
                out.push(c);
            }
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '{' => {
                closers.push('}');
                out.push(c);
            }
            '[' => {
                closers.push(']');
                out.push(c);
            }
            '}' | ']' => {
                strip_trailing_comma(&mut out);
                if closers.last() == Some(&c) {
                    closers.pop();
                }
                out.push(c);
            }
            _ => out.push(c),
        }
    }

    if escaped {
        out.pop();
    }
    if in_string {
        out.push('"');
    }

    strip_trailing_comma(&mut out);
    if out.trim_end().ends_with(':') {
        out.push_str(" null");
    }

    while let Some(closer) = closers.pop() {
        strip_trailing_comma(&mut out);
        out.push(closer);
    }

    out
}

fn strip_trailing_comma(out: &mut String) {
    let len = out.trim_end().len();
    if out[..len].ends_with(',') {
        out.truncate(len - 1);
    }
}
