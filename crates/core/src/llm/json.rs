use anyhow::Context;
use serde::de::DeserializeOwned;

/// Pulls the first complete JSON object out of a model reply. Code fences are ignored and
/// braces inside string literals do not count toward nesting.
pub fn extract_json(text: &str) -> Option<String> {
    let body = strip_fence(text.trim());
    let start = body.find('{')?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in body[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    let end = start + offset + ch.len_utf8();
                    return Some(body[start..end].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

fn strip_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.rsplit_once("```").map_or(rest, |(inner, _)| inner)
}

/// Parses model output into `T`, tolerating code fences and surrounding prose.
pub fn parse_model_json<T: DeserializeOwned>(text: &str) -> anyhow::Result<T> {
    let candidate = extract_json(text).unwrap_or_else(|| text.trim().to_string());
    serde_json::from_str::<T>(&candidate).with_context(|| {
        let preview: String = candidate.chars().take(500).collect();
        format!("model output is not valid JSON: {preview}")
    })
}
