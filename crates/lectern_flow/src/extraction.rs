//! Pull structured data out of model text.
//!
//! Models asked for JSON often wrap it in a markdown fence or surround it
//! with prose. Extraction tries, in order: the whole response, a fenced
//! code block, then the first balanced object or array.

use lectern_error::JsonError;
use serde_json::Value;

/// Extract a JSON value from a model response.
///
/// # Examples
///
/// ```
/// use lectern_flow::extract_json;
///
/// let response = "Here you go:\n```json\n{\"points\": [\"ratios\"]}\n```\nAnything else?";
/// let value = extract_json(response).unwrap();
/// assert_eq!(value["points"][0], "ratios");
/// ```
pub fn extract_json(response: &str) -> Result<Value, JsonError> {
    let trimmed = response.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    let candidates = [
        extract_from_code_block(trimmed, "json"),
        extract_from_code_block(trimmed, ""),
        first_balanced(trimmed),
    ];
    for candidate in candidates.into_iter().flatten() {
        if let Ok(value) = serde_json::from_str(&candidate) {
            return Ok(value);
        }
    }

    tracing::debug!(response_length = response.len(), "No JSON found in model response");
    Err(JsonError::new(format!(
        "No JSON found in response (length: {})",
        response.len()
    )))
}

/// Content of the first fenced block tagged `language` (any block when empty).
fn extract_from_code_block(response: &str, language: &str) -> Option<String> {
    let fence = format!("```{}", language);
    let start = response.find(&fence)? + fence.len();
    // Skip the rest of the opening line (language tag or nothing).
    let body_start = response[start..]
        .find('\n')
        .map(|n| start + n + 1)
        .unwrap_or(start);
    let body = &response[body_start..];
    let content = match body.find("```") {
        Some(end) => &body[..end],
        // Truncated response: take everything after the fence.
        None => body,
    };
    Some(content.trim().to_string())
}

/// The earliest balanced `{...}` or `[...]` span.
fn first_balanced(response: &str) -> Option<String> {
    let object = response.find('{');
    let array = response.find('[');
    match (object, array) {
        (Some(o), Some(a)) if a < o => {
            extract_balanced(response, '[', ']').or_else(|| extract_balanced(response, '{', '}'))
        }
        (None, Some(_)) => extract_balanced(response, '[', ']'),
        _ => extract_balanced(response, '{', '}').or_else(|| extract_balanced(response, '[', ']')),
    }
}

fn extract_balanced(response: &str, open: char, close: char) -> Option<String> {
    let start = response.find(open)?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in response[start..].char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            c if c == open && !in_string => depth += 1,
            c if c == close && !in_string => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(response[start..start + i + ch.len_utf8()].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bare_json_parses_directly() {
        assert_eq!(extract_json(" [1, 2] ").unwrap(), json!([1, 2]));
    }

    #[test]
    fn test_untagged_fence_is_accepted() {
        let text = "```\n{\"a\": 1}\n```";
        assert_eq!(extract_json(text).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_braces_inside_strings_do_not_close_the_object() {
        let text = "Result: {\"note\": \"use } carefully\", \"n\": 2} done";
        assert_eq!(
            extract_json(text).unwrap(),
            json!({"note": "use } carefully", "n": 2})
        );
    }

    #[test]
    fn test_array_before_object_wins() {
        let text = "items [{\"id\": 1}, {\"id\": 2}] trailing {\"x\": 0}";
        assert_eq!(extract_json(text).unwrap(), json!([{"id": 1}, {"id": 2}]));
    }

    #[test]
    fn test_prose_without_json_is_an_error() {
        assert!(extract_json("I could not produce the quiz.").is_err());
    }
}
