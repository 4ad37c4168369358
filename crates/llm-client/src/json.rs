use agent_core::{AgentError, AgentResult};

/// Pull the JSON payload out of a chat response.
///
/// Models wrap JSON in code fences or surround it with prose; this strips
/// both and returns the outermost object or array as a string. Fails with
/// `LlmFatal` when no parseable JSON remains.
pub fn extract_json(content: &str) -> AgentResult<String> {
    let trimmed = strip_code_fences(content);

    // Fast path: the whole thing already parses.
    if serde_json::from_str::<serde_json::Value>(trimmed).is_ok() {
        return Ok(trimmed.to_string());
    }

    // Otherwise locate the outermost JSON object/array inside the prose.
    for (open, close) in [('{', '}'), ('[', ']')] {
        if let Some(start) = trimmed.find(open) {
            if let Some(end) = find_matching(trimmed, start, open, close) {
                let candidate = &trimmed[start..=end];
                if serde_json::from_str::<serde_json::Value>(candidate).is_ok() {
                    return Ok(candidate.to_string());
                }
            }
        }
    }

    Err(AgentError::LlmFatal(format!(
        "response contains no parseable JSON: {}",
        content.chars().take(200).collect::<String>()
    )))
}

fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        // Drop the language tag line (e.g. ```json)
        let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or(rest);
        if let Some(end) = body.rfind("```") {
            return body[..end].trim();
        }
        return body.trim();
    }
    trimmed
}

fn find_matching(text: &str, start: usize, open: char, close: char) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text.char_indices().skip_while(|(i, _)| *i < start) {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            c if c == open && !in_string => depth += 1,
            c if c == close && !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
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

    #[test]
    fn plain_json_passes_through() {
        let out = extract_json(r#"{"a": 1}"#).unwrap();
        assert_eq!(out, r#"{"a": 1}"#);
    }

    #[test]
    fn strips_fences_with_language_tag() {
        let out = extract_json("```json\n{\"conviction\": 0.8}\n```").unwrap();
        assert_eq!(out, r#"{"conviction": 0.8}"#);
    }

    #[test]
    fn strips_surrounding_prose() {
        let out =
            extract_json("Here are the questions:\n[{\"q\": \"why?\"}]\nLet me know!").unwrap();
        assert_eq!(out, r#"[{"q": "why?"}]"#);
    }

    #[test]
    fn braces_inside_strings_do_not_confuse_matching() {
        let out = extract_json(r#"note {"text": "a { b } c", "n": 2} end"#).unwrap();
        assert_eq!(out, r#"{"text": "a { b } c", "n": 2}"#);
    }

    #[test]
    fn garbage_is_fatal() {
        let err = extract_json("no json here at all").unwrap_err();
        assert_eq!(err.error_kind(), "llm_fatal");
    }
}
