use anyhow::{bail, Context};
use serde_json::Value;

pub fn extract_json(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.starts_with("```") {
        // Remove Markdown fences (```json ... ``` or ``` ... ```), including
        // the single-line form ```{...}```.
        let opened = &trimmed[3..];
        let mut inner = match opened.split_once('\n') {
            Some((_lang, rest)) => rest,
            None => opened.trim_start_matches(|c: char| c.is_ascii_alphabetic()),
        };
        if let Some(end) = inner.rfind("```") {
            inner = &inner[..end];
        }
        return Some(inner.trim().to_string());
    }

    // Best-effort extraction: outermost '{'..'}' or '['..']', whichever opens first.
    let start = trimmed.find(['{', '['])?;
    let close = if trimmed[start..].starts_with('{') { '}' } else { ']' };
    let end = trimmed.rfind(close)?;
    if end <= start {
        return None;
    }
    Some(trimmed[start..=end].trim().to_string())
}

/// Parses agent text into JSON, tolerating fences and surrounding prose.
pub fn parse_value(text: &str) -> anyhow::Result<Value> {
    let trimmed = text.trim();
    if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
        return Ok(v);
    }
    let json_str = extract_json(trimmed).unwrap_or_else(|| trimmed.to_string());
    serde_json::from_str::<Value>(&json_str)
        .with_context(|| format!("payload is not valid JSON: {json_str}"))
}

/// Flattens the accepted payload shapes into the list of items they carry.
///
/// `envelope_key` names the list field of the envelope object, e.g. `stocks`.
pub fn items(value: Value, envelope_key: &str) -> anyhow::Result<Vec<Value>> {
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => match map.remove(envelope_key) {
            Some(Value::Array(items)) => Ok(items),
            Some(Value::String(s)) => items(parse_value(&s)?, envelope_key),
            Some(other) => bail!("`{envelope_key}` must be a list (got {other})"),
            None => Ok(vec![Value::Object(map)]),
        },
        // Agents sometimes hand back JSON encoded as a JSON string.
        Value::String(s) => items(parse_value(&s)?, envelope_key),
        other => bail!("payload must be an object or a list (got {other})"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extract_json_handles_fenced_blocks() {
        let body = "{\"a\":1}";
        let fenced = format!("```json\n{body}\n```\n");
        assert_eq!(extract_json(&fenced), Some(body.to_string()));
    }

    #[test]
    fn extract_json_handles_single_line_fences() {
        assert_eq!(extract_json("```{\"a\":1}```"), Some("{\"a\":1}".to_string()));
        assert_eq!(
            extract_json("```json[{\"a\":1}]```"),
            Some("[{\"a\":1}]".to_string())
        );
        assert_eq!(parse_value("```{\"a\":1}```").unwrap(), json!({"a": 1}));
    }

    #[test]
    fn extract_json_falls_back_to_braces() {
        let s = "prefix {\"a\":1} suffix";
        assert_eq!(extract_json(s), Some("{\"a\":1}".to_string()));
    }

    #[test]
    fn extract_json_finds_bare_lists() {
        let s = "Here you go: [{\"a\":1}, {\"a\":2}] done";
        assert_eq!(extract_json(s), Some("[{\"a\":1}, {\"a\":2}]".to_string()));
    }

    #[test]
    fn items_unwraps_every_shape() {
        let one = json!({"stock_name": "ACME"});

        assert_eq!(items(json!({"stocks": [one.clone()]}), "stocks").unwrap(), vec![one.clone()]);
        assert_eq!(items(json!([one.clone()]), "stocks").unwrap(), vec![one.clone()]);
        assert_eq!(items(one.clone(), "stocks").unwrap(), vec![one.clone()]);

        let encoded = Value::String(json!({"stocks": [one.clone()]}).to_string());
        assert_eq!(items(encoded, "stocks").unwrap(), vec![one]);
    }

    #[test]
    fn items_rejects_scalars() {
        assert!(items(json!(42), "stocks").is_err());
        assert!(items(json!({"stocks": 42}), "stocks").is_err());
    }
}
