use once_cell::sync::Lazy;
use regex::Regex;

static THINK_TAG_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<think>[\s\S]*?</think>|<think\s*/>").unwrap());

static REASONING_TAG_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<reasoning>[\s\S]*?</reasoning>").unwrap());

static SQL_FENCE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```sql\s*(.*?)```").unwrap());

static ANY_FENCE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)```").unwrap());

/// Cleans LLM response by removing reasoning tags and surrounding noise.
pub fn clean_llm_response(response: &str) -> String {
    let mut cleaned = response.to_string();
    cleaned = THINK_TAG_PATTERN.replace_all(&cleaned, "").to_string();
    cleaned = REASONING_TAG_PATTERN.replace_all(&cleaned, "").to_string();
    cleaned.trim().to_string()
}

/// Extract the JSON payload from a model response, tolerating code fences
/// and leading prose.
pub fn extract_json(response: &str) -> String {
    let cleaned = clean_llm_response(response);
    if let Some(caps) = ANY_FENCE_PATTERN.captures(&cleaned) {
        return caps[1].trim().to_string();
    }
    // Fall back to the outermost brace pair.
    if let (Some(start), Some(end)) = (cleaned.find('{'), cleaned.rfind('}')) {
        if start < end {
            return cleaned[start..=end].to_string();
        }
    }
    cleaned
}

/// Extract SQL text from a model response: prefer a ```sql fence, then any
/// fence, then the raw cleaned text.
pub fn extract_sql(response: &str) -> String {
    let cleaned = clean_llm_response(response);
    if let Some(caps) = SQL_FENCE_PATTERN.captures(&cleaned) {
        return caps[1].trim().to_string();
    }
    if let Some(caps) = ANY_FENCE_PATTERN.captures(&cleaned) {
        return caps[1].trim().to_string();
    }
    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_think_tags() {
        let input = "<think>Some reasoning here</think>The actual response";
        assert_eq!(clean_llm_response(input), "The actual response");
    }

    #[test]
    fn test_extract_sql_from_fence() {
        let input = "Here you go:\n```sql\nSELECT * FROM orders\n```\nDone.";
        assert_eq!(extract_sql(input), "SELECT * FROM orders");
    }

    #[test]
    fn test_extract_json_from_fence() {
        let input = "```json\n{\"a\": 1}\n```";
        assert_eq!(extract_json(input), "{\"a\": 1}");
    }

    #[test]
    fn test_extract_json_from_prose() {
        let input = "Sure thing. {\"a\": 1} Hope that helps.";
        assert_eq!(extract_json(input), "{\"a\": 1}");
    }
}
