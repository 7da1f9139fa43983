//! Robust JSON extraction from AI completions.
//!
//! Models wrap JSON in markdown fences, prose, or both. Three strategies run
//! in order: a ```json fence, any ``` fence opening on a brace, then a
//! brace-depth scan from the first `{`. No regex involved.

use serde_json::Value;

pub fn try_parse_json(content: &str) -> Option<Value> {
    let content = content.trim();
    if content.is_empty() {
        return None;
    }

    if let Some(parsed) = parse_json_fence(content) {
        return Some(parsed);
    }
    if let Some(parsed) = parse_any_fence(content) {
        return Some(parsed);
    }
    parse_brace_scan(content)
}

/// Strategy 1: the inside of a ```json ... ``` block, taken greedily to the
/// last closing fence.
fn parse_json_fence(content: &str) -> Option<Value> {
    let start_tag = content.find("```json")?;
    let inner_start = start_tag + "```json".len();
    let rest = &content[inner_start..];
    let inner_end = rest.rfind("```")?;
    serde_json::from_str(rest[..inner_end].trim()).ok()
}

/// Strategy 2: any fenced block whose content begins with `{`.
fn parse_any_fence(content: &str) -> Option<Value> {
    let mut search_from = 0;
    while let Some(offset) = content[search_from..].find("```") {
        let open = search_from + offset + 3;
        // Skip a language tag on the opening fence line.
        let body_start = content[open..]
            .find('\n')
            .map(|i| open + i + 1)
            .unwrap_or(open);
        let close = content[body_start..].find("```")?;
        let inner = content[body_start..body_start + close].trim();
        if inner.starts_with('{') {
            if let Ok(parsed) = serde_json::from_str(inner) {
                return Some(parsed);
            }
        }
        search_from = body_start + close + 3;
    }
    None
}

/// Strategy 3: walk from the first `{`, balancing brace depth (string-aware),
/// and parse the spanned substring once depth returns to zero.
fn parse_brace_scan(content: &str) -> Option<Value> {
    let first = content.find('{')?;
    let bytes = content.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(first) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return serde_json::from_str(&content[first..=i]).ok();
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
    fn parses_json_fence() {
        let content = "Here is my verdict:\n```json\n{\"decisao\": \"APROVAR\", \"nota_final\": 8.5}\n```\nDone.";
        let parsed = try_parse_json(content).unwrap();
        assert_eq!(parsed["decisao"], "APROVAR");
        assert_eq!(parsed["nota_final"], 8.5);
    }

    #[test]
    fn parses_plain_fence_starting_with_brace() {
        let content = "```\n{\"nota\": 7}\n```";
        let parsed = try_parse_json(content).unwrap();
        assert_eq!(parsed["nota"], 7);
    }

    #[test]
    fn skips_non_json_fence_and_falls_through() {
        let content = "```python\nprint('hi')\n```\nThe result is {\"ok\": true} as requested.";
        let parsed = try_parse_json(content).unwrap();
        assert_eq!(parsed["ok"], true);
    }

    #[test]
    fn brace_scan_handles_nesting() {
        let content = "prefix {\"a\": {\"b\": [1, 2, {\"c\": 3}]}} suffix";
        let parsed = try_parse_json(content).unwrap();
        assert_eq!(parsed["a"]["b"][2]["c"], 3);
    }

    #[test]
    fn brace_scan_ignores_braces_inside_strings() {
        let content = "x {\"msg\": \"a { tricky } string\", \"n\": 1} y";
        let parsed = try_parse_json(content).unwrap();
        assert_eq!(parsed["n"], 1);
    }

    #[test]
    fn raw_json_parses() {
        let parsed = try_parse_json("{\"impact\": \"negative\"}").unwrap();
        assert_eq!(parsed["impact"], "negative");
    }

    #[test]
    fn garbage_returns_none() {
        assert!(try_parse_json("").is_none());
        assert!(try_parse_json("no json here").is_none());
        assert!(try_parse_json("{broken").is_none());
    }
}
