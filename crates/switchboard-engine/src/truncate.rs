/// Shorten a string for log output without splitting a UTF-8 character.
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... ({} bytes)", &s[..end], s.len())
}

/// Compact JSON rendering of a value, truncated for logs.
pub fn json_for_log(value: &serde_json::Value, max: usize) -> String {
    truncate_for_log(&value.to_string(), max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_strings_untouched() {
        assert_eq!(truncate_for_log("hello", 10), "hello");
    }

    #[test]
    fn long_strings_cut() {
        let out = truncate_for_log("abcdefghij", 4);
        assert_eq!(out, "abcd... (10 bytes)");
    }

    #[test]
    fn respects_char_boundaries() {
        let s = "天气晴朗";
        let out = truncate_for_log(s, 4);
        assert!(out.starts_with("天"));
    }

    #[test]
    fn json_values() {
        let v = serde_json::json!({"city_code": "110000"});
        assert_eq!(json_for_log(&v, 100), r#"{"city_code":"110000"}"#);
    }
}
