//! Coercion of untrusted JSON into typed field values.
//!
//! Every function here is total: when the candidate does not fit, the
//! caller-supplied fallback is returned. During bootstrap the fallback is the
//! schema default; during a live update it is the current canonical value.

use serde_json::Value;

/// Enumerations persisted as fixed string keys.
pub trait EnumKey: Copy {
    fn key(&self) -> &'static str;
}

pub fn normalize_bool(candidate: &Value, fallback: bool) -> bool {
    candidate.as_bool().unwrap_or(fallback)
}

pub fn normalize_string(candidate: &Value, fallback: &str) -> String {
    match candidate {
        Value::String(s) => s.clone(),
        _ => fallback.to_string(),
    }
}

pub fn normalize_enum<T: EnumKey>(candidate: &Value, fallback: T, allowed: &[T]) -> T {
    candidate
        .as_str()
        .and_then(|raw| allowed.iter().copied().find(|value| value.key() == raw))
        .unwrap_or(fallback)
}

/// Keeps string entries only, trimmed, with empty results dropped. A
/// non-array candidate yields the whole fallback, never a merge.
pub fn normalize_string_list(candidate: &Value, fallback: &[String]) -> Vec<String> {
    let Some(items) = candidate.as_array() else {
        return fallback.to_vec();
    };

    items
        .iter()
        .filter_map(Value::as_str)
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn normalize_nullable_finite_number(candidate: &Value, fallback: Option<f64>) -> Option<f64> {
    match candidate {
        Value::Null => None,
        Value::Number(n) => match n.as_f64() {
            Some(value) if value.is_finite() => Some(value),
            _ => fallback,
        },
        _ => fallback,
    }
}

/// Reduces what a user typed into a bare hostname: lowercased, without
/// scheme, leading `www.`, path, query or fragment. `None` when the rest is
/// not a dotted name made of ASCII letters, digits, dots and hyphens.
pub fn normalize_hostname(input: &str) -> Option<String> {
    let raw = input.trim().to_lowercase();
    let rest = raw
        .strip_prefix("https://")
        .or_else(|| raw.strip_prefix("http://"))
        .unwrap_or(&raw);
    let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host = host.strip_prefix("www.").unwrap_or(host);

    let valid = host.contains('.')
        && !host.starts_with('.')
        && !host.ends_with('.')
        && !host.contains("..")
        && host
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.' || c == '-');
    valid.then(|| host.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::InteractionLevel;
    use serde_json::json;

    #[test]
    fn booleans_must_be_exact() {
        assert!(!normalize_bool(&json!(false), true));
        assert!(normalize_bool(&json!("false"), true));
        assert!(normalize_bool(&json!(0), true));
        assert!(!normalize_bool(&Value::Null, false));
    }

    #[test]
    fn strings_pass_through_untrimmed() {
        assert_eq!(normalize_string(&json!("  task "), "x"), "  task ");
        assert_eq!(normalize_string(&json!(""), "x"), "");
        assert_eq!(normalize_string(&json!(42), "x"), "x");
    }

    #[test]
    fn enum_accepts_only_members() {
        let allowed = InteractionLevel::ALL;
        assert_eq!(
            normalize_enum(&json!("max"), InteractionLevel::Balanced, &allowed),
            InteractionLevel::Max
        );
        assert_eq!(
            normalize_enum(&json!("extreme"), InteractionLevel::Minimal, &allowed),
            InteractionLevel::Minimal
        );
        assert_eq!(
            normalize_enum(&json!("MAX"), InteractionLevel::Balanced, &allowed),
            InteractionLevel::Balanced
        );
    }

    #[test]
    fn string_list_filters_and_trims_in_order() {
        let fallback = vec!["keep.me".to_string()];
        let out = normalize_string_list(&json!(["  X.com ", "", 5, "Y.com", null, "   "]), &fallback);
        assert_eq!(out, vec!["X.com".to_string(), "Y.com".to_string()]);
    }

    #[test]
    fn string_list_uses_fallback_wholesale_for_non_arrays() {
        let fallback = vec!["a.com".to_string(), "b.com".to_string()];
        assert_eq!(normalize_string_list(&json!("a.com"), &fallback), fallback);
        assert_eq!(normalize_string_list(&json!({"0": "a"}), &fallback), fallback);
        assert!(normalize_string_list(&json!([]), &fallback).is_empty());
    }

    #[test]
    fn nullable_numbers() {
        assert_eq!(normalize_nullable_finite_number(&Value::Null, Some(3.0)), None);
        assert_eq!(normalize_nullable_finite_number(&json!(1000), None), Some(1000.0));
        assert_eq!(normalize_nullable_finite_number(&json!(-2.5), None), Some(-2.5));
        assert_eq!(normalize_nullable_finite_number(&json!("1000"), Some(7.0)), Some(7.0));
        assert_eq!(normalize_nullable_finite_number(&json!(true), None), None);
    }

    #[test]
    fn hostnames_are_reduced_to_bare_domains() {
        let cases = [
            ("facebook.com", Some("facebook.com")),
            ("  HTTPS://www.YouTube.com/watch?v=1 ", Some("youtube.com")),
            ("http://news.site#top", Some("news.site")),
            ("sub.example.co.uk/path", Some("sub.example.co.uk")),
            ("my-site.io?ref=x", Some("my-site.io")),
            ("ftp://example.com", None),
            ("localhost", None),
            ("", None),
            ("   ", None),
            ("exa mple.com", None),
            (".example.com", None),
            ("example.com.", None),
            ("example..com", None),
            ("ex_ample.com", None),
            ("www.", None),
        ];
        for (input, expected) in cases {
            assert_eq!(
                normalize_hostname(input).as_deref(),
                expected,
                "input: {input:?}"
            );
        }
    }
}
