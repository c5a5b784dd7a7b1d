//! Record headers → HTTP headers.
//!
//! Pipeline: include/exclude glob filter on the original name, canonical
//! text rendering of the value, name sanitisation, prefix, comma-merge on
//! collisions, then static headers (which win on conflict).

use regex::Regex;
use relay_common::{RecordHeader, RelayError, Result};
use relay_config::HeaderForwardConfig;

pub struct HeaderForwarder {
    enabled: bool,
    include: Vec<Regex>,
    exclude: Vec<Regex>,
    prefix: String,
    static_headers: Vec<(String, String)>,
}

impl HeaderForwarder {
    pub fn new(cfg: &HeaderForwardConfig) -> Result<Self> {
        Ok(Self {
            enabled: cfg.enabled,
            include: compile_globs(&cfg.include)?,
            exclude: compile_globs(&cfg.exclude)?,
            prefix: cfg.prefix.clone(),
            static_headers: cfg
                .static_headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        })
    }

    /// Produce the HTTP header list for one record, in arrival order.
    pub fn forward(&self, headers: &[RecordHeader]) -> Vec<(String, String)> {
        let mut out: Vec<(String, String)> = Vec::new();

        if self.enabled {
            for h in headers {
                if !self.include.is_empty() && !self.include.iter().any(|re| re.is_match(&h.name)) {
                    continue;
                }
                if self.exclude.iter().any(|re| re.is_match(&h.name)) {
                    continue;
                }
                // Null headers and undecodable bytes have no wire form.
                let Some(value) = h.value.as_text() else {
                    continue;
                };
                let name = format!("{}{}", self.prefix, sanitize_name(&h.name));
                match out
                    .iter_mut()
                    .find(|(existing, _)| existing.eq_ignore_ascii_case(&name))
                {
                    // HTTP list rule: repeated names concatenate with ','.
                    Some((_, existing)) => {
                        existing.push(',');
                        existing.push_str(&value);
                    }
                    None => out.push((name, value)),
                }
            }
        }

        for (name, value) in &self.static_headers {
            match out
                .iter_mut()
                .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            {
                Some(entry) => *entry = (name.clone(), value.clone()),
                None => out.push((name.clone(), value.clone())),
            }
        }

        out
    }
}

/// `*` matches any substring; everything else is literal.
fn compile_globs(globs: &[String]) -> Result<Vec<Regex>> {
    globs.iter().map(|g| glob_to_regex(g)).collect()
}

fn glob_to_regex(glob: &str) -> Result<Regex> {
    let mut pattern = String::with_capacity(glob.len() + 8);
    pattern.push('^');
    for ch in glob.chars() {
        if ch == '*' {
            pattern.push_str(".*");
        } else {
            pattern.push_str(&regex::escape(&ch.to_string()));
        }
    }
    pattern.push('$');
    Regex::new(&pattern)
        .map_err(|e| RelayError::Config(format!("invalid header glob {glob:?}: {e}")))
}

/// Emitted names contain only `[A-Za-z0-9._-]` and begin with a letter.
fn sanitize_name(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();
    if !out.chars().next().is_some_and(|c| c.is_ascii_alphabetic()) {
        out.insert_str(0, "X-");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_common::HeaderValue;
    use std::collections::BTreeMap;

    fn header(name: &str, value: &str) -> RecordHeader {
        RecordHeader::new(name, HeaderValue::Text(value.to_string()))
    }

    fn config() -> HeaderForwardConfig {
        HeaderForwardConfig::default()
    }

    fn forwarder(cfg: &HeaderForwardConfig) -> HeaderForwarder {
        HeaderForwarder::new(cfg).expect("globs compile")
    }

    #[test]
    fn passes_headers_through_in_arrival_order() {
        let f = forwarder(&config());
        let out = f.forward(&[header("b", "2"), header("a", "1")]);
        assert_eq!(out, vec![("b".into(), "2".into()), ("a".into(), "1".into())]);
    }

    #[test]
    fn include_globs_whitelist_by_original_name() {
        let mut cfg = config();
        cfg.include = vec!["trace-*".into(), "span_id".into()];
        let f = forwarder(&cfg);
        let out = f.forward(&[
            header("trace-id", "t1"),
            header("span_id", "s1"),
            header("other", "x"),
        ]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].0, "trace-id");
        assert_eq!(out[1].0, "span_id");
    }

    #[test]
    fn exclude_wins_within_the_include_set() {
        let mut cfg = config();
        cfg.include = vec!["trace-*".into()];
        cfg.exclude = vec!["*-secret".into()];
        let f = forwarder(&cfg);
        let out = f.forward(&[header("trace-id", "t"), header("trace-secret", "nope")]);
        assert_eq!(out, vec![("trace-id".into(), "t".into())]);
    }

    #[test]
    fn star_matches_any_substring_anywhere() {
        let mut cfg = config();
        cfg.include = vec!["*id*".into()];
        let f = forwarder(&cfg);
        let out = f.forward(&[header("id", "1"), header("trace-id-x", "2"), header("no", "3")]);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn names_are_sanitized_to_http_safe_characters() {
        let f = forwarder(&config());
        let out = f.forward(&[
            header("weird header!", "v"),
            header("9starts-with-digit", "v"),
            header("_underscore", "v"),
        ]);
        assert_eq!(out[0].0, "weird-header-");
        assert_eq!(out[1].0, "X-9starts-with-digit");
        assert_eq!(out[2].0, "X-_underscore");
        for (name, _) in &out {
            assert!(name.chars().next().unwrap().is_ascii_alphabetic());
            assert!(name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')));
        }
    }

    #[test]
    fn prefix_is_applied_after_sanitization() {
        let mut cfg = config();
        cfg.prefix = "fwd-".into();
        let f = forwarder(&cfg);
        let out = f.forward(&[header("user id", "7")]);
        assert_eq!(out, vec![("fwd-user-id".into(), "7".into())]);
    }

    #[test]
    fn collisions_concatenate_values_in_arrival_order() {
        let f = forwarder(&config());
        let out = f.forward(&[header("tag", "a"), header("Tag", "b"), header("tag", "c")]);
        assert_eq!(out, vec![("tag".into(), "a,b,c".into())]);
    }

    #[test]
    fn typed_values_render_canonically_and_nulls_are_skipped() {
        let f = forwarder(&config());
        let out = f.forward(&[
            RecordHeader::new("n", HeaderValue::Int(-3)),
            RecordHeader::new("f", HeaderValue::Bool(false)),
            RecordHeader::new("gone", HeaderValue::Null),
            RecordHeader::new("raw", HeaderValue::Bytes(vec![0xff, 0xfe])),
        ]);
        assert_eq!(out, vec![("n".into(), "-3".into()), ("f".into(), "false".into())]);
    }

    #[test]
    fn static_headers_merge_last_and_override() {
        let mut cfg = config();
        cfg.static_headers = BTreeMap::from([
            ("X-Source".to_string(), "relay".to_string()),
            ("tag".to_string(), "pinned".to_string()),
        ]);
        let f = forwarder(&cfg);
        let out = f.forward(&[header("tag", "record")]);
        assert!(out.contains(&("X-Source".into(), "relay".into())));
        // Static value replaced the record-supplied one.
        assert!(out.iter().any(|(n, v)| n == "tag" && v == "pinned"));
        assert_eq!(out.iter().filter(|(n, _)| n.eq_ignore_ascii_case("tag")).count(), 1);
    }

    #[test]
    fn disabled_forwarding_still_emits_statics() {
        let mut cfg = config();
        cfg.enabled = false;
        cfg.static_headers = BTreeMap::from([("X-Static".to_string(), "1".to_string())]);
        let f = forwarder(&cfg);
        let out = f.forward(&[header("dropped", "x")]);
        assert_eq!(out, vec![("X-Static".into(), "1".into())]);
    }
}
