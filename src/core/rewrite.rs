use std::borrow::Cow;

use http::{HeaderMap, HeaderValue};
use regex::Regex;

/// Replaces word-bounded occurrences of one hostname with another.
///
/// A candidate is skipped when the character right before it is `.` or `-`,
/// so `sub.example.com` and `my-example.com` are never treated as
/// `example.com`. The same rewriter is used in both directions: client
/// hostname to upstream on requests, upstream back to client on responses.
#[derive(Debug, Clone)]
pub struct HostRewriter {
    from: String,
    to: String,
    pattern: Regex,
}

impl HostRewriter {
    /// Rewrites every standalone occurrence of `from`.
    pub fn new(from: &str, to: &str) -> Result<Self, regex::Error> {
        Self::build(from, to, None)
    }

    /// Rewrites `from` only where it is immediately followed by a match of
    /// `suffix_pattern`. The suffix itself is kept verbatim.
    pub fn scoped(from: &str, to: &str, suffix_pattern: &str) -> Result<Self, regex::Error> {
        Self::build(from, to, Some(suffix_pattern))
    }

    fn build(from: &str, to: &str, suffix_pattern: Option<&str>) -> Result<Self, regex::Error> {
        // ASCII word boundaries: a non-ASCII letter next to the host does not join it.
        let host = format!(r"(?-u:\b){}(?-u:\b)", regex::escape(from));
        let pattern = match suffix_pattern {
            Some(suffix) => Regex::new(&format!("{host}(?:{suffix})"))?,
            None => Regex::new(&host)?,
        };
        Ok(Self {
            from: from.to_string(),
            to: to.to_string(),
            pattern,
        })
    }

    pub fn rewrite<'a>(&self, text: &'a str) -> Cow<'a, str> {
        if self.from.is_empty() || !text.contains(self.from.as_str()) {
            return Cow::Borrowed(text);
        }

        let mut out = String::new();
        let mut copied_up_to = 0;
        let mut search_from = 0;

        while search_from <= text.len() {
            let Some(m) = self.pattern.find_at(text, search_from) else {
                break;
            };
            if is_label_continuation(&text[..m.start()]) {
                // Behave like a lookbehind: retry one character further on.
                search_from = m.start()
                    + text[m.start()..]
                        .chars()
                        .next()
                        .map_or(1, char::len_utf8);
                continue;
            }
            out.push_str(&text[copied_up_to..m.start()]);
            out.push_str(&self.to);
            copied_up_to = m.start() + self.from.len();
            search_from = m.end();
        }

        if copied_up_to == 0 {
            return Cow::Borrowed(text);
        }
        out.push_str(&text[copied_up_to..]);
        Cow::Owned(out)
    }

    /// Returns a fresh map with every textual value rewritten. Repeated
    /// headers keep all of their values; non-UTF-8 values are copied as-is.
    pub fn rewrite_headers(&self, headers: &HeaderMap) -> HeaderMap {
        let mut rewritten = HeaderMap::with_capacity(headers.len());
        for (name, value) in headers {
            rewritten.append(name.clone(), self.rewrite_value(value));
        }
        rewritten
    }

    fn rewrite_value(&self, value: &HeaderValue) -> HeaderValue {
        let Ok(text) = value.to_str() else {
            return value.clone();
        };
        match self.rewrite(text) {
            Cow::Borrowed(_) => value.clone(),
            Cow::Owned(new_text) => HeaderValue::from_str(&new_text).unwrap_or_else(|_| {
                tracing::debug!(value = %new_text, "Rewritten header value is not valid, keeping original");
                value.clone()
            }),
        }
    }
}

fn is_label_continuation(before: &str) -> bool {
    matches!(before.chars().next_back(), Some('.') | Some('-'))
}
