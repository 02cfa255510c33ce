//! Tokenizing and URL normalization shared by the store and the ranker.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\p{L}\p{N}]+").expect("static token regex"));

/// Words that carry no topical signal.
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "com", "for", "from", "get", "html", "http",
    "https", "in", "is", "it", "of", "on", "or", "org", "the", "to", "with", "www",
];

/// Lowercase letter/digit runs of `text` in any script, minus stopwords and
/// single characters.
pub fn tokenize(text: &str) -> BTreeSet<String> {
    let lowered = text.to_lowercase();
    TOKEN_RE
        .find_iter(&lowered)
        .map(|m| m.as_str())
        .filter(|t| t.chars().count() > 1 && !STOPWORDS.contains(t))
        .map(str::to_string)
        .collect()
}

/// Token-set Jaccard similarity in `[0, 1]`.
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(b).count();
    let union = a.len() + b.len() - shared;
    shared as f64 / union as f64
}

/// Parse an http(s) URL with a host.
pub fn parse_web_url(raw: &str) -> Option<url::Url> {
    let mut parsed = url::Url::parse(raw.trim()).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return None;
    }
    parsed.set_fragment(None);
    Some(parsed)
}

/// Canonical form used as the exact-match key for a URL.
pub fn normalize_url(raw: &str) -> Option<String> {
    parse_web_url(raw).map(|u| u.to_string())
}

/// Host of a URL without a leading `www.`.
pub fn url_host(raw: &str) -> Option<String> {
    let parsed = parse_web_url(raw)?;
    let host = parsed.host_str()?.to_lowercase();
    Some(host.strip_prefix("www.").map(str::to_string).unwrap_or(host))
}

/// Tokens of the path and query of a URL, used as its "goal text".
pub fn url_tokens(raw: &str) -> BTreeSet<String> {
    match parse_web_url(raw) {
        Some(u) => tokenize(&format!("{} {}", u.path(), u.query().unwrap_or_default())),
        None => tokenize(raw),
    }
}
