//! Signature patterns for suspicious parameter content.

use once_cell::sync::Lazy;
use regex::{Regex, RegexSet};

use super::events::SecurityEventKind;

static SCRIPT: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)<\s*script\b",
        r"(?i)javascript\s*:",
        r"(?i)<[^>]*\bon[a-z]+\s*=",
    ])
    .expect("script signatures must compile")
});

static SQL_INJECTION: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)'\s*(or|and)\s+'?\w+'?\s*=\s*'?\w+",
        r"(?i);\s*(drop|delete|truncate|alter|insert|update|create|exec)\b",
        r"(?i)\bunion\b\s+(all\s+)?select\b",
        r"'\s*(--|#|/\*)",
    ])
    .expect("SQL signatures must compile")
});

static PATH_TRAVERSAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\.\.|%2e%2e)([/\\]|%2f|%5c)").expect("traversal signature must compile")
});

/// Valid module and function names.
pub(crate) static NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("name pattern must compile"));

/// Which signature families apply to a string.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Screening {
    pub(crate) sql: bool,
}

/// Returns the first signature family `text` matches.
pub(crate) fn classify(text: &str, screening: Screening) -> Option<SecurityEventKind> {
    if SCRIPT.is_match(text) {
        return Some(SecurityEventKind::Script);
    }
    if screening.sql && SQL_INJECTION.is_match(text) {
        return Some(SecurityEventKind::SqlInjection);
    }
    if PATH_TRAVERSAL.is_match(text) {
        return Some(SecurityEventKind::PathTraversal);
    }
    None
}
