use std::sync::LazyLock;

use regex::Regex;

static UNDERSCORES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[_]").expect("underscore pattern is valid"));

static PUNCTUATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9- ]").expect("punctuation pattern is valid"));

static SPACES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r" +").expect("space pattern is valid"));

/// Normalizes a category name: lowercase, `_` as space, punctuation dropped, single spaces.
pub fn sanitize(input: &str) -> String {
    let s = UNDERSCORES.replace_all(input, " ");
    let s = PUNCTUATION.replace_all(&s, "");

    SPACES.replace_all(s.trim(), " ").to_lowercase()
}
