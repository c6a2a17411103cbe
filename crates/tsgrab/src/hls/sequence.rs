// Sequence Resolver: recovers playback order from segment file names.
//
// Each matcher is a pure function from a file name to an optional number, tried in
// priority order. The first hit wins.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

/// Sort key extracted from a file name. Numbers sort before names.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SequenceKey {
    Number(u64),
    Name(String),
}

pub type Matcher = fn(&str) -> Option<u64>;

fn regex(pattern: &str) -> Regex {
    Regex::new(pattern).expect("sequence matcher patterns are valid")
}

static CANONICAL: LazyLock<Regex> = LazyLock::new(|| regex(r"^(\d{4,})(?:\.|$)"));
static SEG_DASH: LazyLock<Regex> = LazyLock::new(|| regex(r"(?i)seg-(\d+)"));
static SEGMENT: LazyLock<Regex> = LazyLock::new(|| regex(r"(?i)segment-?(\d+)"));
static INDEX: LazyLock<Regex> = LazyLock::new(|| regex(r"(?i)index(\d+)"));
static TRAILING_UNDERSCORE: LazyLock<Regex> =
    LazyLock::new(|| regex(r"_(\d+)\.[A-Za-z0-9]+$"));
static LETTERS_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| regex(r"[A-Za-z]+[_-](\d+)\.[A-Za-z0-9]+$"));
static LETTERS_DIGITS: LazyLock<Regex> =
    LazyLock::new(|| regex(r"[A-Za-z]+(\d+)\.[A-Za-z0-9]+$"));
static DIGIT_RUN: LazyLock<Regex> = LazyLock::new(|| regex(r"\d+"));

fn capture(re: &Regex, name: &str) -> Option<u64> {
    re.captures(name)?.get(1)?.as_str().parse().ok()
}

/// `0007.ts`
pub fn canonical(name: &str) -> Option<u64> {
    capture(&CANONICAL, name)
}

/// `seg-12-v1.ts`
pub fn seg_dash(name: &str) -> Option<u64> {
    capture(&SEG_DASH, name)
}

/// `segment12.ts`, `segment-12.ts`
pub fn segment(name: &str) -> Option<u64> {
    capture(&SEGMENT, name)
}

/// `index3.ts`
pub fn index(name: &str) -> Option<u64> {
    capture(&INDEX, name)
}

/// `720P_4000K_441496441_2.ts`
pub fn trailing_underscore(name: &str) -> Option<u64> {
    capture(&TRAILING_UNDERSCORE, name)
}

/// `chunk-5.ts`, `part_5.ts`
pub fn letters_separator(name: &str) -> Option<u64> {
    capture(&LETTERS_SEPARATOR, name)
}

/// `media42.ts`
pub fn letters_digits(name: &str) -> Option<u64> {
    capture(&LETTERS_DIGITS, name)
}

/// Any digit run: the first one when the name starts with a digit or a letter,
/// otherwise the last one.
pub fn digit_runs(name: &str) -> Option<u64> {
    let runs: Vec<&str> = DIGIT_RUN.find_iter(name).map(|m| m.as_str()).collect();
    let starts_alphanumeric = name.chars().next().is_some_and(char::is_alphanumeric);
    let run = if starts_alphanumeric {
        runs.first()
    } else {
        runs.last()
    };
    run?.parse().ok()
}

/// Matchers in priority order.
pub const MATCHERS: [(&str, Matcher); 8] = [
    ("canonical", canonical),
    ("seg-dash", seg_dash),
    ("segment", segment),
    ("index", index),
    ("trailing-underscore", trailing_underscore),
    ("letters-separator", letters_separator),
    ("letters-digits", letters_digits),
    ("digit-runs", digit_runs),
];

pub fn extract_key(name: &str) -> SequenceKey {
    MATCHERS
        .iter()
        .find_map(|(_, matcher)| matcher(name))
        .map(SequenceKey::Number)
        .unwrap_or_else(|| SequenceKey::Name(name.to_string()))
}

/// Orders file names by extracted key. Equal keys fall back to lexicographic
/// file-name order, so the result never depends on directory-listing order.
pub fn resolve_order<I, S>(filenames: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut keyed: Vec<(SequenceKey, String)> = filenames
        .into_iter()
        .map(Into::into)
        .map(|name| (extract_key(&name), name))
        .collect();

    keyed.sort_by(|(ka, na), (kb, nb)| match ka.cmp(kb) {
        Ordering::Equal => na.cmp(nb),
        other => other,
    });

    let mut counts: BTreeMap<&SequenceKey, usize> = BTreeMap::new();
    for (key, _) in &keyed {
        *counts.entry(key).or_default() += 1;
    }
    let tied = counts.values().filter(|&&n| n > 1).count();
    if tied > 0 {
        warn!(
            tied_keys = tied,
            "Several segment files share a sequence number; ordering them by file name"
        );
    }

    keyed.into_iter().map(|(_, name)| name).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documented_examples() {
        assert_eq!(extract_key("0007.ts"), SequenceKey::Number(7));
        assert_eq!(extract_key("seg-12-x.ts"), SequenceKey::Number(12));
        assert_eq!(extract_key("720P_4000K_441496441_2.ts"), SequenceKey::Number(2));
        assert_eq!(extract_key("index3.ts"), SequenceKey::Number(3));
        assert_eq!(extract_key("clip.ts"), SequenceKey::Name("clip.ts".into()));
    }

    #[test]
    fn each_matcher_in_isolation() {
        assert_eq!(canonical("0123.ts"), Some(123));
        assert_eq!(canonical("123.ts"), None);
        assert_eq!(seg_dash("SEG-4.ts"), Some(4));
        assert_eq!(segment("segment9.ts"), Some(9));
        assert_eq!(segment("segment-10.ts"), Some(10));
        assert_eq!(index("index0.ts"), Some(0));
        assert_eq!(trailing_underscore("a_b_17.ts"), Some(17));
        assert_eq!(letters_separator("chunk-5.m4s"), Some(5));
        assert_eq!(letters_digits("media42.ts"), Some(42));
        assert_eq!(letters_digits("42.ts"), None);
    }

    #[test]
    fn digit_run_fallback() {
        assert_eq!(digit_runs("12abc34.ts"), Some(12));
        assert_eq!(digit_runs("v3.part.8"), Some(3));
        assert_eq!(digit_runs("[7]x[9].ts"), Some(9));
        assert_eq!(digit_runs("none.ts"), None);
    }

    #[test]
    fn numbers_sort_numerically_before_names() {
        let order = resolve_order(["seg-10.ts", "clip.ts", "seg-2.ts", "seg-1.ts"]);
        assert_eq!(order, vec!["seg-1.ts", "seg-2.ts", "seg-10.ts", "clip.ts"]);
    }

    #[test]
    fn ties_break_by_file_name() {
        let order = resolve_order(["b_1.ts", "a_1.ts", "a_0.ts"]);
        assert_eq!(order, vec!["a_0.ts", "a_1.ts", "b_1.ts"]);
    }

    #[test]
    fn canonical_names_keep_sequence_order() {
        let order = resolve_order(["0010.ts", "0002.ts", "0001.ts"]);
        assert_eq!(order, vec!["0001.ts", "0002.ts", "0010.ts"]);
    }
}
