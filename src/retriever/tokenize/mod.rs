#[cfg(test)]
mod tests;

use std::collections::HashSet;
use std::sync::LazyLock;

use fancy_regex::Regex;
use itertools::Itertools;

use crate::schema::{Row, RowVocabulary};

/// Words too common to say anything about the schema
pub const STOPWORDS: &[&str] = &[
    "a", "an", "the", "in", "on", "of", "to", "and", "with", "for", "from", "into", "by", "at",
    "between", "among",
];

/// Suffix stripping never leaves fewer characters than this
const MIN_STEM_LEN: usize = 3;

static WORD_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9_-]+").expect("regex is valid"));

/// Distinct stemmed query tokens, in order of first appearance
#[inline]
pub fn tokenize(text: &str) -> Vec<String> {
    WORD_REGEX
        .find_iter(text)
        .filter_map(Result::ok)
        .map(|word| word.as_str())
        .filter(|word| word.len() > 2)
        .map(str::to_lowercase)
        .filter(|word| !STOPWORDS.contains(&word.as_str()))
        .filter_map(|word| {
            let trimmed = word.trim_matches(|c: char| c.is_ascii_punctuation());
            (!trimmed.is_empty()).then(|| stem(trimmed))
        })
        .unique()
        .collect()
}

/// Minimal suffix stripper: removes one of `ing`, `ed`, `es`, `s`.
///
/// `es` only goes after a sibilant (`x`, `z`, `ch`, `sh`, `ss`), so `boxes`
/// becomes `box` while `genes` falls through to the `s` rule and becomes
/// `gene`. A double `ss` ending is left alone.
#[inline]
pub fn stem(word: &str) -> String {
    let strip = |suffix: &str| {
        word.strip_suffix(suffix)
            .filter(|stem| stem.len() >= MIN_STEM_LEN)
    };

    if let Some(stem) = strip("ing").or_else(|| strip("ed")) {
        return stem.to_string();
    }
    if let Some(stem) = strip("es").filter(|stem| ends_with_sibilant(stem)) {
        return stem.to_string();
    }
    if let Some(stem) = strip("s").filter(|stem| !stem.ends_with('s')) {
        return stem.to_string();
    }
    word.to_string()
}

fn ends_with_sibilant(stem: &str) -> bool {
    ["x", "z", "ch", "sh", "ss"]
        .iter()
        .any(|ending| stem.ends_with(ending))
}

/// Stemmed lowercase sub-words of a row, split on anything not alphanumeric
#[inline]
pub fn row_terms(row: &Row) -> HashSet<String> {
    row.text()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(|part| stem(&part.to_lowercase()))
        .collect()
}

/// Sub-word sets of every row in a vocabulary, by position
#[derive(Debug, Clone, Default)]
pub struct RowTerms {
    terms: Vec<HashSet<String>>,
}

impl RowTerms {
    #[inline]
    pub fn new(rows: &RowVocabulary) -> Self {
        Self {
            terms: rows.iter().map(row_terms).collect(),
        }
    }

    /// Positions of the rows having `token` among their sub-words
    #[inline]
    pub fn matching<'a>(&'a self, token: &'a str) -> impl Iterator<Item = usize> + 'a {
        self.terms
            .iter()
            .enumerate()
            .filter(move |(_, terms)| terms.contains(token))
            .map(|(position, _)| position)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.terms.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}
