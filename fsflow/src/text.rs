//! Line-oriented text primitives.
//!
//! Pure functions over lines or whole strings, usable directly, as pipeline
//! stages, or through the built-in [`TextPlugin`](crate::plugins::TextPlugin).

use crate::errors::FlowError;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Options for [`grep`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrepOptions {
    /// Keep lines that do not match.
    #[serde(default)]
    pub invert: bool,
    /// Match case-insensitively.
    #[serde(default)]
    pub ignore_case: bool,
}

/// Options for [`sort`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortOptions {
    /// Compare by the leading number of each line.
    #[serde(default)]
    pub numeric: bool,
    /// Descending order.
    #[serde(default)]
    pub reverse: bool,
    /// Drop duplicate lines after sorting.
    #[serde(default)]
    pub unique: bool,
}

/// Counts returned by [`word_count`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordCount {
    /// Newline count.
    pub lines: usize,
    /// Whitespace-separated words.
    pub words: usize,
    /// Unicode scalar values.
    pub chars: usize,
    /// UTF-8 bytes.
    pub bytes: usize,
}

fn compile(pattern: &str, ignore_case: bool) -> Result<Regex, FlowError> {
    RegexBuilder::new(pattern)
        .case_insensitive(ignore_case)
        .build()
        .map_err(|e| FlowError::invalid_pattern(pattern, e.to_string()))
}

/// Lines matching `pattern` (or not, with `invert`).
///
/// # Errors
///
/// A validation error if `pattern` is not a valid regular expression.
pub fn grep<S: AsRef<str>>(lines: &[S], pattern: &str, options: GrepOptions) -> Result<Vec<String>, FlowError> {
    let regex = compile(pattern, options.ignore_case)?;
    Ok(lines
        .iter()
        .map(|line| line.as_ref())
        .filter(|line| regex.is_match(line) != options.invert)
        .map(str::to_string)
        .collect())
}

/// Replaces the first match of `pattern`, or every match with `all`.
///
/// `replacement` may reference capture groups as `$1` or `${name}`.
///
/// # Errors
///
/// A validation error if `pattern` is not a valid regular expression.
pub fn replace(text: &str, pattern: &str, replacement: &str, all: bool) -> Result<String, FlowError> {
    let regex = compile(pattern, false)?;
    let replaced = if all {
        regex.replace_all(text, replacement)
    } else {
        regex.replace(text, replacement)
    };
    Ok(replaced.into_owned())
}

/// The first `n` lines.
#[must_use]
pub fn head<S: AsRef<str>>(lines: &[S], n: usize) -> Vec<String> {
    lines.iter().take(n).map(|l| l.as_ref().to_string()).collect()
}

/// The last `n` lines.
#[must_use]
pub fn tail<S: AsRef<str>>(lines: &[S], n: usize) -> Vec<String> {
    let skip = lines.len().saturating_sub(n);
    lines.iter().skip(skip).map(|l| l.as_ref().to_string()).collect()
}

/// Leading numeric value of a line; lines without one sort as zero.
fn leading_number(line: &str) -> f64 {
    let trimmed = line.trim_start();
    let end = trimmed
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || c == '.' || (i == 0 && (c == '-' || c == '+'))))
        .map_or(trimmed.len(), |(i, _)| i);
    trimmed[..end].parse().unwrap_or(0.0)
}

/// Sorted copy of `lines`. The sort is stable.
#[must_use]
pub fn sort<S: AsRef<str>>(lines: &[S], options: SortOptions) -> Vec<String> {
    let mut sorted: Vec<String> = lines.iter().map(|l| l.as_ref().to_string()).collect();
    if options.numeric {
        sorted.sort_by(|a, b| {
            leading_number(a)
                .partial_cmp(&leading_number(b))
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.cmp(b))
        });
    } else {
        sorted.sort();
    }
    if options.reverse {
        sorted.reverse();
    }
    if options.unique {
        sorted.dedup();
    }
    sorted
}

/// Collapses runs of adjacent identical lines.
#[must_use]
pub fn uniq<S: AsRef<str>>(lines: &[S]) -> Vec<String> {
    uniq_count(lines).into_iter().map(|(_, line)| line).collect()
}

/// Like [`uniq`], paired with the length of each run.
#[must_use]
pub fn uniq_count<S: AsRef<str>>(lines: &[S]) -> Vec<(usize, String)> {
    let mut runs: Vec<(usize, String)> = Vec::new();
    for line in lines.iter().map(|line| line.as_ref()) {
        match runs.last_mut() {
            Some((count, last)) if *last == line => *count += 1,
            _ => runs.push((1, line.to_string())),
        }
    }
    runs
}

/// Line, word, character, and byte counts.
#[must_use]
pub fn word_count(text: &str) -> WordCount {
    WordCount {
        lines: text.matches('\n').count(),
        words: text.split_whitespace().count(),
        chars: text.chars().count(),
        bytes: text.len(),
    }
}

/// Splits text into lines without their terminators.
#[must_use]
pub fn lines(text: &str) -> Vec<String> {
    text.lines().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const LOG: [&str; 5] = ["INFO start", "warn disk", "ERROR boom", "info done", "Error again"];

    #[test]
    fn test_grep() {
        assert_eq!(grep(&LOG, "^ERROR", GrepOptions::default()).unwrap(), vec!["ERROR boom"]);

        let ci = GrepOptions {
            ignore_case: true,
            ..GrepOptions::default()
        };
        assert_eq!(grep(&LOG, "^error", ci).unwrap(), vec!["ERROR boom", "Error again"]);

        let inverted = GrepOptions {
            invert: true,
            ignore_case: true,
        };
        assert_eq!(grep(&LOG, "info|error", inverted).unwrap(), vec!["warn disk"]);
    }

    #[test]
    fn test_invalid_pattern_is_validation_error() {
        let err = grep(&LOG, "(unclosed", GrepOptions::default()).unwrap_err();
        assert!(matches!(err, FlowError::Validation(_)));
        assert_eq!(err.code(), "INVALID_ARGUMENT");
        assert!(replace("x", "[", "y", true).is_err());
    }

    #[test]
    fn test_replace_first_and_all() {
        assert_eq!(replace("a-b-c", "-", "+", false).unwrap(), "a+b-c");
        assert_eq!(replace("a-b-c", "-", "+", true).unwrap(), "a+b+c");
        assert_eq!(replace("key=val", r"(\w+)=(\w+)", "$2=$1", true).unwrap(), "val=key");
    }

    #[test]
    fn test_head_and_tail() {
        assert_eq!(head(&LOG, 2), vec!["INFO start", "warn disk"]);
        assert_eq!(tail(&LOG, 2), vec!["info done", "Error again"]);
        assert_eq!(tail(&LOG, 50).len(), 5);
        assert!(head(&LOG, 0).is_empty());
    }

    #[test]
    fn test_sort_variants() {
        let input = ["10 ten", "9 nine", "b", "a", "9 nine"];
        assert_eq!(sort(&input, SortOptions::default()), vec!["10 ten", "9 nine", "9 nine", "a", "b"]);

        let numeric = SortOptions {
            numeric: true,
            unique: true,
            ..SortOptions::default()
        };
        assert_eq!(sort(&input, numeric), vec!["a", "b", "9 nine", "10 ten"]);

        let reversed = SortOptions {
            reverse: true,
            ..SortOptions::default()
        };
        assert_eq!(sort(&["x", "z", "y"], reversed), vec!["z", "y", "x"]);
    }

    #[test]
    fn test_uniq_is_adjacent_only() {
        let input = ["a", "a", "b", "a", "a", "a"];
        assert_eq!(uniq(&input), vec!["a", "b", "a"]);
        assert_eq!(
            uniq_count(&input),
            vec![(2, "a".to_string()), (1, "b".to_string()), (3, "a".to_string())]
        );
    }

    #[test]
    fn test_word_count() {
        assert_eq!(
            word_count("héllo world\nsecond line\n"),
            WordCount {
                lines: 2,
                words: 4,
                chars: 24,
                bytes: 25,
            }
        );
        assert_eq!(word_count(""), WordCount::default());
    }
}
