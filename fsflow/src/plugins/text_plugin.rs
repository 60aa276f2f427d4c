//! Built-in plugin exposing the text primitives.

use super::{command, CommandFn, FilterFn, Plugin, TransformFn};
use crate::text::{self, GrepOptions, SortOptions};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// Registers the [`text`](crate::text) primitives.
///
/// Commands take `{"text": "..."}` plus per-command arguments and return the
/// resulting lines, or a count object for `wc`:
///
/// | command   | extra arguments                           |
/// |-----------|-------------------------------------------|
/// | `grep`    | `pattern`, `invert`, `ignore_case`        |
/// | `replace` | `pattern`, `replacement`, `all`           |
/// | `head`    | `n`                                       |
/// | `tail`    | `n`                                       |
/// | `sort`    | `numeric`, `reverse`, `unique`            |
/// | `uniq`    | `count`                                   |
/// | `wc`      |                                           |
///
/// Filters: `non_empty`, `blank`. Transformers: `upper`, `lower`, `trim`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextPlugin;

#[derive(Deserialize)]
struct TextArgs {
    text: String,
}

#[derive(Deserialize)]
struct GrepArgs {
    text: String,
    pattern: String,
    #[serde(flatten)]
    options: GrepOptions,
}

#[derive(Deserialize)]
struct ReplaceArgs {
    text: String,
    pattern: String,
    replacement: String,
    #[serde(default)]
    all: bool,
}

#[derive(Deserialize)]
struct CountArgs {
    text: String,
    #[serde(default = "default_n")]
    n: usize,
}

fn default_n() -> usize {
    10
}

#[derive(Deserialize)]
struct SortArgs {
    text: String,
    #[serde(flatten)]
    options: SortOptions,
}

#[derive(Deserialize)]
struct UniqArgs {
    text: String,
    #[serde(default)]
    count: bool,
}

fn parse<T: for<'de> Deserialize<'de>>(args: Value) -> anyhow::Result<T> {
    serde_json::from_value(args).map_err(|e| anyhow::anyhow!("invalid arguments: {e}"))
}

fn entry(name: &str, f: CommandFn) -> (String, CommandFn) {
    (name.to_string(), f)
}

impl Plugin for TextPlugin {
    fn name(&self) -> &str {
        "text"
    }

    fn commands(&self) -> Vec<(String, CommandFn)> {
        vec![
            entry(
                "grep",
                command(|args| async move {
                    let GrepArgs { text, pattern, options } = parse(args)?;
                    Ok(json!(text::grep(&text::lines(&text), &pattern, options)?))
                }),
            ),
            entry(
                "replace",
                command(|args| async move {
                    let a: ReplaceArgs = parse(args)?;
                    Ok(json!(text::replace(&a.text, &a.pattern, &a.replacement, a.all)?))
                }),
            ),
            entry(
                "head",
                command(|args| async move {
                    let CountArgs { text, n } = parse(args)?;
                    Ok(json!(text::head(&text::lines(&text), n)))
                }),
            ),
            entry(
                "tail",
                command(|args| async move {
                    let CountArgs { text, n } = parse(args)?;
                    Ok(json!(text::tail(&text::lines(&text), n)))
                }),
            ),
            entry(
                "sort",
                command(|args| async move {
                    let SortArgs { text, options } = parse(args)?;
                    Ok(json!(text::sort(&text::lines(&text), options)))
                }),
            ),
            entry(
                "uniq",
                command(|args| async move {
                    let UniqArgs { text, count } = parse(args)?;
                    let lines = text::lines(&text);
                    Ok(if count {
                        json!(text::uniq_count(&lines))
                    } else {
                        json!(text::uniq(&lines))
                    })
                }),
            ),
            entry(
                "wc",
                command(|args| async move {
                    let TextArgs { text } = parse(args)?;
                    Ok(serde_json::to_value(text::word_count(&text))?)
                }),
            ),
        ]
    }

    fn filters(&self) -> Vec<(String, FilterFn)> {
        let non_empty: FilterFn = Arc::new(|line: &str| !line.trim().is_empty());
        let blank: FilterFn = Arc::new(|line: &str| line.trim().is_empty());
        vec![("non_empty".to_string(), non_empty), ("blank".to_string(), blank)]
    }

    fn transformers(&self) -> Vec<(String, TransformFn)> {
        let upper: TransformFn = Arc::new(|s: String| Ok(s.to_uppercase()));
        let lower: TransformFn = Arc::new(|s: String| Ok(s.to_lowercase()));
        let trim: TransformFn = Arc::new(|s: String| Ok(s.trim().to_string()));
        vec![
            ("upper".to_string(), upper),
            ("lower".to_string(), lower),
            ("trim".to_string(), trim),
        ]
    }
}
