//! 1-based index selection expressions such as `"1-3,5 7"`.

use std::collections::HashSet;

use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

lazy_static! {
    static ref RANGE: Regex = Regex::new(r"^(\d+)-(\d+)$").expect("Failed to compile range regex");
    static ref SINGLE: Regex = Regex::new(r"^\d+$").expect("Failed to compile index regex");
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error("empty selection")]
    Empty,
    #[error("invalid token '{0}'")]
    Malformed(String),
    #[error("index {index} is out of range (1-{len})")]
    OutOfRange { index: usize, len: usize },
}

/// Parse `expr` against a list of `len` entries.
///
/// Returns zero-based indices in first-occurrence order. Ranges may be
/// descending (`"5-3"` yields 5, 4, 3).
pub fn parse_selection(expr: &str, len: usize) -> Result<Vec<usize>, SelectionError> {
    let mut seen = HashSet::new();
    let mut selected = Vec::new();

    for token in expr.split(|c: char| c == ',' || c.is_whitespace()).filter(|t| !t.is_empty()) {
        let indices: Vec<usize> = if let Some(caps) = RANGE.captures(token) {
            let start = parse_index(&caps[1], token, len)?;
            let end = parse_index(&caps[2], token, len)?;
            if start <= end {
                (start..=end).collect()
            } else {
                (end..=start).rev().collect()
            }
        } else if SINGLE.is_match(token) {
            vec![parse_index(token, token, len)?]
        } else {
            return Err(SelectionError::Malformed(token.to_string()));
        };

        for index in indices {
            if seen.insert(index) {
                selected.push(index - 1);
            }
        }
    }

    if selected.is_empty() {
        return Err(SelectionError::Empty);
    }
    Ok(selected)
}

fn parse_index(digits: &str, token: &str, len: usize) -> Result<usize, SelectionError> {
    let index: usize = digits
        .parse()
        .map_err(|_| SelectionError::Malformed(token.to_string()))?;
    if index == 0 || index > len {
        return Err(SelectionError::OutOfRange { index, len });
    }
    Ok(index)
}

/// Pick the selected entries out of `items`, cloning them in selection order.
pub fn select<T: Clone>(items: &[T], expr: &str) -> Result<Vec<T>, SelectionError> {
    Ok(parse_selection(expr, items.len())?
        .into_iter()
        .map(|i| items[i].clone())
        .collect())
}
