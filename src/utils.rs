use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Error, Result};

/// Relative tolerance used when re-deriving which rule produced a chart score.
pub const MATCH_TOLERANCE: f64 = 1e-5;

/// `ln(e^a + e^b)` without leaving log space. Empty sums stay at -inf.
pub fn log_add(a: f64, b: f64) -> f64 {
  if a == f64::NEG_INFINITY {
    return b;
  }
  if b == f64::NEG_INFINITY {
    return a;
  }
  let (hi, lo) = if a > b { (a, b) } else { (b, a) };
  hi + (lo - hi).exp().ln_1p()
}

/// Log-sum-exp over a slice.
pub fn log_sum(values: &[f64]) -> f64 {
  let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
  if max == f64::NEG_INFINITY || max.is_nan() {
    return max;
  }
  if max == f64::INFINITY {
    return max;
  }
  max + values.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}

/// Scores are equal within `tolerance`, relative to their magnitude.
pub fn scores_match(x: f64, y: f64, tolerance: f64) -> bool {
  if x == y {
    return true;
  }
  (x - y).abs() / (x.abs() + y.abs() + 1e-10) < tolerance
}

/// Strips annotations off a category label: `NP^2` and `NP-SBJ` become `NP`.
/// The first character is never treated as an annotation marker.
pub fn basic_category(label: &str) -> &str {
  match label.char_indices().skip(1).find(|(_, c)| matches!(c, '^' | '-' | '=' | '|' | '#')) {
    Some((idx, _)) => &label[..idx],
    None => label,
  }
}

/// A cooperative cancellation flag, cheap to clone and share across threads.
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn trigger(&self) {
    self.0.store(true, Ordering::SeqCst);
  }

  pub fn reset(&self) {
    self.0.store(false, Ordering::SeqCst);
  }

  pub fn is_triggered(&self) -> bool {
    self.0.load(Ordering::SeqCst)
  }

  pub(crate) fn check(interrupt: Option<&Interrupt>) -> Result<()> {
    match interrupt {
      Some(i) if i.is_triggered() => Err(Error::Interrupted),
      _ => Ok(()),
    }
  }
}

/// Takes a list where each element is a set of choices, and returns all the possible sets
/// generated. Will clone the elements.
///
/// ```
/// let v = vec![
///   vec![1],
///   vec![2, 3],
///   vec![4],
///   vec![5, 6, 7],
/// ];
///
/// assert_eq!(chartwright::utils::combinations(&v), vec![
///   vec![1, 2, 4, 5],
///   vec![1, 3, 4, 5],
///   vec![1, 2, 4, 6],
///   vec![1, 3, 4, 6],
///   vec![1, 2, 4, 7],
///   vec![1, 3, 4, 7],
/// ]);
/// ```
pub fn combinations<T>(list: &[Vec<T>]) -> Vec<Vec<T>>
where
  T: Clone,
{
  if list.is_empty() {
    Vec::new()
  } else if list.len() == 1 {
    list[0].iter().map(|e| vec![e.clone()]).collect()
  } else {
    let (head, tail) = list.split_at(1);
    let head = &head[0];

    combinations(tail)
      .into_iter()
      .flat_map(|subseq| {
        // prepend every element of the head to every possible subseq
        head.iter().map(move |v| {
          let mut newseq = subseq.clone();
          newseq.insert(0, v.clone());
          newseq
        })
      })
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn log_add_handles_empty_terms() {
    assert_eq!(log_add(f64::NEG_INFINITY, f64::NEG_INFINITY), f64::NEG_INFINITY);
    assert_eq!(log_add(-2.0, f64::NEG_INFINITY), -2.0);
    let sum = log_add(0.5f64.ln(), 0.25f64.ln());
    assert!((sum - 0.75f64.ln()).abs() < 1e-12);
  }

  #[test]
  fn log_sum_of_nothing_is_neg_infinity() {
    assert_eq!(log_sum(&[]), f64::NEG_INFINITY);
    assert!((log_sum(&[0.0, 0.0]) - 2f64.ln()).abs() < 1e-12);
  }

  #[test]
  fn tolerance_is_relative() {
    assert!(scores_match(-1000.0, -1000.001, MATCH_TOLERANCE));
    assert!(!scores_match(-1.0, -1.001, MATCH_TOLERANCE));
    assert!(scores_match(f64::NEG_INFINITY, f64::NEG_INFINITY, MATCH_TOLERANCE));
  }

  #[test]
  fn basic_categories() {
    assert_eq!(basic_category("NP^3"), "NP");
    assert_eq!(basic_category("NP-SBJ"), "NP");
    assert_eq!(basic_category("@NP|DT"), "@NP");
    assert_eq!(basic_category("VBZ"), "VBZ");
  }
}
