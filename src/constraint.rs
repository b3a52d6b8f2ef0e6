use regex::Regex;

use crate::error::{Error, Result};
use crate::index::Index;

/// Requires some constituent over `[start, end)` whose state name matches
/// `state_pattern` as a whole-string regex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParserConstraint {
  pub start: usize,
  pub end: usize,
  pub state_pattern: String,
}

impl ParserConstraint {
  pub fn new(start: usize, end: usize, state_pattern: &str) -> Self {
    Self {
      start,
      end,
      state_pattern: state_pattern.to_string(),
    }
  }
}

#[derive(Debug, Clone)]
pub(crate) struct CompiledConstraint {
  pub start: usize,
  pub end: usize,
  pattern: Regex,
}

impl CompiledConstraint {
  pub fn matches(&self, state: &str) -> bool {
    self.pattern.is_match(state)
  }

  /// `[start, end)` overlaps the constraint without nesting either way.
  pub fn crosses(&self, start: usize, end: usize) -> bool {
    (start > self.start && start < self.end && end > self.end)
      || (end > self.start && end < self.end && start < self.start)
  }

  /// Splitting an enclosing span at `split` would cut the constraint in two.
  pub fn cuts(&self, start: usize, split: usize, end: usize) -> bool {
    ((start < self.start && end >= self.end) || (start <= self.start && end > self.end))
      && split > self.start
      && split < self.end
  }
}

/// Compiles patterns against the grammar's states. A pattern no state can
/// satisfy is an error rather than a parse that silently fails.
pub(crate) fn compile(constraints: &[ParserConstraint], states: &Index) -> Result<Vec<CompiledConstraint>> {
  constraints
    .iter()
    .map(|c| {
      let pattern = Regex::new(&format!("^(?:{})$", c.state_pattern))?;
      if !states.iter().any(|s| pattern.is_match(s)) {
        return Err(Error::UnknownConstraintState(c.state_pattern.clone()));
      }
      Ok(CompiledConstraint {
        start: c.start,
        end: c.end,
        pattern,
      })
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn states() -> Index {
    ["ROOT", "S", "NP", "NP^1", "VP"].iter().collect()
  }

  #[test]
  fn patterns_match_whole_names() {
    let compiled = compile(&[ParserConstraint::new(0, 2, "NP")], &states()).unwrap();
    assert!(compiled[0].matches("NP"));
    assert!(!compiled[0].matches("NP^1"));
    let compiled = compile(&[ParserConstraint::new(0, 2, r"NP(\^\d+)?")], &states()).unwrap();
    assert!(compiled[0].matches("NP^1"));
  }

  #[test]
  fn unknown_state_is_rejected() {
    assert!(matches!(
      compile(&[ParserConstraint::new(0, 1, "PP")], &states()),
      Err(Error::UnknownConstraintState(p)) if p == "PP"
    ));
  }

  #[test]
  fn crossing_and_cutting_spans() {
    let c = &compile(&[ParserConstraint::new(1, 3, "S")], &states()).unwrap()[0];
    assert!(c.crosses(2, 4));
    assert!(c.crosses(0, 2));
    assert!(!c.crosses(1, 3));
    assert!(!c.crosses(0, 4));
    assert!(!c.crosses(1, 2));
    assert!(c.cuts(0, 2, 4));
    assert!(!c.cuts(0, 1, 4));
    assert!(!c.cuts(1, 2, 3));
  }
}
