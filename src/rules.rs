use std::fmt;

use crate::index::Index;

/// `parent -> child` with a log-probability score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnaryRule {
  pub parent: usize,
  pub child: usize,
  pub score: f64,
}

impl UnaryRule {
  pub fn new(parent: usize, child: usize, score: f64) -> Self {
    Self {
      parent,
      child,
      score,
    }
  }

  pub fn display<'a>(&'a self, states: &'a Index) -> RuleDisplay<'a> {
    RuleDisplay {
      states,
      parent: self.parent,
      children: [self.child, usize::MAX],
      arity: 1,
      score: self.score,
    }
  }
}

/// `parent -> left right` with a log-probability score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BinaryRule {
  pub parent: usize,
  pub left_child: usize,
  pub right_child: usize,
  pub score: f64,
}

impl BinaryRule {
  pub fn new(parent: usize, left_child: usize, right_child: usize, score: f64) -> Self {
    Self {
      parent,
      left_child,
      right_child,
      score,
    }
  }

  pub fn display<'a>(&'a self, states: &'a Index) -> RuleDisplay<'a> {
    RuleDisplay {
      states,
      parent: self.parent,
      children: [self.left_child, self.right_child],
      arity: 2,
      score: self.score,
    }
  }
}

/// Renders a rule with its state names: `"S" -> "NP" "VP" -0.1`
pub struct RuleDisplay<'a> {
  states: &'a Index,
  parent: usize,
  children: [usize; 2],
  arity: usize,
  score: f64,
}

impl fmt::Display for RuleDisplay<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = |idx: usize| self.states.get(idx).unwrap_or("?");
    write!(f, "{} ->", Quoted(name(self.parent)))?;
    for &child in &self.children[..self.arity] {
      write!(f, " {}", Quoted(name(child)))?;
    }
    write!(f, " {}", self.score)
  }
}

/// Writes a string in double quotes, escaping `"` and `\`.
pub struct Quoted<'a>(pub &'a str);

impl fmt::Display for Quoted<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "\"")?;
    for c in self.0.chars() {
      if c == '"' || c == '\\' {
        write!(f, "\\")?;
      }
      write!(f, "{}", c)?;
    }
    write!(f, "\"")
  }
}

#[test]
fn test_rule_display() {
  let states: Index = ["S", "NP", "VP", "a\"b"].into_iter().collect();
  assert_eq!(
    BinaryRule::new(0, 1, 2, -0.1).display(&states).to_string(),
    r#""S" -> "NP" "VP" -0.1"#
  );
  assert_eq!(
    UnaryRule::new(0, 3, 0.0).display(&states).to_string(),
    r#""S" -> "a\"b" 0"#
  );
}
