//! Fixed lexicons and toy grammars shared by the unit tests.

use std::collections::BTreeMap;

use crate::grammar::{Grammar, GrammarBuilder};
use crate::lexicon::Lexicon;

/// A lexicon that answers from a fixed `(word, tag) -> score` table.
#[derive(Debug, Clone, Default)]
pub struct ScoreTable {
  scores: BTreeMap<(String, String), f64>,
}

impl ScoreTable {
  pub fn new(entries: &[(&str, &str, f64)]) -> Self {
    let scores = entries
      .iter()
      .map(|&(word, tag, score)| ((word.to_string(), tag.to_string()), score))
      .collect();
    Self { scores }
  }
}

impl Lexicon for ScoreTable {
  fn score(&self, word: &str, tag: &str, _position: usize, _context: Option<&str>) -> f64 {
    self
      .scores
      .get(&(word.to_string(), tag.to_string()))
      .copied()
      .unwrap_or(f64::NEG_INFINITY)
  }

  fn is_known(&self, word: &str) -> bool {
    self.scores.keys().any(|(w, _)| w == word)
  }

  fn taggings(&self, word: &str, _position: usize, _context: Option<&str>) -> Vec<(String, f64)> {
    self
      .scores
      .iter()
      .filter(|((w, _), _)| w == word)
      .map(|((_, tag), &score)| (tag.clone(), score))
      .collect()
  }
}

/// `ROOT -> S -> NP VP` over "Time flies", best score -1.3.
pub fn time_flies() -> (Grammar, ScoreTable) {
  let mut g = GrammarBuilder::new("ROOT");
  g.unary("ROOT", "S", 0.0).binary("S", "NP", "VP", -0.1);
  let lexicon = ScoreTable::new(&[("Time", "NP", -0.5), ("flies", "VP", -0.7)]);
  (g.build().unwrap(), lexicon)
}

/// "a b c" brackets as `(X a b) c` at -1 or `a (Y b c)` at -2.
pub fn crossing() -> (Grammar, ScoreTable) {
  let mut g = GrammarBuilder::new("S");
  g.binary("S", "X", "C", -1.0)
    .binary("X", "A", "B", 0.0)
    .binary("S", "A", "Y", -2.0)
    .binary("Y", "B", "C", 0.0);
  let lexicon = ScoreTable::new(&[("a", "A", 0.0), ("b", "B", 0.0), ("c", "C", 0.0)]);
  (g.build().unwrap(), lexicon)
}

/// Two equally good parses of "x y".
pub fn tied() -> (Grammar, ScoreTable) {
  let mut g = GrammarBuilder::new("S");
  g.binary("S", "A", "B", -1.0).binary("S", "A'", "B'", -1.0);
  let lexicon = ScoreTable::new(&[
    ("x", "A", 0.0),
    ("x", "A'", 0.0),
    ("y", "B", 0.0),
    ("y", "B'", 0.0),
  ]);
  (g.build().unwrap(), lexicon)
}
