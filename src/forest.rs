//! Tree extraction from a filled chart. The chart keeps no backpointers, so
//! each node is rebuilt by finding a production whose score reproduces the
//! cell's inside score within the parser's match tolerance.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{Error, Result};
use crate::lexicon::Lexicon;
use crate::parser::{ChartParser, Scorer};
use crate::rules::{BinaryRule, UnaryRule};
use crate::syntree::Tree;
use crate::utils::{combinations, log_sum, scores_match};

/// One way of building a node, as seen from the chart.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Production<'g> {
  Lexical,
  Binary(usize, &'g BinaryRule),
  Unary(&'g UnaryRule),
}

impl<L: Lexicon + ?Sized> ChartParser<'_, L> {
  /// The Viterbi tree for the goal over the whole sentence, if there is one.
  pub fn best_parse(&self) -> Option<Tree> {
    self.best_parse_at(self.grammar.goal(), 0, self.length())
  }

  pub fn best_parse_at(&self, state: usize, start: usize, end: usize) -> Option<Tree> {
    let tree = self.extract_best(state, start, end, &mut Vec::new());
    if tree.is_none() && self.inside_score(start, end, state) > f64::NEG_INFINITY {
      tracing::warn!(
        state = &self.grammar.states[state],
        start,
        end,
        "no production reproduces the chart score"
      );
    }
    tree
  }

  /// Every tree tied for the best score.
  pub fn best_parses(&self) -> Vec<Tree> {
    self.extract_all(self.grammar.goal(), 0, self.length(), &mut Vec::new())
  }

  fn lexical_score(&self, state: usize, start: usize, end: usize) -> f64 {
    if end == start + 1 && self.is_valid() {
      self.chart.lex_score[self.chart.boundary(start, state)]
    } else {
      f64::NEG_INFINITY
    }
  }

  /// Productions of `state` over `[start, end)` with their scores. Unary
  /// children already on `chain` are left out so cycles cannot recurse.
  pub(crate) fn productions(&self, state: usize, start: usize, end: usize, chain: &[usize]) -> Vec<(f64, Production<'_>)> {
    let grammar = self.grammar;
    let mut out = Vec::new();

    let lexical = self.lexical_score(state, start, end);
    if lexical > f64::NEG_INFINITY {
      out.push((lexical, Production::Lexical));
    }
    for split in start + 1..end {
      for rule in grammar.binary.rules_by_parent(state) {
        let left = self.inside_score(start, split, rule.left_child);
        let right = self.inside_score(split, end, rule.right_child);
        if left > f64::NEG_INFINITY && right > f64::NEG_INFINITY {
          out.push((left + right + rule.score, Production::Binary(split, rule)));
        }
      }
    }
    for rule in grammar.unary.rules_by_parent(state) {
      if rule.child == state || chain.contains(&rule.child) {
        continue;
      }
      let child = self.inside_score(start, end, rule.child);
      if child > f64::NEG_INFINITY {
        out.push((child + rule.score, Production::Unary(rule)));
      }
    }
    out
  }

  pub(crate) fn build(&self, state: usize, start: usize, children: Vec<Tree>) -> Tree {
    let label = &self.grammar.states[state];
    if children.is_empty() {
      let word = self.words.get(start).map_or("", |t| t.word.as_str());
      Tree::preterminal(label, word, start)
    } else {
      Tree::branch(label, children)
    }
  }

  fn extract_best(&self, state: usize, start: usize, end: usize, chain: &mut Vec<usize>) -> Option<Tree> {
    let target = self.inside_score(start, end, state);
    if target == f64::NEG_INFINITY {
      return None;
    }
    let tolerance = self.config.match_tolerance;
    chain.push(state);
    let mut found = None;
    for (score, production) in self.productions(state, start, end, chain) {
      if !scores_match(score, target, tolerance) {
        continue;
      }
      let children = match production {
        Production::Lexical => Some(Vec::new()),
        Production::Binary(split, rule) => {
          let left = self.extract_best(rule.left_child, start, split, &mut Vec::new());
          let right = self.extract_best(rule.right_child, split, end, &mut Vec::new());
          left.zip(right).map(|(l, r)| vec![l, r])
        }
        Production::Unary(rule) => self.extract_best(rule.child, start, end, chain).map(|c| vec![c]),
      };
      if let Some(children) = children {
        found = Some(self.build(state, start, children));
        break;
      }
    }
    chain.pop();
    found
  }

  fn extract_all(&self, state: usize, start: usize, end: usize, chain: &mut Vec<usize>) -> Vec<Tree> {
    let target = self.inside_score(start, end, state);
    if target == f64::NEG_INFINITY {
      return Vec::new();
    }
    let tolerance = self.config.match_tolerance;
    chain.push(state);
    let mut trees = Vec::new();
    for (score, production) in self.productions(state, start, end, chain) {
      if !scores_match(score, target, tolerance) {
        continue;
      }
      match production {
        Production::Lexical => trees.push(self.build(state, start, Vec::new())),
        Production::Binary(split, rule) => {
          let lefts = self.extract_all(rule.left_child, start, split, &mut Vec::new());
          let rights = self.extract_all(rule.right_child, split, end, &mut Vec::new());
          for children in combinations(&[lefts, rights]) {
            trees.push(self.build(state, start, children));
          }
        }
        Production::Unary(rule) => {
          for child in self.extract_all(rule.child, start, end, chain) {
            trees.push(self.build(state, start, vec![child]));
          }
        }
      }
    }
    chain.pop();
    trees
  }

  /// Draws a tree top-down, choosing each node's production in proportion
  /// to its share of the node's local score mass.
  pub fn sample_parse<R: Rng>(&self, rng: &mut R) -> Result<Tree> {
    self.sample_at(self.grammar.goal(), 0, self.length(), rng, &mut Vec::new())
  }

  /// `k` independent samples from a generator seeded with `seed`.
  pub fn sampled_parses(&self, k: usize, seed: u64) -> Result<Vec<Tree>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..k).map(|_| self.sample_parse(&mut rng)).collect()
  }

  fn sample_at<R: Rng>(
    &self,
    state: usize,
    start: usize,
    end: usize,
    rng: &mut R,
    chain: &mut Vec<usize>,
  ) -> Result<Tree> {
    chain.push(state);
    let options = self.productions(state, start, end, chain);
    let weights = options.iter().map(|(w, _)| *w).collect::<Vec<_>>();
    let total = log_sum(&weights);
    if !total.is_finite() {
      return Err(Error::Sampling {
        state: self.grammar.states.get(state).unwrap_or("?").to_string(),
        start,
        end,
      });
    }

    let mut draw = rng.random::<f64>();
    let mut chosen = options.len() - 1;
    for (i, weight) in weights.iter().enumerate() {
      draw -= (weight - total).exp();
      if draw <= 0.0 {
        chosen = i;
        break;
      }
    }

    let children = match options[chosen].1 {
      Production::Lexical => Vec::new(),
      Production::Binary(split, rule) => vec![
        self.sample_at(rule.left_child, start, split, rng, &mut Vec::new())?,
        self.sample_at(rule.right_child, split, end, rng, &mut Vec::new())?,
      ],
      Production::Unary(rule) => vec![self.sample_at(rule.child, start, end, rng, chain)?],
    };
    chain.pop();
    Ok(self.build(state, start, children))
  }
}

#[cfg(test)]
mod tests {
  use std::collections::BTreeSet;

  use crate::config::ParserConfig;
  use crate::error::Error;
  use crate::parser::ChartParser;
  use crate::test_utils::{crossing, tied, time_flies};

  #[test]
  fn time_flies_best_parse() {
    let (grammar, lexicon) = time_flies();
    let mut parser = ChartParser::new(&grammar, &lexicon, ParserConfig::default());
    parser.parse_words(&["Time", "flies"]).unwrap();
    let tree = parser.best_parse().unwrap();
    assert_eq!(tree.to_string(), "(ROOT (S (NP Time) (VP flies)))");
    let rescored = parser.score_binarized_tree(&tree).unwrap();
    assert!((rescored - parser.best_score()).abs() < 1e-9);
  }

  #[test]
  fn best_parse_at_inner_span() {
    let (grammar, lexicon) = crossing();
    let mut parser = ChartParser::new(&grammar, &lexicon, ParserConfig::default());
    parser.parse_words(&["a", "b", "c"]).unwrap();
    let y = grammar.state("Y").unwrap();
    let tree = parser.best_parse_at(y, 1, 3).unwrap();
    assert_eq!(tree.to_string(), "(Y (B b) (C c))");
    assert_eq!(tree.span(), (1, 3));
    assert_eq!(
      parser.best_parse().unwrap().to_string(),
      "(S (X (A a) (B b)) (C c))"
    );
  }

  #[test]
  fn ties_are_all_returned() {
    let (grammar, lexicon) = tied();
    let mut parser = ChartParser::new(&grammar, &lexicon, ParserConfig::default());
    parser.parse_words(&["x", "y"]).unwrap();
    let trees = parser
      .best_parses()
      .iter()
      .map(|t| t.to_string())
      .collect::<BTreeSet<_>>();
    let expected = ["(S (A x) (B y))", "(S (A' x) (B' y))"]
      .iter()
      .map(|s| s.to_string())
      .collect::<BTreeSet<_>>();
    assert_eq!(trees, expected);
  }

  #[test]
  fn samples_cover_tied_trees() {
    let (grammar, lexicon) = tied();
    let mut parser = ChartParser::new(&grammar, &lexicon, ParserConfig::default());
    parser.parse_words(&["x", "y"]).unwrap();
    let samples = parser.sampled_parses(200, 7).unwrap();
    let distinct = samples.iter().map(|t| t.to_string()).collect::<BTreeSet<_>>();
    assert_eq!(distinct.len(), 2);
    assert_eq!(parser.sampled_parses(5, 3).unwrap(), parser.sampled_parses(5, 3).unwrap());
  }

  #[test]
  fn sampling_without_a_parse_is_an_error() {
    let (grammar, lexicon) = time_flies();
    let parser = ChartParser::new(&grammar, &lexicon, ParserConfig::default());
    assert!(matches!(
      parser.sampled_parses(1, 0),
      Err(Error::Sampling { ref state, .. }) if state == "ROOT"
    ));
    assert!(parser.best_parse().is_none());
  }
}
