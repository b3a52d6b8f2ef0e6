use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::error::{Error, Result};
use crate::index::Index;
use crate::rules::{BinaryRule, UnaryRule};
use crate::utils::log_add;

/// Marks states introduced by binarization, e.g. `@NP|DT_JJ`.
pub const SYNTHETIC_MARKER: char = '@';

pub fn is_synthetic(state: &str) -> bool {
  state.starts_with(SYNTHETIC_MARKER)
}

/// How chains of unary rules are folded together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClosureMode {
  /// Best single path, for Viterbi parsing.
  #[default]
  Max,
  /// Sum over paths of at most `num_states` steps.
  Sum,
}

fn check_state(index: usize, num_states: usize) -> Result<()> {
  if index < num_states {
    Ok(())
  } else {
    Err(Error::StateOutOfRange { index, num_states })
  }
}

#[derive(Debug, Clone)]
pub struct UnaryGrammar {
  num_states: usize,
  mode: ClosureMode,
  rules: Vec<UnaryRule>,
  lookup: HashMap<(usize, usize), usize>,
  by_parent: Vec<Vec<UnaryRule>>,
  by_child: Vec<Vec<UnaryRule>>,
  closed: HashMap<(usize, usize), f64>,
  closed_by_parent: Vec<Vec<UnaryRule>>,
  closed_by_child: Vec<Vec<UnaryRule>>,
  dirty: bool,
}

impl UnaryGrammar {
  pub fn new(num_states: usize) -> Self {
    Self::with_mode(num_states, ClosureMode::Max)
  }

  pub fn with_mode(num_states: usize, mode: ClosureMode) -> Self {
    Self {
      num_states,
      mode,
      rules: Vec::new(),
      lookup: HashMap::new(),
      by_parent: vec![Vec::new(); num_states],
      by_child: vec![Vec::new(); num_states],
      closed: HashMap::new(),
      closed_by_parent: vec![Vec::new(); num_states],
      closed_by_child: vec![Vec::new(); num_states],
      dirty: false,
    }
  }

  pub fn num_states(&self) -> usize {
    self.num_states
  }

  pub fn mode(&self) -> ClosureMode {
    self.mode
  }

  /// Adds a rule, keeping the better score if `parent -> child` already exists.
  /// The closure is stale until [`UnaryGrammar::close`] runs.
  pub fn add_rule(&mut self, rule: UnaryRule) -> Result<()> {
    check_state(rule.parent, self.num_states)?;
    check_state(rule.child, self.num_states)?;
    if rule.score.is_nan() {
      return Err(Error::NanScore(format!("{} -> {}", rule.parent, rule.child)));
    }

    if let Some(&pos) = self.lookup.get(&(rule.parent, rule.child)) {
      let existing = &mut self.rules[pos];
      if rule.score > existing.score {
        existing.score = rule.score;
        for r in self.by_parent[rule.parent]
          .iter_mut()
          .chain(self.by_child[rule.child].iter_mut())
          .filter(|r| r.child == rule.child && r.parent == rule.parent)
        {
          r.score = rule.score;
        }
      }
    } else {
      self.lookup.insert((rule.parent, rule.child), self.rules.len());
      self.rules.push(rule);
      self.by_parent[rule.parent].push(rule);
      self.by_child[rule.child].push(rule);
    }
    self.dirty = true;
    Ok(())
  }

  /// Recomputes the closed rule lists from the core rules.
  pub fn close(&mut self) {
    self.closed = match self.mode {
      ClosureMode::Max => self.max_closure(),
      ClosureMode::Sum => self.sum_closure(),
    };

    self.closed_by_parent = vec![Vec::new(); self.num_states];
    self.closed_by_child = vec![Vec::new(); self.num_states];
    let mut closed = self.closed.iter().collect::<Vec<_>>();
    closed.sort_by_key(|&(&(p, c), _)| (p, c));
    for (&(parent, child), &score) in closed {
      let rule = UnaryRule::new(parent, child, score);
      self.closed_by_parent[parent].push(rule);
      self.closed_by_child[child].push(rule);
    }
    self.dirty = false;
  }

  fn max_closure(&self) -> HashMap<(usize, usize), f64> {
    let mut best: Vec<HashMap<usize, f64>> = vec![HashMap::new(); self.num_states];
    for r in self.rules.iter().filter(|r| r.parent != r.child) {
      let entry = best[r.parent].entry(r.child).or_insert(f64::NEG_INFINITY);
      *entry = entry.max(r.score);
    }

    for k in 0..self.num_states {
      if best[k].is_empty() {
        continue;
      }
      let from_k = best[k].iter().map(|(&c, &s)| (c, s)).collect::<Vec<_>>();
      for p in 0..self.num_states {
        let Some(&into_k) = best[p].get(&k) else {
          continue;
        };
        for &(c, s) in &from_k {
          if c == p {
            continue;
          }
          let total = into_k + s;
          let entry = best[p].entry(c).or_insert(f64::NEG_INFINITY);
          if total > *entry {
            *entry = total;
          }
        }
      }
    }

    best
      .into_iter()
      .enumerate()
      .flat_map(|(p, children)| children.into_iter().map(move |(c, s)| ((p, c), s)))
      .collect()
  }

  fn sum_closure(&self) -> HashMap<(usize, usize), f64> {
    let mut total: HashMap<(usize, usize), f64> = HashMap::new();
    let mut frontier: HashMap<(usize, usize), f64> = HashMap::new();
    for r in self.rules.iter().filter(|r| r.parent != r.child) {
      let entry = frontier.entry((r.parent, r.child)).or_insert(f64::NEG_INFINITY);
      *entry = log_add(*entry, r.score);
    }

    for _ in 0..self.num_states {
      if frontier.is_empty() {
        break;
      }
      let mut next: HashMap<(usize, usize), f64> = HashMap::new();
      for (&(p, c), &s) in &frontier {
        let entry = total.entry((p, c)).or_insert(f64::NEG_INFINITY);
        *entry = log_add(*entry, s);
        for r in self.by_parent[c].iter().filter(|r| r.child != r.parent && r.child != p) {
          let entry = next.entry((p, r.child)).or_insert(f64::NEG_INFINITY);
          *entry = log_add(*entry, s + r.score);
        }
      }
      frontier = next;
    }
    total
  }

  pub fn rules(&self) -> &[UnaryRule] {
    &self.rules
  }

  pub fn len(&self) -> usize {
    self.rules.len()
  }

  pub fn is_empty(&self) -> bool {
    self.rules.is_empty()
  }

  pub fn rules_by_parent(&self, state: usize) -> &[UnaryRule] {
    &self.by_parent[state]
  }

  pub fn rules_by_child(&self, state: usize) -> &[UnaryRule] {
    &self.by_child[state]
  }

  /// Closed rules with this child, identity excluded.
  pub fn closed_rules_by_child(&self, state: usize) -> &[UnaryRule] {
    debug_assert!(!self.dirty, "unary closure used before close()");
    &self.closed_by_child[state]
  }

  /// Closed rules with this parent, identity excluded.
  pub fn closed_rules_by_parent(&self, state: usize) -> &[UnaryRule] {
    debug_assert!(!self.dirty, "unary closure used before close()");
    &self.closed_by_parent[state]
  }

  /// Score of the single rule `parent -> child`, -inf if absent.
  pub fn score(&self, parent: usize, child: usize) -> f64 {
    self
      .lookup
      .get(&(parent, child))
      .map_or(f64::NEG_INFINITY, |&pos| self.rules[pos].score)
  }

  /// Closed score of `parent ->* child`; the empty chain scores 0.
  pub fn closure_score(&self, parent: usize, child: usize) -> f64 {
    if parent == child {
      return 0.0;
    }
    self
      .closed
      .get(&(parent, child))
      .copied()
      .unwrap_or(f64::NEG_INFINITY)
  }
}

#[derive(Debug, Clone)]
pub struct BinaryGrammar {
  num_states: usize,
  synthetic: Vec<bool>,
  rules: Vec<BinaryRule>,
  lookup: HashMap<(usize, usize, usize), usize>,
  by_parent: Vec<Vec<BinaryRule>>,
  by_left: Vec<Vec<BinaryRule>>,
  by_right: Vec<Vec<BinaryRule>>,
  split_left: Vec<Vec<BinaryRule>>,
  split_right: Vec<Vec<BinaryRule>>,
}

impl BinaryGrammar {
  pub fn new(states: &Index) -> Self {
    let num_states = states.len();
    Self {
      num_states,
      synthetic: states.iter().map(is_synthetic).collect(),
      rules: Vec::new(),
      lookup: HashMap::new(),
      by_parent: vec![Vec::new(); num_states],
      by_left: vec![Vec::new(); num_states],
      by_right: vec![Vec::new(); num_states],
      split_left: vec![Vec::new(); num_states],
      split_right: vec![Vec::new(); num_states],
    }
  }

  /// Adds a rule, keeping the better score for a repeated `parent -> left right`.
  pub fn add_rule(&mut self, rule: BinaryRule) -> Result<()> {
    check_state(rule.parent, self.num_states)?;
    check_state(rule.left_child, self.num_states)?;
    check_state(rule.right_child, self.num_states)?;
    if rule.score.is_nan() {
      return Err(Error::NanScore(format!(
        "{} -> {} {}",
        rule.parent, rule.left_child, rule.right_child
      )));
    }

    let same = |r: &BinaryRule| {
      r.parent == rule.parent && r.left_child == rule.left_child && r.right_child == rule.right_child
    };
    let key = (rule.parent, rule.left_child, rule.right_child);
    if let Some(&pos) = self.lookup.get(&key) {
      let existing = &mut self.rules[pos];
      if rule.score > existing.score {
        existing.score = rule.score;
        for list in [
          &mut self.by_parent[rule.parent],
          &mut self.by_left[rule.left_child],
          &mut self.by_right[rule.right_child],
          &mut self.split_left[rule.left_child],
          &mut self.split_right[rule.right_child],
        ] {
          for r in list.iter_mut().filter(|r| same(r)) {
            r.score = rule.score;
          }
        }
      }
      return Ok(());
    }

    self.lookup.insert(key, self.rules.len());
    self.rules.push(rule);
    self.by_parent[rule.parent].push(rule);
    self.by_left[rule.left_child].push(rule);
    self.by_right[rule.right_child].push(rule);
    // each rule is tried from exactly one side during chart filling
    if self.synthetic[rule.left_child] {
      self.split_right[rule.right_child].push(rule);
    } else {
      self.split_left[rule.left_child].push(rule);
    }
    Ok(())
  }

  pub fn num_states(&self) -> usize {
    self.num_states
  }

  pub fn rules(&self) -> &[BinaryRule] {
    &self.rules
  }

  pub fn len(&self) -> usize {
    self.rules.len()
  }

  pub fn is_empty(&self) -> bool {
    self.rules.is_empty()
  }

  pub fn rules_by_parent(&self, state: usize) -> &[BinaryRule] {
    &self.by_parent[state]
  }

  pub fn rules_with_left(&self, state: usize) -> &[BinaryRule] {
    &self.by_left[state]
  }

  pub fn rules_with_right(&self, state: usize) -> &[BinaryRule] {
    &self.by_right[state]
  }

  /// The share of rules tried from their left child while filling the chart.
  pub fn split_rules_with_left(&self, state: usize) -> &[BinaryRule] {
    &self.split_left[state]
  }

  /// The complementary share, tried from their right child.
  pub fn split_rules_with_right(&self, state: usize) -> &[BinaryRule] {
    &self.split_right[state]
  }

  pub fn score(&self, parent: usize, left: usize, right: usize) -> f64 {
    self
      .lookup
      .get(&(parent, left, right))
      .map_or(f64::NEG_INFINITY, |&pos| self.rules[pos].score)
  }
}

/// A complete PCFG: state vocabulary, the tag subset, and both rule sets.
#[derive(Debug, Clone)]
pub struct Grammar {
  pub start: String,
  pub states: Index,
  pub tags: Index,
  is_tag: Vec<bool>,
  pub unary: UnaryGrammar,
  pub binary: BinaryGrammar,
}

impl Grammar {
  /// Bundles rule sets sized for `states`. Tags that are not states are ignored
  /// by the parser but kept for persistence.
  pub fn new(
    start: &str,
    states: Index,
    tags: Index,
    mut unary: UnaryGrammar,
    binary: BinaryGrammar,
  ) -> Result<Self> {
    if !states.contains(start) {
      return Err(Error::UnknownState(start.to_string()));
    }
    for grammar_states in [unary.num_states(), binary.num_states()] {
      if grammar_states != states.len() {
        return Err(Error::StateOutOfRange {
          index: grammar_states.max(states.len()) - 1,
          num_states: grammar_states.min(states.len()),
        });
      }
    }
    unary.close();
    let is_tag = states.iter().map(|s| tags.contains(s)).collect();
    Ok(Self {
      start: start.to_string(),
      states,
      tags,
      is_tag,
      unary,
      binary,
    })
  }

  pub fn num_states(&self) -> usize {
    self.states.len()
  }

  pub fn is_tag(&self, state: usize) -> bool {
    self.is_tag.get(state).copied().unwrap_or(false)
  }

  pub fn tag_states(&self) -> impl Iterator<Item = usize> + '_ {
    (0..self.num_states()).filter(|&s| self.is_tag[s])
  }

  pub fn state(&self, name: &str) -> Result<usize> {
    self
      .states
      .index_of(name)
      .ok_or_else(|| Error::UnknownState(name.to_string()))
  }

  pub fn goal(&self) -> usize {
    // checked in Grammar::new
    self.states.index_of(&self.start).unwrap_or(0)
  }
}

/// Rules are written start-symbol first, so the output parses back with the same start.
impl fmt::Display for Grammar {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let goal = self.goal();
    writeln!(f, "// start: {}", self.start)?;
    write!(f, "// tags:")?;
    for tag in self.tags.iter() {
      write!(f, " {}", tag)?;
    }
    writeln!(f)?;

    for rule in self.unary.rules_by_parent(goal) {
      writeln!(f, "{}", rule.display(&self.states))?;
    }
    for rule in self.binary.rules_by_parent(goal) {
      writeln!(f, "{}", rule.display(&self.states))?;
    }
    for rule in self.unary.rules().iter().filter(|r| r.parent != goal) {
      writeln!(f, "{}", rule.display(&self.states))?;
    }
    for rule in self.binary.rules().iter().filter(|r| r.parent != goal) {
      writeln!(f, "{}", rule.display(&self.states))?;
    }
    Ok(())
  }
}

/// Builds a [`Grammar`] from rules named by state strings.
#[derive(Debug, Clone)]
pub struct GrammarBuilder {
  start: String,
  states: Index,
  tags: Vec<String>,
  unary: Vec<(usize, usize, f64)>,
  binary: Vec<(usize, usize, usize, f64)>,
}

impl GrammarBuilder {
  pub fn new(start: &str) -> Self {
    let mut states = Index::new();
    states.add(start);
    Self {
      start: start.to_string(),
      states,
      tags: Vec::new(),
      unary: Vec::new(),
      binary: Vec::new(),
    }
  }

  pub fn unary(&mut self, parent: &str, child: &str, score: f64) -> &mut Self {
    let (p, c) = (self.states.add(parent), self.states.add(child));
    self.unary.push((p, c, score));
    self
  }

  pub fn binary(&mut self, parent: &str, left: &str, right: &str, score: f64) -> &mut Self {
    let p = self.states.add(parent);
    let l = self.states.add(left);
    let r = self.states.add(right);
    self.binary.push((p, l, r, score));
    self
  }

  /// Declares a tag. Without any declarations, tags are the states that
  /// never appear as a rule parent.
  pub fn tag(&mut self, tag: &str) -> &mut Self {
    self.states.add(tag);
    self.tags.push(tag.to_string());
    self
  }

  pub fn build(&self) -> Result<Grammar> {
    let tags: Index = if self.tags.is_empty() {
      let parents = self
        .unary
        .iter()
        .map(|r| r.0)
        .chain(self.binary.iter().map(|r| r.0))
        .collect::<HashSet<_>>();
      (0..self.states.len())
        .filter(|s| !parents.contains(s))
        .map(|s| &self.states[s])
        .collect()
    } else {
      self.tags.iter().collect()
    };

    let mut unary = UnaryGrammar::new(self.states.len());
    for &(p, c, score) in &self.unary {
      unary.add_rule(UnaryRule::new(p, c, score))?;
    }
    let mut binary = BinaryGrammar::new(&self.states);
    for &(p, l, r, score) in &self.binary {
      binary.add_rule(BinaryRule::new(p, l, r, score))?;
    }
    Grammar::new(&self.start, self.states.clone(), tags, unary, binary)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn unary_chain_closes_with_summed_scores() {
    let mut g = GrammarBuilder::new("A");
    g.unary("A", "B", -0.5).unary("B", "C", -0.25);
    let g = g.build().unwrap();
    let (a, b, c) = (g.state("A").unwrap(), g.state("B").unwrap(), g.state("C").unwrap());

    assert_eq!(g.unary.closure_score(a, c), -0.75);
    assert_eq!(g.unary.closure_score(a, b), -0.5);
    assert_eq!(g.unary.closure_score(c, a), f64::NEG_INFINITY);
    assert_eq!(g.unary.closure_score(b, b), 0.0);
    let parents = g
      .unary
      .closed_rules_by_child(c)
      .iter()
      .map(|r| r.parent)
      .collect::<Vec<_>>();
    assert_eq!(parents, vec![a, b]);
  }

  #[test]
  fn max_closure_prefers_the_better_path() {
    let mut g = GrammarBuilder::new("A");
    g.unary("A", "C", -3.0)
      .unary("A", "B", -1.0)
      .unary("B", "C", -1.0)
      .unary("C", "A", -0.1);
    let g = g.build().unwrap();
    let (a, c) = (g.state("A").unwrap(), g.state("C").unwrap());
    assert_eq!(g.unary.closure_score(a, c), -2.0);
    // cycles never produce identity rules
    assert!(g.unary.closed_rules_by_parent(a).iter().all(|r| r.child != a));
  }

  #[test]
  fn sum_closure_adds_alternative_paths() {
    let states: Index = ["A", "B", "C"].into_iter().collect();
    let mut unary = UnaryGrammar::with_mode(states.len(), ClosureMode::Sum);
    unary.add_rule(UnaryRule::new(0, 2, 0.25f64.ln())).unwrap();
    unary.add_rule(UnaryRule::new(0, 1, 0.5f64.ln())).unwrap();
    unary.add_rule(UnaryRule::new(1, 2, 0.5f64.ln())).unwrap();
    unary.close();
    assert!((unary.closure_score(0, 2) - 0.5f64.ln()).abs() < 1e-12);
  }

  #[test]
  fn out_of_range_rules_are_rejected() {
    let mut unary = UnaryGrammar::new(2);
    assert!(matches!(
      unary.add_rule(UnaryRule::new(0, 5, 0.0)),
      Err(Error::StateOutOfRange { index: 5, num_states: 2 })
    ));
  }

  #[test]
  fn binary_rules_split_by_synthetic_left_child() {
    let mut g = GrammarBuilder::new("NP");
    g.binary("NP", "DT", "@NP|DT", -0.2)
      .binary("@NP|DT", "JJ", "NN", -0.3)
      .binary("NP", "@NP|DT", "NN", -0.4);
    let g = g.build().unwrap();
    let dt = g.state("DT").unwrap();
    let syn = g.state("@NP|DT").unwrap();
    let nn = g.state("NN").unwrap();

    assert_eq!(g.binary.split_rules_with_left(dt).len(), 1);
    assert!(g.binary.split_rules_with_left(syn).is_empty());
    assert_eq!(g.binary.split_rules_with_right(nn).len(), 1);
    assert_eq!(g.binary.rules_with_right(nn).len(), 2);
    let total = (0..g.num_states())
      .map(|s| g.binary.split_rules_with_left(s).len() + g.binary.split_rules_with_right(s).len())
      .sum::<usize>();
    assert_eq!(total, g.binary.len());
  }

  #[test]
  fn tags_are_inferred_from_leaves() {
    let mut g = GrammarBuilder::new("ROOT");
    g.unary("ROOT", "S", 0.0).binary("S", "NP", "VP", -0.1);
    let g = g.build().unwrap();
    let tags = g.tags.iter().collect::<Vec<_>>();
    assert_eq!(tags, vec!["NP", "VP"]);
    assert!(g.is_tag(g.state("NP").unwrap()));
    assert!(!g.is_tag(g.goal()));
  }
}
