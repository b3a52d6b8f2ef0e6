//! Exhaustive CKY over a log-space chart, with unary closure folded into every cell.

use regex::Regex;

use crate::chart::Chart;
use crate::config::ParserConfig;
use crate::constraint::{self, CompiledConstraint, ParserConstraint};
use crate::error::{Error, Result};
use crate::grammar::Grammar;
use crate::lexicon::{BOUNDARY_TAG, BOUNDARY_WORD, Lexicon};
use crate::rules::BinaryRule;
use crate::syntree::Tree;
use crate::token::Token;
use crate::utils::{Interrupt, basic_category};

/// Read access to a filled chart, for components that combine PCFG scores
/// with scores of their own.
pub trait Scorer {
  fn inside_score(&self, start: usize, end: usize, state: usize) -> f64;

  /// -inf when the edge falls more than `pcfg_threshold` below the best parse.
  fn outside_score(&self, start: usize, end: usize, state: usize) -> f64;

  /// Some edge of `state` starting at `start` and some edge ending at `end`
  /// survived both passes.
  fn is_possible(&self, start: usize, end: usize, state: usize) -> bool;
}

/// A single-sentence parser. Owns its chart, which is reused and only grown
/// across calls to [`ChartParser::parse`].
pub struct ChartParser<'a, L: Lexicon + ?Sized> {
  pub(crate) grammar: &'a Grammar,
  pub(crate) lexicon: &'a L,
  pub(crate) config: ParserConfig,
  pub(crate) chart: Chart,
  pub(crate) words: Vec<Token>,
  /// The current chart came from the flooded-tags retry.
  pub(crate) flood_tags: bool,
  valid: bool,
  constraints: Vec<CompiledConstraint>,
  interrupt: Option<Interrupt>,
}

impl<'a, L: Lexicon + ?Sized> ChartParser<'a, L> {
  pub fn new(grammar: &'a Grammar, lexicon: &'a L, config: ParserConfig) -> Self {
    let chart = Chart::new(
      grammar.num_states(),
      config.compute_outside,
      config.length_normalization,
    );
    Self {
      grammar,
      lexicon,
      config,
      chart,
      words: Vec::new(),
      flood_tags: false,
      valid: false,
      constraints: Vec::new(),
      interrupt: None,
    }
  }

  /// Checks `interrupt` once per span width.
  pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
    self.interrupt = Some(interrupt);
    self
  }

  pub fn grammar(&self) -> &'a Grammar {
    self.grammar
  }

  pub fn config(&self) -> &ParserConfig {
    &self.config
  }

  pub fn chart(&self) -> &Chart {
    &self.chart
  }

  /// The tokens of the last parsed sentence.
  pub fn words(&self) -> &[Token] {
    &self.words
  }

  pub fn length(&self) -> usize {
    self.words.len()
  }

  /// Constraints apply to every later parse. An empty list is the same as none.
  pub fn set_constraints(&mut self, constraints: &[ParserConstraint]) -> Result<()> {
    self.constraints = constraint::compile(constraints, &self.grammar.states)?;
    Ok(())
  }

  pub fn clear_constraints(&mut self) {
    self.constraints.clear();
  }

  pub fn parse_words(&mut self, words: &[&str]) -> Result<bool> {
    let tokens = words.iter().copied().map(Token::new).collect::<Vec<_>>();
    self.parse(&tokens)
  }

  /// Fills the chart for `sentence`. Returns whether the goal state spans it.
  ///
  /// When nothing spans the sentence and recovery is on, the chart is
  /// refilled once with every tag available for every word.
  pub fn parse(&mut self, sentence: &[Token]) -> Result<bool> {
    self.valid = false;
    if sentence.is_empty() {
      return Err(Error::EmptySentence);
    }
    let length = sentence.len();
    self.chart.ensure_capacity(length, self.config.max_length)?;
    self.words = sentence.to_vec();

    let candidates = sentence
      .iter()
      .map(|t| {
        t.candidate_tags
          .as_deref()
          .map(|p| Regex::new(&format!("^(?:{})$", p)))
          .transpose()
      })
      .collect::<Result<Vec<_>, regex::Error>>()?;

    self.flood_tags = false;
    self.fill(&candidates)?;
    if !self.goal_reached() && self.config.do_recovery {
      tracing::info!(length, "no parse, retrying with flooded tags");
      self.flood_tags = true;
      self.fill(&candidates)?;
    }

    let parsed = self.goal_reached();
    if parsed && self.config.compute_outside {
      self.outside_pass()?;
      self.mark_possibles();
    }
    self.valid = true;
    if !parsed {
      tracing::debug!(length, "sentence has no parse");
    }
    Ok(parsed)
  }

  pub fn has_parse(&self) -> bool {
    self.best_score() > f64::NEG_INFINITY
  }

  /// Score of the goal over the whole sentence, divided by its word count
  /// under length normalization. -inf if the last parse failed or was interrupted.
  pub fn best_score(&self) -> f64 {
    self.normalized_score(self.grammar.goal())
  }

  pub fn best_score_for(&self, state: &str) -> Result<f64> {
    Ok(self.normalized_score(self.grammar.state(state)?))
  }

  fn normalized_score(&self, state: usize) -> f64 {
    if !self.valid {
      return f64::NEG_INFINITY;
    }
    let length = self.length();
    let score = self.chart.inside(0, length, state);
    if self.config.length_normalization && score > f64::NEG_INFINITY {
      score / self.words_in_span(0, length, state) as f64
    } else {
      score
    }
  }

  fn goal_reached(&self) -> bool {
    self.chart.inside(0, self.length(), self.grammar.goal()) > f64::NEG_INFINITY
  }

  pub(crate) fn is_valid(&self) -> bool {
    self.valid
  }

  fn fill(&mut self, candidates: &[Option<Regex>]) -> Result<()> {
    Interrupt::check(self.interrupt.as_ref())?;
    self.chart.reset(self.length());
    self.initialize_chart(candidates);
    self.inside_pass()
  }

  fn words_in_span(&self, start: usize, end: usize, state: usize) -> u32 {
    if self.config.length_normalization {
      self.chart.words_in_span[self.chart.cell(start, end) + state]
    } else {
      0
    }
  }

  fn tag_allowed(&self, token: &Token, tag: &str, candidates: Option<&Regex>) -> bool {
    if let Some(gold) = &token.tag {
      let compatible = if self.config.force_tag_beginnings {
        tag.starts_with(gold.as_str())
      } else {
        basic_category(tag) == gold
      };
      if !compatible {
        return false;
      }
    }
    candidates.is_none_or(|re| re.is_match(tag) || re.is_match(basic_category(tag)))
  }

  fn seed_tag(&mut self, position: usize, state: usize, score: f64) {
    let idx = self.chart.cell(position, position + 1) + state;
    let current = self.chart.i_score[idx];
    if score > current {
      self.chart.i_score[idx] = score;
      let at = self.chart.boundary(position, state);
      self.chart.lex_score[at] = score;
      if current == f64::NEG_INFINITY {
        self.chart.mark_built(position, position + 1, state);
      }
    }
  }

  fn initialize_chart(&mut self, candidates: &[Option<Regex>]) {
    let grammar = self.grammar;
    for position in 0..self.length() {
      let token = self.words[position].clone();
      let word = token.word.as_str();
      let context = token.context.as_deref();
      let candidates = candidates.get(position).and_then(Option::as_ref);

      let mut assigned = false;
      if !self.flood_tags || word == BOUNDARY_WORD {
        for (tag, score) in self.lexicon.taggings(word, position, context) {
          let Some(state) = grammar.states.index_of(&tag) else {
            continue;
          };
          if !grammar.is_tag(state) || !self.tag_allowed(&token, &tag, candidates) {
            continue;
          }
          if score > f64::NEG_INFINITY {
            self.seed_tag(position, state, score);
            assigned = true;
          }
        }
      }

      if !assigned {
        for state in grammar.tag_states() {
          let tag = &grammar.states[state];
          if !self.tag_allowed(&token, tag, candidates) {
            continue;
          }
          let score = self.lexicon.score(word, tag, position, context);
          if score > f64::NEG_INFINITY {
            self.seed_tag(position, state, score);
          }
        }
      }

      if let Some(weight) = self.config.tag_score_multiplier {
        let cell = self.chart.cell(position, position + 1);
        for state in grammar.tag_states() {
          let score = self.chart.i_score[cell + state];
          if score > f64::NEG_INFINITY {
            let scaled = score * (1.0 + weight);
            self.chart.i_score[cell + state] = scaled;
            let at = self.chart.boundary(position, state);
            self.chart.lex_score[at] = scaled;
          }
        }
      }

      if self.flood_tags && !self.config.no_recovery_tagging && word != BOUNDARY_WORD {
        let flood = self.config.flood_tag_score;
        for state in grammar.tag_states() {
          if &grammar.states[state] != BOUNDARY_TAG {
            self.seed_tag(position, state, flood);
          }
        }
      }

      self.apply_unaries(position, position + 1);
    }
  }

  fn inside_pass(&mut self) -> Result<()> {
    let length = self.length();
    for diff in 2..=length {
      Interrupt::check(self.interrupt.as_ref())?;
      // the boundary token only combines over the whole sentence
      let starts = if self.config.boundary_last {
        if diff == length { 1 } else { length - diff }
      } else {
        length - diff + 1
      };
      for start in 0..starts {
        self.fill_cell(start, start + diff);
      }
    }
    Ok(())
  }

  fn fill_cell(&mut self, start: usize, end: usize) {
    if self.constraints.iter().any(|c| c.crosses(start, end)) {
      return;
    }
    let grammar = self.grammar;
    let num_states = grammar.num_states();
    let (start_i, end_i) = (start as i32, end as i32);

    for left in 0..num_states {
      let left_at = self.chart.boundary(start, left);
      let narrow_r = self.chart.narrow_r_extent[left_at];
      if narrow_r >= end_i {
        continue;
      }
      let wide_r = self.chart.wide_r_extent[left_at];
      for rule in grammar.binary.split_rules_with_left(left) {
        let right_at = self.chart.boundary(end, rule.right_child);
        let narrow_l = self.chart.narrow_l_extent[right_at];
        if narrow_l < narrow_r {
          continue;
        }
        let min = narrow_r.max(self.chart.wide_l_extent[right_at]);
        let max = wide_r.min(narrow_l);
        if min <= max {
          self.try_splits(start, end, rule, min as usize, max as usize);
        }
      }
    }

    for right in 0..num_states {
      let right_at = self.chart.boundary(end, right);
      let narrow_l = self.chart.narrow_l_extent[right_at];
      if narrow_l <= start_i {
        continue;
      }
      let wide_l = self.chart.wide_l_extent[right_at];
      for rule in grammar.binary.split_rules_with_right(right) {
        let left_at = self.chart.boundary(start, rule.left_child);
        let narrow_r = self.chart.narrow_r_extent[left_at];
        if narrow_r > narrow_l {
          continue;
        }
        let min = narrow_r.max(wide_l);
        let max = self.chart.wide_r_extent[left_at].min(narrow_l);
        if min <= max {
          self.try_splits(start, end, rule, min as usize, max as usize);
        }
      }
    }

    self.apply_unaries(start, end);
  }

  fn try_splits(&mut self, start: usize, end: usize, rule: &BinaryRule, min: usize, max: usize) {
    let (left, right) = (rule.left_child, rule.right_child);
    for split in min..=max {
      if !self.split_allowed(start, split, end, left, right) {
        continue;
      }
      let left_score = self.chart.inside(start, split, left);
      if left_score == f64::NEG_INFINITY {
        continue;
      }
      let right_score = self.chart.inside(split, end, right);
      if right_score == f64::NEG_INFINITY {
        continue;
      }
      let words = self.words_in_span(start, split, left) + self.words_in_span(split, end, right);
      self.improve(start, end, rule.parent, left_score + right_score + rule.score, words);
    }
  }

  fn apply_unaries(&mut self, start: usize, end: usize) {
    let grammar = self.grammar;
    let cell = self.chart.cell(start, end);
    for child in 0..grammar.num_states() {
      let child_score = self.chart.i_score[cell + child];
      if child_score == f64::NEG_INFINITY {
        continue;
      }
      let words = self.words_in_span(start, end, child);
      for rule in grammar.unary.closed_rules_by_child(child) {
        if self.unary_allowed(start, end, rule.parent) {
          self.improve(start, end, rule.parent, child_score + rule.score, words);
        }
      }
    }
  }

  /// Stores `score` if it strictly beats the cell's current score for `state`.
  fn improve(&mut self, start: usize, end: usize, state: usize, score: f64, words: u32) {
    let idx = self.chart.cell(start, end) + state;
    let current = self.chart.i_score[idx];
    let better = if self.config.length_normalization {
      score / words as f64 > current / self.chart.words_in_span[idx] as f64
    } else {
      score > current
    };
    if !better {
      return;
    }
    self.chart.i_score[idx] = score;
    if self.config.length_normalization {
      self.chart.words_in_span[idx] = words;
    }
    if current == f64::NEG_INFINITY {
      self.chart.mark_built(start, end, state);
    }
  }

  fn split_allowed(&self, start: usize, split: usize, end: usize, left: usize, right: usize) -> bool {
    let states = &self.grammar.states;
    self.constraints.iter().all(|c| {
      if c.cuts(start, split, end) {
        return false;
      }
      if start == c.start && split == c.end && !c.matches(&states[left]) {
        return false;
      }
      !(split == c.start && end == c.end && !c.matches(&states[right]))
    })
  }

  fn unary_allowed(&self, start: usize, end: usize, parent: usize) -> bool {
    let states = &self.grammar.states;
    self
      .constraints
      .iter()
      .all(|c| !(start == c.start && end == c.end) || c.matches(&states[parent]))
  }

  fn outside_pass(&mut self) -> Result<()> {
    let grammar = self.grammar;
    let num_states = grammar.num_states();
    let length = self.length();
    let root = self.chart.cell(0, length) + grammar.goal();
    self.chart.o_score[root] = 0.0;

    for diff in (1..=length).rev() {
      Interrupt::check(self.interrupt.as_ref())?;
      for start in 0..=length - diff {
        let end = start + diff;
        let cell = self.chart.cell(start, end);

        for parent in 0..num_states {
          let outside = self.chart.o_score[cell + parent];
          if outside == f64::NEG_INFINITY {
            continue;
          }
          for rule in grammar.unary.closed_rules_by_parent(parent) {
            let child = cell + rule.child;
            let total = outside + rule.score;
            if total > self.chart.o_score[child] && self.chart.i_score[child] > f64::NEG_INFINITY {
              self.chart.o_score[child] = total;
            }
          }
        }

        for left in 0..num_states {
          let left_at = self.chart.boundary(start, left);
          let narrow_r = self.chart.narrow_r_extent[left_at];
          if narrow_r >= end as i32 {
            continue;
          }
          for rule in grammar.binary.split_rules_with_left(left) {
            self.push_outside(start, end, rule);
          }
        }
        for right in 0..num_states {
          let right_at = self.chart.boundary(end, right);
          if self.chart.narrow_l_extent[right_at] <= start as i32 {
            continue;
          }
          for rule in grammar.binary.split_rules_with_right(right) {
            self.push_outside(start, end, rule);
          }
        }
      }
    }
    Ok(())
  }

  fn push_outside(&mut self, start: usize, end: usize, rule: &BinaryRule) {
    let outside = self.chart.o_score[self.chart.cell(start, end) + rule.parent];
    if outside == f64::NEG_INFINITY {
      return;
    }
    let (left, right) = (rule.left_child, rule.right_child);
    let left_at = self.chart.boundary(start, left);
    let right_at = self.chart.boundary(end, right);
    let min = self.chart.narrow_r_extent[left_at].max(self.chart.wide_l_extent[right_at]);
    let max = self.chart.wide_r_extent[left_at].min(self.chart.narrow_l_extent[right_at]);
    if min > max {
      return;
    }
    for split in min as usize..=max as usize {
      let left_idx = self.chart.cell(start, split) + left;
      let right_idx = self.chart.cell(split, end) + right;
      let left_score = self.chart.i_score[left_idx];
      let right_score = self.chart.i_score[right_idx];
      if left_score == f64::NEG_INFINITY || right_score == f64::NEG_INFINITY {
        continue;
      }
      let to_left = outside + rule.score + right_score;
      if to_left > self.chart.o_score[left_idx] {
        self.chart.o_score[left_idx] = to_left;
      }
      let to_right = outside + rule.score + left_score;
      if to_right > self.chart.o_score[right_idx] {
        self.chart.o_score[right_idx] = to_right;
      }
    }
  }

  fn mark_possibles(&mut self) {
    let length = self.length();
    let num_states = self.grammar.num_states();
    for start in 0..length {
      for end in start + 1..=length {
        let cell = self.chart.cell(start, end);
        for state in 0..num_states {
          if self.chart.i_score[cell + state] > f64::NEG_INFINITY
            && self.chart.o_score[cell + state] > f64::NEG_INFINITY
          {
            let (from, to) = (self.chart.boundary(start, state), self.chart.boundary(end, state));
            self.chart.possible_starts[from] = true;
            self.chart.possible_ends[to] = true;
          }
        }
      }
    }
  }

  /// Recomputes the score of a binarized tree over the current sentence:
  /// its rule scores plus the lexical scores of its preterminals.
  pub fn score_binarized_tree(&self, tree: &Tree) -> Result<f64> {
    self.score_subtree(tree, 0).map(|(score, _)| score)
  }

  fn score_subtree(&self, tree: &Tree, position: usize) -> Result<(f64, usize)> {
    let grammar = self.grammar;
    match tree.children() {
      [] => Ok((0.0, position + 1)),
      [leaf] if leaf.is_leaf() => {
        let tag = grammar.state(tree.label())?;
        let score = if self.valid && position < self.length() {
          self.chart.lex_score[self.chart.boundary(position, tag)]
        } else {
          let context = self.words.get(position).and_then(|t| t.context.as_deref());
          self.lexicon.score(leaf.label(), tree.label(), position, context)
        };
        Ok((score, position + 1))
      }
      [child] => {
        let (parent, child_state) = (grammar.state(tree.label())?, grammar.state(child.label())?);
        let (score, next) = self.score_subtree(child, position)?;
        Ok((score + grammar.unary.score(parent, child_state), next))
      }
      [left, right] => {
        let parent = grammar.state(tree.label())?;
        let (l, r) = (grammar.state(left.label())?, grammar.state(right.label())?);
        let (left_score, split) = self.score_subtree(left, position)?;
        let (right_score, next) = self.score_subtree(right, split)?;
        Ok((left_score + right_score + grammar.binary.score(parent, l, r), next))
      }
      _ => Err(Error::Unbinarized(tree.label().to_string())),
    }
  }
}

impl<L: Lexicon + ?Sized> Scorer for ChartParser<'_, L> {
  fn inside_score(&self, start: usize, end: usize, state: usize) -> f64 {
    if !self.valid || start >= end || end > self.length() || state >= self.grammar.num_states() {
      return f64::NEG_INFINITY;
    }
    self.chart.inside(start, end, state)
  }

  fn outside_score(&self, start: usize, end: usize, state: usize) -> f64 {
    if !self.valid || start >= end || end > self.length() || state >= self.grammar.num_states() {
      return f64::NEG_INFINITY;
    }
    let outside = self.chart.outside(start, end, state);
    if let Some(threshold) = self.config.pcfg_threshold {
      let inside = self.chart.inside(start, end, state);
      if inside + outside - self.best_score() < -threshold {
        return f64::NEG_INFINITY;
      }
    }
    outside
  }

  fn is_possible(&self, start: usize, end: usize, state: usize) -> bool {
    if !self.valid || !self.config.compute_outside || end > self.length() {
      return false;
    }
    self.chart.possible_starts[self.chart.boundary(start, state)]
      && self.chart.possible_ends[self.chart.boundary(end, state)]
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::grammar::GrammarBuilder;
  use crate::test_utils::{ScoreTable, crossing, time_flies};

  fn no_recovery() -> ParserConfig {
    ParserConfig {
      do_recovery: false,
      ..ParserConfig::default()
    }
  }

  #[test]
  fn time_flies_scores_its_best_parse() {
    let (grammar, lexicon) = time_flies();
    let mut parser = ChartParser::new(&grammar, &lexicon, ParserConfig::default());
    assert!(parser.parse_words(&["Time", "flies"]).unwrap());
    assert!(parser.has_parse());
    assert!((parser.best_score() - -1.3).abs() < 1e-9);
    assert!((parser.best_score_for("S").unwrap() - -1.3).abs() < 1e-9);
    assert!(parser.best_score_for("VP").unwrap() == f64::NEG_INFINITY);
  }

  #[test]
  fn unknown_tag_without_recovery_fails() {
    let (grammar, _) = time_flies();
    let lexicon = ScoreTable::new(&[("zzz", "XX", -0.1), ("flies", "VP", -0.7)]);
    let mut parser = ChartParser::new(&grammar, &lexicon, no_recovery());
    assert!(!parser.parse_words(&["zzz", "flies"]).unwrap());
    assert!(!parser.has_parse());
    assert_eq!(parser.best_score(), f64::NEG_INFINITY);
  }

  #[test]
  fn recovery_floods_tags() {
    let (grammar, _) = time_flies();
    let lexicon = ScoreTable::new(&[("zzz", "XX", -0.1), ("flies", "VP", -0.7)]);
    let mut parser = ChartParser::new(&grammar, &lexicon, ParserConfig::default());
    assert!(parser.parse_words(&["zzz", "flies"]).unwrap());
    assert!(parser.flood_tags);
    assert!((parser.best_score() - -1000.8).abs() < 1e-9);
  }

  #[test]
  fn unary_chain_builds_over_one_word() {
    let mut g = GrammarBuilder::new("A");
    g.unary("A", "B", -0.5).unary("B", "C", -0.25);
    let grammar = g.build().unwrap();
    let lexicon = ScoreTable::new(&[("w", "C", -1.0)]);
    let mut parser = ChartParser::new(&grammar, &lexicon, no_recovery());
    assert!(parser.parse_words(&["w"]).unwrap());
    assert!((parser.best_score() - -1.75).abs() < 1e-12);
    assert!((parser.best_score_for("B").unwrap() - -1.25).abs() < 1e-12);
  }

  #[test]
  fn narrow_extents_are_tightest() {
    let (grammar, lexicon) = crossing();
    let mut parser = ChartParser::new(&grammar, &lexicon, no_recovery());
    assert!(parser.parse_words(&["a", "b", "c"]).unwrap());
    let chart = parser.chart();
    let length = parser.length();
    for state in 0..grammar.num_states() {
      for start in 0..length {
        let narrow = chart.narrow_r_extent[chart.boundary(start, state)];
        if narrow > length as i32 {
          continue;
        }
        let narrow = narrow as usize;
        assert!(chart.inside(start, narrow, state) > f64::NEG_INFINITY);
        for end in start + 1..narrow {
          assert_eq!(chart.inside(start, end, state), f64::NEG_INFINITY);
        }
      }
    }
  }

  #[test]
  fn constraints_select_and_block() {
    let (grammar, lexicon) = crossing();
    let mut parser = ChartParser::new(&grammar, &lexicon, no_recovery());
    parser.parse_words(&["a", "b", "c"]).unwrap();
    let free = parser.best_score();
    assert!((free - -1.0).abs() < 1e-12);

    parser.set_constraints(&[]).unwrap();
    parser.parse_words(&["a", "b", "c"]).unwrap();
    assert_eq!(parser.best_score(), free);

    parser.set_constraints(&[ParserConstraint::new(1, 3, "Y")]).unwrap();
    parser.parse_words(&["a", "b", "c"]).unwrap();
    assert!((parser.best_score() - -2.0).abs() < 1e-12);

    parser.set_constraints(&[ParserConstraint::new(0, 2, "Y")]).unwrap();
    assert!(!parser.parse_words(&["a", "b", "c"]).unwrap());

    assert!(parser.set_constraints(&[ParserConstraint::new(0, 2, "Q")]).is_err());
    parser.clear_constraints();
    parser.parse_words(&["a", "b", "c"]).unwrap();
    assert_eq!(parser.best_score(), free);
  }

  #[test]
  fn gold_tags_and_candidates_filter_seeding() {
    let (grammar, lexicon) = crossing();
    let mut parser = ChartParser::new(&grammar, &lexicon, no_recovery());
    let sentence = vec![Token::new("a").with_tag("B"), Token::new("b"), Token::new("c")];
    assert!(!parser.parse(&sentence).unwrap());
    let sentence = vec![Token::new("a").with_candidate_tags("A|C"), Token::new("b"), Token::new("c")];
    assert!(parser.parse(&sentence).unwrap());
    let sentence = vec![Token::new("a").with_candidate_tags("("), Token::new("b")];
    assert!(matches!(parser.parse(&sentence), Err(Error::Regex(_))));
  }

  #[test]
  fn long_sentences_are_refused_but_parser_survives() {
    let (grammar, lexicon) = time_flies();
    let config = ParserConfig {
      max_length: 2,
      ..ParserConfig::default()
    };
    let mut parser = ChartParser::new(&grammar, &lexicon, config);
    assert!(matches!(
      parser.parse_words(&["Time", "flies", "Time"]),
      Err(Error::SentenceTooLong { length: 3, max: 2 })
    ));
    assert_eq!(parser.best_score(), f64::NEG_INFINITY);
    assert!(parser.parse_words(&["Time", "flies"]).unwrap());
    assert!(matches!(parser.parse_words(&[]), Err(Error::EmptySentence)));
  }

  #[test]
  fn interrupted_parse_reports_nothing() {
    let (grammar, lexicon) = time_flies();
    let interrupt = Interrupt::new();
    let mut parser =
      ChartParser::new(&grammar, &lexicon, ParserConfig::default()).with_interrupt(interrupt.clone());
    interrupt.trigger();
    assert!(matches!(parser.parse_words(&["Time", "flies"]), Err(Error::Interrupted)));
    assert_eq!(parser.best_score(), f64::NEG_INFINITY);
    interrupt.reset();
    assert!(parser.parse_words(&["Time", "flies"]).unwrap());
  }

  #[test]
  fn outside_scores_complete_the_best_tree() {
    let (grammar, lexicon) = time_flies();
    let config = ParserConfig {
      compute_outside: true,
      ..ParserConfig::default()
    };
    let mut parser = ChartParser::new(&grammar, &lexicon, config);
    parser.parse_words(&["Time", "flies"]).unwrap();
    let np = grammar.state("NP").unwrap();
    let vp = grammar.state("VP").unwrap();
    let s = grammar.state("S").unwrap();
    assert!((parser.outside_score(0, 1, np) - -0.8).abs() < 1e-12);
    assert!((parser.outside_score(1, 2, vp) - -0.6).abs() < 1e-12);
    assert_eq!(parser.outside_score(0, 2, s), 0.0);
    let total = parser.inside_score(0, 1, np) + parser.outside_score(0, 1, np);
    assert!((total - parser.best_score()).abs() < 1e-12);
    assert!(parser.is_possible(0, 1, np));
    assert!(!parser.is_possible(0, 1, vp));
  }

  #[test]
  fn length_normalization_divides_by_words() {
    let (grammar, lexicon) = time_flies();
    let config = ParserConfig {
      length_normalization: true,
      ..ParserConfig::default()
    };
    let mut parser = ChartParser::new(&grammar, &lexicon, config);
    parser.parse_words(&["Time", "flies"]).unwrap();
    assert!((parser.best_score() - -0.65).abs() < 1e-9);
  }

  #[test]
  fn tag_multiplier_scales_lexical_scores() {
    let (grammar, lexicon) = time_flies();
    let config = ParserConfig {
      tag_score_multiplier: Some(1.0),
      ..ParserConfig::default()
    };
    let mut parser = ChartParser::new(&grammar, &lexicon, config);
    parser.parse_words(&["Time", "flies"]).unwrap();
    assert!((parser.best_score() - -2.5).abs() < 1e-9);
  }

  #[test]
  fn rescoring_a_tree_matches_the_chart() {
    let (grammar, lexicon) = time_flies();
    let mut parser = ChartParser::new(&grammar, &lexicon, ParserConfig::default());
    parser.parse_words(&["Time", "flies"]).unwrap();
    let tree: Tree = "(ROOT (S (NP Time) (VP flies)))".parse().unwrap();
    let score = parser.score_binarized_tree(&tree).unwrap();
    assert!((score - parser.best_score()).abs() < 1e-12);
    let bad: Tree = "(ROOT (S (NP Time) (VP flies) (VP flies)))".parse().unwrap();
    assert!(matches!(parser.score_binarized_tree(&bad), Err(Error::Unbinarized(_))));
  }
}
