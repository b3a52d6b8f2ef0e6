use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use crate::error::{Error, Result};
use crate::parse_grammar::{needed_re, parse_score, parse_symbol, regex_static};
use crate::rules::Quoted;
use regex::Regex;

/// Word appended to mark the end of a sentence.
pub const BOUNDARY_WORD: &str = ".$.";
/// The only tag the boundary word takes.
pub const BOUNDARY_TAG: &str = ".$$.";

/// Scores words given tags. The parser treats it as an oracle.
pub trait Lexicon: Send + Sync {
  /// `ln P(word | tag)`, or -inf when the pair is impossible.
  fn score(&self, word: &str, tag: &str, position: usize, context: Option<&str>) -> f64;

  fn is_known(&self, word: &str) -> bool;

  /// Tags worth trying for `word`, with their scores.
  fn taggings(&self, word: &str, position: usize, context: Option<&str>) -> Vec<(String, f64)>;
}

/// A weighted-count lexicon: relative frequencies for seen words and a
/// hapax-based estimate for unknown ones.
#[derive(Debug, Clone)]
pub struct SimpleLexicon {
  seen: BTreeMap<(String, String), f64>,
  smooth: f64,
  tag_totals: HashMap<String, f64>,
  word_tags: HashMap<String, Vec<String>>,
  unseen: HashMap<String, f64>,
  unseen_total: f64,
  total: f64,
}

impl Default for SimpleLexicon {
  fn default() -> Self {
    Self::new(1.0)
  }
}

impl SimpleLexicon {
  pub fn new(smooth: f64) -> Self {
    Self {
      seen: BTreeMap::new(),
      smooth,
      tag_totals: HashMap::new(),
      word_tags: HashMap::new(),
      unseen: HashMap::new(),
      unseen_total: 0.0,
      total: 0.0,
    }
  }

  /// Adds `weight` observations of `word` with `tag`. Scores are stale until
  /// [`SimpleLexicon::finish_training`].
  pub fn train(&mut self, word: &str, tag: &str, weight: f64) {
    if weight <= 0.0 || !weight.is_finite() {
      return;
    }
    *self
      .seen
      .entry((tag.to_string(), word.to_string()))
      .or_insert(0.0) += weight;
  }

  pub fn finish_training(&mut self) {
    self.tag_totals.clear();
    self.word_tags.clear();
    self.unseen.clear();
    self.total = 0.0;

    let mut word_totals: HashMap<&str, f64> = HashMap::new();
    for ((tag, word), &count) in &self.seen {
      *self.tag_totals.entry(tag.clone()).or_insert(0.0) += count;
      *word_totals.entry(word).or_insert(0.0) += count;
      self
        .word_tags
        .entry(word.clone())
        .or_default()
        .push(tag.clone());
      self.total += count;
    }

    // words seen about once stand in for unknown words
    for ((tag, word), &count) in &self.seen {
      if word_totals[word.as_str()] <= 1.0 + 1e-9 {
        *self.unseen.entry(tag.clone()).or_insert(0.0) += count;
      }
    }
    self.unseen_total = self.unseen.values().sum();
  }

  pub fn count(&self, word: &str, tag: &str) -> f64 {
    self
      .seen
      .get(&(tag.to_string(), word.to_string()))
      .copied()
      .unwrap_or(0.0)
  }

  pub fn smoothing(&self) -> f64 {
    self.smooth
  }

  pub fn tags(&self) -> BTreeSet<&str> {
    self.seen.keys().map(|(t, _)| t.as_str()).collect()
  }

  pub fn words(&self) -> BTreeSet<&str> {
    self.seen.keys().map(|(_, w)| w.as_str()).collect()
  }

  pub fn is_empty(&self) -> bool {
    self.seen.is_empty()
  }

  fn unknown_word_score(&self, tag: &str) -> f64 {
    let Some(&tag_total) = self.tag_totals.get(tag) else {
      return f64::NEG_INFINITY;
    };
    let num_tags = self.tag_totals.len() as f64;
    let p_tag_unknown = (self.unseen.get(tag).copied().unwrap_or(0.0) + self.smooth)
      / (self.unseen_total + self.smooth * num_tags);
    let p_tag = tag_total / self.total;
    let p_word = 1.0 / (self.total + 1.0);
    (p_tag_unknown * p_word / p_tag).ln()
  }

  /// Reads the body of a `LEXICON` section.
  pub(crate) fn read_lines(lines: &[(usize, &str)]) -> Result<Self> {
    #![allow(clippy::trivial_regex)]
    regex_static!(ARROW, "->");
    regex_static!(SEEN, "SEEN");
    regex_static!(SMOOTH, r"smooth\s*=");

    let mut lexicon = Self::default();
    for &(line, text) in lines {
      let text = text.trim();
      let parsed: std::result::Result<(), String> = (|| {
        if let Ok((_, rest)) = needed_re(&SMOOTH, text) {
          lexicon.smooth = parse_score(rest.trim())?.0;
          return Ok(());
        }
        let (tag, s) = parse_symbol(text)?;
        let (_, s) = needed_re(&ARROW, s.trim_start())?;
        let (word, s) = parse_symbol(s.trim_start())?;
        let (_, s) = needed_re(&SEEN, s.trim_start())?;
        let (count, s) = parse_score(s.trim_start())?;
        if !s.trim().is_empty() {
          return Err(format!("trailing input {:?}", s));
        }
        lexicon.train(&word, &tag, count);
        Ok(())
      })();
      parsed.map_err(|e| Error::format(line, e))?;
    }
    lexicon.finish_training();
    Ok(lexicon)
  }
}

impl Lexicon for SimpleLexicon {
  fn score(&self, word: &str, tag: &str, _position: usize, _context: Option<&str>) -> f64 {
    if word == BOUNDARY_WORD || tag == BOUNDARY_TAG {
      return if word == BOUNDARY_WORD && tag == BOUNDARY_TAG {
        0.0
      } else {
        f64::NEG_INFINITY
      };
    }
    if self.word_tags.contains_key(word) {
      let count = self.count(word, tag);
      match self.tag_totals.get(tag) {
        Some(&total) if count > 0.0 => (count / total).ln(),
        _ => f64::NEG_INFINITY,
      }
    } else {
      self.unknown_word_score(tag)
    }
  }

  fn is_known(&self, word: &str) -> bool {
    word == BOUNDARY_WORD || self.word_tags.contains_key(word)
  }

  fn taggings(&self, word: &str, position: usize, context: Option<&str>) -> Vec<(String, f64)> {
    if word == BOUNDARY_WORD {
      return vec![(BOUNDARY_TAG.to_string(), 0.0)];
    }
    let mut tags = match self.word_tags.get(word) {
      Some(tags) => tags.iter().map(String::as_str).collect::<Vec<_>>(),
      None => self.tag_totals.keys().map(String::as_str).collect(),
    };
    tags.sort_unstable();
    tags
      .into_iter()
      .map(|tag| (tag.to_string(), self.score(word, tag, position, context)))
      .filter(|(_, score)| *score > f64::NEG_INFINITY)
      .collect()
  }
}

/// The body of a `LEXICON` section: one `tag -> word SEEN count` line per pair.
impl fmt::Display for SimpleLexicon {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for ((tag, word), count) in &self.seen {
      writeln!(f, "{} -> {} SEEN {}", Quoted(tag), Quoted(word), count)?;
    }
    writeln!(f, "smooth = {}", self.smooth)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn toy() -> SimpleLexicon {
    let mut lex = SimpleLexicon::new(1.0);
    lex.train("the", "DT", 3.0);
    lex.train("dog", "NN", 2.0);
    lex.train("walk", "NN", 1.0);
    lex.train("walk", "VB", 1.0);
    lex.train("barks", "VBZ", 1.0);
    lex.finish_training();
    lex
  }

  #[test]
  fn seen_words_use_relative_frequency() {
    let lex = toy();
    assert!((lex.score("dog", "NN", 0, None) - (2.0f64 / 3.0).ln()).abs() < 1e-12);
    assert_eq!(lex.score("dog", "VB", 0, None), f64::NEG_INFINITY);
    let tags = lex
      .taggings("walk", 0, None)
      .into_iter()
      .map(|(t, _)| t)
      .collect::<Vec<_>>();
    assert_eq!(tags, vec!["NN", "VB"]);
  }

  #[test]
  fn unknown_words_prefer_open_classes() {
    let lex = toy();
    assert!(!lex.is_known("cat"));
    // only hapax words feed the unknown-word distribution, so DT gets smoothing alone
    assert!(lex.score("cat", "VBZ", 0, None) > lex.score("cat", "DT", 0, None));
    assert_eq!(lex.taggings("cat", 0, None).len(), 4);
    assert_eq!(lex.score("cat", "JJ", 0, None), f64::NEG_INFINITY);
  }

  #[test]
  fn boundary_only_takes_boundary_tag() {
    let lex = toy();
    assert_eq!(lex.score(BOUNDARY_WORD, BOUNDARY_TAG, 3, None), 0.0);
    assert_eq!(lex.score(BOUNDARY_WORD, "NN", 3, None), f64::NEG_INFINITY);
    assert_eq!(lex.score("dog", BOUNDARY_TAG, 0, None), f64::NEG_INFINITY);
  }

  #[test]
  fn text_round_trip() {
    let lex = toy();
    let text = lex.to_string();
    let lines = text.lines().enumerate().map(|(i, l)| (i + 1, l)).collect::<Vec<_>>();
    let back = SimpleLexicon::read_lines(&lines).unwrap();
    assert_eq!(back.count("walk", "VB"), 1.0);
    assert_eq!(back.smoothing(), 1.0);
    assert_eq!(back.score("cat", "NN", 0, None), lex.score("cat", "NN", 0, None));
  }
}
