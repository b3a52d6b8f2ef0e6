//! Immutable settings handed to each component when it is built.

use std::fmt;

use crate::error::{Error, Result};
use crate::lexicon::BOUNDARY_TAG;
use crate::utils::MATCH_TOLERANCE;

/// Chart parser settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ParserConfig {
  /// Longest sentence the parser will accept.
  pub max_length: usize,
  /// Retry a failed parse once with every tag flooded in.
  pub do_recovery: bool,
  /// Keep lexicon tagging as is during the recovery retry.
  pub no_recovery_tagging: bool,
  /// Compare scores divided by the number of words spanned.
  pub length_normalization: bool,
  pub compute_outside: bool,
  /// Gold tags match any tag state that starts with them.
  pub force_tag_beginnings: bool,
  /// Input ends with the boundary token, which only combines over the whole sentence.
  pub boundary_last: bool,
  /// Tag scores are multiplied by `1 + w`.
  pub tag_score_multiplier: Option<f64>,
  /// Outside scores below `best score - threshold` are reported as -inf.
  pub pcfg_threshold: Option<f64>,
  pub match_tolerance: f64,
  pub flood_tag_score: f64,
}

impl Default for ParserConfig {
  fn default() -> Self {
    Self {
      max_length: 200,
      do_recovery: true,
      no_recovery_tagging: false,
      length_normalization: false,
      compute_outside: false,
      force_tag_beginnings: false,
      boundary_last: false,
      tag_score_multiplier: None,
      pcfg_threshold: None,
      match_tolerance: MATCH_TOLERANCE,
      flood_tag_score: -1000.0,
    }
  }
}

impl ParserConfig {
  /// Applies one `key = value` line of an `OPTIONS` section.
  pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
    fn flag(key: &str, value: &str) -> Result<bool> {
      value
        .parse()
        .map_err(|_| Error::format(0, format!("{}: expected true or false, got {:?}", key, value)))
    }
    fn number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
      value
        .parse()
        .map_err(|_| Error::format(0, format!("{}: bad number {:?}", key, value)))
    }
    fn optional(key: &str, value: &str) -> Result<Option<f64>> {
      if value == "none" {
        Ok(None)
      } else {
        number(key, value).map(Some)
      }
    }

    match key {
      "max_length" => self.max_length = number(key, value)?,
      "do_recovery" => self.do_recovery = flag(key, value)?,
      "no_recovery_tagging" => self.no_recovery_tagging = flag(key, value)?,
      "length_normalization" => self.length_normalization = flag(key, value)?,
      "compute_outside" => self.compute_outside = flag(key, value)?,
      "force_tag_beginnings" => self.force_tag_beginnings = flag(key, value)?,
      "boundary_last" => self.boundary_last = flag(key, value)?,
      "tag_score_multiplier" => self.tag_score_multiplier = optional(key, value)?,
      "pcfg_threshold" => self.pcfg_threshold = optional(key, value)?,
      "match_tolerance" => self.match_tolerance = number(key, value)?,
      "flood_tag_score" => self.flood_tag_score = number(key, value)?,
      _ => tracing::warn!(key, "ignoring unknown parser option"),
    }
    Ok(())
  }
}

/// `key = value` lines, the body of an `OPTIONS` section.
impl fmt::Display for ParserConfig {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let optional = |v: Option<f64>| v.map_or("none".to_string(), |v| v.to_string());
    writeln!(f, "max_length = {}", self.max_length)?;
    writeln!(f, "do_recovery = {}", self.do_recovery)?;
    writeln!(f, "no_recovery_tagging = {}", self.no_recovery_tagging)?;
    writeln!(f, "length_normalization = {}", self.length_normalization)?;
    writeln!(f, "compute_outside = {}", self.compute_outside)?;
    writeln!(f, "force_tag_beginnings = {}", self.force_tag_beginnings)?;
    writeln!(f, "boundary_last = {}", self.boundary_last)?;
    writeln!(f, "tag_score_multiplier = {}", optional(self.tag_score_multiplier))?;
    writeln!(f, "pcfg_threshold = {}", optional(self.pcfg_threshold))?;
    writeln!(f, "match_tolerance = {}", self.match_tolerance)?;
    writeln!(f, "flood_tag_score = {}", self.flood_tag_score)
  }
}

/// State-splitting trainer settings.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainConfig {
  /// Number of split/re-estimate/merge cycles.
  pub split_count: usize,
  /// Fraction of fresh splits undone after each cycle; 0 disables merging.
  pub split_recombine_rate: f64,
  /// Categories that are never split.
  pub start_symbols: Vec<String>,
  pub boundary_tag: String,
  /// Largest change in any beta that still counts as converged.
  pub convergence_tolerance: f64,
  pub max_iterations: usize,
  pub lexicon_smoothing: f64,
  /// Substates with less total mass contribute no rules.
  pub mass_epsilon: f64,
  pub seed: u64,
  /// Worker threads for re-estimation; 1 runs on the caller's thread.
  pub threads: usize,
}

impl Default for TrainConfig {
  fn default() -> Self {
    Self {
      split_count: 1,
      split_recombine_rate: 0.0,
      start_symbols: vec!["ROOT".to_string()],
      boundary_tag: BOUNDARY_TAG.to_string(),
      convergence_tolerance: 1e-4,
      max_iterations: 50,
      lexicon_smoothing: 1e-4,
      mass_epsilon: 1e-4,
      seed: 87543875943265,
      threads: 1,
    }
  }
}

impl TrainConfig {
  pub fn is_start_symbol(&self, label: &str) -> bool {
    self.start_symbols.iter().any(|s| s == label)
  }

  /// Start symbols and the boundary tag keep a single substate.
  pub fn is_splittable(&self, label: &str) -> bool {
    !self.is_start_symbol(label) && label != self.boundary_tag
  }

  /// `NP^3`, or the bare label for categories that are never split.
  pub fn state_name(&self, label: &str, substate: usize) -> String {
    if self.is_splittable(label) {
      format!("{}^{}", label, substate)
    } else {
      label.to_string()
    }
  }
}

/// Grammar compactor settings.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CompactorConfig {
  /// Rule scores are raw counts to be renormalized per parent.
  pub scores_are_counts: bool,
  /// Subtracted from each count before normalizing.
  pub rule_discount: f64,
}

#[test]
fn test_options_round_trip() {
  let config = ParserConfig {
    max_length: 40,
    length_normalization: true,
    tag_score_multiplier: Some(0.5),
    ..ParserConfig::default()
  };
  let mut back = ParserConfig::default();
  for line in config.to_string().lines() {
    let (key, value) = line.split_once(" = ").unwrap();
    back.set(key, value).unwrap();
  }
  assert_eq!(back, config);
  assert!(back.set("max_length", "lots").is_err());
}
