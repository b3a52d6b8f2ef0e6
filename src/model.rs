//! Line-oriented text persistence for a grammar, its lexicon and parser options.
//!
//! A model is a run of `BEGIN <SECTION>` blocks, each ended by a blank line,
//! always in the order `OPTIONS`, `STATE_INDEX`, `WORD_INDEX`, `TAG_INDEX`,
//! `LEXICON`, `UNARY_GRAMMAR`, `BINARY_GRAMMAR`, `DEPENDENCY_GRAMMAR`.

use std::fmt;
use std::io::Write;
use std::str::FromStr;

use crate::config::ParserConfig;
use crate::error::{Error, Result};
use crate::grammar::{BinaryGrammar, ClosureMode, Grammar, UnaryGrammar};
use crate::index::Index;
use crate::lexicon::SimpleLexicon;
use crate::parse_grammar::{Sections, parse_rule_line};
use crate::rules::{BinaryRule, UnaryRule};

/// Everything a parser needs, as written to and read from disk.
#[derive(Debug, Clone)]
pub struct Model {
  pub config: ParserConfig,
  pub grammar: Grammar,
  pub lexicon: SimpleLexicon,
}

impl Model {
  pub fn new(config: ParserConfig, grammar: Grammar, lexicon: SimpleLexicon) -> Self {
    Self {
      config,
      grammar,
      lexicon,
    }
  }

  pub fn write_text(&self, mut w: impl Write) -> Result<()> {
    write!(w, "{}", self)?;
    Ok(())
  }

  pub fn to_text(&self) -> String {
    self.to_string()
  }

  pub fn read_text(input: &str) -> Result<Self> {
    let mut sections = Sections::new(input);

    let mut config = ParserConfig::default();
    let mut start = None;
    let mut closure = ClosureMode::Max;
    for (line, text) in sections.block("OPTIONS")? {
      let (key, value) = text
        .split_once('=')
        .ok_or_else(|| Error::format(line, format!("expected key = value, found {:?}", text)))?;
      let (key, value) = (key.trim(), value.trim());
      if key == "start" {
        start = Some(value.to_string());
        continue;
      }
      if key == "closure" {
        closure = match value {
          "max" => ClosureMode::Max,
          "sum" => ClosureMode::Sum,
          _ => return Err(Error::format(line, format!("closure must be max or sum, found {:?}", value))),
        };
        continue;
      }
      config.set(key, value).map_err(|e| at_line(e, line))?;
    }
    let start = start.ok_or_else(|| Error::format(0, "OPTIONS has no start symbol"))?;

    let states = read_index(&sections.block("STATE_INDEX")?)?;
    let words = read_index(&sections.block("WORD_INDEX")?)?;
    let tags = read_index(&sections.block("TAG_INDEX")?)?;
    let lexicon_lines = sections.block("LEXICON")?;
    let lexicon = SimpleLexicon::read_lines(&lexicon_lines)?;
    if let Some(word) = lexicon.words().into_iter().find(|w| !words.contains(w)) {
      return Err(Error::format(0, format!("lexicon word {:?} is not in WORD_INDEX", word)));
    }

    let id = |line: usize, name: &str| {
      states
        .index_of(name)
        .ok_or_else(|| Error::format(line, format!("unknown state {:?}", name)))
    };
    let mut unary = UnaryGrammar::with_mode(states.len(), closure);
    for (line, text) in sections.block("UNARY_GRAMMAR")? {
      let rule = parse_rule_line(text).map_err(|e| Error::format(line, e))?;
      let [child] = rule.children.as_slice() else {
        return Err(Error::format(line, "unary rules take one child"));
      };
      unary.add_rule(UnaryRule::new(id(line, &rule.parent)?, id(line, child)?, rule.score))?;
    }
    let mut binary = BinaryGrammar::new(&states);
    for (line, text) in sections.block("BINARY_GRAMMAR")? {
      let rule = parse_rule_line(text).map_err(|e| Error::format(line, e))?;
      let [left, right] = rule.children.as_slice() else {
        return Err(Error::format(line, "binary rules take two children"));
      };
      binary.add_rule(BinaryRule::new(
        id(line, &rule.parent)?,
        id(line, left)?,
        id(line, right)?,
        rule.score,
      ))?;
    }
    if let Some(&(line, _)) = sections.block("DEPENDENCY_GRAMMAR")?.first() {
      return Err(Error::format(line, "dependency grammars are not supported"));
    }
    if !sections.is_exhausted() {
      return Err(Error::format(0, "trailing input after DEPENDENCY_GRAMMAR"));
    }

    let grammar = Grammar::new(&start, states, tags, unary, binary)?;
    tracing::debug!(
      states = grammar.num_states(),
      unary = grammar.unary.len(),
      binary = grammar.binary.len(),
      "read model"
    );
    Ok(Self::new(config, grammar, lexicon))
  }
}

/// `ParserConfig::set` reports line 0; give it the real one.
fn at_line(err: Error, line: usize) -> Error {
  match err {
    Error::Format { message, .. } => Error::Format { line, message },
    other => other,
  }
}

/// Reads `id=object` lines, which must count up from zero.
fn read_index(lines: &[(usize, &str)]) -> Result<Index> {
  let mut index = Index::new();
  for &(line, text) in lines {
    let (id, object) = text
      .split_once('=')
      .ok_or_else(|| Error::format(line, format!("expected id=object, found {:?}", text)))?;
    if id.trim().parse::<usize>().ok() != Some(index.len()) {
      return Err(Error::format(line, format!("expected id {}, found {:?}", index.len(), id)));
    }
    index.add(object);
  }
  Ok(index)
}

impl fmt::Display for Model {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let words = self.lexicon.words().into_iter().collect::<Index>();

    writeln!(f, "BEGIN OPTIONS")?;
    writeln!(f, "start = {}", self.grammar.start)?;
    let closure = match self.grammar.unary.mode() {
      ClosureMode::Max => "max",
      ClosureMode::Sum => "sum",
    };
    writeln!(f, "closure = {}", closure)?;
    writeln!(f, "{}", self.config)?;
    writeln!(f, "BEGIN STATE_INDEX")?;
    writeln!(f, "{}", self.grammar.states)?;
    writeln!(f, "BEGIN WORD_INDEX")?;
    writeln!(f, "{}", words)?;
    writeln!(f, "BEGIN TAG_INDEX")?;
    writeln!(f, "{}", self.grammar.tags)?;
    writeln!(f, "BEGIN LEXICON")?;
    writeln!(f, "{}", self.lexicon)?;
    writeln!(f, "BEGIN UNARY_GRAMMAR")?;
    for rule in self.grammar.unary.rules() {
      writeln!(f, "{}", rule.display(&self.grammar.states))?;
    }
    writeln!(f)?;
    writeln!(f, "BEGIN BINARY_GRAMMAR")?;
    for rule in self.grammar.binary.rules() {
      writeln!(f, "{}", rule.display(&self.grammar.states))?;
    }
    writeln!(f)?;
    writeln!(f, "BEGIN DEPENDENCY_GRAMMAR")?;
    writeln!(f)
  }
}

impl FromStr for Model {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    Self::read_text(s)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::grammar::GrammarBuilder;
  use crate::parser::ChartParser;

  fn model() -> Model {
    let mut g = GrammarBuilder::new("ROOT");
    g.unary("ROOT", "S", 0.0)
      .binary("S", "NP", "VP", -0.1)
      .binary("VP", "V", "NP", -0.4)
      .unary("VP", "V", -1.2)
      .unary("NP", "N", -0.3)
      .tag("N")
      .tag("V");
    let mut lexicon = SimpleLexicon::new(0.5);
    for (word, tag, count) in [("time", "N", 3.0), ("flies", "V", 2.0), ("flies", "N", 1.0), ("arrows", "N", 2.0)] {
      lexicon.train(word, tag, count);
    }
    lexicon.finish_training();
    let config = ParserConfig {
      max_length: 30,
      ..ParserConfig::default()
    };
    Model::new(config, g.build().unwrap(), lexicon)
  }

  #[test]
  fn round_trip_parses_the_same() {
    let model = model();
    let text = model.to_text();
    let back: Model = text.parse().unwrap();
    assert_eq!(back.config, model.config);
    assert_eq!(back.grammar.start, "ROOT");
    assert_eq!(back.grammar.states, model.grammar.states);
    assert_eq!(back.to_text(), text);

    let words = ["time", "flies", "arrows"];
    let mut before = ChartParser::new(&model.grammar, &model.lexicon, model.config.clone());
    let mut after = ChartParser::new(&back.grammar, &back.lexicon, back.config.clone());
    assert!(before.parse_words(&words).unwrap());
    assert!(after.parse_words(&words).unwrap());
    assert_eq!(after.best_score(), before.best_score());
    assert_eq!(
      after.best_parse().map(|t| t.to_string()),
      before.best_parse().map(|t| t.to_string())
    );
  }

  #[test]
  fn sum_closure_survives_a_round_trip() {
    let states: Index = ["A", "B", "C"].into_iter().collect();
    let tags: Index = ["C"].into_iter().collect();
    let mut unary = UnaryGrammar::with_mode(states.len(), ClosureMode::Sum);
    unary.add_rule(UnaryRule::new(0, 2, 0.25f64.ln())).unwrap();
    unary.add_rule(UnaryRule::new(0, 1, 0.5f64.ln())).unwrap();
    unary.add_rule(UnaryRule::new(1, 2, 0.5f64.ln())).unwrap();
    let binary = BinaryGrammar::new(&states);
    let grammar = Grammar::new("A", states, tags, unary, binary).unwrap();
    let mut lexicon = SimpleLexicon::new(0.5);
    lexicon.train("c", "C", 1.0);
    lexicon.finish_training();
    let model = Model::new(ParserConfig::default(), grammar, lexicon);

    let text = model.to_text();
    assert!(text.contains("closure = sum\n"));
    let back: Model = text.parse().unwrap();
    assert_eq!(back.grammar.unary.mode(), ClosureMode::Sum);
    assert_eq!(back.to_text(), text);

    let mut before = ChartParser::new(&model.grammar, &model.lexicon, model.config.clone());
    let mut after = ChartParser::new(&back.grammar, &back.lexicon, back.config.clone());
    assert!(before.parse_words(&["c"]).unwrap());
    assert!(after.parse_words(&["c"]).unwrap());
    assert!((after.best_score() - before.best_score()).abs() < 1e-12);
  }

  #[test]
  fn unknown_closure_mode_is_a_format_error() {
    let text = model().to_text().replacen("closure = max", "closure = mean", 1);
    assert!(matches!(text.parse::<Model>(), Err(Error::Format { line: 3, .. })));
  }

  #[test]
  fn sections_are_written_in_order() {
    let text = model().to_text();
    let headers = text
      .lines()
      .filter_map(|l| l.strip_prefix("BEGIN "))
      .collect::<Vec<_>>();
    assert_eq!(
      headers,
      [
        "OPTIONS",
        "STATE_INDEX",
        "WORD_INDEX",
        "TAG_INDEX",
        "LEXICON",
        "UNARY_GRAMMAR",
        "BINARY_GRAMMAR",
        "DEPENDENCY_GRAMMAR"
      ]
    );
    assert!(text.ends_with("BEGIN DEPENDENCY_GRAMMAR\n\n"));
  }

  #[test]
  fn misplaced_section_is_a_format_error() {
    let text = model().to_text();
    let swapped = text.replacen("BEGIN WORD_INDEX", "BEGIN TAG_INDEX", 1);
    assert!(matches!(swapped.parse::<Model>(), Err(Error::Format { .. })));
    let truncated = &text[..text.find("BEGIN BINARY_GRAMMAR").unwrap()];
    assert!(matches!(truncated.parse::<Model>(), Err(Error::Format { .. })));
  }

  #[test]
  fn unknown_state_in_a_rule_reports_its_line() {
    let text = model()
      .to_text()
      .replacen("\"S\" -> \"NP\" \"VP\"", "\"S\" -> \"NP\" \"XP\"", 1);
    let err = text.parse::<Model>().unwrap_err();
    assert!(matches!(err, Error::Format { line, .. } if line > 0));
  }
}
