//! Sentence-level parallelism: independent parsers on a worker pool, results
//! returned in input order.

use rayon::prelude::*;

use crate::config::ParserConfig;
use crate::error::{Error, Result};
use crate::grammar::Grammar;
use crate::lexicon::Lexicon;
use crate::parser::ChartParser;
use crate::syntree::Tree;
use crate::token::Token;
use crate::utils::Interrupt;

/// What became of one sentence.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
  Parsed { tree: Tree, score: f64 },
  /// `tree` is a flat placeholder, `(ROOT (X w1) (X w2) ...)`.
  Failed { tree: Tree, reason: String },
  Cancelled,
}

impl Outcome {
  pub fn tree(&self) -> Option<&Tree> {
    match self {
      Self::Parsed { tree, .. } | Self::Failed { tree, .. } => Some(tree),
      Self::Cancelled => None,
    }
  }

  pub fn is_parsed(&self) -> bool {
    matches!(self, Self::Parsed { .. })
  }
}

fn flat_tree(start: &str, sentence: &[Token]) -> Tree {
  let children = sentence
    .iter()
    .enumerate()
    .map(|(i, t)| Tree::preterminal("X", &t.word, i))
    .collect();
  Tree::branch(start, children)
}

pub struct BatchParser<'a, L: Lexicon + ?Sized> {
  grammar: &'a Grammar,
  lexicon: &'a L,
  config: ParserConfig,
  pool: rayon::ThreadPool,
  interrupt: Option<Interrupt>,
}

impl<'a, L: Lexicon + ?Sized> BatchParser<'a, L> {
  pub fn new(grammar: &'a Grammar, lexicon: &'a L, config: ParserConfig, threads: usize) -> Result<Self> {
    let pool = rayon::ThreadPoolBuilder::new()
      .num_threads(threads.max(1))
      .thread_name(|i| format!("parse-{}", i))
      .build()?;
    Ok(Self {
      grammar,
      lexicon,
      config,
      pool,
      interrupt: None,
    })
  }

  /// Shared by every worker; raising it cancels in-flight and pending sentences.
  pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
    self.interrupt = Some(interrupt);
    self
  }

  pub fn threads(&self) -> usize {
    self.pool.current_num_threads()
  }

  /// Parses every sentence. Each worker owns one parser and its chart.
  pub fn parse_all(&self, sentences: &[Vec<Token>]) -> Vec<Outcome> {
    let outcomes: Vec<Outcome> = self.pool.install(|| {
      sentences
        .par_iter()
        .map_init(
          || {
            let parser = ChartParser::new(self.grammar, self.lexicon, self.config.clone());
            match &self.interrupt {
              Some(interrupt) => parser.with_interrupt(interrupt.clone()),
              None => parser,
            }
          },
          |parser, sentence| self.parse_one(parser, sentence),
        )
        .collect()
    });
    let parsed = outcomes.iter().filter(|o| o.is_parsed()).count();
    tracing::info!(sentences = sentences.len(), parsed, "batch finished");
    outcomes
  }

  fn parse_one(&self, parser: &mut ChartParser<'a, L>, sentence: &[Token]) -> Outcome {
    if self.interrupt.as_ref().is_some_and(Interrupt::is_triggered) {
      return Outcome::Cancelled;
    }
    let failed = |reason: String| {
      tracing::debug!(length = sentence.len(), %reason, "sentence failed");
      Outcome::Failed {
        tree: flat_tree(&self.grammar.start, sentence),
        reason,
      }
    };
    match parser.parse(sentence) {
      Ok(true) => match parser.best_parse() {
        Some(tree) => Outcome::Parsed {
          tree,
          score: parser.best_score(),
        },
        None => failed("best parse could not be extracted".to_string()),
      },
      Ok(false) => failed("no parse".to_string()),
      Err(Error::Interrupted) => Outcome::Cancelled,
      Err(e) => failed(e.to_string()),
    }
  }
}
