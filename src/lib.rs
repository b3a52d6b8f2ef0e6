//! Exhaustive CKY parsing for probabilistic context-free grammars.
//!
//! [`ChartParser`] fills a log-space inside (and optionally outside) chart
//! for one sentence; trees come back out as the Viterbi parse, every tied
//! parse, the exact k best, or samples. [`SplittingTrainer`] learns latent
//! substate grammars from a binarized treebank, [`GrammarCompactor`] merges
//! redundant binarization states, and [`Model`] reads and writes the whole
//! thing as text.

#[macro_use]
extern crate lazy_static;

pub mod batch;
pub mod chart;
pub mod compact;
pub mod config;
pub mod constraint;
pub mod error;
pub mod forest;
pub mod grammar;
pub mod index;
pub mod kbest;
pub mod lexicon;
pub mod model;
pub mod parse_grammar;
pub mod parser;
pub mod rules;
pub mod split;
pub mod syntree;
pub mod token;
pub mod transform;
pub mod utils;

#[cfg(test)]
mod test_utils;

pub use crate::batch::{BatchParser, Outcome};
pub use crate::chart::Chart;
pub use crate::compact::{CompactionStrategy, ExactMinimizer, GrammarCompactor, NoCompaction};
pub use crate::config::{CompactorConfig, ParserConfig, TrainConfig};
pub use crate::constraint::ParserConstraint;
pub use crate::error::{Error, Result};
pub use crate::grammar::{Grammar, GrammarBuilder};
pub use crate::index::Index;
pub use crate::lexicon::{Lexicon, SimpleLexicon};
pub use crate::model::Model;
pub use crate::parser::{ChartParser, Scorer};
pub use crate::split::SplittingTrainer;
pub use crate::syntree::{SynTree, Tree};
pub use crate::token::Token;
pub use crate::transform::{Binarizer, TransformerChain, TreeTransformer};
pub use crate::utils::Interrupt;

#[test]
fn test_train_compact_save_and_parse() {
  let treebank = syntree::read_trees(
    "(ROOT (S (NP a) (VP b) (PP c)))
     (ROOT (S (NP a) (VP b) (PP c)))",
  )
  .unwrap();
  let binarizer = Binarizer::new(None);
  let binarized = treebank.iter().map(|t| binarizer.transform(t)).collect::<Vec<_>>();
  assert_eq!(binarized[0].to_string(), "(ROOT (S (NP a) (@S|NP (VP b) (PP c))))");

  let (grammar, lexicon) = SplittingTrainer::new(&binarized, TrainConfig::default())
    .unwrap()
    .train()
    .unwrap();
  let compact = GrammarCompactor::new(CompactorConfig::default())
    .compact_grammar(&grammar)
    .unwrap();
  let model: Model = Model::new(ParserConfig::default(), compact, lexicon)
    .to_text()
    .parse()
    .unwrap();

  let mut parser = ChartParser::new(&model.grammar, &model.lexicon, model.config.clone());
  assert!(parser.parse_words(&["a", "b", "c"]).unwrap());
  let tree = TransformerChain::postprocessing().transform(&parser.best_parse().unwrap());
  assert_eq!(tree.to_string(), "(ROOT (S (NP a) (VP b) (PP c)))");
}
