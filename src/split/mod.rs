//! Latent-annotation training: starting from the treebank's own categories,
//! repeatedly split every category into two substates, fit the substate
//! rule probabilities by EM over the fixed training trees, and optionally
//! merge back the splits that buy the least likelihood.
//!
//! Rule probabilities live in [`Betas`] tensors, one per production
//! template seen in the treebank (`S -> NP VP` shares one tensor across all
//! its substate combinations).

mod betas;
mod merge;
mod recount;

use std::collections::{BTreeMap, BTreeSet};

use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::prelude::*;

pub use self::betas::Betas;
use self::merge::{Correspondence, choose_merges, count_merge_effects, recount_merged};
use self::recount::{Accumulator, Pass};
use crate::config::TrainConfig;
use crate::error::{Error, Result};
use crate::grammar::{BinaryGrammar, Grammar, UnaryGrammar};
use crate::index::Index;
use crate::lexicon::SimpleLexicon;
use crate::rules::{BinaryRule, UnaryRule};
use crate::syntree::{SynTree, Tree};
use crate::utils::{Interrupt, log_sum};

type UnaryKey = (String, String);
type BinaryKey = (String, String, String);

/// How a training node expands. Child fields are node ids.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Shape {
  Lexical(String),
  Unary(UnaryKey, usize),
  Binary(BinaryKey, usize, usize),
}

impl Shape {
  pub(crate) fn children(&self) -> Vec<usize> {
    match self {
      Self::Lexical(_) => Vec::new(),
      Self::Unary(_, c) => vec![*c],
      Self::Binary(_, l, r) => vec![*l, *r],
    }
  }

  pub(crate) fn child_labels(&self) -> Vec<&str> {
    match self {
      Self::Lexical(_) => Vec::new(),
      Self::Unary((_, c), _) => vec![c.as_str()],
      Self::Binary((_, l, r), _, _) => vec![l.as_str(), r.as_str()],
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Node {
  pub label: String,
  pub shape: Shape,
}

/// A training tree flattened in preorder; node 0 is the root and children
/// always come after their parent.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TrainingTree {
  pub nodes: Vec<Node>,
  pub weight: f64,
}

impl TrainingTree {
  pub(crate) fn new(tree: &Tree, weight: f64) -> Result<Self> {
    let mut nodes = Vec::new();
    Self::flatten(tree, &mut nodes)?;
    Ok(Self { nodes, weight })
  }

  fn flatten(tree: &Tree, nodes: &mut Vec<Node>) -> Result<usize> {
    let Some((constituent, children)) = tree.get_branch() else {
      return Err(Error::Unbinarized(tree.to_string()));
    };
    let id = nodes.len();
    let label = constituent.value.clone();
    nodes.push(Node {
      label: label.clone(),
      shape: Shape::Lexical(String::new()),
    });
    let shape = match children.as_slice() {
      [SynTree::Leaf(word)] => Shape::Lexical(word.value.clone()),
      [child] => {
        let c = Self::flatten(child, nodes)?;
        Shape::Unary((label, child.label().to_string()), c)
      }
      [left, right] => {
        let l = Self::flatten(left, nodes)?;
        let r = Self::flatten(right, nodes)?;
        Shape::Binary((label, left.label().to_string(), right.label().to_string()), l, r)
      }
      _ => return Err(Error::Unbinarized(tree.to_string())),
    };
    nodes[id].shape = shape;
    Ok(id)
  }
}

/// Everything one EM iteration reads: substate counts, betas and the lexicon.
#[derive(Debug, Clone)]
pub(crate) struct Estimates {
  pub counts: BTreeMap<String, usize>,
  pub unary: BTreeMap<UnaryKey, Betas>,
  pub binary: BTreeMap<BinaryKey, Betas>,
  pub lexicon: SimpleLexicon,
}

impl Estimates {
  pub(crate) fn count(&self, label: &str) -> usize {
    self.counts.get(label).copied().unwrap_or(1)
  }

  pub(crate) fn betas(&self, shape: &Shape) -> Result<&Betas> {
    let found = match shape {
      Shape::Unary(key, _) => self.unary.get(key),
      Shape::Binary(key, _, _) => self.binary.get(key),
      Shape::Lexical(_) => None,
    };
    found.ok_or_else(|| {
      let labels = shape.child_labels().join(" ");
      Error::UnknownState(format!("production -> {}", labels))
    })
  }

  /// Largest change of any beta entry; a template missing on either side counts as infinite.
  fn max_change(&self, other: &Self) -> f64 {
    fn diff<K: Ord>(a: &BTreeMap<K, Betas>, b: &BTreeMap<K, Betas>) -> f64 {
      if a.len() != b.len() {
        return f64::INFINITY;
      }
      a.iter()
        .map(|(k, betas)| b.get(k).map_or(f64::INFINITY, |o| betas.max_abs_diff(o)))
        .fold(0.0, f64::max)
    }
    diff(&self.unary, &other.unary).max(diff(&self.binary, &other.binary))
  }
}

/// Drives the split / re-estimate / merge cycle over a fixed treebank.
pub struct SplittingTrainer {
  config: TrainConfig,
  trees: Vec<TrainingTree>,
  start: String,
  tags: BTreeSet<String>,
  estimates: Estimates,
  rng: StdRng,
  pool: Option<rayon::ThreadPool>,
  interrupt: Option<Interrupt>,
}

impl SplittingTrainer {
  /// Every tree counts once. Trees must be binarized, and their roots
  /// should be start symbols.
  pub fn new(trees: &[Tree], config: TrainConfig) -> Result<Self> {
    let weighted = trees.iter().map(|t| (t.clone(), 1.0)).collect::<Vec<_>>();
    Self::with_weights(&weighted, config)
  }

  pub fn with_weights(trees: &[(Tree, f64)], config: TrainConfig) -> Result<Self> {
    let trees = trees
      .iter()
      .map(|(tree, weight)| TrainingTree::new(tree, *weight))
      .collect::<Result<Vec<_>>>()?;
    let root = trees
      .first()
      .map(|t| t.nodes[0].label.clone())
      .ok_or(Error::EmptyTreebank)?;
    let pool = if config.threads > 1 {
      Some(
        rayon::ThreadPoolBuilder::new()
          .num_threads(config.threads)
          .thread_name(|i| format!("train-{}", i))
          .build()?,
      )
    } else {
      None
    };
    let mut trainer = Self {
      start: config.state_name(&root, 0),
      rng: StdRng::seed_from_u64(config.seed),
      config,
      trees,
      tags: BTreeSet::new(),
      estimates: Estimates {
        counts: BTreeMap::new(),
        unary: BTreeMap::new(),
        binary: BTreeMap::new(),
        lexicon: SimpleLexicon::default(),
      },
      pool,
      interrupt: None,
    };
    trainer.initialize();
    Ok(trainer)
  }

  /// Checked once per tree in every pass.
  pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
    self.interrupt = Some(interrupt);
    self
  }

  pub fn config(&self) -> &TrainConfig {
    &self.config
  }

  pub fn split_count(&self, label: &str) -> usize {
    self.estimates.count(label)
  }

  pub fn split_counts(&self) -> &BTreeMap<String, usize> {
    &self.estimates.counts
  }

  /// Resets to one substate per category: every template's single beta is
  /// 1 and the lexicon is the treebank's relative frequencies.
  pub fn initialize(&mut self) {
    let mut estimates = Estimates {
      counts: BTreeMap::new(),
      unary: BTreeMap::new(),
      binary: BTreeMap::new(),
      lexicon: SimpleLexicon::default(),
    };
    self.tags.clear();
    for tree in &self.trees {
      for node in &tree.nodes {
        estimates.counts.entry(node.label.clone()).or_insert(1);
        match &node.shape {
          Shape::Lexical(word) => {
            self.tags.insert(node.label.clone());
            let tag = self.config.state_name(&node.label, 0);
            estimates.lexicon.train(word, &tag, tree.weight);
          }
          Shape::Unary(key, _) => {
            estimates
              .unary
              .entry(key.clone())
              .or_insert_with(|| Betas::filled(&[1, 1], 0.0));
          }
          Shape::Binary(key, _, _) => {
            estimates
              .binary
              .entry(key.clone())
              .or_insert_with(|| Betas::filled(&[1, 1, 1], 0.0));
          }
        }
      }
    }
    estimates.lexicon.finish_training();
    tracing::info!(
      trees = self.trees.len(),
      categories = estimates.counts.len(),
      tags = self.tags.len(),
      templates = estimates.unary.len() + estimates.binary.len(),
      "initialized trainer"
    );
    self.estimates = estimates;
  }

  fn pass(&self) -> Pass<'_> {
    Pass {
      config: &self.config,
      estimates: &self.estimates,
    }
  }

  /// Folds `step` over every tree, on the worker pool when there is one.
  fn reduce<F>(&self, step: F) -> Result<Accumulator>
  where
    F: Fn(Accumulator, &TrainingTree) -> Result<Accumulator> + Send + Sync,
  {
    let interrupt = self.interrupt.as_ref();
    let step = |acc: Accumulator, tree: &TrainingTree| {
      Interrupt::check(interrupt)?;
      step(acc, tree)
    };
    match &self.pool {
      Some(pool) => pool.install(|| {
        self
          .trees
          .par_iter()
          .try_fold(Accumulator::default, &step)
          .try_reduce(Accumulator::default, |a, b| Ok(a.absorb(b)))
      }),
      None => self.trees.iter().try_fold(Accumulator::default(), step),
    }
  }

  /// One E step at the current granularity.
  fn recount_all(&self) -> Result<Accumulator> {
    let pass = self.pass();
    self.reduce(|mut acc, tree| {
      let probs = pass.probs(tree, None)?;
      let transitions = pass.transitions(tree, &probs)?;
      pass.accumulate(tree, &transitions, &mut acc);
      Ok(acc)
    })
  }

  /// Doubles every splittable category. Parent rows are copied, child mass
  /// is divided with a random 45 to 55 percent share, and one pass at the
  /// new granularity produces the split lexicon.
  pub fn split(&mut self) -> Result<()> {
    let config = &self.config;
    let rng = &mut self.rng;
    let mut split_betas = |betas: &Betas, labels: Vec<&str>| {
      labels
        .iter()
        .enumerate()
        .filter(|(_, label)| config.is_splittable(label))
        .fold(betas.clone(), |b, (axis, _)| b.split_axis(axis, rng))
    };

    let mut unary = BTreeMap::new();
    for (key, betas) in &self.estimates.unary {
      unary.insert(key.clone(), split_betas(betas, vec![key.0.as_str(), key.1.as_str()]));
    }
    let mut binary = BTreeMap::new();
    for (key, betas) in &self.estimates.binary {
      binary.insert(key.clone(), split_betas(betas, vec![key.0.as_str(), key.1.as_str(), key.2.as_str()]));
    }
    let mut counts = self.estimates.counts.clone();
    for (label, n) in counts.iter_mut() {
      if self.config.is_splittable(label) {
        *n *= 2;
      }
    }

    let splitting = Estimates {
      counts,
      unary,
      binary,
      lexicon: self.estimates.lexicon.clone(),
    };
    let pass = Pass {
      config: &self.config,
      estimates: &splitting,
    };
    let mut acc = Accumulator::default();
    for tree in &self.trees {
      Interrupt::check(self.interrupt.as_ref())?;
      let probs = pass.probs(tree, Some(&mut self.rng))?;
      let transitions = pass.transitions(tree, &probs)?;
      pass.accumulate(tree, &transitions, &mut acc);
    }
    let smooth = self.estimates.lexicon.smoothing();
    self.estimates = acc.into_estimates(splitting.counts, smooth);
    tracing::info!(
      substates = self.estimates.counts.values().sum::<usize>(),
      "split categories"
    );
    Ok(())
  }

  /// EM at the current granularity until no beta moves more than the
  /// convergence tolerance. Returns the iterations run and whether it converged.
  pub fn reestimate(&mut self) -> Result<(usize, bool)> {
    let smooth = self.estimates.lexicon.smoothing();
    for iteration in 1..=self.config.max_iterations {
      let acc = self.recount_all()?;
      let next = acc.into_estimates(self.estimates.counts.clone(), smooth);
      let change = self.estimates.max_change(&next);
      self.estimates = next;
      tracing::debug!(iteration, change, "re-estimated betas");
      if change <= self.config.convergence_tolerance {
        return Ok((iteration, true));
      }
    }
    tracing::warn!(
      iterations = self.config.max_iterations,
      "re-estimation stopped without converging"
    );
    Ok((self.config.max_iterations, false))
  }

  /// Re-merges the `split_recombine_rate` share of substate pairs whose
  /// split gained the least likelihood. Returns how many pairs merged.
  pub fn merge(&mut self) -> Result<usize> {
    let rate = self.config.split_recombine_rate;
    if rate <= 0.0 {
      return Ok(0);
    }
    let mass = self.recount_all()?.mass;
    let pass = self.pass();
    let mut deltas = BTreeMap::new();
    for tree in &self.trees {
      Interrupt::check(self.interrupt.as_ref())?;
      let probs = pass.probs(tree, None)?;
      count_merge_effects(pass, tree, &probs, &mass, &mut deltas);
    }
    let merges = choose_merges(deltas, rate);
    if merges.is_empty() {
      return Ok(0);
    }

    let correspondence = Correspondence::new(&self.estimates.counts, &merges);
    let acc = self.reduce(|mut acc, tree| {
      recount_merged(pass, tree, &correspondence, &mut acc)?;
      Ok(acc)
    })?;
    let mut counts = self.estimates.counts.clone();
    for merge in &merges {
      tracing::debug!(label = %merge.label, pair = merge.pair, delta = merge.delta, "merging");
      if let Some(n) = counts.get_mut(&merge.label) {
        *n -= 1;
      }
    }
    let smooth = self.estimates.lexicon.smoothing();
    self.estimates = acc.into_estimates(counts, smooth);
    tracing::info!(merged = merges.len(), "merged substates");
    Ok(merges.len())
  }

  /// Reads off a flat grammar: each rule scores its expected count over
  /// the expected visits of its parent substate. Substates with almost no
  /// mass, and rules with no finite score, are left out.
  pub fn finalize(&self) -> Result<(Grammar, SimpleLexicon)> {
    let acc = self.recount_all()?;
    let name = |label: &str, i: usize| self.config.state_name(label, i);

    let mut states = Index::new();
    states.add(&self.start);
    for (label, &n) in &self.estimates.counts {
      for i in 0..n {
        states.add(&name(label, i));
      }
    }
    let tags = self
      .tags
      .iter()
      .flat_map(|t| (0..self.estimates.count(t)).map(move |i| name(t, i)))
      .collect::<Index>();
    let state = |label: &str, i: usize| {
      let name = name(label, i);
      states.index_of(&name).ok_or(Error::UnknownState(name))
    };

    let eps = self.config.mass_epsilon;
    let parent_norms = |label: &str| -> Vec<Option<f64>> {
      acc
        .mass
        .get(label)
        .map(|m| m.iter().map(|&m| (m >= eps).then(|| m.ln())).collect())
        .unwrap_or_default()
    };

    let mut unary = UnaryGrammar::new(states.len());
    for ((p, c), betas) in &acc.unary {
      for (i, norm) in parent_norms(p).into_iter().enumerate() {
        let Some(norm) = norm else { continue };
        for j in 0..betas.dims()[1] {
          let score = betas.get(&[i, j]) - norm;
          if score.is_finite() {
            unary.add_rule(UnaryRule::new(state(p, i)?, state(c, j)?, score))?;
          }
        }
      }
    }
    let mut binary = BinaryGrammar::new(&states);
    for ((p, l, r), betas) in &acc.binary {
      for (i, norm) in parent_norms(p).into_iter().enumerate() {
        let Some(norm) = norm else { continue };
        for j in 0..betas.dims()[1] {
          for k in 0..betas.dims()[2] {
            let score = betas.get(&[i, j, k]) - norm;
            if score.is_finite() {
              binary.add_rule(BinaryRule::new(state(p, i)?, state(l, j)?, state(r, k)?, score))?;
            }
          }
        }
      }
    }
    tracing::info!(
      states = states.len(),
      unary = unary.len(),
      binary = binary.len(),
      "built split grammar"
    );
    let lexicon = acc.lexicon(self.estimates.lexicon.smoothing());
    let grammar = Grammar::new(&self.start, states, tags, unary, binary)?;
    Ok((grammar, lexicon))
  }

  /// Runs the whole schedule: `split_count` rounds of split, re-estimate
  /// and merge, then [`SplittingTrainer::finalize`].
  pub fn train(mut self) -> Result<(Grammar, SimpleLexicon)> {
    for cycle in 1..=self.config.split_count {
      self.split()?;
      let (iterations, converged) = self.reestimate()?;
      let merged = self.merge()?;
      tracing::info!(cycle, iterations, converged, merged, "finished split cycle");
    }
    self.finalize()
  }

  /// `ln P(tree)` summed over substates under the current estimates.
  pub fn tree_log_likelihood(&self, tree: &Tree) -> Result<f64> {
    let tree = TrainingTree::new(tree, 1.0)?;
    let inside = self.pass().inside(&tree, None)?;
    Ok(log_sum(&inside[0]))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::ParserConfig;
  use crate::parser::ChartParser;
  use crate::transform::{SubcategoryStripper, TreeTransformer};

  fn trees(text: &str) -> Vec<Tree> {
    crate::syntree::read_trees(text).unwrap()
  }

  const TOY: &str = "(ROOT (S (NP Time) (VP flies)))
    (ROOT (S (NP fruit) (VP flies)))
    (ROOT (S (NP Time) (VP (V flies) (NP fruit))))";

  #[test]
  fn single_tree_converges_without_losing_likelihood() {
    let treebank = trees("(ROOT (S (NP Time) (VP flies)))");
    let mut trainer = SplittingTrainer::new(&treebank, TrainConfig::default()).unwrap();
    let before = trainer.tree_log_likelihood(&treebank[0]).unwrap();
    let (iterations, converged) = trainer.reestimate().unwrap();
    assert!(converged);
    assert!(iterations <= 3);
    let after = trainer.tree_log_likelihood(&treebank[0]).unwrap();
    assert!(after >= before - 1e-9);
  }

  #[test]
  fn split_doubles_all_but_start_symbols() {
    let treebank = trees(TOY);
    let mut trainer = SplittingTrainer::new(&treebank, TrainConfig::default()).unwrap();
    assert_eq!(trainer.split_count("NP"), 1);
    trainer.split().unwrap();
    assert_eq!(trainer.split_count("ROOT"), 1);
    assert_eq!(trainer.split_count("NP"), 2);
    assert_eq!(trainer.split_count("V"), 2);
    let ll = trainer.tree_log_likelihood(&treebank[2]).unwrap();
    assert!(ll.is_finite());
  }

  #[test]
  fn trained_grammar_parses_its_treebank() {
    let treebank = trees(TOY);
    let trainer = SplittingTrainer::new(&treebank, TrainConfig::default()).unwrap();
    let (grammar, lexicon) = trainer.train().unwrap();
    assert!(grammar.states.contains("NP^1"));
    assert!(grammar.states.contains("ROOT"));
    assert!(!grammar.states.contains("ROOT^0"));
    assert!(grammar.tags.contains("VP^1"));
    assert!(grammar.unary.rules().iter().all(|r| r.score.is_finite()));
    assert!(grammar.binary.rules().iter().all(|r| r.score.is_finite()));

    let mut parser = ChartParser::new(&grammar, &lexicon, ParserConfig::default());
    assert!(parser.parse_words(&["fruit", "flies"]).unwrap());
    let tree = SubcategoryStripper.transform(&parser.best_parse().unwrap());
    assert_eq!(tree.to_string(), "(ROOT (S (NP fruit) (VP flies)))");
  }

  #[test]
  fn merge_undoes_a_share_of_splits() {
    let treebank = trees(TOY);
    let config = TrainConfig {
      split_recombine_rate: 0.5,
      ..TrainConfig::default()
    };
    let mut trainer = SplittingTrainer::new(&treebank, config).unwrap();
    trainer.split().unwrap();
    trainer.reestimate().unwrap();
    let before = trainer.split_counts().values().sum::<usize>();
    let merged = trainer.merge().unwrap();
    assert!(merged >= 1);
    assert_eq!(trainer.split_counts().values().sum::<usize>(), before - merged);
    assert!(trainer.split_counts().values().all(|&n| n >= 1));
    let (grammar, _) = trainer.finalize().unwrap();
    assert!(grammar.binary.rules().iter().all(|r| !r.score.is_nan()));
  }

  #[test]
  fn parallel_recount_matches_sequential() {
    let treebank = trees(TOY);
    let run = |threads| {
      let config = TrainConfig {
        threads,
        ..TrainConfig::default()
      };
      SplittingTrainer::new(&treebank, config).unwrap().train().unwrap()
    };
    let (one, _) = run(1);
    let (four, _) = run(4);
    assert_eq!(one.states, four.states);
    assert_eq!(one.binary.len(), four.binary.len());
    for (a, b) in one.binary.rules().iter().zip(four.binary.rules()) {
      assert_eq!((a.parent, a.left_child, a.right_child), (b.parent, b.left_child, b.right_child));
      assert!((a.score - b.score).abs() < 1e-6);
    }
  }

  #[test]
  fn rejects_bad_treebanks() {
    assert!(matches!(
      SplittingTrainer::new(&[], TrainConfig::default()),
      Err(Error::EmptyTreebank)
    ));
    let flat = trees("(ROOT (S (A a) (B b) (C c)))");
    assert!(matches!(
      SplittingTrainer::new(&flat, TrainConfig::default()),
      Err(Error::Unbinarized(_))
    ));
  }

  #[test]
  fn interrupt_stops_reestimation() {
    let interrupt = Interrupt::new();
    let mut trainer = SplittingTrainer::new(&trees(TOY), TrainConfig::default())
      .unwrap()
      .with_interrupt(interrupt.clone());
    interrupt.trigger();
    assert!(matches!(trainer.reestimate(), Err(Error::Interrupted)));
  }
}
