//! One inside-outside pass over a training tree, and the expected-count
//! accumulation that turns its transition posteriors into new betas.

use std::collections::BTreeMap;

use rand::Rng;
use rand::rngs::StdRng;

use super::betas::Betas;
use super::{Estimates, Shape, TrainingTree};
use crate::config::TrainConfig;
use crate::error::Result;
use crate::lexicon::{Lexicon, SimpleLexicon};
use crate::utils::log_add;

/// Per-node substate vectors for one tree, indexed like `TrainingTree::nodes`.
#[derive(Debug, Clone)]
pub(crate) struct TreeProbs {
  pub inside: Vec<Vec<f64>>,
  pub outside: Vec<Vec<f64>>,
}

/// The read-only half of a pass: the settings and the estimates being scored.
#[derive(Clone, Copy)]
pub(crate) struct Pass<'a> {
  pub config: &'a TrainConfig,
  pub estimates: &'a Estimates,
}

impl Pass<'_> {
  /// Inside vectors, children first. With `split_rng`, freshly split tags
  /// score at the previous granularity and divide each score randomly
  /// between the two halves.
  pub fn inside(&self, tree: &TrainingTree, mut split_rng: Option<&mut StdRng>) -> Result<Vec<Vec<f64>>> {
    let mut inside: Vec<Vec<f64>> = vec![Vec::new(); tree.nodes.len()];
    for id in (0..tree.nodes.len()).rev() {
      let node = &tree.nodes[id];
      let n = self.estimates.count(&node.label);
      let scores = match &node.shape {
        Shape::Lexical(word) => self.lexical(&node.label, word, n, split_rng.as_deref_mut()),
        shape => {
          let betas = self.estimates.betas(shape)?;
          let children = shape.children();
          let mut scores = vec![f64::NEG_INFINITY; n];
          betas.for_each(|idx, v| {
            let mut s = v;
            for (axis, &child) in children.iter().enumerate() {
              s += inside[child][idx[axis + 1]];
            }
            scores[idx[0]] = log_add(scores[idx[0]], s);
          });
          scores
        }
      };
      inside[id] = scores;
    }
    Ok(inside)
  }

  fn lexical(&self, tag: &str, word: &str, n: usize, split_rng: Option<&mut StdRng>) -> Vec<f64> {
    let score = |i: usize| {
      self
        .estimates
        .lexicon
        .score(word, &self.config.state_name(tag, i), 0, None)
    };
    match split_rng {
      Some(rng) if self.config.is_splittable(tag) => {
        let mut scores = vec![f64::NEG_INFINITY; n];
        for i in 0..n / 2 {
          let base = score(i);
          let w = 0.45 + rng.random::<f64>() * 0.1;
          scores[2 * i] = base + w.ln();
          scores[2 * i + 1] = base + (1.0 - w).ln();
        }
        scores
      }
      _ => (0..n).map(score).collect(),
    }
  }

  /// Outside vectors, parents first. The root's are all zero.
  pub fn outside(&self, tree: &TrainingTree, inside: &[Vec<f64>]) -> Result<Vec<Vec<f64>>> {
    let mut outside: Vec<Vec<f64>> = vec![Vec::new(); tree.nodes.len()];
    outside[0] = vec![0.0; inside[0].len()];
    for (id, node) in tree.nodes.iter().enumerate() {
      match &node.shape {
        Shape::Lexical(_) => {}
        Shape::Unary(_, child) => {
          let betas = self.estimates.betas(&node.shape)?;
          let parent = &outside[id];
          let mut scores = vec![f64::NEG_INFINITY; inside[*child].len()];
          betas.for_each(|idx, v| {
            scores[idx[1]] = log_add(scores[idx[1]], v + parent[idx[0]]);
          });
          outside[*child] = scores;
        }
        Shape::Binary(_, left, right) => {
          let betas = self.estimates.betas(&node.shape)?;
          let parent = &outside[id];
          let mut left_scores = vec![f64::NEG_INFINITY; inside[*left].len()];
          let mut right_scores = vec![f64::NEG_INFINITY; inside[*right].len()];
          betas.for_each(|idx, v| {
            let s = v + parent[idx[0]];
            left_scores[idx[1]] = log_add(left_scores[idx[1]], s + inside[*right][idx[2]]);
            right_scores[idx[2]] = log_add(right_scores[idx[2]], s + inside[*left][idx[1]]);
          });
          outside[*left] = left_scores;
          outside[*right] = right_scores;
        }
      }
    }
    Ok(outside)
  }

  pub fn probs(&self, tree: &TrainingTree, split_rng: Option<&mut StdRng>) -> Result<TreeProbs> {
    let inside = self.inside(tree, split_rng)?;
    let outside = self.outside(tree, &inside)?;
    Ok(TreeProbs { inside, outside })
  }

  /// Posterior over child substates given each parent substate, for every
  /// non-lexical node. Rows with no mass become uniform.
  pub fn transitions(&self, tree: &TrainingTree, probs: &TreeProbs) -> Result<Vec<Option<Betas>>> {
    let mut out = Vec::with_capacity(tree.nodes.len());
    for (id, node) in tree.nodes.iter().enumerate() {
      if let Shape::Lexical(_) = node.shape {
        out.push(None);
        continue;
      }
      let betas = self.estimates.betas(&node.shape)?;
      let children = node.shape.children();
      let mut t = Betas::filled(betas.dims(), f64::NEG_INFINITY);
      betas.for_each(|idx, v| {
        let mut s = v + probs.outside[id][idx[0]];
        for (axis, &child) in children.iter().enumerate() {
          s += probs.inside[child][idx[axis + 1]];
        }
        t.set(idx, s);
      });
      t.normalize_rows();
      out.push(Some(t));
    }
    Ok(out)
  }

  /// Walks the tree top-down, pushing `tree.weight` through `transitions`
  /// and adding the expected rule and word counts to `acc`.
  pub fn accumulate(&self, tree: &TrainingTree, transitions: &[Option<Betas>], acc: &mut Accumulator) {
    let mut weights: Vec<Vec<f64>> = vec![Vec::new(); tree.nodes.len()];
    let roots = transitions
      .first()
      .and_then(|t| t.as_ref())
      .map_or_else(|| self.estimates.count(&tree.nodes[0].label), |t| t.parent_states());
    weights[0] = vec![(tree.weight / roots as f64).ln(); roots];

    for (id, node) in tree.nodes.iter().enumerate() {
      let state_weights = std::mem::take(&mut weights[id]);
      acc.add_mass(&node.label, &state_weights);

      let Some(t) = transitions[id].as_ref() else {
        if let Shape::Lexical(word) = &node.shape {
          self.count_word(&node.label, word, &state_weights, acc);
        }
        continue;
      };
      let children = node.shape.children();
      let mut child_weights = children
        .iter()
        .enumerate()
        .map(|(axis, _)| vec![f64::NEG_INFINITY; t.dims()[axis + 1]])
        .collect::<Vec<_>>();
      let Some(entry) = acc.betas_for(&node.shape, t.dims()) else {
        continue;
      };
      t.for_each(|idx, v| {
        let s = v + state_weights[idx[0]];
        entry.log_add_at(idx, s);
        for (axis, weights) in child_weights.iter_mut().enumerate() {
          weights[idx[axis + 1]] = log_add(weights[idx[axis + 1]], s);
        }
      });
      for (child, w) in children.into_iter().zip(child_weights) {
        weights[child] = w;
      }
    }
  }

  /// Smooths the tag's substate posteriors slightly toward uniform before counting.
  fn count_word(&self, tag: &str, word: &str, state_weights: &[f64], acc: &mut Accumulator) {
    let total = state_weights.iter().map(|w| w.exp()).sum::<f64>();
    if total <= 0.0 || state_weights.is_empty() {
      return;
    }
    let smoothing = self.config.lexicon_smoothing;
    let scale = 1.0 / (1.0 + smoothing);
    let share = total * smoothing / state_weights.len() as f64;
    for (i, w) in state_weights.iter().enumerate() {
      let count = (w.exp() + share) * scale;
      *acc
        .words
        .entry((self.config.state_name(tag, i), word.to_string()))
        .or_insert(0.0) += count;
    }
  }
}

/// Expected counts summed over trees. Betas and masses combine by log-sum
/// and plain sum respectively, so partial accumulators merge in any order.
#[derive(Debug, Clone, Default)]
pub(crate) struct Accumulator {
  pub unary: BTreeMap<(String, String), Betas>,
  pub binary: BTreeMap<(String, String, String), Betas>,
  /// `(tag state, word) -> count`.
  pub words: BTreeMap<(String, String), f64>,
  /// Linear-space expected visits per substate.
  pub mass: BTreeMap<String, Vec<f64>>,
}

impl Accumulator {
  fn betas_for(&mut self, shape: &Shape, dims: &[usize]) -> Option<&mut Betas> {
    let empty = || Betas::filled(dims, f64::NEG_INFINITY);
    match shape {
      Shape::Unary(key, _) => Some(self.unary.entry(key.clone()).or_insert_with(empty)),
      Shape::Binary(key, _, _) => Some(self.binary.entry(key.clone()).or_insert_with(empty)),
      Shape::Lexical(_) => None,
    }
  }

  fn add_mass(&mut self, label: &str, state_weights: &[f64]) {
    let mass = self
      .mass
      .entry(label.to_string())
      .or_insert_with(|| vec![0.0; state_weights.len()]);
    if mass.len() < state_weights.len() {
      mass.resize(state_weights.len(), 0.0);
    }
    for (m, w) in mass.iter_mut().zip(state_weights) {
      *m += w.exp();
    }
  }

  pub fn absorb(mut self, other: Self) -> Self {
    for (key, betas) in other.unary {
      match self.unary.get_mut(&key) {
        Some(mine) => mine.absorb(&betas),
        None => {
          self.unary.insert(key, betas);
        }
      }
    }
    for (key, betas) in other.binary {
      match self.binary.get_mut(&key) {
        Some(mine) => mine.absorb(&betas),
        None => {
          self.binary.insert(key, betas);
        }
      }
    }
    for (key, count) in other.words {
      *self.words.entry(key).or_insert(0.0) += count;
    }
    for (label, mass) in other.mass {
      let mine = self.mass.entry(label).or_default();
      if mine.len() < mass.len() {
        mine.resize(mass.len(), 0.0);
      }
      for (m, x) in mine.iter_mut().zip(mass) {
        *m += x;
      }
    }
    self
  }

  pub fn lexicon(&self, smooth: f64) -> SimpleLexicon {
    let mut lexicon = SimpleLexicon::new(smooth);
    for ((tag, word), &count) in &self.words {
      lexicon.train(word, tag, count);
    }
    lexicon.finish_training();
    lexicon
  }

  /// New estimates: every beta row renormalized, the lexicon retrained.
  pub fn into_estimates(self, counts: BTreeMap<String, usize>, smooth: f64) -> Estimates {
    let lexicon = self.lexicon(smooth);
    let normalize = |mut b: Betas| {
      b.normalize_rows();
      b
    };
    Estimates {
      counts,
      unary: self.unary.into_iter().map(|(k, b)| (k, normalize(b))).collect(),
      binary: self.binary.into_iter().map(|(k, b)| (k, normalize(b))).collect(),
      lexicon,
    }
  }
}
