//! Undoing the least useful splits.

use std::collections::BTreeMap;

use super::betas::Betas;
use super::recount::{Accumulator, Pass, TreeProbs};
use super::TrainingTree;
use crate::error::Result;
use crate::utils::log_add;

/// One candidate: re-merge substates `2 * pair` and `2 * pair + 1` of `label`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct MergeCandidate {
  pub label: String,
  pub pair: usize,
  /// Log-likelihood change from merging; closer to zero is cheaper.
  pub delta: f64,
}

/// Adds one tree's contribution to every pair's merge delta. The root and
/// the boundary are never merged.
pub(crate) fn count_merge_effects(
  pass: Pass<'_>,
  tree: &TrainingTree,
  probs: &TreeProbs,
  mass: &BTreeMap<String, Vec<f64>>,
  deltas: &mut BTreeMap<String, Vec<f64>>,
) {
  for (id, node) in tree.nodes.iter().enumerate().skip(1) {
    if !pass.config.is_splittable(&node.label) {
      continue;
    }
    let inside = &probs.inside[id];
    let outside = &probs.outside[id];
    let pairs = inside.len() / 2;
    if pairs == 0 {
      continue;
    }
    let masses = mass.get(&node.label);
    let entry = deltas
      .entry(node.label.clone())
      .or_insert_with(|| vec![0.0; pairs]);
    for (pair, delta) in entry.iter_mut().enumerate().take(pairs) {
      let (a, b) = (2 * pair, 2 * pair + 1);
      let (ma, mb) = masses.map_or((1.0, 1.0), |m| {
        (m.get(a).copied().unwrap_or(0.0), m.get(b).copied().unwrap_or(0.0))
      });
      let total = ma + mb;
      let (wa, wb) = if total > 0.0 { (ma / total, mb / total) } else { (0.5, 0.5) };

      let separate = log_add(inside[a] + outside[a], inside[b] + outside[b]);
      if separate == f64::NEG_INFINITY {
        continue;
      }
      let merged_inside = log_add(wa.ln() + inside[a], wb.ln() + inside[b]);
      let merged_outside = log_add(outside[a], outside[b]);
      *delta += merged_inside + merged_outside - separate;
    }
  }
}

/// The cheapest `rate` share of candidates, never every one of them.
pub(crate) fn choose_merges(deltas: BTreeMap<String, Vec<f64>>, rate: f64) -> Vec<MergeCandidate> {
  let mut candidates = deltas
    .into_iter()
    .flat_map(|(label, ds)| {
      ds.into_iter()
        .enumerate()
        .map(move |(pair, delta)| MergeCandidate {
          label: label.clone(),
          pair,
          delta,
        })
    })
    .collect::<Vec<_>>();
  candidates.sort_by(|a, b| b.delta.total_cmp(&a.delta));
  let n = ((candidates.len() as f64 * rate).floor() as usize).min(candidates.len().saturating_sub(1));
  candidates.truncate(n);
  candidates
}

/// Old substate -> new substate, per label.
#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) struct Correspondence(pub BTreeMap<String, Vec<usize>>);

impl Correspondence {
  pub fn new(counts: &BTreeMap<String, usize>, merges: &[MergeCandidate]) -> Self {
    let mut map = counts
      .iter()
      .map(|(label, &n)| (label.clone(), (0..n).collect::<Vec<_>>()))
      .collect::<BTreeMap<_, _>>();
    for merge in merges {
      if let Some(targets) = map.get_mut(&merge.label) {
        let split = 2 * merge.pair;
        for t in targets.iter_mut().skip(split + 1) {
          *t -= 1;
        }
      }
    }
    Self(map)
  }

  fn of(&self, label: &str) -> &[usize] {
    self.0.get(label).map(Vec::as_slice).unwrap_or(&[])
  }

  fn width(&self, label: &str) -> usize {
    self.of(label).last().map_or(1, |&last| last + 1)
  }
}

/// Folds one tree's transitions into the merged substate space, weighting
/// each old parent substate by its expected visits.
pub(crate) fn merge_transitions(
  tree: &TrainingTree,
  transitions: &[Option<Betas>],
  correspondence: &Correspondence,
) -> Vec<Option<Betas>> {
  let mut weights: Vec<Vec<f64>> = vec![Vec::new(); tree.nodes.len()];
  if let Some(Some(root)) = transitions.first() {
    let n = root.parent_states();
    weights[0] = vec![(tree.weight / n as f64).ln(); n];
  }
  let mut out = Vec::with_capacity(tree.nodes.len());
  for (id, node) in tree.nodes.iter().enumerate() {
    let Some(old) = transitions[id].as_ref() else {
      out.push(None);
      continue;
    };
    let state_weights = std::mem::take(&mut weights[id]);
    let labels = std::iter::once(node.label.as_str())
      .chain(node.shape.child_labels())
      .collect::<Vec<_>>();
    let maps = labels.iter().map(|l| correspondence.of(l)).collect::<Vec<_>>();
    let dims = labels.iter().map(|l| correspondence.width(l)).collect::<Vec<_>>();

    let children = node.shape.children();
    let mut child_weights = (0..children.len())
      .map(|axis| vec![f64::NEG_INFINITY; old.dims()[axis + 1]])
      .collect::<Vec<_>>();
    let mut merged = Betas::filled(&dims, f64::NEG_INFINITY);
    let mut target = vec![0; dims.len()];
    old.for_each(|idx, v| {
      let s = v + state_weights.get(idx[0]).copied().unwrap_or(f64::NEG_INFINITY);
      for (axis, &i) in idx.iter().enumerate() {
        target[axis] = maps[axis].get(i).copied().unwrap_or(i);
      }
      merged.log_add_at(&target, s);
      for (axis, weights) in child_weights.iter_mut().enumerate() {
        weights[idx[axis + 1]] = log_add(weights[idx[axis + 1]], s);
      }
    });
    merged.normalize_rows();
    for (child, w) in children.into_iter().zip(child_weights) {
      weights[child] = w;
    }
    out.push(Some(merged));
  }
  out
}

/// Runs `tree` through a merged pass: old transitions folded through the
/// correspondence, then accumulated at the new granularity.
pub(crate) fn recount_merged(
  pass: Pass<'_>,
  tree: &TrainingTree,
  correspondence: &Correspondence,
  acc: &mut Accumulator,
) -> Result<()> {
  let probs = pass.probs(tree, None)?;
  let transitions = pass.transitions(tree, &probs)?;
  let folded = merge_transitions(tree, &transitions, correspondence);
  pass.accumulate(tree, &folded, acc);
  Ok(())
}
