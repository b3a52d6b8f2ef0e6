use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A node of one category's transducer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GraphNode {
  /// A plain state of the category, such as `NP` or `NP^1`, where chains begin.
  Start(String),
  /// A binarization state such as `@NP|DT_JJ`.
  Synthetic(String),
  /// Where every chain ends.
  End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Side {
  Left,
  Right,
}

/// What an arc consumes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArcInput {
  /// A sibling generated beside the next synthetic state.
  Sibling { label: String, side: Side },
  /// The last two children of a chain.
  Pair(String, String),
  /// The last child of a chain.
  Single(String),
  /// A unary step into a synthetic state.
  Epsilon,
}

/// `NP<` for a left sibling, `NP>` for a right one.
impl fmt::Display for ArcInput {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Sibling { label, side: Side::Left } => write!(f, "{}<", label),
      Self::Sibling { label, side: Side::Right } => write!(f, "{}>", label),
      Self::Pair(l, r) => write!(f, "{} {}", l, r),
      Self::Single(c) => write!(f, "{}", c),
      Self::Epsilon => write!(f, "-"),
    }
  }
}

/// How two arcs with the same endpoints and input combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArcMerge {
  /// Keep the better log score.
  #[default]
  Max,
  /// Add raw counts.
  Sum,
}

impl ArcMerge {
  fn combine(self, a: f64, b: f64) -> f64 {
    match self {
      Self::Max => a.max(b),
      Self::Sum => a + b,
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Arc {
  pub from: GraphNode,
  pub to: GraphNode,
  pub input: ArcInput,
  pub output: f64,
}

/// The synthetic-state chains of one category as a weighted transducer:
/// each path from a `Start` node to `End` spells the children of one
/// expansion of that start state.
#[derive(Debug, Clone, PartialEq)]
pub struct TransducerGraph {
  category: String,
  arcs: Vec<Arc>,
  lookup: BTreeMap<(GraphNode, ArcInput, GraphNode), usize>,
}

impl TransducerGraph {
  pub fn new(category: &str) -> Self {
    Self {
      category: category.to_string(),
      arcs: Vec::new(),
      lookup: BTreeMap::new(),
    }
  }

  pub fn category(&self) -> &str {
    &self.category
  }

  pub fn arcs(&self) -> &[Arc] {
    &self.arcs
  }

  /// Adds an arc, combining it with an existing one between the same nodes on the same input.
  pub fn add_arc(&mut self, from: GraphNode, to: GraphNode, input: ArcInput, output: f64, merge: ArcMerge) {
    let key = (from, input, to);
    if let Some(&pos) = self.lookup.get(&key) {
      let arc = &mut self.arcs[pos];
      arc.output = merge.combine(arc.output, output);
      return;
    }
    let (from, input, to) = key.clone();
    self.lookup.insert(key, self.arcs.len());
    self.arcs.push(Arc {
      from,
      to,
      input,
      output,
    });
  }

  pub fn nodes(&self) -> BTreeSet<GraphNode> {
    let mut nodes = BTreeSet::new();
    nodes.insert(GraphNode::End);
    for arc in &self.arcs {
      nodes.insert(arc.from.clone());
      nodes.insert(arc.to.clone());
    }
    nodes
  }

  pub fn arcs_from<'a>(&'a self, node: &'a GraphNode) -> impl Iterator<Item = &'a Arc> + 'a {
    self.arcs.iter().filter(move |a| &a.from == node)
  }

  /// Renames nodes through `rename`, merging arcs that end up parallel.
  pub fn map_nodes(&self, rename: impl Fn(&GraphNode) -> GraphNode, merge: ArcMerge) -> Self {
    let mut out = Self::new(&self.category);
    for arc in &self.arcs {
      out.add_arc(rename(&arc.from), rename(&arc.to), arc.input.clone(), arc.output, merge);
    }
    out
  }

  /// Best log score of reading `inputs` from `start` to `End`, with
  /// epsilon arcs taken freely.
  pub fn path_score(&self, start: &str, inputs: &[ArcInput]) -> Option<f64> {
    let mut current = BTreeMap::new();
    current.insert(GraphNode::Start(start.to_string()), 0.0);
    current = self.epsilon_closure(current);
    for input in inputs {
      let mut next: BTreeMap<GraphNode, f64> = BTreeMap::new();
      for (node, score) in &current {
        for arc in self.arcs_from(node).filter(|a| &a.input == input) {
          let s = score + arc.output;
          let best = next.entry(arc.to.clone()).or_insert(f64::NEG_INFINITY);
          *best = best.max(s);
        }
      }
      current = self.epsilon_closure(next);
    }
    current.get(&GraphNode::End).copied()
  }

  fn epsilon_closure(&self, mut scores: BTreeMap<GraphNode, f64>) -> BTreeMap<GraphNode, f64> {
    // each round can only lengthen paths by one arc
    for _ in 0..self.nodes().len() {
      let mut changed = false;
      for arc in self.arcs.iter().filter(|a| a.input == ArcInput::Epsilon) {
        let Some(&from) = scores.get(&arc.from) else {
          continue;
        };
        let s = from + arc.output;
        let best = scores.entry(arc.to.clone()).or_insert(f64::NEG_INFINITY);
        if s > *best {
          *best = s;
          changed = true;
        }
      }
      if !changed {
        break;
      }
    }
    scores
  }
}
