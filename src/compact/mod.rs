//! Grammar compaction: the synthetic states of each category are read as a
//! transducer over sibling categories, the transducer is reduced by a
//! pluggable strategy, and the result is written back out as rules.

mod graph;

use std::collections::{BTreeMap, HashMap};

pub use self::graph::{Arc, ArcInput, ArcMerge, GraphNode, Side, TransducerGraph};
use crate::config::CompactorConfig;
use crate::error::{Error, Result};
use crate::grammar::{BinaryGrammar, Grammar, SYNTHETIC_MARKER, UnaryGrammar, is_synthetic};
use crate::index::Index;
use crate::rules::{BinaryRule, UnaryRule};
use crate::utils::basic_category;

/// Observed child sequences for one category, for strategies that want them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PathStats {
  pub train: Vec<Vec<ArcInput>>,
  pub test: Vec<Vec<ArcInput>>,
}

/// Reduces one category's graph to an equivalent one.
pub trait CompactionStrategy: Send + Sync {
  fn compact(&self, graph: &TransducerGraph, paths: Option<&PathStats>) -> Result<TransducerGraph>;
}

/// Leaves every graph as it is.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCompaction;

impl CompactionStrategy for NoCompaction {
  fn compact(&self, graph: &TransducerGraph, _paths: Option<&PathStats>) -> Result<TransducerGraph> {
    Ok(graph.clone())
  }
}

/// Merges synthetic states with identical futures: the same outgoing inputs
/// and scores into equivalent states. Each path keeps its best score, so
/// Viterbi parses are unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactMinimizer {
  pub merge: ArcMerge,
}

impl CompactionStrategy for ExactMinimizer {
  fn compact(&self, graph: &TransducerGraph, _paths: Option<&PathStats>) -> Result<TransducerGraph> {
    let nodes = graph.nodes().into_iter().collect::<Vec<_>>();
    // start states stay apart; only synthetic states may merge
    let mut initial = BTreeMap::new();
    let mut block = nodes
      .iter()
      .map(|n| {
        let kind = match n {
          GraphNode::Synthetic(_) => None,
          other => Some(other.clone()),
        };
        let len = initial.len();
        (n.clone(), *initial.entry(kind).or_insert(len))
      })
      .collect::<BTreeMap<_, usize>>();

    let mut blocks = 0;
    loop {
      let mut signatures = HashMap::new();
      let mut next = BTreeMap::new();
      for node in &nodes {
        let mut arcs = graph
          .arcs_from(node)
          .map(|a| (a.input.clone(), a.output.to_bits(), block[&a.to]))
          .collect::<Vec<_>>();
        arcs.sort();
        let len = signatures.len();
        let id = *signatures.entry((block[node], arcs)).or_insert(len);
        next.insert(node.clone(), id);
      }
      block = next;
      if signatures.len() == blocks {
        break;
      }
      blocks = signatures.len();
    }

    // nodes are sorted, so each block is named after its first member
    let mut representative: BTreeMap<usize, GraphNode> = BTreeMap::new();
    for node in &nodes {
      representative.entry(block[node]).or_insert_with(|| node.clone());
    }
    let rename = |n: &GraphNode| representative[&block[n]].clone();
    Ok(graph.map_nodes(rename, self.merge))
  }
}

/// A rule named by state strings.
#[derive(Debug, Clone, PartialEq)]
struct NamedRule {
  parent: String,
  children: Vec<String>,
  score: f64,
}

/// `@NP|DT_JJ^1` belongs to `NP`.
fn synthetic_category(state: &str) -> &str {
  basic_category(state.trim_start_matches(SYNTHETIC_MARKER))
}

pub struct GrammarCompactor {
  config: CompactorConfig,
  strategy: Box<dyn CompactionStrategy>,
  paths: BTreeMap<String, PathStats>,
}

impl GrammarCompactor {
  /// Exact minimization, combining parallel arcs by max, or by sum when
  /// scores are counts.
  pub fn new(config: CompactorConfig) -> Self {
    let merge = if config.scores_are_counts {
      ArcMerge::Sum
    } else {
      ArcMerge::Max
    };
    Self {
      config,
      strategy: Box::new(ExactMinimizer { merge }),
      paths: BTreeMap::new(),
    }
  }

  pub fn with_strategy(mut self, strategy: impl CompactionStrategy + 'static) -> Self {
    self.strategy = Box::new(strategy);
    self
  }

  pub fn with_paths(mut self, category: &str, paths: PathStats) -> Self {
    self.paths.insert(category.to_string(), paths);
    self
  }

  fn merge_mode(&self) -> ArcMerge {
    if self.config.scores_are_counts {
      ArcMerge::Sum
    } else {
      ArcMerge::Max
    }
  }

  /// One graph per category with synthetic states, plus the rules that
  /// touch no synthetic state.
  pub fn build_graphs(&self, grammar: &Grammar) -> Result<(BTreeMap<String, TransducerGraph>, Vec<(String, Vec<String>, f64)>)> {
    let (graphs, pass) = self.graphs_and_rest(grammar)?;
    let pass = pass
      .into_iter()
      .map(|r| (r.parent, r.children, r.score))
      .collect();
    Ok((graphs, pass))
  }

  fn graphs_and_rest(&self, grammar: &Grammar) -> Result<(BTreeMap<String, TransducerGraph>, Vec<NamedRule>)> {
    let name = |s: usize| grammar.states[s].to_string();
    let rules = grammar
      .unary
      .rules()
      .iter()
      .map(|r| NamedRule {
        parent: name(r.parent),
        children: vec![name(r.child)],
        score: r.score,
      })
      .chain(grammar.binary.rules().iter().map(|r| NamedRule {
        parent: name(r.parent),
        children: vec![name(r.left_child), name(r.right_child)],
        score: r.score,
      }));

    let merge = self.merge_mode();
    let mut graphs: BTreeMap<String, TransducerGraph> = BTreeMap::new();
    let mut rest = Vec::new();
    for rule in rules {
      let synthetic_children = rule.children.iter().filter(|c| is_synthetic(c)).count();
      if synthetic_children == 0 && !is_synthetic(&rule.parent) {
        rest.push(rule);
        continue;
      }
      if synthetic_children > 1 {
        return Err(Error::Compaction(format!(
          "{} -> {} has two synthetic children",
          rule.parent,
          rule.children.join(" ")
        )));
      }

      let category = match rule.children.iter().find(|c| is_synthetic(c)) {
        Some(child) => synthetic_category(child),
        None => synthetic_category(&rule.parent),
      }
      .to_string();
      let from = if is_synthetic(&rule.parent) {
        if synthetic_category(&rule.parent) != category {
          return Err(Error::Compaction(format!(
            "{} expands into another category's chain",
            rule.parent
          )));
        }
        GraphNode::Synthetic(rule.parent.clone())
      } else if basic_category(&rule.parent) == category {
        GraphNode::Start(rule.parent.clone())
      } else {
        return Err(Error::Compaction(format!(
          "{} starts a chain of {}",
          rule.parent, category
        )));
      };
      let (to, input) = match rule.children.as_slice() {
        [c] if is_synthetic(c) => (GraphNode::Synthetic(c.clone()), ArcInput::Epsilon),
        [c] => (GraphNode::End, ArcInput::Single(c.clone())),
        [l, r] if is_synthetic(r) => (
          GraphNode::Synthetic(r.clone()),
          ArcInput::Sibling {
            label: l.clone(),
            side: Side::Left,
          },
        ),
        [l, r] if is_synthetic(l) => (
          GraphNode::Synthetic(l.clone()),
          ArcInput::Sibling {
            label: r.clone(),
            side: Side::Right,
          },
        ),
        [l, r] => (GraphNode::End, ArcInput::Pair(l.clone(), r.clone())),
        _ => return Err(Error::Compaction(format!("{} has no children", rule.parent))),
      };
      graphs
        .entry(category.clone())
        .or_insert_with(|| TransducerGraph::new(&category))
        .add_arc(from, to, input, rule.score, merge);
    }
    Ok((graphs, rest))
  }

  fn graph_rules(graph: &TransducerGraph) -> Vec<NamedRule> {
    let name = |n: &GraphNode| match n {
      GraphNode::Start(s) => Some(s.clone()),
      GraphNode::Synthetic(s) => Some(s.clone()),
      GraphNode::End => None,
    };
    graph
      .arcs()
      .iter()
      .filter_map(|arc| {
        let parent = name(&arc.from)?;
        let children = match (&arc.input, name(&arc.to)) {
          (ArcInput::Sibling { label, side: Side::Left }, Some(to)) => vec![label.clone(), to],
          (ArcInput::Sibling { label, side: Side::Right }, Some(to)) => vec![to, label.clone()],
          (ArcInput::Epsilon, Some(to)) => vec![to],
          (ArcInput::Pair(l, r), None) => vec![l.clone(), r.clone()],
          (ArcInput::Single(c), None) => vec![c.clone()],
          _ => return None,
        };
        Some(NamedRule {
          parent,
          children,
          score: arc.output,
        })
      })
      .collect()
  }

  /// Compacts every category's chains and rebuilds the grammar. The start
  /// symbol, tags and every non-synthetic state keep their names.
  pub fn compact_grammar(&self, grammar: &Grammar) -> Result<Grammar> {
    let (graphs, mut rules) = self.graphs_and_rest(grammar)?;
    let before = grammar.states.iter().filter(|s| is_synthetic(s)).count();
    for (category, graph) in &graphs {
      let compacted = self.strategy.compact(graph, self.paths.get(category))?;
      tracing::debug!(
        category = %category,
        nodes = graph.nodes().len(),
        compacted = compacted.nodes().len(),
        "compacted category"
      );
      rules.extend(Self::graph_rules(&compacted));
    }

    if self.config.scores_are_counts {
      rules = self.normalize_counts(rules);
    }

    let mut states = Index::new();
    states.add(&grammar.start);
    for state in grammar.states.iter().filter(|s| !is_synthetic(s)) {
      states.add(state);
    }
    for rule in &rules {
      states.add(&rule.parent);
      for child in &rule.children {
        states.add(child);
      }
    }
    let id = |s: &str| states.index_of(s).ok_or_else(|| Error::UnknownState(s.to_string()));

    let mut unary = UnaryGrammar::with_mode(states.len(), grammar.unary.mode());
    let mut binary = BinaryGrammar::new(&states);
    for rule in &rules {
      match rule.children.as_slice() {
        [c] => unary.add_rule(UnaryRule::new(id(&rule.parent)?, id(c)?, rule.score))?,
        [l, r] => binary.add_rule(BinaryRule::new(id(&rule.parent)?, id(l)?, id(r)?, rule.score))?,
        _ => return Err(Error::Compaction(format!("{} has no children", rule.parent))),
      }
    }
    let after = states.iter().filter(|s| is_synthetic(s)).count();
    tracing::info!(
      categories = graphs.len(),
      before,
      after,
      "compacted synthetic states"
    );
    Grammar::new(&grammar.start, states, grammar.tags.clone(), unary, binary)
  }

  /// `ln((count - discount) / parent total)`; rules discounted to nothing are dropped.
  fn normalize_counts(&self, rules: Vec<NamedRule>) -> Vec<NamedRule> {
    let mut totals: HashMap<String, f64> = HashMap::new();
    for rule in &rules {
      *totals.entry(rule.parent.clone()).or_insert(0.0) += rule.score;
    }
    let discount = self.config.rule_discount;
    rules
      .into_iter()
      .filter_map(|mut rule| {
        let total = totals.get(&rule.parent).copied().unwrap_or(0.0);
        let count = rule.score - discount;
        if count <= 0.0 || total <= 0.0 {
          return None;
        }
        rule.score = (count / total).ln();
        Some(rule)
      })
      .collect()
  }
}
