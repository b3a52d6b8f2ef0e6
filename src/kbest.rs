//! Exact k-best extraction: lazy enumeration of derivations over the
//! hypergraph implied by the chart (Huang and Chiang, 2005, algorithm 3).
//!
//! A vertex is a state over a span; its incoming arcs are the lexical,
//! binary and unary productions that reach it with finite score. Each
//! vertex keeps the derivations found so far and a heap of candidates,
//! and only asks its children for the ranks it actually needs.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use crate::forest::Production;
use crate::lexicon::Lexicon;
use crate::parser::ChartParser;
use crate::syntree::Tree;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Vertex {
  state: usize,
  start: usize,
  end: usize,
}

#[derive(Debug, Clone)]
struct Arc {
  tails: Vec<Vertex>,
  rule_score: f64,
}

/// An arc plus a 0-based rank for each of its tails.
#[derive(Debug, Clone)]
struct Derivation {
  arc: usize,
  ranks: Vec<usize>,
  score: f64,
}

impl PartialEq for Derivation {
  fn eq(&self, other: &Self) -> bool {
    self.cmp(other) == Ordering::Equal
  }
}

impl Eq for Derivation {}

impl PartialOrd for Derivation {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

/// Higher scores first; ties go to the earlier arc, then the lower ranks.
impl Ord for Derivation {
  fn cmp(&self, other: &Self) -> Ordering {
    self
      .score
      .total_cmp(&other.score)
      .then_with(|| other.arc.cmp(&self.arc))
      .then_with(|| other.ranks.cmp(&self.ranks))
  }
}

#[derive(Debug, Default)]
struct VertexState {
  arcs: Vec<Arc>,
  candidates: BinaryHeap<Derivation>,
  seen: HashSet<(usize, Vec<usize>)>,
  found: Vec<Derivation>,
}

struct KBest<'p, 'a, L: Lexicon + ?Sized> {
  parser: &'p ChartParser<'a, L>,
  ids: HashMap<Vertex, usize>,
  vertices: Vec<VertexState>,
  /// `(vertex, rank)` requests still being answered; asking again means a unary cycle.
  in_progress: HashSet<(usize, usize)>,
}

impl<'p, 'a, L: Lexicon + ?Sized> KBest<'p, 'a, L> {
  fn new(parser: &'p ChartParser<'a, L>) -> Self {
    Self {
      parser,
      ids: HashMap::new(),
      vertices: Vec::new(),
      in_progress: HashSet::new(),
    }
  }

  fn vertex(&mut self, v: Vertex) -> usize {
    if let Some(&id) = self.ids.get(&v) {
      return id;
    }
    let mut state = VertexState::default();
    for (score, production) in self.parser.productions(v.state, v.start, v.end, &[]) {
      let (tails, rule_score) = match production {
        Production::Lexical => (Vec::new(), score),
        Production::Binary(split, rule) => (
          vec![
            Vertex {
              state: rule.left_child,
              start: v.start,
              end: split,
            },
            Vertex {
              state: rule.right_child,
              start: split,
              end: v.end,
            },
          ],
          rule.score,
        ),
        Production::Unary(rule) => (
          vec![Vertex {
            state: rule.child,
            ..v
          }],
          rule.score,
        ),
      };
      let arc = state.arcs.len();
      let ranks = vec![0; tails.len()];
      state.arcs.push(Arc { tails, rule_score });
      if score > f64::NEG_INFINITY {
        state.seen.insert((arc, ranks.clone()));
        state.candidates.push(Derivation { arc, ranks, score });
      }
    }
    let id = self.vertices.len();
    self.vertices.push(state);
    self.ids.insert(v, id);
    id
  }

  /// Score of the `k`-th best derivation of vertex `id`, computing it on demand.
  fn kth(&mut self, id: usize, k: usize) -> Option<f64> {
    if let Some(d) = self.vertices[id].found.get(k) {
      return Some(d.score);
    }
    if !self.in_progress.insert((id, k)) {
      return None;
    }
    while self.vertices[id].found.len() <= k {
      if let Some(last) = self.vertices[id].found.last().cloned() {
        self.push_successors(id, &last);
      }
      match self.vertices[id].candidates.pop() {
        Some(next) => self.vertices[id].found.push(next),
        None => break,
      }
    }
    self.in_progress.remove(&(id, k));
    self.vertices[id].found.get(k).map(|d| d.score)
  }

  /// Queues the derivations one rank worse than `d` in a single tail.
  fn push_successors(&mut self, id: usize, d: &Derivation) {
    let arc = self.vertices[id].arcs[d.arc].clone();
    for i in 0..arc.tails.len() {
      let mut ranks = d.ranks.clone();
      ranks[i] += 1;
      if self.vertices[id].seen.contains(&(d.arc, ranks.clone())) {
        continue;
      }
      let mut score = arc.rule_score;
      let mut complete = true;
      for (tail, &rank) in arc.tails.iter().zip(&ranks) {
        let tail = self.vertex(*tail);
        match self.kth(tail, rank) {
          Some(s) => score += s,
          None => {
            complete = false;
            break;
          }
        }
      }
      if complete && score > f64::NEG_INFINITY {
        let state = &mut self.vertices[id];
        state.seen.insert((d.arc, ranks.clone()));
        state.candidates.push(Derivation {
          arc: d.arc,
          ranks,
          score,
        });
      }
    }
  }

  /// Rebuilds the `k`-th best tree of `v`. Tails are only ranked when
  /// asked, so each one is resolved before it is read.
  fn tree(&mut self, v: Vertex, k: usize) -> Option<Tree> {
    let id = self.vertex(v);
    self.kth(id, k)?;
    let d = self.vertices[id].found.get(k)?.clone();
    let tails = self.vertices[id].arcs[d.arc].tails.clone();
    let mut children = Vec::with_capacity(tails.len());
    for (tail, rank) in tails.into_iter().zip(d.ranks) {
      children.push(self.tree(tail, rank)?);
    }
    Some(self.parser.build(v.state, v.start, children))
  }
}

impl<L: Lexicon + ?Sized> ChartParser<'_, L> {
  /// Up to `k` distinct trees for the goal over the whole sentence, best
  /// first, each with its score.
  pub fn k_best_parses(&self, k: usize) -> Vec<(Tree, f64)> {
    self.k_best_parses_at(self.grammar.goal(), 0, self.length(), k)
  }

  pub fn k_best_parses_at(&self, state: usize, start: usize, end: usize, k: usize) -> Vec<(Tree, f64)> {
    let mut kbest = KBest::new(self);
    let v = Vertex { state, start, end };
    let id = kbest.vertex(v);
    let mut out = Vec::new();
    for rank in 0..k {
      let Some(score) = kbest.kth(id, rank) else {
        break;
      };
      match kbest.tree(v, rank) {
        Some(tree) => out.push((tree, score)),
        None => break,
      }
    }
    tracing::debug!(requested = k, found = out.len(), "k-best extraction");
    out
  }
}

#[cfg(test)]
mod tests {
  use crate::config::ParserConfig;
  use crate::grammar::GrammarBuilder;
  use crate::parser::ChartParser;
  use crate::test_utils::{ScoreTable, crossing, tied, time_flies};

  fn rendered(parses: &[(crate::syntree::Tree, f64)]) -> Vec<String> {
    parses.iter().map(|(t, _)| t.to_string()).collect()
  }

  #[test]
  fn single_derivation() {
    let (grammar, lexicon) = time_flies();
    let mut parser = ChartParser::new(&grammar, &lexicon, ParserConfig::default());
    parser.parse_words(&["Time", "flies"]).unwrap();
    let parses = parser.k_best_parses(5);
    assert_eq!(rendered(&parses), vec!["(ROOT (S (NP Time) (VP flies)))"]);
    assert!((parses[0].1 - parser.best_score()).abs() < 1e-9);
  }

  #[test]
  fn scores_never_increase() {
    let (grammar, lexicon) = crossing();
    let mut parser = ChartParser::new(&grammar, &lexicon, ParserConfig::default());
    parser.parse_words(&["a", "b", "c"]).unwrap();
    let parses = parser.k_best_parses(10);
    assert_eq!(
      rendered(&parses),
      vec!["(S (X (A a) (B b)) (C c))", "(S (A a) (Y (B b) (C c)))"]
    );
    assert_eq!(parses[0].1, parser.best_score());
    assert!(parses.windows(2).all(|w| w[0].1 >= w[1].1));
    for (tree, score) in &parses {
      assert!((parser.score_binarized_tree(tree).unwrap() - score).abs() < 1e-9);
    }
  }

  #[test]
  fn ties_are_distinct_derivations() {
    let (grammar, lexicon) = tied();
    let mut parser = ChartParser::new(&grammar, &lexicon, ParserConfig::default());
    parser.parse_words(&["x", "y"]).unwrap();
    let parses = parser.k_best_parses(3);
    assert_eq!(parses.len(), 2);
    assert_ne!(parses[0].0, parses[1].0);
    assert_eq!(parses[0].1, parses[1].1);
  }

  #[test]
  fn unary_cycles_unroll_lazily() {
    let mut g = GrammarBuilder::new("S");
    g.unary("S", "T", -1.0).unary("T", "S", -1.0).unary("S", "W", 0.0);
    let grammar = g.build().unwrap();
    let lexicon = ScoreTable::new(&[("w", "W", 0.0)]);
    let mut parser = ChartParser::new(&grammar, &lexicon, ParserConfig::default());
    parser.parse_words(&["w"]).unwrap();
    let parses = parser.k_best_parses(3);
    assert_eq!(
      rendered(&parses),
      vec![
        "(S (W w))",
        "(S (T (S (W w))))",
        "(S (T (S (T (S (W w))))))",
      ]
    );
    let scores = parses.iter().map(|(_, s)| *s).collect::<Vec<_>>();
    assert_eq!(scores, vec![0.0, -2.0, -4.0]);
  }

  #[test]
  fn first_best_matches_viterbi_parse() {
    for ((grammar, lexicon), words) in [
      (time_flies(), &["Time", "flies"][..]),
      (crossing(), &["a", "b", "c"][..]),
    ] {
      let mut parser = ChartParser::new(&grammar, &lexicon, ParserConfig::default());
      assert!(parser.parse_words(words).unwrap());
      let parses = parser.k_best_parses(1);
      assert_eq!(parses.len(), 1);
      assert_eq!(Some(&parses[0].0), parser.best_parse().as_ref());
      assert!((parses[0].1 - parser.best_score()).abs() < 1e-9);
    }
  }

  #[test]
  fn tied_fixture_has_two_best_derivations() {
    let (grammar, lexicon) = tied();
    let mut parser = ChartParser::new(&grammar, &lexicon, ParserConfig::default());
    parser.parse_words(&["x", "y"]).unwrap();
    let parses = parser.k_best_parses(10);
    assert_eq!(parses.len(), 2);
    assert!(parses.iter().all(|(_, s)| *s == parser.best_score()));
    assert_eq!(parser.best_parses().len(), parses.len());
  }

  #[test]
  fn cycle_through_two_states_enumerates_in_order() {
    let mut g = GrammarBuilder::new("S");
    g.unary("S", "W", 0.0)
      .unary("S", "T", -1.5)
      .unary("T", "W", 0.0)
      .unary("T", "S", -0.5)
      .tag("W");
    let grammar = g.build().unwrap();
    let lexicon = ScoreTable::new(&[("w", "W", 0.0)]);
    let mut parser = ChartParser::new(&grammar, &lexicon, ParserConfig::default());
    parser.parse_words(&["w"]).unwrap();
    let scores = parser.k_best_parses(6).iter().map(|(_, s)| *s).collect::<Vec<_>>();
    assert_eq!(scores, vec![0.0, -1.5, -2.0, -3.5, -4.0, -5.5]);
  }

  #[test]
  fn inner_vertex() {
    let (grammar, lexicon) = crossing();
    let mut parser = ChartParser::new(&grammar, &lexicon, ParserConfig::default());
    parser.parse_words(&["a", "b", "c"]).unwrap();
    let x = grammar.state("X").unwrap();
    let parses = parser.k_best_parses_at(x, 0, 2, 4);
    assert_eq!(rendered(&parses), vec!["(X (A a) (B b))"]);
    assert!(parser.k_best_parses_at(x, 1, 3, 4).is_empty());
  }
}
