//! Tree rewrites applied before training and after extraction.

use regex::Regex;

use crate::grammar::{SYNTHETIC_MARKER, is_synthetic};
use crate::parse_grammar::regex_static;
use crate::syntree::{SynTree, Tree};

/// A pure function from trees to trees.
pub trait TreeTransformer: Send + Sync {
  fn transform(&self, tree: &Tree) -> Tree;
}

/// Right-factored binarization. A node `X -> c0 c1 ... cn` with more than
/// two children becomes `X -> c0 @X|c0`, `@X|c0 -> c1 @X|c0_c1`, and so on
/// down to a synthetic node over the last two children. A horizontal Markov
/// order keeps only that many of the most recent siblings in the labels.
#[derive(Debug, Clone, Copy, Default)]
pub struct Binarizer {
  pub markov_order: Option<usize>,
}

impl Binarizer {
  pub fn new(markov_order: Option<usize>) -> Self {
    Self { markov_order }
  }

  fn synthetic_label(&self, parent: &str, siblings: &[&str]) -> String {
    let kept = match self.markov_order {
      Some(h) => &siblings[siblings.len().saturating_sub(h)..],
      None => siblings,
    };
    format!("{}{}|{}", SYNTHETIC_MARKER, parent, kept.join("_"))
  }

  fn factor(&self, parent: &str, mut children: Vec<Tree>, consumed: &mut Vec<String>) -> Tree {
    if children.len() <= 2 {
      return Tree::branch(&self.label_for(parent, consumed), children);
    }
    let first = children.remove(0);
    let label = self.label_for(parent, consumed);
    consumed.push(first.label().to_string());
    let rest = self.factor(parent, children, consumed);
    Tree::branch(&label, vec![first, rest])
  }

  fn label_for(&self, parent: &str, consumed: &[String]) -> String {
    if consumed.is_empty() {
      parent.to_string()
    } else {
      let siblings = consumed.iter().map(String::as_str).collect::<Vec<_>>();
      self.synthetic_label(parent, &siblings)
    }
  }
}

impl TreeTransformer for Binarizer {
  fn transform(&self, tree: &Tree) -> Tree {
    match tree {
      SynTree::Leaf(_) => tree.clone(),
      SynTree::Branch(c, children) => {
        let children = children.iter().map(|c| self.transform(c)).collect::<Vec<_>>();
        self.factor(&c.value, children, &mut Vec::new())
      }
    }
  }
}

/// Splices out every synthetic node, restoring the n-ary tree.
#[derive(Debug, Clone, Copy, Default)]
pub struct Debinarizer;

impl TreeTransformer for Debinarizer {
  fn transform(&self, tree: &Tree) -> Tree {
    match tree {
      SynTree::Leaf(_) => tree.clone(),
      SynTree::Branch(c, children) => {
        let mut flat = Vec::with_capacity(children.len());
        for child in children {
          let child = self.transform(child);
          if child.get_branch().is_some_and(|(cc, _)| is_synthetic(&cc.value)) {
            if let Some((_, grandchildren)) = child.into_branch() {
              flat.extend(grandchildren);
            }
          } else {
            flat.push(child);
          }
        }
        Tree::branch(&c.value, flat)
      }
    }
  }
}

/// Drops latent `^n` subcategory suffixes from labels.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubcategoryStripper;

impl TreeTransformer for SubcategoryStripper {
  fn transform(&self, tree: &Tree) -> Tree {
    regex_static!(SUBCATEGORY, r"\^\d+$");
    match tree {
      SynTree::Leaf(_) => tree.clone(),
      SynTree::Branch(c, children) => {
        let children = children.iter().map(|c| self.transform(c)).collect();
        Tree::branch(&SUBCATEGORY.replace(&c.value, ""), children)
      }
    }
  }
}

/// Runs transformers left to right.
#[derive(Default)]
pub struct TransformerChain {
  steps: Vec<Box<dyn TreeTransformer>>,
}

impl TransformerChain {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn then(mut self, step: impl TreeTransformer + 'static) -> Self {
    self.steps.push(Box::new(step));
    self
  }

  /// Strips subcategories, then splices out synthetic nodes.
  pub fn postprocessing() -> Self {
    Self::new().then(SubcategoryStripper).then(Debinarizer)
  }
}

impl TreeTransformer for TransformerChain {
  fn transform(&self, tree: &Tree) -> Tree {
    self
      .steps
      .iter()
      .fold(tree.clone(), |tree, step| step.transform(&tree))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn tree(s: &str) -> Tree {
    s.parse().unwrap()
  }

  #[test]
  fn binarize_and_back() {
    let original = tree("(ROOT (NP (DT the) (JJ big) (JJ red) (NN dog)))");
    let binarized = Binarizer::default().transform(&original);
    assert_eq!(
      binarized.to_string(),
      "(ROOT (NP (DT the) (@NP|DT (JJ big) (@NP|DT_JJ (JJ red) (NN dog)))))"
    );
    assert_eq!(binarized.span(), (0, 4));
    assert_eq!(Debinarizer.transform(&binarized), original);
  }

  #[test]
  fn markov_order_limits_history() {
    let original = tree("(NP (DT the) (JJ big) (JJ red) (NN dog))");
    let binarized = Binarizer::new(Some(1)).transform(&original);
    assert_eq!(
      binarized.to_string(),
      "(NP (DT the) (@NP|DT (JJ big) (@NP|JJ (JJ red) (NN dog))))"
    );
    let flat = Binarizer::new(Some(0)).transform(&original);
    assert_eq!(
      flat.to_string(),
      "(NP (DT the) (@NP| (JJ big) (@NP| (JJ red) (NN dog))))"
    );
  }

  #[test]
  fn postprocessing_restores_plain_labels() {
    let trained = tree("(ROOT (NP^1 (DT^0 the) (@NP|DT^1 (JJ^0 big) (NN^1 dog))))");
    let restored = TransformerChain::postprocessing().transform(&trained);
    assert_eq!(restored.to_string(), "(ROOT (NP (DT the) (JJ big) (NN dog)))");
  }
}
