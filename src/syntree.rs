use std::fmt;
use std::str::FromStr;

use crate::error::Error;
use crate::parse_grammar::{ParseResult, needed_char, optional_char, parse_symbol, skip_whitespace};

#[derive(Debug, PartialEq, Clone)]
pub struct Constituent<T> {
  pub value: T,
  pub span: (usize, usize),
}

impl<T> fmt::Display for Constituent<T>
where
  T: fmt::Display,
{
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}..{}: {}", self.span.0, self.span.1, self.value)
  }
}

#[derive(Debug, PartialEq, Clone)]
pub struct Word<U> {
  pub value: U,
  pub span: (usize, usize),
}

impl<U> fmt::Display for Word<U>
where
  U: fmt::Display,
{
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}..{}: {}", self.span.0, self.span.1, self.value)
  }
}

#[derive(Debug, PartialEq, Clone)]
pub enum SynTree<T, U> {
  Branch(Constituent<T>, Vec<SynTree<T, U>>),
  Leaf(Word<U>),
}

/// A parse tree with string labels and words.
pub type Tree = SynTree<String, String>;

impl<T, U> SynTree<T, U> {
  pub fn is_leaf(&self) -> bool {
    matches!(self, Self::Leaf(_))
  }

  /// A branch whose only child is a leaf.
  pub fn is_preterminal(&self) -> bool {
    match self {
      Self::Branch(_, children) => children.len() == 1 && children[0].is_leaf(),
      _ => false,
    }
  }

  pub fn get_branch(&self) -> Option<(&Constituent<T>, &Vec<SynTree<T, U>>)> {
    match self {
      Self::Branch(c, cs) => Some((c, cs)),
      _ => None,
    }
  }

  pub fn into_branch(self) -> Option<(Constituent<T>, Vec<SynTree<T, U>>)> {
    match self {
      Self::Branch(c, cs) => Some((c, cs)),
      _ => None,
    }
  }

  pub fn span(&self) -> (usize, usize) {
    match self {
      Self::Branch(c, _) => c.span,
      Self::Leaf(w) => w.span,
    }
  }

  pub fn children(&self) -> &[SynTree<T, U>] {
    match self {
      Self::Branch(_, cs) => cs,
      Self::Leaf(_) => &[],
    }
  }

  /// The leaves' values, left to right.
  pub fn leaves(&self) -> Vec<&U> {
    let mut out = Vec::new();
    self.collect_leaves(&mut out);
    out
  }

  fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a U>) {
    match self {
      Self::Leaf(w) => out.push(&w.value),
      Self::Branch(_, cs) => cs.iter().for_each(|c| c.collect_leaves(out)),
    }
  }
}

impl Tree {
  pub fn branch(label: &str, children: Vec<Tree>) -> Self {
    let start = children.first().map_or(0, |c| c.span().0);
    let end = children.last().map_or(start, |c| c.span().1);
    Self::Branch(
      Constituent {
        value: label.to_string(),
        span: (start, end),
      },
      children,
    )
  }

  pub fn leaf(word: &str, position: usize) -> Self {
    Self::Leaf(Word {
      value: word.to_string(),
      span: (position, position + 1),
    })
  }

  /// `(tag word)` over one position.
  pub fn preterminal(tag: &str, word: &str, position: usize) -> Self {
    Self::branch(tag, vec![Self::leaf(word, position)])
  }

  /// The branch label, or the word for a leaf.
  pub fn label(&self) -> &str {
    match self {
      Self::Branch(c, _) => &c.value,
      Self::Leaf(w) => &w.value,
    }
  }

  pub fn words(&self) -> Vec<&str> {
    self.leaves().into_iter().map(String::as_str).collect()
  }

  /// Renumbers every span so the first leaf sits at `offset`.
  pub fn respan(&mut self, offset: usize) -> usize {
    match self {
      Self::Leaf(w) => {
        w.span = (offset, offset + 1);
        offset + 1
      }
      Self::Branch(c, children) => {
        let mut pos = offset;
        for child in children.iter_mut() {
          pos = child.respan(pos);
        }
        c.span = (offset, pos);
        pos
      }
    }
  }
}

/// Penn-style brackets on one line, e.g. `(ROOT (S (NP Time) (VP flies)))`.
/// The alternate form `{:#}` prints one constituent per line with spans.
impl<T, U> fmt::Display for SynTree<T, U>
where
  T: fmt::Display,
  U: fmt::Display,
{
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if f.alternate() {
      return self.fmt_indented(f, 0);
    }
    match self {
      Self::Leaf(w) => write!(f, "{}", w.value),
      Self::Branch(c, children) => {
        write!(f, "({}", c.value)?;
        for child in children {
          write!(f, " {}", child)?;
        }
        write!(f, ")")
      }
    }
  }
}

impl<T, U> SynTree<T, U>
where
  T: fmt::Display,
  U: fmt::Display,
{
  fn fmt_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
    let pad = depth * 2;
    match self {
      Self::Leaf(w) => writeln!(f, "{:pad$}{}", "", w),
      Self::Branch(c, children) => {
        writeln!(f, "{:pad$}{}", "", c)?;
        for child in children {
          child.fmt_indented(f, depth + 1)?;
        }
        Ok(())
      }
    }
  }
}

fn parse_tree(s: &str, position: usize) -> ParseResult<'_, Tree> {
  let s = skip_whitespace(s);
  if let (Some(_), s) = optional_char('(', s) {
    let s = skip_whitespace(s);
    // PTB files wrap each tree in an unlabelled bracket
    let (label, mut rem) = if s.starts_with('(') {
      ("ROOT".to_string(), s)
    } else {
      parse_symbol(s).map_err(|e| format!("tree label: {}", e))?
    };

    let mut children = Vec::new();
    let mut pos = position;
    loop {
      rem = skip_whitespace(rem);
      if let (Some(_), rest) = optional_char(')', rem) {
        let mut tree = Tree::branch(&label, children);
        tree.respan(position);
        return Ok((tree, rest));
      }
      if rem.is_empty() {
        return Err(format!("unclosed constituent {}", label));
      }
      let (child, rest) = parse_tree(rem, pos)?;
      pos = child.span().1;
      children.push(child);
      rem = rest;
    }
  } else {
    let (word, rest) = parse_symbol(s).map_err(|e| format!("word: {}", e))?;
    Ok((Tree::leaf(&word, position), rest))
  }
}

impl FromStr for Tree {
  type Err = Error;

  /// Reads one bracketed tree.
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let (tree, rest) = parse_tree(s, 0).map_err(|e| Error::format(1, e))?;
    if !skip_whitespace(rest).is_empty() {
      return Err(Error::format(1, format!("trailing input {:?}", rest)));
    }
    if tree.is_leaf() {
      return Err(Error::format(1, "expected a bracketed tree"));
    }
    Ok(tree)
  }
}

/// Reads every bracketed tree in a string, e.g. a small treebank file.
pub fn read_trees(s: &str) -> Result<Vec<Tree>, Error> {
  let mut trees = Vec::new();
  let mut rem = skip_whitespace(s);
  while !rem.is_empty() {
    needed_char('(', rem).map_err(|e| Error::format(trees.len() + 1, e))?;
    let (tree, rest) = parse_tree(rem, 0).map_err(|e| Error::format(trees.len() + 1, e))?;
    trees.push(tree);
    rem = skip_whitespace(rest);
  }
  Ok(trees)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn bracketed_round_trip() {
    let src = "(ROOT (S (NP Time) (VP flies)))";
    let tree: Tree = src.parse().unwrap();
    assert_eq!(tree.to_string(), src);
    assert_eq!(tree.span(), (0, 2));
    assert_eq!(tree.words(), vec!["Time", "flies"]);
    let vp = &tree.children()[0].children()[1];
    assert_eq!(vp.label(), "VP");
    assert_eq!(vp.span(), (1, 2));
    assert!(vp.is_preterminal());
  }

  #[test]
  fn unlabelled_outer_bracket_becomes_root() {
    let tree: Tree = "( (S (NN dogs) (VBP bark)))".parse().unwrap();
    assert_eq!(tree.to_string(), "(ROOT (S (NN dogs) (VBP bark)))");
  }

  #[test]
  fn several_trees() {
    let trees = read_trees("(S (A a))\n\n(S (B b) (C c))\n").unwrap();
    assert_eq!(trees.len(), 2);
    assert_eq!(trees[1].span(), (0, 2));
    assert!(read_trees("(S (A a)").is_err());
  }

  #[test]
  fn indented_display_shows_spans() {
    let tree: Tree = "(S (A a) (B b))".parse().unwrap();
    assert_eq!(format!("{:#}", tree), "0..2: S\n  0..1: A\n    0..1: a\n  1..2: B\n    1..2: b\n");
  }
}
