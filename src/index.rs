use std::collections::HashMap;
use std::fmt;

/// A bidirectional map between strings and dense integer ids.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Index {
  objects: Vec<String>,
  indices: HashMap<String, usize>,
}

impl Index {
  pub fn new() -> Self {
    Self::default()
  }

  /// Adds `s` if missing and returns its id.
  pub fn add(&mut self, s: &str) -> usize {
    if let Some(&idx) = self.indices.get(s) {
      return idx;
    }
    let idx = self.objects.len();
    self.objects.push(s.to_string());
    self.indices.insert(s.to_string(), idx);
    idx
  }

  pub fn index_of(&self, s: &str) -> Option<usize> {
    self.indices.get(s).copied()
  }

  pub fn get(&self, idx: usize) -> Option<&str> {
    self.objects.get(idx).map(String::as_str)
  }

  pub fn contains(&self, s: &str) -> bool {
    self.indices.contains_key(s)
  }

  pub fn len(&self) -> usize {
    self.objects.len()
  }

  pub fn is_empty(&self) -> bool {
    self.objects.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &str> {
    self.objects.iter().map(String::as_str)
  }
}

impl<S: AsRef<str>> FromIterator<S> for Index {
  fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
    let mut index = Self::new();
    for s in iter {
      index.add(s.as_ref());
    }
    index
  }
}

impl std::ops::Index<usize> for Index {
  type Output = str;

  fn index(&self, idx: usize) -> &str {
    &self.objects[idx]
  }
}

/// One `id=object` line per entry, the layout used by the model text format.
impl fmt::Display for Index {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (idx, s) in self.objects.iter().enumerate() {
      writeln!(f, "{}={}", idx, s)?;
    }
    Ok(())
  }
}

#[test]
fn test_index_is_stable() {
  let mut index: Index = ["ROOT", "S", "NP"].into_iter().collect();
  assert_eq!(index.add("S"), 1);
  assert_eq!(index.add("VP"), 3);
  assert_eq!(index.index_of("NP"), Some(2));
  assert_eq!(index.get(3), Some("VP"));
  assert_eq!(index.to_string(), "0=ROOT\n1=S\n2=NP\n3=VP\n");
}
