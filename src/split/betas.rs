use rand::Rng;

use crate::utils::log_add;

/// A dense log-space table for one production template, indexed by
/// `[parent, child]` or `[parent, left, right]` substates in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct Betas {
  dims: Vec<usize>,
  values: Vec<f64>,
}

impl Betas {
  pub fn filled(dims: &[usize], value: f64) -> Self {
    let len = dims.iter().product();
    Self {
      dims: dims.to_vec(),
      values: vec![value; len],
    }
  }

  pub fn dims(&self) -> &[usize] {
    &self.dims
  }

  pub fn parent_states(&self) -> usize {
    self.dims[0]
  }

  /// Entries per parent substate.
  pub fn row_len(&self) -> usize {
    self.dims[1..].iter().product()
  }

  pub fn row(&self, parent: usize) -> &[f64] {
    let n = self.row_len();
    &self.values[parent * n..(parent + 1) * n]
  }

  pub fn row_mut(&mut self, parent: usize) -> &mut [f64] {
    let n = self.row_len();
    &mut self.values[parent * n..(parent + 1) * n]
  }

  pub fn values(&self) -> &[f64] {
    &self.values
  }

  fn offset(&self, idx: &[usize]) -> usize {
    idx.iter().zip(&self.dims).fold(0, |acc, (&i, &d)| acc * d + i)
  }

  pub fn get(&self, idx: &[usize]) -> f64 {
    self.values[self.offset(idx)]
  }

  pub fn set(&mut self, idx: &[usize], value: f64) {
    let at = self.offset(idx);
    self.values[at] = value;
  }

  /// `ln(e^old + e^value)` in place.
  pub fn log_add_at(&mut self, idx: &[usize], value: f64) {
    let at = self.offset(idx);
    self.values[at] = log_add(self.values[at], value);
  }

  /// Doubles `axis`. The parent axis copies each row; a child axis divides
  /// each entry between its two new substates with a random 45 to 55 percent share.
  pub fn split_axis<R: Rng>(&self, axis: usize, rng: &mut R) -> Self {
    let mut dims = self.dims.clone();
    dims[axis] *= 2;
    let mut out = Self::filled(&dims, f64::NEG_INFINITY);
    let mut idx = vec![0; self.dims.len()];
    for &value in &self.values {
      let (first, second) = if axis == 0 {
        (value, value)
      } else {
        let w = 0.45 + rng.random::<f64>() * 0.1;
        (value + w.ln(), value + (1.0 - w).ln())
      };
      let mut target = idx.clone();
      target[axis] = idx[axis] * 2;
      out.set(&target, first);
      target[axis] += 1;
      out.set(&target, second);
      self.advance(&mut idx);
    }
    out
  }

  /// Row-major increment of a multi-index.
  fn advance(&self, idx: &mut [usize]) {
    for d in (0..idx.len()).rev() {
      idx[d] += 1;
      if idx[d] < self.dims[d] {
        return;
      }
      idx[d] = 0;
    }
  }

  /// Visits every multi-index with its value, row-major.
  pub fn for_each(&self, mut f: impl FnMut(&[usize], f64)) {
    let mut idx = vec![0; self.dims.len()];
    for &value in &self.values {
      f(&idx, value);
      self.advance(&mut idx);
    }
  }

  /// Makes every parent row sum to one. A row with no mass becomes uniform.
  pub fn normalize_rows(&mut self) {
    let n = self.row_len();
    let uniform = -(n as f64).ln();
    for parent in 0..self.parent_states() {
      let row = self.row_mut(parent);
      let total = row.iter().copied().fold(f64::NEG_INFINITY, log_add);
      if total.is_infinite() || total.is_nan() {
        row.fill(uniform);
      } else {
        row.iter_mut().for_each(|v| *v -= total);
      }
    }
  }

  /// Largest entrywise difference; equal entries (including two -inf) count as 0.
  pub fn max_abs_diff(&self, other: &Self) -> f64 {
    if self.dims != other.dims {
      return f64::INFINITY;
    }
    self
      .values
      .iter()
      .zip(&other.values)
      .map(|(a, b)| if a == b { 0.0 } else { (a - b).abs() })
      .fold(0.0, f64::max)
  }

  /// Entrywise log-sum with a table of the same shape.
  pub fn absorb(&mut self, other: &Self) {
    debug_assert_eq!(self.dims, other.dims);
    for (a, &b) in self.values.iter_mut().zip(&other.values) {
      *a = log_add(*a, b);
    }
  }
}
