use std::fmt;

use crate::error::{Error, Result};

/// Score arrays for one in-flight parse, reused across sentences.
///
/// Cells `(start, end)` with `start < end <= capacity` are stored in a flat
/// triangular layout, each holding one score per state. Extent arrays record,
/// per boundary and state, the nearest and farthest opposite boundary with a
/// finite inside score.
#[derive(Debug)]
pub struct Chart {
  num_states: usize,
  capacity: usize,
  /// Sentences at or above this length failed to allocate before.
  failed_length: Option<usize>,
  outside: bool,
  length_normalization: bool,
  pub(crate) i_score: Vec<f64>,
  pub(crate) o_score: Vec<f64>,
  pub(crate) words_in_span: Vec<u32>,
  /// `[end][state]`: the rightmost start.
  pub(crate) narrow_l_extent: Vec<i32>,
  /// `[end][state]`: the leftmost start.
  pub(crate) wide_l_extent: Vec<i32>,
  /// `[start][state]`: the leftmost end.
  pub(crate) narrow_r_extent: Vec<i32>,
  /// `[start][state]`: the rightmost end.
  pub(crate) wide_r_extent: Vec<i32>,
  /// `[position][state]`: the score each tag was seeded with.
  pub(crate) lex_score: Vec<f64>,
  /// `[start][state]`: some edge starting here has finite inside and outside scores.
  pub(crate) possible_starts: Vec<bool>,
  /// `[end][state]`: the same for edges ending here.
  pub(crate) possible_ends: Vec<bool>,
  length: usize,
}

fn try_filled<T: Clone>(len: usize, value: T) -> Option<Vec<T>> {
  let mut v = Vec::new();
  v.try_reserve_exact(len).ok()?;
  v.resize(len, value);
  Some(v)
}

fn num_cells(capacity: usize) -> Option<usize> {
  capacity.checked_mul(capacity + 1).map(|n| n / 2)
}

impl Chart {
  pub fn new(num_states: usize, outside: bool, length_normalization: bool) -> Self {
    Self {
      num_states,
      capacity: 0,
      failed_length: None,
      outside,
      length_normalization,
      i_score: Vec::new(),
      o_score: Vec::new(),
      words_in_span: Vec::new(),
      narrow_l_extent: Vec::new(),
      wide_l_extent: Vec::new(),
      narrow_r_extent: Vec::new(),
      wide_r_extent: Vec::new(),
      lex_score: Vec::new(),
      possible_starts: Vec::new(),
      possible_ends: Vec::new(),
      length: 0,
    }
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  pub fn num_states(&self) -> usize {
    self.num_states
  }

  /// Length of the sentence the chart was last reset for.
  pub fn len(&self) -> usize {
    self.length
  }

  pub fn is_empty(&self) -> bool {
    self.length == 0
  }

  /// Grows the arrays to hold sentences of `length` words. Never shrinks.
  /// If allocation fails the previous arrays stay in place and every later
  /// request at or above `length` is refused without trying again.
  pub fn ensure_capacity(&mut self, length: usize, max_length: usize) -> Result<()> {
    if length > max_length {
      return Err(Error::SentenceTooLong {
        length,
        max: max_length,
      });
    }
    if length <= self.capacity {
      return Ok(());
    }
    if self.failed_length.is_some_and(|failed| length >= failed) {
      return Err(Error::ChartAllocation { length });
    }

    match self.allocate(length) {
      Some(()) => {
        tracing::debug!(length, states = self.num_states, "grew chart");
        self.capacity = length;
        Ok(())
      }
      None => {
        tracing::warn!(
          length,
          kept = self.capacity,
          "could not allocate chart, keeping previous arrays"
        );
        self.failed_length = Some(length);
        Err(Error::ChartAllocation { length })
      }
    }
  }

  fn allocate(&mut self, capacity: usize) -> Option<()> {
    let ns = self.num_states;
    let cell_scores = num_cells(capacity)?.checked_mul(ns)?;
    let boundaries = (capacity + 1).checked_mul(ns)?;
    let optional = |wanted: bool| if wanted { cell_scores } else { 0 };

    let i_score = try_filled(cell_scores, f64::NEG_INFINITY)?;
    let o_score = try_filled(optional(self.outside), f64::NEG_INFINITY)?;
    let words_in_span = try_filled(optional(self.length_normalization), 1u32)?;
    let narrow_l_extent = try_filled(boundaries, -1)?;
    let wide_l_extent = try_filled(boundaries, -1)?;
    let narrow_r_extent = try_filled(boundaries, -1)?;
    let wide_r_extent = try_filled(boundaries, -1)?;
    let lex_score = try_filled(boundaries, f64::NEG_INFINITY)?;
    let possible = if self.outside { boundaries } else { 0 };
    let possible_starts = try_filled(possible, false)?;
    let possible_ends = try_filled(possible, false)?;

    self.i_score = i_score;
    self.o_score = o_score;
    self.words_in_span = words_in_span;
    self.narrow_l_extent = narrow_l_extent;
    self.wide_l_extent = wide_l_extent;
    self.narrow_r_extent = narrow_r_extent;
    self.wide_r_extent = wide_r_extent;
    self.lex_score = lex_score;
    self.possible_starts = possible_starts;
    self.possible_ends = possible_ends;
    Some(())
  }

  /// Clears everything a sentence of `length` words can touch.
  /// `ensure_capacity(length)` must have succeeded.
  pub fn reset(&mut self, length: usize) {
    debug_assert!(length <= self.capacity);
    self.length = length;
    let ns = self.num_states;
    for start in 0..length {
      let from = self.cell(start, start + 1);
      let to = self.cell(start, length) + ns;
      self.i_score[from..to].fill(f64::NEG_INFINITY);
      if self.outside {
        self.o_score[from..to].fill(f64::NEG_INFINITY);
      }
      if self.length_normalization {
        self.words_in_span[from..to].fill(1);
      }
    }

    let boundaries = (length + 1) * ns;
    let sentinel = length as i32 + 1;
    self.narrow_l_extent[..boundaries].fill(-1);
    self.wide_l_extent[..boundaries].fill(sentinel);
    self.narrow_r_extent[..boundaries].fill(sentinel);
    self.wide_r_extent[..boundaries].fill(-1);
    self.lex_score[..boundaries].fill(f64::NEG_INFINITY);
    if self.outside {
      self.possible_starts[..boundaries].fill(false);
      self.possible_ends[..boundaries].fill(false);
    }
  }

  /// Offset of the first state of cell `(start, end)`.
  #[inline]
  pub fn cell(&self, start: usize, end: usize) -> usize {
    debug_assert!(start < end && end <= self.capacity);
    let before = start * self.capacity - start * start.saturating_sub(1) / 2;
    (before + end - start - 1) * self.num_states
  }

  #[inline]
  pub fn boundary(&self, position: usize, state: usize) -> usize {
    position * self.num_states + state
  }

  #[inline]
  pub fn inside(&self, start: usize, end: usize, state: usize) -> f64 {
    self.i_score[self.cell(start, end) + state]
  }

  #[inline]
  pub fn outside(&self, start: usize, end: usize, state: usize) -> f64 {
    if self.outside {
      self.o_score[self.cell(start, end) + state]
    } else {
      f64::NEG_INFINITY
    }
  }

  /// Records that `state` became feasible over `[start, end)`. Spans are
  /// built in order of increasing width, so the first hit at a boundary is
  /// the narrowest and later hits can only widen.
  pub(crate) fn mark_built(&mut self, start: usize, end: usize, state: usize) {
    let (s, e) = (start as i32, end as i32);
    let at_end = self.boundary(end, state);
    if s > self.narrow_l_extent[at_end] {
      self.narrow_l_extent[at_end] = s;
      self.wide_l_extent[at_end] = s;
    } else if s < self.wide_l_extent[at_end] {
      self.wide_l_extent[at_end] = s;
    }

    let at_start = self.boundary(start, state);
    if e < self.narrow_r_extent[at_start] {
      self.narrow_r_extent[at_start] = e;
      self.wide_r_extent[at_start] = e;
    } else if e > self.wide_r_extent[at_start] {
      self.wide_r_extent[at_start] = e;
    }
  }
}

/// Lists the finite inside scores, one cell per line.
impl fmt::Display for Chart {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for diff in 1..=self.length {
      for start in 0..=self.length - diff {
        let end = start + diff;
        let base = self.cell(start, end);
        let finite = (0..self.num_states)
          .filter(|&s| self.i_score[base + s] > f64::NEG_INFINITY)
          .collect::<Vec<_>>();
        if finite.is_empty() {
          continue;
        }
        write!(f, "{}..{}:", start, end)?;
        for s in finite {
          write!(f, " {}={:.4}", s, self.i_score[base + s])?;
        }
        writeln!(f)?;
      }
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn cells_are_dense_and_disjoint() {
    let mut chart = Chart::new(3, false, false);
    chart.ensure_capacity(4, 10).unwrap();
    let mut offsets = Vec::new();
    for start in 0..4 {
      for end in start + 1..=4 {
        offsets.push(chart.cell(start, end));
      }
    }
    let expected = (0..10).map(|c| c * 3).collect::<Vec<_>>();
    assert_eq!(offsets, expected);
    assert_eq!(chart.i_score.len(), 30);
  }

  #[test]
  fn chart_only_grows() {
    let mut chart = Chart::new(2, true, true);
    chart.ensure_capacity(5, 10).unwrap();
    chart.ensure_capacity(3, 10).unwrap();
    assert_eq!(chart.capacity(), 5);
    assert!(matches!(
      chart.ensure_capacity(11, 10),
      Err(Error::SentenceTooLong { length: 11, max: 10 })
    ));
  }

  #[test]
  fn failed_allocation_keeps_previous_arrays() {
    let mut chart = Chart::new(usize::MAX / 8, false, false);
    assert!(matches!(
      chart.ensure_capacity(4, 10),
      Err(Error::ChartAllocation { length: 4 })
    ));
    assert_eq!(chart.capacity(), 0);
    // not retried for the same or longer sentences
    assert!(matches!(
      chart.ensure_capacity(6, 10),
      Err(Error::ChartAllocation { length: 6 })
    ));
  }

  #[test]
  fn extents_track_first_and_widest() {
    let mut chart = Chart::new(1, false, false);
    chart.ensure_capacity(4, 10).unwrap();
    chart.reset(4);
    chart.mark_built(1, 2, 0);
    chart.mark_built(1, 4, 0);
    chart.mark_built(0, 4, 0);
    assert_eq!(chart.narrow_r_extent[chart.boundary(1, 0)], 2);
    assert_eq!(chart.wide_r_extent[chart.boundary(1, 0)], 4);
    assert_eq!(chart.narrow_l_extent[chart.boundary(4, 0)], 1);
    assert_eq!(chart.wide_l_extent[chart.boundary(4, 0)], 0);
    assert_eq!(chart.narrow_r_extent[chart.boundary(2, 0)], 5);
  }
}
