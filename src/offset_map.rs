//! Invertible mapping between original and transformed text positions
//!
//! The text transform deletes characters (collapsed whitespace) while
//! leaving the rest in order, so the correspondence between the original
//! per-fragment text and the transformed text fed to the shaper is fully
//! described by which original positions were kept. [`OffsetMap`] records
//! exactly that, run-length encoded, and [`OffsetCursor`] walks it in both
//! coordinate spaces at once.
//!
//! All positions are character (Unicode scalar value) indices, not byte
//! offsets: the transform rewrites characters, so bytes are the wrong unit
//! for an invertible mapping.
//!
//! # Invariants
//!
//! - The transformed offset at any point is ≤ the original offset.
//! - `original_to_transformed` and `transformed_to_original` are mutual
//!   inverses when restricted to kept positions.
//! - The map is append-only; a builder checkpoint can roll back a partial
//!   fragment so a failed transform leaves no partial state.

/// One maximal run of consecutive original positions that were all kept or
/// all dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MapRun {
  kept: bool,
  len: u32,
}

/// Which original text positions survive into the transformed text, and
/// where they land.
#[derive(Debug, Clone, Default)]
pub struct OffsetMap {
  runs: Vec<MapRun>,
  original_len: usize,
  transformed_len: usize,
}

impl OffsetMap {
  /// Total original length covered by the map, in chars.
  #[inline]
  pub fn original_len(&self) -> usize {
    self.original_len
  }

  /// Number of kept (transformed) positions.
  #[inline]
  pub fn transformed_len(&self) -> usize {
    self.transformed_len
  }

  /// A cursor at original position 0.
  ///
  /// `delta` is added to caller-supplied original offsets to obtain
  /// positions in this map's space; it lets a cursor speak the coordinate
  /// system of one content node when the map covers the concatenation of
  /// several (see `OwnerFlow::delta`).
  pub fn cursor(&self, delta: i64) -> OffsetCursor<'_> {
    OffsetCursor {
      map: self,
      run_index: if self.runs.is_empty() { usize::MAX } else { 0 },
      run_origin_original: 0,
      run_origin_transformed: 0,
      position: 0,
      delta,
    }
  }

  /// Convenience one-shot conversion in map space.
  pub fn original_to_transformed(&self, original: usize) -> usize {
    let mut cursor = self.cursor(0);
    cursor.set_original(original);
    cursor.transformed()
  }

  /// Convenience one-shot conversion in map space.
  pub fn transformed_to_original(&self, transformed: usize) -> usize {
    let mut cursor = self.cursor(0);
    cursor.set_transformed(transformed);
    cursor.original()
  }

  /// Whether the original position was dropped by the transform.
  pub fn is_original_dropped(&self, original: usize) -> bool {
    let mut cursor = self.cursor(0);
    cursor.set_original(original);
    cursor.is_original_dropped()
  }

  /// Iterates the kept/dropped runs overlapping `original_range`
  /// (map space), yielding `(original_start, len, kept, transformed_start)`
  /// for each clipped piece.
  pub fn runs_in_original_range(
    &self,
    original_range: std::ops::Range<usize>,
  ) -> impl Iterator<Item = (usize, usize, bool, usize)> + '_ {
    let mut original = 0usize;
    let mut transformed = 0usize;
    let range = original_range;
    self.runs.iter().filter_map(move |run| {
      let run_start = original;
      let run_transformed = transformed;
      original += run.len as usize;
      if run.kept {
        transformed += run.len as usize;
      }
      let start = run_start.max(range.start);
      let end = original.min(range.end);
      if start >= end {
        return None;
      }
      let transformed_start = if run.kept {
        run_transformed + (start - run_start)
      } else {
        run_transformed
      };
      Some((start, end - start, run.kept, transformed_start))
    })
  }
}

/// Incremental builder for an [`OffsetMap`].
#[derive(Debug, Default)]
pub struct OffsetMapBuilder {
  runs: Vec<MapRun>,
  original_len: usize,
  transformed_len: usize,
}

/// Rollback point for [`OffsetMapBuilder::restore`].
#[derive(Debug, Clone, Copy)]
pub struct BuilderCheckpoint {
  run_count: usize,
  last_run_len: u32,
  original_len: usize,
  transformed_len: usize,
}

impl OffsetMapBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  /// Original chars appended so far. This is the map-space offset at which
  /// the next fragment begins.
  #[inline]
  pub fn original_len(&self) -> usize {
    self.original_len
  }

  #[inline]
  pub fn transformed_len(&self) -> usize {
    self.transformed_len
  }

  /// Reserve room for up to `additional` further runs.
  pub fn try_reserve(&mut self, additional: usize) -> Result<(), std::collections::TryReserveError> {
    self.runs.try_reserve(additional)
  }

  /// Record `n` original chars that survive into the transformed text.
  pub fn keep(&mut self, n: usize) {
    self.push(true, n);
  }

  /// Record `n` original chars dropped by the transform.
  pub fn skip(&mut self, n: usize) {
    self.push(false, n);
  }

  fn push(&mut self, kept: bool, n: usize) {
    if n == 0 {
      return;
    }
    self.original_len += n;
    if kept {
      self.transformed_len += n;
    }
    if let Some(last) = self.runs.last_mut() {
      if last.kept == kept {
        last.len += n as u32;
        return;
      }
    }
    self.runs.push(MapRun {
      kept,
      len: n as u32,
    });
  }

  pub fn checkpoint(&self) -> BuilderCheckpoint {
    BuilderCheckpoint {
      run_count: self.runs.len(),
      last_run_len: self.runs.last().map_or(0, |r| r.len),
      original_len: self.original_len,
      transformed_len: self.transformed_len,
    }
  }

  /// Roll back to a previous checkpoint, discarding everything appended
  /// since. Used to keep a fragment's transform atomic on failure.
  pub fn restore(&mut self, checkpoint: BuilderCheckpoint) {
    self.runs.truncate(checkpoint.run_count);
    if let Some(last) = self.runs.last_mut() {
      last.len = checkpoint.last_run_len;
    }
    self.original_len = checkpoint.original_len;
    self.transformed_len = checkpoint.transformed_len;
  }

  pub fn finish(self) -> OffsetMap {
    OffsetMap {
      runs: self.runs,
      original_len: self.original_len,
      transformed_len: self.transformed_len,
    }
  }
}

/// A position in both coordinate spaces at once.
///
/// The cursor is cheap to copy and amortizes sequential walks: advancing by
/// small steps moves along the run list instead of re-searching from the
/// start.
#[derive(Debug, Clone)]
pub struct OffsetCursor<'a> {
  map: &'a OffsetMap,
  /// Index of the run containing `position`, or `usize::MAX` past the end.
  run_index: usize,
  run_origin_original: usize,
  run_origin_transformed: usize,
  /// Absolute original position in map space.
  position: usize,
  /// Added to caller offsets to reach map space.
  delta: i64,
}

impl<'a> OffsetCursor<'a> {
  /// Position the cursor at an original offset (caller space).
  pub fn set_original(&mut self, original: usize) {
    let target = (original as i64 + self.delta).max(0) as usize;
    self.seek(target.min(self.map.original_len));
  }

  /// Current original offset (caller space).
  #[inline]
  pub fn original(&self) -> usize {
    (self.position as i64 - self.delta) as usize
  }

  /// Current transformed offset.
  ///
  /// For a dropped original position this is the transformed offset the
  /// next kept character maps to, which makes the value well-defined at
  /// every position including end-of-map.
  pub fn transformed(&self) -> usize {
    if self.run_index == usize::MAX || self.run_index >= self.map.runs.len() {
      return self.map.transformed_len;
    }
    let run = &self.map.runs[self.run_index];
    if run.kept {
      self.run_origin_transformed + (self.position - self.run_origin_original)
    } else {
      self.run_origin_transformed
    }
  }

  /// Whether the original character at the cursor was dropped.
  pub fn is_original_dropped(&self) -> bool {
    if self.run_index == usize::MAX || self.run_index >= self.map.runs.len() {
      return false;
    }
    !self.map.runs[self.run_index].kept
  }

  /// Move by `n` original chars (negative moves backward).
  pub fn advance_original(&mut self, n: isize) {
    let target = (self.position as isize + n).max(0) as usize;
    self.seek(target.min(self.map.original_len));
  }

  /// Position at the kept char with the given transformed offset.
  pub fn set_transformed(&mut self, transformed: usize) {
    let transformed = transformed.min(self.map.transformed_len);
    // Walk from the current run; the target may be on either side.
    if self.run_index == usize::MAX {
      self.rewind();
    }
    // Move backward while the current run starts after the target.
    while self.run_index > 0 && self.run_origin_transformed > transformed {
      self.step_back_run();
    }
    // Move forward until the target lies in a kept run here.
    loop {
      if self.run_index >= self.map.runs.len() {
        self.position = self.map.original_len;
        return;
      }
      let run = self.map.runs[self.run_index];
      let run_transformed_end = if run.kept {
        self.run_origin_transformed + run.len as usize
      } else {
        self.run_origin_transformed
      };
      if run.kept && transformed < run_transformed_end {
        self.position = self.run_origin_original + (transformed - self.run_origin_transformed);
        return;
      }
      self.step_forward_run();
    }
  }

  /// Move by `n` transformed chars (negative moves backward).
  pub fn advance_transformed(&mut self, n: isize) {
    let t = (self.transformed() as isize + n).max(0) as usize;
    self.set_transformed(t);
  }

  /// Reposition at `original` and return the transformed offset there.
  pub fn original_to_transformed(&mut self, original: usize) -> usize {
    self.set_original(original);
    self.transformed()
  }

  /// Reposition at the kept char `transformed` and return its original
  /// offset (caller space).
  pub fn transformed_to_original(&mut self, transformed: usize) -> usize {
    self.set_transformed(transformed);
    self.original()
  }

  fn rewind(&mut self) {
    self.run_index = if self.map.runs.is_empty() { usize::MAX } else { 0 };
    self.run_origin_original = 0;
    self.run_origin_transformed = 0;
    self.position = 0;
  }

  fn step_forward_run(&mut self) {
    let run = self.map.runs[self.run_index];
    self.run_origin_original += run.len as usize;
    if run.kept {
      self.run_origin_transformed += run.len as usize;
    }
    self.run_index += 1;
    self.position = self.run_origin_original;
  }

  fn step_back_run(&mut self) {
    debug_assert!(self.run_index > 0, "stepping back past the first run");
    self.run_index -= 1;
    let run = self.map.runs[self.run_index];
    self.run_origin_original -= run.len as usize;
    if run.kept {
      self.run_origin_transformed -= run.len as usize;
    }
    self.position = self.run_origin_original;
  }

  /// Seek to an absolute map-space original position.
  fn seek(&mut self, target: usize) {
    if self.map.runs.is_empty() {
      self.position = 0;
      return;
    }
    if self.run_index == usize::MAX {
      self.rewind();
    }
    while target < self.run_origin_original {
      self.step_back_run();
    }
    while self.run_index < self.map.runs.len() {
      let run_end = self.run_origin_original + self.map.runs[self.run_index].len as usize;
      if target < run_end {
        self.position = target;
        return;
      }
      self.step_forward_run();
    }
    // Past the last run: park at end.
    self.position = self.map.original_len;
  }
}
