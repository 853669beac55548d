//! Per-object spacing, justification and hyphenation queries
//!
//! A [`PropertyProvider`] views one layout object's sub-range of a shaped
//! run and answers the questions measurement and painting ask: how much
//! extra advance each cluster takes (letter-spacing, word-spacing, tab
//! stops, justification), where hyphenation breaks are allowed, and how
//! wide a synthesized hyphen would be.
//!
//! Tab advances are special: a tab's width depends on everything laid out
//! before it on the line, not just on this run, so they are computed once
//! during reflow with a running origin and memoized per object for the
//! later display passes.

use std::cell::Cell;
use std::ops::Range;
use std::rc::Rc;

use crate::document::{
  is_space_combining_sequence_tail, Document, ObjectFlags, ObjectId, TabWidthMemo,
};
use crate::error::{Error, Result};
use crate::offset_map::OffsetCursor;
use crate::shaper::{ShapeOptions, Shaper};
use crate::style::StyleContext;
use crate::text_run::{OwnerData, RunFlags, TextRun};
use crate::transform::CH_SHY;

/// Tab stops sit at multiples of eight space widths.
const TAB_STOP_SPACES: f32 = 8.0;

/// Guard against a tab landing epsilon short of its own stop.
const TAB_EPSILON: f32 = 1e-6;

/// Extra advance around one transformed character.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Spacing {
  pub before: f32,
  pub after: f32,
}

/// Spacing/justification/hyphenation oracle for one object's sub-range of
/// a run.
pub struct PropertyProvider<'a> {
  run: &'a TextRun,
  doc: &'a Document,
  shaper: &'a dyn Shaper,
  object: ObjectId,
  style: Rc<StyleContext>,
  object_flags: ObjectFlags,
  frag: &'a [char],
  /// Content offsets + this = run original (before-transform) offsets.
  delta: i64,
  /// Positioned at the provider's first content char.
  start: OffsetCursor<'a>,
  /// Covered content chars (including dropped ones).
  length: usize,
  word_spacing: f32,
  letter_spacing: f32,
  justification_spacing: f32,
  hyphen_width: Cell<Option<f32>>,
  /// Running horizontal offset used while computing tab advances.
  tab_origin: f32,
  /// Reflow pass: tab widths are computed and memoized. Display pass: the
  /// memo must already exist.
  reflowing: bool,
}

impl<'a> PropertyProvider<'a> {
  /// Provider for the reflow pass. `tab_origin` is the distance from the
  /// line container's origin to this object's first character, which seeds
  /// tab-stop arithmetic.
  pub fn for_reflow(
    run: &'a TextRun,
    doc: &'a Document,
    object: ObjectId,
    shaper: &'a dyn Shaper,
    tab_origin: f32,
  ) -> Result<Self> {
    let mut provider = Self::build(run, doc, object, shaper)?;
    provider.reflowing = true;
    provider.tab_origin = tab_origin;
    Ok(provider)
  }

  /// Provider for display passes after reflow. Tab widths are replayed
  /// from the per-object memo.
  pub fn new(
    run: &'a TextRun,
    doc: &'a Document,
    object: ObjectId,
    shaper: &'a dyn Shaper,
  ) -> Result<Self> {
    Self::build(run, doc, object, shaper)
  }

  fn build(
    run: &'a TextRun,
    doc: &'a Document,
    object: ObjectId,
    shaper: &'a dyn Shaper,
  ) -> Result<Self> {
    let layout_object = doc.object(object);
    let text = layout_object
      .as_text()
      .ok_or(Error::StaleHandle("provider over non-text object"))?;
    let delta = match run.owners() {
      OwnerData::Simple(_) => 0,
      OwnerData::Flows(_) => {
        run
          .find_flow(doc, text.content)
          .ok_or(Error::FlowMismatch {
            offset: text.content_start,
          })?
          .delta
      }
    };
    let mut start = run.cursor(delta);
    start.set_original(text.content_start);
    Ok(Self {
      run,
      doc,
      shaper,
      object,
      style: layout_object.style.clone(),
      object_flags: layout_object.flags,
      frag: doc.content(text.content).chars(),
      delta,
      start,
      length: text.content_length(),
      word_spacing: layout_object.style.word_spacing,
      letter_spacing: layout_object.style.letter_spacing,
      justification_spacing: 0.0,
      hyphen_width: Cell::new(None),
      tab_origin: 0.0,
      reflowing: false,
    })
  }

  /// Narrow the provider to the line-trimmed content range. Call before
  /// measuring for display; pass `trim_trailing` except when the trailing
  /// space is still needed (end-of-line overflow checks).
  pub fn initialize_for_display(&mut self, trim_trailing: bool) {
    let (start, length) = self.doc.trimmed_offsets(self.object, trim_trailing);
    self.start.set_original(start);
    self.length = length;
  }

  /// The provider's start position in the run (transformed chars).
  #[inline]
  pub fn start_transformed(&self) -> usize {
    self.start.transformed()
  }

  /// The provider's end position in the run (transformed chars).
  pub fn end_transformed(&self) -> usize {
    let mut end = self.start.clone();
    end.advance_original(self.length as isize);
    end.transformed()
  }

  /// Covered content range `(start, length)`.
  pub fn content_range(&self) -> (usize, usize) {
    (self.start.original(), self.length)
  }

  // ==========================================================================
  // Spacing
  // ==========================================================================

  /// Spacing for each transformed char in `range` (absolute run offsets):
  /// letter-spacing after cluster ends, word-spacing after significant
  /// spaces, tab advances, and the justification spacing distributed by
  /// [`setup_justification`].
  ///
  /// [`setup_justification`]: Self::setup_justification
  pub fn get_spacing(&mut self, range: Range<usize>) -> Result<Vec<Spacing>> {
    let ignore_tabs = !self.run.flags().contains(RunFlags::HAS_TAB);
    self.get_spacing_internal(range, ignore_tabs)
  }

  fn get_spacing_internal(
    &mut self,
    range: Range<usize>,
    ignore_tabs: bool,
  ) -> Result<Vec<Spacing>> {
    self.check_bounds(&range)?;
    let run = self.run;
    let frag = self.frag;
    let delta = self.delta;
    let mut spacing = vec![Spacing::default(); range.len()];

    // Letter- and word-spacing over the non-dropped characters.
    if self.letter_spacing != 0.0 || self.word_spacing != 0.0 {
      for (map_start, len, kept, t_start) in
        run.offset_map().runs_in_original_range(self.map_range(&range))
      {
        if !kept {
          continue;
        }
        let piece_content_end = (map_start + len) as i64 - delta;
        for i in 0..len {
          let t = t_start + i;
          if t < range.start || t >= range.end {
            continue;
          }
          if can_add_spacing_after(run, t) {
            // End of a cluster outside any ligature: letter-spacing goes
            // after it.
            spacing[t - range.start].after += self.letter_spacing;
          }
          let content_pos = ((map_start + i) as i64 - delta) as usize;
          if is_css_word_spacing_space(frag, content_pos) {
            // Space characters can be cluster bases; the word spacing goes
            // after the whole cluster.
            let mut iter = run.cursor(delta);
            iter.set_transformed(t);
            find_cluster_end(run, piece_content_end as usize, &mut iter);
            let cluster_end = iter.transformed();
            if cluster_end >= range.start && cluster_end < range.end {
              spacing[cluster_end - range.start].after += self.word_spacing;
            }
          }
        }
      }
    }

    if !ignore_tabs {
      let tabs = self.tab_widths(range.clone())?;
      for (slot, width) in spacing.iter_mut().zip(tabs) {
        slot.after += width;
      }
    }

    if self.justification_spacing > 0.0 {
      self.add_justification_spacing(&range, &mut spacing);
    }

    Ok(spacing)
  }

  fn add_justification_spacing(&self, range: &Range<usize>, spacing: &mut [Spacing]) {
    let run = self.run;
    let frag = self.frag;
    let delta = self.delta;
    let half = self.justification_spacing / 2.0;
    let is_cjk = self.style.is_cjk_language();
    let mut justification_end = self.start.clone();
    self.find_end_of_justification_range(&mut justification_end);
    let justification_end_t = justification_end.transformed();

    for (map_start, len, kept, _) in
      run.offset_map().runs_in_original_range(self.map_range(range))
    {
      if !kept {
        continue;
      }
      let piece_content_end = ((map_start + len) as i64 - delta) as usize;
      for i in 0..len {
        let content_pos = ((map_start + i) as i64 - delta) as usize;
        if !is_justifiable_character(frag, content_pos, is_cjk) {
          continue;
        }
        let mut iter = run.cursor(delta);
        iter.set_original(content_pos);
        find_cluster_start(run, &mut iter);
        let cluster_first = iter.transformed();
        find_cluster_end(run, piece_content_end, &mut iter);
        let cluster_last = iter.transformed();
        // The trailing cluster at end of line takes no justification.
        if cluster_last >= justification_end_t {
          continue;
        }
        if cluster_first >= range.start && cluster_first < range.end {
          spacing[cluster_first - range.start].before += half;
        }
        if cluster_last >= range.start && cluster_last < range.end {
          spacing[cluster_last - range.start].after += half;
        }
      }
    }
  }

  // ==========================================================================
  // Tabs
  // ==========================================================================

  /// Tab advances for `range`, computed on demand during reflow and
  /// replayed from the per-object memo afterwards.
  fn tab_widths(&mut self, range: Range<usize>) -> Result<Vec<f32>> {
    if range.is_empty() {
      return Ok(Vec::new());
    }
    let provider_start = self.start.transformed();
    let (memo_start, memo_len) = {
      let memos = self.doc.tab_widths().borrow();
      match memos.get(&self.object) {
        Some(memo) => (memo.start, memo.widths.len()),
        None => (provider_start, 0),
      }
    };

    let mut tabs_end = memo_start + memo_len;
    if tabs_end < range.end {
      if !self.reflowing {
        log::warn!("tab widths needed before reflow computed them");
        return Ok(vec![0.0; range.len()]);
      }
      if memo_len == 0 {
        self
          .doc
          .tab_widths()
          .borrow_mut()
          .insert(self.object, TabWidthMemo {
            start: memo_start,
            widths: Vec::new(),
          });
        tabs_end = memo_start;
      }
      for t in tabs_end..range.end {
        let spacing = self.get_spacing_internal(t..t + 1, true)?[0];
        self.tab_origin += spacing.before;
        let width = if self.run.char_at(t) == Some('\t') {
          let tab_width = TAB_STOP_SPACES * self.run.shaped().space_width();
          let mut next_stop = (self.tab_origin / tab_width).ceil() * tab_width;
          if next_stop < self.tab_origin + TAB_EPSILON {
            next_stop += tab_width;
          }
          let width = next_stop - self.tab_origin;
          self.tab_origin = next_stop;
          width
        } else {
          if self.run.is_cluster_start(t) {
            let mut cluster_end = t + 1;
            while cluster_end < self.run.len() && !self.run.is_cluster_start(cluster_end) {
              cluster_end += 1;
            }
            self.tab_origin += self.run.advance_width(t..cluster_end);
          }
          0.0
        };
        self.tab_origin += spacing.after;
        let mut memos = self.doc.tab_widths().borrow_mut();
        memos
          .get_mut(&self.object)
          .expect("tab memo vanished mid-computation")
          .widths
          .push(width);
      }
    }

    let memos = self.doc.tab_widths().borrow();
    let memo = memos.get(&self.object).expect("tab memo missing");
    Ok(
      range
        .map(|t| memo.widths.get(t - memo.start).copied().unwrap_or(0.0))
        .collect(),
    )
  }

  // ==========================================================================
  // Justification
  // ==========================================================================

  /// Counts justifiable characters in a content range.
  pub fn compute_justifiable_characters(&self, offset: usize, length: usize) -> usize {
    let run = self.run;
    let frag = self.frag;
    let delta = self.delta;
    let is_cjk = self.style.is_cjk_language();
    let map_start = (offset as i64 + delta) as usize;
    let map_end = ((offset + length) as i64 + delta) as usize;
    let mut count = 0;
    for (piece_start, len, kept, _) in
      run.offset_map().runs_in_original_range(map_start..map_end)
    {
      if !kept {
        continue;
      }
      for i in 0..len {
        let content_pos = ((piece_start + i) as i64 - delta) as usize;
        if is_justifiable_character(frag, content_pos, is_cjk) {
          count += 1;
        }
      }
    }
    count
  }

  /// Positions `iter` after the last cluster that receives justification
  /// spacing: the very last cluster on a line is excluded so justified
  /// text does not end in stretched space.
  fn find_end_of_justification_range(&self, iter: &mut OffsetCursor<'a>) {
    iter.set_original(self.start.original() + self.length);
    if !self.object_flags.contains(ObjectFlags::END_OF_LINE) {
      return;
    }
    while iter.original() > self.start.original() {
      iter.advance_original(-1);
      if !iter.is_original_dropped() && self.run.is_cluster_start(iter.transformed()) {
        break;
      }
    }
  }

  /// Computes the per-cluster justification spacing needed to stretch the
  /// provider's range to `target_width`. No-op unless the style justifies
  /// and whitespace is collapsible, or when the text already overfills.
  pub fn setup_justification(&mut self, target_width: f32) -> Result<()> {
    if !self.style.justify || self.style.white_space.is_significant() {
      return Ok(());
    }
    let mut justification_end = self.start.clone();
    self.find_end_of_justification_range(&mut justification_end);
    let justifiable = self.compute_justifiable_characters(
      self.start.original(),
      justification_end.original() - self.start.original(),
    );
    if justifiable == 0 {
      return Ok(());
    }
    let start_t = self.start.transformed();
    let end_t = self.end_transformed();
    let mut natural_width = self.measure_width(start_t..end_t)?;
    if self.object_flags.contains(ObjectFlags::HYPHEN_BREAK) {
      natural_width += self.hyphen_width();
    }
    let total = target_width - natural_width;
    if total <= 0.0 {
      return Ok(());
    }
    self.justification_spacing = total / justifiable as f32;
    Ok(())
  }

  /// Width of a transformed range with all spacing applied (including
  /// justification once [`Self::setup_justification`] ran).
  pub fn measure_width(&mut self, range: Range<usize>) -> Result<f32> {
    let spacing = self.get_spacing(range.clone())?;
    let advances = self.run.advance_width(range);
    Ok(advances + spacing.iter().map(|s| s.before + s.after).sum::<f32>())
  }

  // ==========================================================================
  // Hyphenation
  // ==========================================================================

  /// Break-before bits for hyphenation: true only after a soft hyphen with
  /// nothing collapsed away behind it, never at the start of a line, and
  /// never when the style forbids wrapping.
  pub fn get_hyphenation_breaks(&self, range: Range<usize>) -> Result<Vec<bool>> {
    self.check_bounds(&range)?;
    let mut breaks = vec![false; range.len()];
    if !self.style.white_space.can_wrap() {
      return Ok(breaks);
    }
    let start_t = self.start.transformed();
    let mut cursor = self.run.cursor(self.delta);
    for t in range.clone() {
      if t == 0 {
        continue;
      }
      if self.object_flags.contains(ObjectFlags::START_OF_LINE) && t == start_t {
        // No break-before at the start of a line.
        continue;
      }
      if self.run.char_at(t - 1) != Some(CH_SHY) {
        continue;
      }
      // A soft hyphen followed by collapsed-away characters is not a
      // usable hyphenation point; require adjacency in the original text.
      let before = cursor.transformed_to_original(t - 1);
      let here = cursor.transformed_to_original(t);
      if here == before + 1 {
        breaks[t - range.start] = true;
      }
    }
    Ok(breaks)
  }

  /// Advance of a synthesized hyphen for this run's font: U+2010 if the
  /// font has it, ASCII '-' otherwise, plus letter-spacing. Shaped once
  /// and cached.
  pub fn hyphen_width(&self) -> f32 {
    if let Some(width) = self.hyphen_width.get() {
      return width;
    }
    let options = ShapeOptions::default();
    let shaped = match self.shaper.shape("\u{2010}", self.run.font(), &options) {
      Ok(shaped) if shaped.missing_glyphs() == 0 => Some(shaped),
      _ => self.shaper.shape("-", self.run.font(), &options).ok(),
    };
    let glyph_width = shaped.map_or_else(
      || {
        log::warn!("no hyphen glyph available; hyphen measures as spacing only");
        0.0
      },
      |s| s.advance_width(0..s.len()),
    );
    let width = self.letter_spacing + glyph_width;
    self.hyphen_width.set(Some(width));
    width
  }

  // ==========================================================================
  // Internal helpers
  // ==========================================================================

  /// Transformed range -> the original (map-space) range it covers.
  fn map_range(&self, range: &Range<usize>) -> Range<usize> {
    let mut cursor = self.run.cursor(0);
    cursor.set_transformed(range.start);
    let start = cursor.original();
    cursor.set_transformed(range.end);
    start..cursor.original()
  }

  /// Bounds discipline: a range outside the provider's sub-run is a
  /// scanner bug, asserted in debug builds and propagated untouched in
  /// release — clamping would hide mis-rendering.
  fn check_bounds(&self, range: &Range<usize>) -> Result<()> {
    let start_t = self.start.transformed();
    let end_t = self.end_transformed();
    if range.start < start_t || range.end > end_t || range.start > range.end {
      debug_assert!(
        false,
        "range {}..{} outside provider {}..{}",
        range.start, range.end, start_t, end_t
      );
      return Err(Error::InvalidRange {
        start: range.start,
        end: range.end,
        limit: end_t,
      });
    }
    Ok(())
  }
}

/// Letter-spacing may be inserted after a character iff the next position
/// begins a new cluster and does not continue a ligature.
fn can_add_spacing_after(run: &TextRun, t: usize) -> bool {
  if t + 1 >= run.len() {
    return true;
  }
  run.is_cluster_start(t + 1) && !run.is_ligature_continuation(t + 1)
}

/// A space that word-spacing applies to: an ordinary or no-break space
/// that is not the base of a combining sequence.
fn is_css_word_spacing_space(frag: &[char], pos: usize) -> bool {
  match frag.get(pos) {
    Some(' ') | Some('\u{00A0}') => !is_space_combining_sequence_tail(frag, pos + 1),
    _ => false,
  }
}

/// Whether the original character at `pos` may absorb justification
/// spacing. Spaces, tabs and newlines always do; a space combined with
/// diacriticals does not. Other characters only qualify above U+2150, and
/// only for Chinese/Japanese content, where the CJK symbol, punctuation
/// and ideograph ranges stretch.
fn is_justifiable_character(frag: &[char], pos: usize, lang_is_cjk: bool) -> bool {
  let Some(&ch) = frag.get(pos) else {
    return false;
  };
  if ch == '\n' || ch == '\t' {
    return true;
  }
  if ch == ' ' {
    return !is_space_combining_sequence_tail(frag, pos + 1);
  }
  let c = ch as u32;
  if c < 0x2150 {
    return false;
  }
  lang_is_cjk
    && matches!(c,
      0x2150..=0x22FF      // number forms, arrows, mathematical operators
      | 0x2460..=0x24FF    // enclosed alphanumerics
      | 0x2580..=0x27BF    // blocks, shapes, misc symbols, dingbats
      | 0x27F0..=0x2BFF    // supplemental arrows, braille, misc math
      | 0x2E80..=0x312F    // CJK radicals, punctuation, kana, bopomofo
      | 0x3190..=0xABFF    // kanbun through Yi
      | 0xF900..=0xFAFF    // CJK compatibility ideographs
      | 0xFF5E..=0xFF9F)   // halfwidth forms (partial)
}

/// Rewinds `pos` to the first character of the cluster containing it.
fn find_cluster_start(run: &TextRun, pos: &mut OffsetCursor<'_>) {
  while pos.original() > 0 {
    if pos.is_original_dropped() || run.is_cluster_start(pos.transformed()) {
      break;
    }
    pos.advance_original(-1);
  }
}

/// Advances `pos` to the last character of the cluster containing it,
/// bounded by `content_end`.
fn find_cluster_end(run: &TextRun, content_end: usize, pos: &mut OffsetCursor<'_>) {
  debug_assert!(pos.original() < content_end, "cluster search outside range");
  pos.advance_original(1);
  while pos.original() < content_end {
    if pos.is_original_dropped() || run.is_cluster_start(pos.transformed()) {
      break;
    }
    pos.advance_original(1);
  }
  pos.advance_original(-1);
}
