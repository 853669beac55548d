//! Shaped text runs and their store
//!
//! A [`TextRun`] is the unit the shaper produces and the painter consumes:
//! the transformed text of one or more merged fragments, the offset map
//! back to the original text, one break-opportunity bit per transformed
//! char, the shaped advances, and records of which layout objects the run
//! covers.
//!
//! Runs live in a [`RunStore`] and are addressed by generation-validated
//! [`RunId`] handles: continuations and the expiration cache keep handles,
//! not references, and a stale handle simply fails to resolve instead of
//! dangling.

use std::cell::Cell;

use bitflags::bitflags;

use crate::document::{ContentId, Document, ObjectId};
use crate::error::{Error, Result};
use crate::offset_map::{OffsetCursor, OffsetMap};
use crate::shaper::{ShapedText, ShapingFlags};
use crate::style::FontDescriptor;

bitflags! {
  /// Content and state flags for a run, accumulated during the transform
  /// and the build.
  #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
  pub struct RunFlags: u16 {
    /// The transformed text contains a tab (significant whitespace only).
    const HAS_TAB = 1 << 0;
    /// The transformed text contains a soft hyphen.
    const HAS_SHY = 1 << 1;
    /// The transformed text contains bidi control characters.
    const HAS_BIDI_CONTROL = 1 << 2;
    /// The transformed text contains characters outside the BMP.
    const HAS_NON_BMP = 1 << 3;
    /// The transform changed something (dropped or rewrote characters).
    const WAS_TRANSFORMED = 1 << 4;
    /// The transformed text contains a significant newline.
    const HAS_NEWLINE = 1 << 5;
    /// The run was built with incoming-whitespace carry set, i.e. leading
    /// collapsible whitespace was dropped entirely.
    const INCOMING_WHITESPACE = 1 << 6;
    /// The run's text ends in collapsible whitespace (the carry to hand
    /// to whatever follows).
    const TRAILING_WHITESPACE = 1 << 7;
    /// Owner data is a single back-reference, not a flow list.
    const IS_SIMPLE_FLOW = 1 << 8;
    /// No break opportunities have been set on this run.
    const NO_BREAKS = 1 << 9;
    /// The run is right-to-left.
    const IS_RTL = 1 << 10;
  }
}

/// One content node's contribution to a run, ordered by original position.
#[derive(Debug, Clone)]
pub struct OwnerFlow {
  /// First object of the continuation chain covered for this node. Carries
  /// [`crate::document::ObjectFlags::IS_RUN_OWNER`] when this is the run's
  /// first flow.
  pub start_object: ObjectId,
  /// Added to content offsets of this node to obtain offsets in the run's
  /// original (before-transform) space. Can be negative when a run starts
  /// in the middle of a node.
  pub delta: i64,
  /// Content chars mapped for this node.
  pub content_length: usize,
}

/// Which objects a run covers: the common single-flow case stores one
/// back-reference, the general case an ordered flow list.
#[derive(Debug, Clone)]
pub enum OwnerData {
  Simple(ObjectId),
  Flows(Vec<OwnerFlow>),
}

/// Expiration-tracker bookkeeping; see [`crate::cache::RunCache`].
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ExpirationState {
  /// Generation bucket currently holding the run, if tracked.
  pub generation: Option<u8>,
  /// Index within that bucket.
  pub index: usize,
}

/// A shaped, contiguous sequence of transformed text.
#[derive(Debug)]
pub struct TextRun {
  text: String,
  /// Byte offset of each char in `text`, for O(1) char indexing.
  char_starts: Vec<u32>,
  offset_map: OffsetMap,
  /// Break-before bit per transformed char.
  breaks: Vec<bool>,
  /// Transformed offsets at which a line is known to start.
  forced_breaks: Vec<usize>,
  flags: RunFlags,
  shaping_flags: ShapingFlags,
  font: FontDescriptor,
  language: Option<String>,
  shaped: ShapedText,
  owners: OwnerData,
  /// Flow-lookup locality hint: queries for one node tend to repeat, so
  /// the search starts where the last one hit.
  last_flow_hint: Cell<usize>,
  pub(crate) expiration: ExpirationState,
}

impl TextRun {
  #[allow(clippy::too_many_arguments)]
  pub(crate) fn new(
    text: String,
    offset_map: OffsetMap,
    shaped: ShapedText,
    font: FontDescriptor,
    language: Option<String>,
    flags: RunFlags,
    shaping_flags: ShapingFlags,
    forced_breaks: Vec<usize>,
    owners: OwnerData,
  ) -> Self {
    let char_starts: Vec<u32> = text.char_indices().map(|(b, _)| b as u32).collect();
    debug_assert_eq!(shaped.len(), char_starts.len(), "shaper output length mismatch");
    debug_assert_eq!(offset_map.transformed_len(), char_starts.len());
    let breaks = vec![false; char_starts.len()];
    Self {
      text,
      char_starts,
      offset_map,
      breaks,
      forced_breaks,
      flags,
      shaping_flags,
      font,
      language,
      shaped,
      owners,
      last_flow_hint: Cell::new(0),
      expiration: ExpirationState::default(),
    }
  }

  /// Length in transformed chars.
  #[inline]
  pub fn len(&self) -> usize {
    self.char_starts.len()
  }

  #[inline]
  pub fn is_empty(&self) -> bool {
    self.char_starts.is_empty()
  }

  #[inline]
  pub fn text(&self) -> &str {
    &self.text
  }

  pub fn char_at(&self, index: usize) -> Option<char> {
    let start = *self.char_starts.get(index)? as usize;
    self.text[start..].chars().next()
  }

  /// The transformed text of a char range.
  pub fn slice_chars(&self, range: std::ops::Range<usize>) -> &str {
    let start = self
      .char_starts
      .get(range.start)
      .map_or(self.text.len(), |&b| b as usize);
    let end = self
      .char_starts
      .get(range.end)
      .map_or(self.text.len(), |&b| b as usize);
    &self.text[start..end]
  }

  #[inline]
  pub fn offset_map(&self) -> &OffsetMap {
    &self.offset_map
  }

  /// Cursor over the run's offset map speaking one flow's content-offset
  /// coordinates.
  pub fn cursor(&self, delta: i64) -> OffsetCursor<'_> {
    self.offset_map.cursor(delta)
  }

  #[inline]
  pub fn flags(&self) -> RunFlags {
    self.flags
  }

  pub(crate) fn clear_flags(&mut self, flags: RunFlags) {
    self.flags &= !flags;
  }

  #[inline]
  pub fn shaping_flags(&self) -> ShapingFlags {
    self.shaping_flags
  }

  #[inline]
  pub fn font(&self) -> &FontDescriptor {
    &self.font
  }

  #[inline]
  pub fn language(&self) -> Option<&str> {
    self.language.as_deref()
  }

  #[inline]
  pub fn shaped(&self) -> &ShapedText {
    &self.shaped
  }

  #[inline]
  pub fn owners(&self) -> &OwnerData {
    &self.owners
  }

  #[inline]
  pub fn forced_breaks(&self) -> &[usize] {
    &self.forced_breaks
  }

  /// Whether a line may break before the transformed char at `index`.
  #[inline]
  pub fn can_break_before(&self, index: usize) -> bool {
    self.breaks.get(index).copied().unwrap_or(false)
  }

  #[inline]
  pub fn is_cluster_start(&self, index: usize) -> bool {
    self.shaped.is_cluster_start(index)
  }

  #[inline]
  pub fn is_ligature_continuation(&self, index: usize) -> bool {
    self.shaped.is_ligature_continuation(index)
  }

  /// Sum of shaped advances over a transformed range, without spacing.
  pub fn advance_width(&self, range: std::ops::Range<usize>) -> f32 {
    self.shaped.advance_width(range)
  }

  /// Store break-before bits for `break_before.len()` chars starting at
  /// `start`. Returns whether any bit changed. Out-of-range writes are an
  /// internal-consistency error and are never clamped.
  pub fn set_potential_breaks(&mut self, start: usize, break_before: &[bool]) -> Result<bool> {
    let end = start + break_before.len();
    if end > self.breaks.len() {
      debug_assert!(false, "break range {start}..{end} outside run of {}", self.breaks.len());
      return Err(Error::InvalidRange {
        start,
        end,
        limit: self.breaks.len(),
      });
    }
    let mut changed = false;
    for (slot, &bit) in self.breaks[start..end].iter_mut().zip(break_before) {
      if *slot != bit {
        *slot = bit;
        changed = true;
      }
    }
    Ok(changed)
  }

  /// Finds the owner flow for `content`, using the same forward-then-
  /// backward search from the last hit that the flow list was designed
  /// for: flows for one node are consecutive, so locality is high.
  pub fn find_flow(&self, doc: &Document, content: ContentId) -> Option<&OwnerFlow> {
    let flows = match &self.owners {
      OwnerData::Simple(_) => return None,
      OwnerData::Flows(flows) => flows,
    };
    let start_at = self.last_flow_hint.get().min(flows.len().saturating_sub(1));
    let forward = (start_at..flows.len()).chain(0..start_at);
    for i in forward {
      let flow = &flows[i];
      let object = doc.object(flow.start_object);
      if object.as_text().map(|t| t.content) == Some(content) {
        self.last_flow_hint.set(i);
        return Some(flow);
      }
    }
    None
  }

  /// Index of the flow covering `content`, used to compute where an
  /// object's flow ends inside the run.
  pub(crate) fn flow_index(&self, doc: &Document, content: ContentId) -> Option<usize> {
    let flows = self.owner_flows()?;
    flows.iter().position(|flow| {
      doc
        .object(flow.start_object)
        .as_text()
        .map(|t| t.content)
        == Some(content)
    })
  }

  pub(crate) fn owner_flows(&self) -> Option<&[OwnerFlow]> {
    match &self.owners {
      OwnerData::Simple(_) => None,
      OwnerData::Flows(flows) => Some(flows.as_slice()),
    }
  }
}

/// Generation-validated handle to a run in a [`RunStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RunId {
  index: u32,
  generation: u32,
}

struct Slot {
  generation: u32,
  run: Option<TextRun>,
}

/// Slab of live text runs. Removing a run bumps its slot's generation so
/// outstanding handles to it stop resolving.
#[derive(Default)]
pub struct RunStore {
  slots: Vec<Slot>,
  free: Vec<u32>,
}

impl RunStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(&mut self, run: TextRun) -> RunId {
    if let Some(index) = self.free.pop() {
      let slot = &mut self.slots[index as usize];
      debug_assert!(slot.run.is_none());
      slot.run = Some(run);
      RunId {
        index,
        generation: slot.generation,
      }
    } else {
      let index = self.slots.len() as u32;
      self.slots.push(Slot {
        generation: 0,
        run: Some(run),
      });
      RunId {
        index,
        generation: 0,
      }
    }
  }

  pub fn get(&self, id: RunId) -> Option<&TextRun> {
    let slot = self.slots.get(id.index as usize)?;
    if slot.generation != id.generation {
      return None;
    }
    slot.run.as_ref()
  }

  pub fn get_mut(&mut self, id: RunId) -> Option<&mut TextRun> {
    let slot = self.slots.get_mut(id.index as usize)?;
    if slot.generation != id.generation {
      return None;
    }
    slot.run.as_mut()
  }

  #[inline]
  pub fn contains(&self, id: RunId) -> bool {
    self.get(id).is_some()
  }

  pub fn remove(&mut self, id: RunId) -> Option<TextRun> {
    let slot = self.slots.get_mut(id.index as usize)?;
    if slot.generation != id.generation {
      return None;
    }
    let run = slot.run.take()?;
    slot.generation = slot.generation.wrapping_add(1);
    self.free.push(id.index);
    Some(run)
  }

  /// Number of live runs.
  pub fn len(&self) -> usize {
    self.slots.len() - self.free.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::offset_map::OffsetMapBuilder;
  use crate::shaper::{MetricsShaper, ShapeOptions, Shaper};

  fn make_run(text: &str) -> TextRun {
    let mut builder = OffsetMapBuilder::new();
    builder.keep(text.chars().count());
    let shaped = MetricsShaper::default()
      .shape(text, &FontDescriptor::default(), &ShapeOptions::default())
      .unwrap();
    TextRun::new(
      text.to_string(),
      builder.finish(),
      shaped,
      FontDescriptor::default(),
      None,
      RunFlags::empty(),
      ShapingFlags::empty(),
      Vec::new(),
      OwnerData::Simple(ObjectId(0)),
    )
  }

  #[test]
  fn test_char_indexing_multibyte() {
    let run = make_run("aé日b");
    assert_eq!(run.len(), 4);
    assert_eq!(run.char_at(1), Some('é'));
    assert_eq!(run.char_at(2), Some('日'));
    assert_eq!(run.slice_chars(1..3), "é日");
    assert_eq!(run.slice_chars(3..4), "b");
    assert_eq!(run.slice_chars(4..4), "");
  }

  #[test]
  fn test_set_potential_breaks_detects_change() {
    let mut run = make_run("abcd");
    assert!(run.set_potential_breaks(1, &[true, false]).unwrap());
    assert!(run.can_break_before(1));
    // Same bits again: no change.
    assert!(!run.set_potential_breaks(1, &[true, false]).unwrap());
  }

  #[test]
  #[cfg(not(debug_assertions))]
  fn test_set_potential_breaks_rejects_out_of_range() {
    let mut run = make_run("ab");
    assert!(run.set_potential_breaks(1, &[true, true]).is_err());
  }

  #[test]
  fn test_store_handles_are_generation_validated() {
    let mut store = RunStore::new();
    let id = store.insert(make_run("x"));
    assert!(store.contains(id));
    store.remove(id).unwrap();
    assert!(!store.contains(id));
    // Slot reuse must not resurrect the old handle.
    let id2 = store.insert(make_run("y"));
    assert!(!store.contains(id));
    assert_eq!(store.get(id2).unwrap().text(), "y");
  }
}
