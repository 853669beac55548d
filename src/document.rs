//! Layout-object and content-node tables
//!
//! The engine never owns the layout tree; it walks a per-document table of
//! objects addressed by handles. Using indices instead of pointers means
//! back-references from a text run to its owning objects can be cleared on
//! eviction without ever dereferencing something stale.
//!
//! Three object roles matter here:
//!
//! - **Text objects** map a char range of one content node and may hold a
//!   reference to the shaped run covering them. Continuations of one node
//!   are linked through `next_in_flow`.
//! - **Pass-through containers** (inline boxes) let a text run continue
//!   across them; the scanner descends into their children.
//! - **Opaque containers** (anything else) force the run to end.
//!
//! Content nodes store their text as chars, since every position in this
//! crate is a char index.

use std::cell::RefCell;
use std::rc::Rc;

use bitflags::bitflags;
use rustc_hash::FxHashMap;

use crate::style::StyleContext;
use crate::text_run::RunId;

/// Handle to a content node in a [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentId(pub(crate) u32);

/// Handle to a layout object in a [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId(pub(crate) u32);

bitflags! {
  /// Per-object state bits maintained by the host's reflow and by the
  /// scanner.
  #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
  pub struct ObjectFlags: u8 {
    /// This object is the owner of its text run (first contributing
    /// object of the run's first flow for its content node).
    const IS_RUN_OWNER = 1 << 0;
    /// This object starts a line.
    const START_OF_LINE = 1 << 1;
    /// This object ends a line.
    const END_OF_LINE = 1 << 2;
    /// The line broke at a hyphenation point inside this object, so a
    /// hyphen is rendered and measured after it.
    const HYPHEN_BREAK = 1 << 3;
  }
}

/// One node's original text.
#[derive(Debug)]
pub struct ContentNode {
  chars: Vec<char>,
}

impl ContentNode {
  #[inline]
  pub fn chars(&self) -> &[char] {
    &self.chars
  }

  #[inline]
  pub fn len(&self) -> usize {
    self.chars.len()
  }

  #[inline]
  pub fn is_empty(&self) -> bool {
    self.chars.is_empty()
  }

  #[inline]
  pub fn char_at(&self, index: usize) -> Option<char> {
    self.chars.get(index).copied()
  }
}

/// A text-bearing layout object: one fragment of one content node.
#[derive(Debug)]
pub struct TextObject {
  pub content: ContentId,
  /// Char range of the content node mapped by this object.
  pub content_start: usize,
  pub content_end: usize,
  /// Next continuation of the same content node, if the node was split
  /// across lines.
  pub next_in_flow: Option<ObjectId>,
  /// The shaped run covering this object, if one has been built. Only the
  /// object with [`ObjectFlags::IS_RUN_OWNER`] owns the run; everyone else
  /// holds this non-owningly and must treat it as possibly stale.
  pub run: Option<RunId>,
}

impl TextObject {
  #[inline]
  pub fn content_length(&self) -> usize {
    self.content_end - self.content_start
  }
}

/// A non-text layout object.
#[derive(Debug)]
pub struct ContainerObject {
  pub children: Vec<ObjectId>,
  /// Whether a text run may continue across this object (true for inline
  /// placeholders, false for anything opaque to text flow).
  pub pass_through: bool,
}

#[derive(Debug)]
pub enum ObjectKind {
  Text(TextObject),
  Container(ContainerObject),
}

/// One row of the layout-object table.
#[derive(Debug)]
pub struct LayoutObject {
  pub style: Rc<StyleContext>,
  pub kind: ObjectKind,
  pub flags: ObjectFlags,
  pub parent: Option<ObjectId>,
}

impl LayoutObject {
  #[inline]
  pub fn as_text(&self) -> Option<&TextObject> {
    match &self.kind {
      ObjectKind::Text(t) => Some(t),
      ObjectKind::Container(_) => None,
    }
  }

  #[inline]
  pub fn as_text_mut(&mut self) -> Option<&mut TextObject> {
    match &mut self.kind {
      ObjectKind::Text(t) => Some(t),
      ObjectKind::Container(_) => None,
    }
  }

  #[inline]
  pub fn is_text(&self) -> bool {
    matches!(self.kind, ObjectKind::Text(_))
  }
}

/// Per-object memo of tab advances, indexed from the transformed offset
/// where recording started. Tab widths depend on everything laid out
/// before them, so they are computed during reflow and replayed afterward.
#[derive(Debug, Default)]
pub struct TabWidthMemo {
  pub start: usize,
  pub widths: Vec<f32>,
}

/// The per-document object and content tables.
#[derive(Default)]
pub struct Document {
  objects: Vec<LayoutObject>,
  contents: Vec<ContentNode>,
  tab_widths: RefCell<FxHashMap<ObjectId, TabWidthMemo>>,
}

impl Document {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn add_content(&mut self, text: &str) -> ContentId {
    let id = ContentId(self.contents.len() as u32);
    self.contents.push(ContentNode {
      chars: text.chars().collect(),
    });
    id
  }

  /// Adds a text object mapping `range` (char offsets) of `content`.
  pub fn add_text_object(
    &mut self,
    content: ContentId,
    range: std::ops::Range<usize>,
    style: Rc<StyleContext>,
  ) -> ObjectId {
    debug_assert!(range.end <= self.content(content).len(), "range beyond content");
    let id = ObjectId(self.objects.len() as u32);
    self.objects.push(LayoutObject {
      style,
      kind: ObjectKind::Text(TextObject {
        content,
        content_start: range.start,
        content_end: range.end,
        next_in_flow: None,
        run: None,
      }),
      flags: ObjectFlags::empty(),
      parent: None,
    });
    id
  }

  /// Adds a container and reparents `children` under it.
  pub fn add_container(
    &mut self,
    style: Rc<StyleContext>,
    pass_through: bool,
    children: Vec<ObjectId>,
  ) -> ObjectId {
    let id = ObjectId(self.objects.len() as u32);
    for &child in &children {
      self.objects[child.0 as usize].parent = Some(id);
    }
    self.objects.push(LayoutObject {
      style,
      kind: ObjectKind::Container(ContainerObject {
        children,
        pass_through,
      }),
      flags: ObjectFlags::empty(),
      parent: None,
    });
    id
  }

  /// Links `next` as the continuation of `prev`. Both must map the same
  /// content node and be contiguous.
  pub fn link_continuation(&mut self, prev: ObjectId, next: ObjectId) {
    debug_assert!({
      let p = self.object(prev).as_text().expect("continuation of non-text");
      let n = self.object(next).as_text().expect("continuation to non-text");
      p.content == n.content && p.content_end == n.content_start
    });
    self
      .object_mut(prev)
      .as_text_mut()
      .expect("continuation of non-text")
      .next_in_flow = Some(next);
  }

  #[inline]
  pub fn object(&self, id: ObjectId) -> &LayoutObject {
    &self.objects[id.0 as usize]
  }

  #[inline]
  pub fn object_mut(&mut self, id: ObjectId) -> &mut LayoutObject {
    &mut self.objects[id.0 as usize]
  }

  #[inline]
  pub fn content(&self, id: ContentId) -> &ContentNode {
    &self.contents[id.0 as usize]
  }

  pub fn set_flags(&mut self, id: ObjectId, flags: ObjectFlags) {
    self.object_mut(id).flags |= flags;
  }

  pub fn clear_flags(&mut self, id: ObjectId, flags: ObjectFlags) {
    self.object_mut(id).flags &= !flags;
  }

  pub(crate) fn tab_widths(&self) -> &RefCell<FxHashMap<ObjectId, TabWidthMemo>> {
    &self.tab_widths
  }

  /// The object's content range after line-edge whitespace trimming, as
  /// `(start, length)` in content chars.
  ///
  /// Start-of-line objects lose leading collapsible whitespace; end-of-line
  /// objects additionally lose trailing whitespace when `trim_trailing` is
  /// set and the style allows wrapping. Significant whitespace is never
  /// trimmed.
  pub fn trimmed_offsets(&self, id: ObjectId, trim_trailing: bool) -> (usize, usize) {
    let object = self.object(id);
    let text = object.as_text().expect("trimmed_offsets on non-text");
    let mut start = text.content_start;
    let mut length = text.content_length();
    if object.style.white_space.is_significant() {
      return (start, length);
    }
    let chars = self.content(text.content).chars();
    if object.flags.contains(ObjectFlags::START_OF_LINE) {
      while length > 0 && is_trimmable_space(chars, start) {
        start += 1;
        length -= 1;
      }
    }
    if trim_trailing
      && object.flags.contains(ObjectFlags::END_OF_LINE)
      && object.style.white_space.can_wrap()
    {
      while length > 0 && is_trimmable_space(chars, start + length - 1) {
        length -= 1;
      }
    }
    (start, length)
  }
}

/// Whitespace that line-edge trimming removes: space (unless it carries
/// combining marks), tab, newline, form feed.
pub(crate) fn is_trimmable_space(chars: &[char], pos: usize) -> bool {
  match chars.get(pos) {
    Some(' ') => !is_space_combining_sequence_tail(chars, pos + 1),
    Some('\t' | '\n' | '\x0C') => true,
    _ => false,
  }
}

/// True when the characters at `pos` continue a combining sequence based
/// on the preceding space, which makes that space a rendered base
/// character rather than disposable whitespace.
pub(crate) fn is_space_combining_sequence_tail(chars: &[char], pos: usize) -> bool {
  chars.get(pos).is_some_and(|&ch| is_combining_mark(ch))
}

fn is_combining_mark(ch: char) -> bool {
  let c = ch as u32;
  matches!(c,
    0x0300..=0x036F      // combining diacritical marks
    | 0x1AB0..=0x1AFF    // combining diacritical marks extended
    | 0x1DC0..=0x1DFF    // combining diacritical marks supplement
    | 0x20D0..=0x20FF    // combining marks for symbols
    | 0xFE20..=0xFE2F)   // combining half marks
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::style::WhiteSpace;

  fn styled(white_space: WhiteSpace) -> Rc<StyleContext> {
    StyleContext {
      white_space,
      ..StyleContext::default()
    }
    .shared()
  }

  #[test]
  fn test_trimmed_offsets_start_of_line() {
    let mut doc = Document::new();
    let content = doc.add_content("  Hi ");
    let obj = doc.add_text_object(content, 0..5, styled(WhiteSpace::Normal));
    doc.set_flags(obj, ObjectFlags::START_OF_LINE | ObjectFlags::END_OF_LINE);
    assert_eq!(doc.trimmed_offsets(obj, false), (2, 3));
    assert_eq!(doc.trimmed_offsets(obj, true), (2, 2));
  }

  #[test]
  fn test_trimmed_offsets_significant_whitespace() {
    let mut doc = Document::new();
    let content = doc.add_content("  Hi ");
    let obj = doc.add_text_object(content, 0..5, styled(WhiteSpace::Pre));
    doc.set_flags(obj, ObjectFlags::START_OF_LINE | ObjectFlags::END_OF_LINE);
    assert_eq!(doc.trimmed_offsets(obj, true), (0, 5));
  }

  #[test]
  fn test_space_with_combining_mark_not_trimmed() {
    let mut doc = Document::new();
    // Trailing space carries a combining acute: it is a base character.
    let content = doc.add_content("Hi \u{0301}");
    let obj = doc.add_text_object(content, 0..4, styled(WhiteSpace::Normal));
    doc.set_flags(obj, ObjectFlags::END_OF_LINE);
    assert_eq!(doc.trimmed_offsets(obj, true), (0, 4));
  }

  #[test]
  fn test_continuation_linking() {
    let mut doc = Document::new();
    let content = doc.add_content("hello world");
    let style = styled(WhiteSpace::Normal);
    let a = doc.add_text_object(content, 0..6, style.clone());
    let b = doc.add_text_object(content, 6..11, style);
    doc.link_continuation(a, b);
    assert_eq!(doc.object(a).as_text().unwrap().next_in_flow, Some(b));
  }
}
