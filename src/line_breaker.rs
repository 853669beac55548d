//! Line-break opportunity analysis
//!
//! A stateful oracle fed arbitrary chunks of transformed text. Break
//! decisions need whole-word context, so the breaker buffers the current
//! run of non-whitespace ("the current word") until it sees the word end;
//! results are therefore delivered through [`BreakSink`] callbacks, which
//! may fire during a later `append_text` call or during [`reset`] — the
//! sink passed with each chunk receives the answers for that chunk.
//!
//! The strategy follows the classic two-level scheme: break opportunities
//! exist after each run of whitespace, and words containing a
//! complex-script character (CJK, Thai and friends, where breaks occur
//! without whitespace) are additionally analyzed with the UAX #14
//! segmenter from the `unicode-linebreak` crate.
//!
//! # The central contract
//!
//! The computed set of breaks MUST NOT depend on how the text was divided
//! into `append_text` calls, given identical concatenated text and flags.
//! This is what the word buffering exists for, and it is property-tested
//! over exhaustive splits below.
//!
//! [`reset`]: LineBreaker::reset

use std::rc::Rc;

use bitflags::bitflags;
use unicode_linebreak::linebreaks;

use crate::error::Result;

bitflags! {
  /// Per-chunk permission flags. At any character boundary exactly one
  /// chunk governs whether a break is allowed there: the chunk containing
  /// the character after the boundary.
  #[derive(Debug, Clone, Copy, PartialEq, Eq)]
  pub struct BreakFlags: u8 {
    /// Allow a break opportunity at the start of this chunk.
    const ALLOW_BREAK_AT_START = 1 << 0;
    /// Allow break opportunities in the interior of this chunk.
    const ALLOW_BREAK_INSIDE = 1 << 1;
  }
}

/// A receiver of line-break data.
///
/// One or more `set_breaks` calls are made per chunk; the union of their
/// ranges covers the whole chunk. Ranges may overlap, in which case the
/// duplicate answers agree. Sinks are scoped to a single scanner flush.
pub trait BreakSink {
  /// Sets the break-before states for `break_before.len()` characters
  /// starting at `start` (chunk-relative transformed offsets).
  fn set_breaks(&self, start: usize, break_before: &[bool]);
}

/// Whitespace for word-boundary purposes. The breaker sees transformed
/// text, so collapsible whitespace has already become plain spaces; tabs
/// and newlines still appear in significant-whitespace runs, and ZWSP is
/// an explicit break opportunity.
#[inline]
fn is_breakable_space(ch: char) -> bool {
  matches!(ch, ' ' | '\t' | '\n' | '\u{200B}')
}

/// Characters that can take a break without adjacent whitespace, which
/// makes the surrounding word require full UAX #14 analysis.
fn is_complex_char(ch: char) -> bool {
  let c = ch as u32;
  matches!(c,
    0x0E00..=0x0EFF      // Thai, Lao
    | 0x1000..=0x109F    // Myanmar
    | 0x1780..=0x17FF    // Khmer
    | 0x2E80..=0x312F    // CJK radicals, symbols, kana, bopomofo
    | 0x3130..=0x318F    // Hangul compatibility jamo
    | 0x3190..=0xABFF    // CJK ideographs and extensions
    | 0xAC00..=0xD7AF    // Hangul syllables
    | 0xF900..=0xFAFF    // CJK compatibility ideographs
    | 0xFF00..=0xFFEF    // halfwidth and fullwidth forms
    | 0x20000..=0x3FFFD) // supplementary ideographic planes
}

/// One chunk's contribution to the buffered current word.
struct TextItem {
  sink: Option<Rc<dyn BreakSink>>,
  /// Offset of this contribution within its chunk.
  sink_offset: usize,
  length: usize,
  flags: BreakFlags,
}

/// The line-breaking state machine.
///
/// Feed text with [`append_text`], finish with [`reset`]. `reset` must be
/// called after the last append before results are considered final; the
/// instance is reusable afterwards. The after-whitespace carry survives
/// `reset` so consecutive runs on one line keep their context.
///
/// [`append_text`]: LineBreaker::append_text
/// [`reset`]: LineBreaker::reset
#[derive(Default)]
pub struct LineBreaker {
  /// Characters of the in-progress word (no whitespace).
  current_word: Vec<char>,
  /// The chunks contributing to `current_word`, in order.
  text_items: Vec<TextItem>,
  word_contains_complex: bool,
  /// Break-before state of the word's first character, captured when the
  /// word started (its governing chunk was current then).
  break_before_word: bool,
  /// True if the previous character was whitespace.
  after_space: bool,
}

impl LineBreaker {
  pub fn new() -> Self {
    Self::default()
  }

  /// Feed one chunk of text. Break data for the chunk is delivered to
  /// `sink`, possibly during a later call; passing no sink analyzes the
  /// text for context only.
  pub fn append_text(
    &mut self,
    text: &str,
    flags: BreakFlags,
    sink: Option<Rc<dyn BreakSink>>,
  ) -> Result<()> {
    let chars: Vec<char> = text.chars().collect();
    let n = chars.len();
    if n == 0 {
      return Ok(());
    }

    let mut offset = 0;

    // Continue a word left over from the previous chunk.
    if !self.current_word.is_empty() {
      debug_assert!(!self.after_space, "word in progress after whitespace");
      while offset < n && !is_breakable_space(chars[offset]) {
        self.current_word.push(chars[offset]);
        if !self.word_contains_complex && is_complex_char(chars[offset]) {
          self.word_contains_complex = true;
        }
        offset += 1;
      }
      if offset > 0 {
        self.text_items.push(TextItem {
          sink: sink.clone(),
          sink_offset: 0,
          length: offset,
          flags,
        });
      }
      if offset == n {
        // The whole chunk extends the word; answers come at the flush.
        return Ok(());
      }
      self.flush_current_word()?;
    }

    let mut breaks = Vec::new();
    breaks.try_reserve(n)?;
    breaks.resize(n, false);

    let mut word_start = offset;
    let mut word_complex = false;
    for i in offset..n {
      let ch = chars[i];
      let is_space = is_breakable_space(ch);
      breaks[i] = self.after_space && !is_space && Self::allows(flags, i == 0);
      self.after_space = is_space;
      if is_space {
        if i > word_start && word_complex && flags.contains(BreakFlags::ALLOW_BREAK_INSIDE) {
          let word_break = breaks[word_start];
          complex_breaks(&chars[word_start..i], &mut breaks[word_start..i]);
          breaks[word_start] = word_break;
        }
        word_complex = false;
        word_start = i + 1;
      } else if !word_complex && is_complex_char(ch) {
        word_complex = true;
      }
    }

    if word_start < n {
      // Buffer the unterminated trailing word; its breaks (including the
      // break-before bit of its first character) are delivered when the
      // word ends.
      self.current_word.extend_from_slice(&chars[word_start..]);
      self.word_contains_complex = word_complex;
      self.break_before_word = breaks[word_start];
      self.text_items.push(TextItem {
        sink: sink.clone(),
        sink_offset: word_start,
        length: n - word_start,
        flags,
      });
    }

    if let Some(sink) = &sink {
      if word_start > offset {
        sink.set_breaks(offset, &breaks[offset..word_start]);
      }
    }
    Ok(())
  }

  /// Inject a zero-width break opportunity with no associated text. Used
  /// when leading whitespace was compressed away entirely but a break must
  /// still be representable there.
  pub fn append_invisible_whitespace(&mut self) -> Result<()> {
    self.flush_current_word()?;
    self.after_space = true;
    Ok(())
  }

  /// Force a final flush. All outstanding sink callbacks are made and the
  /// sink references dropped; the breaker can then be reused.
  pub fn reset(&mut self) -> Result<()> {
    self.flush_current_word()
  }

  #[inline]
  fn allows(flags: BreakFlags, at_chunk_start: bool) -> bool {
    flags.contains(if at_chunk_start {
      BreakFlags::ALLOW_BREAK_AT_START
    } else {
      BreakFlags::ALLOW_BREAK_INSIDE
    })
  }

  /// Computes the break opportunities inside the buffered word and
  /// delivers them through the sinks of every contributing chunk.
  fn flush_current_word(&mut self) -> Result<()> {
    let len = self.current_word.len();
    if len == 0 {
      debug_assert!(self.text_items.is_empty());
      return Ok(());
    }

    let mut breaks = Vec::new();
    breaks.try_reserve(len)?;
    breaks.resize(len, false);
    if self.word_contains_complex {
      complex_breaks(&self.current_word, &mut breaks);
    }
    breaks[0] = self.break_before_word;

    let mut word_offset = 0;
    for item in &self.text_items {
      let piece = &mut breaks[word_offset..word_offset + item.length];
      if word_offset > 0 {
        // A chunk boundary inside the word: the incoming chunk governs it.
        piece[0] = piece[0] && item.flags.contains(BreakFlags::ALLOW_BREAK_AT_START);
      }
      if !item.flags.contains(BreakFlags::ALLOW_BREAK_INSIDE) && item.length > 1 {
        for b in &mut piece[1..] {
          *b = false;
        }
      }
      if let Some(sink) = &item.sink {
        sink.set_breaks(item.sink_offset, piece);
      }
      word_offset += item.length;
    }
    debug_assert_eq!(word_offset, len, "text items do not cover the word");

    self.current_word.clear();
    self.text_items.clear();
    self.word_contains_complex = false;
    self.break_before_word = false;
    Ok(())
  }
}

/// UAX #14 analysis over one word, marking break-before positions.
///
/// The final end-of-text opportunity the algorithm always reports is
/// discarded; only interior positions are relevant for a buffered word.
fn complex_breaks(chars: &[char], out: &mut [bool]) {
  debug_assert_eq!(chars.len(), out.len());
  let text: String = chars.iter().collect();
  let char_starts: Vec<usize> = text.char_indices().map(|(b, _)| b).collect();
  for (byte_pos, _) in linebreaks(&text) {
    if byte_pos >= text.len() {
      continue;
    }
    if let Ok(char_idx) = char_starts.binary_search(&byte_pos) {
      out[char_idx] = true;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::cell::RefCell;

  /// Records delivered break bits and checks that overlapping deliveries
  /// agree.
  #[derive(Default)]
  struct RecordSink {
    bits: RefCell<Vec<Option<bool>>>,
  }

  impl RecordSink {
    fn with_len(len: usize) -> Rc<Self> {
      Rc::new(Self {
        bits: RefCell::new(vec![None; len]),
      })
    }

    fn collected(&self) -> Vec<bool> {
      self
        .bits
        .borrow()
        .iter()
        .map(|b| b.expect("position never delivered"))
        .collect()
    }
  }

  impl BreakSink for RecordSink {
    fn set_breaks(&self, start: usize, break_before: &[bool]) {
      let mut bits = self.bits.borrow_mut();
      for (i, &b) in break_before.iter().enumerate() {
        if let Some(prev) = bits[start + i] {
          assert_eq!(prev, b, "overlapping delivery disagrees at {}", start + i);
        }
        bits[start + i] = Some(b);
      }
    }
  }

  const BOTH: BreakFlags =
    BreakFlags::ALLOW_BREAK_AT_START.union(BreakFlags::ALLOW_BREAK_INSIDE);

  fn breaks_for(chunks: &[&str], flags: BreakFlags) -> Vec<bool> {
    let mut breaker = LineBreaker::new();
    let sinks: Vec<Rc<RecordSink>> = chunks
      .iter()
      .map(|c| RecordSink::with_len(c.chars().count()))
      .collect();
    for (chunk, sink) in chunks.iter().zip(&sinks) {
      breaker
        .append_text(chunk, flags, Some(sink.clone() as Rc<dyn BreakSink>))
        .unwrap();
    }
    breaker.reset().unwrap();
    sinks.iter().flat_map(|s| s.collected()).collect()
  }

  // ==========================================================================
  // Basic whitespace rules
  // ==========================================================================

  #[test]
  fn test_break_before_each_word() {
    let breaks = breaks_for(&["Hello world"], BOTH);
    let expected: Vec<bool> = (0..11).map(|i| i == 6).collect();
    assert_eq!(breaks, expected);
  }

  #[test]
  fn test_no_break_before_space() {
    let breaks = breaks_for(&["a b c"], BOTH);
    assert_eq!(breaks, vec![false, false, true, false, true]);
  }

  #[test]
  fn test_leading_space_no_break_at_start() {
    let breaks = breaks_for(&[" ab"], BOTH);
    assert_eq!(breaks, vec![false, true, false]);
  }

  #[test]
  fn test_zwsp_is_a_break_opportunity() {
    let breaks = breaks_for(&["ab\u{200B}cd"], BOTH);
    assert_eq!(breaks, vec![false, false, false, true, false]);
  }

  // ==========================================================================
  // Permission flags
  // ==========================================================================

  #[test]
  fn test_no_inside_breaks_when_forbidden() {
    let breaks = breaks_for(&["a b c"], BreakFlags::ALLOW_BREAK_AT_START);
    assert_eq!(breaks, vec![false; 5]);
  }

  #[test]
  fn test_initial_break_governed_by_incoming_chunk() {
    // Break between chunks is allowed only by the second chunk's
    // ALLOW_BREAK_AT_START.
    let mut breaker = LineBreaker::new();
    let first = RecordSink::with_len(2);
    let second = RecordSink::with_len(2);
    breaker
      .append_text("a ", BOTH, Some(first.clone() as Rc<dyn BreakSink>))
      .unwrap();
    breaker
      .append_text(
        "bc",
        BreakFlags::ALLOW_BREAK_INSIDE,
        Some(second.clone() as Rc<dyn BreakSink>),
      )
      .unwrap();
    breaker.reset().unwrap();
    assert_eq!(second.collected(), vec![false, false]);
  }

  #[test]
  fn test_nowrap_span_in_wrappable_context() {
    // Middle chunk forbids interior breaks; surrounding context still
    // sees the words for boundary decisions.
    let mut breaker = LineBreaker::new();
    let a = RecordSink::with_len(2);
    let b = RecordSink::with_len(5);
    let c = RecordSink::with_len(2);
    breaker
      .append_text("x ", BOTH, Some(a.clone() as Rc<dyn BreakSink>))
      .unwrap();
    breaker
      .append_text(
        "y z w",
        BreakFlags::ALLOW_BREAK_AT_START,
        Some(b.clone() as Rc<dyn BreakSink>),
      )
      .unwrap();
    breaker
      .append_text(" q", BOTH, Some(c.clone() as Rc<dyn BreakSink>))
      .unwrap();
    breaker.reset().unwrap();
    assert_eq!(b.collected(), vec![true, false, false, false, false]);
    assert_eq!(c.collected(), vec![false, true]);
  }

  // ==========================================================================
  // Word buffering across chunks
  // ==========================================================================

  #[test]
  fn test_word_split_across_chunks_delivers_to_earlier_sink() {
    let mut breaker = LineBreaker::new();
    let first = RecordSink::with_len(4);
    let second = RecordSink::with_len(3);
    breaker
      .append_text("ab日本", BOTH, Some(first.clone() as Rc<dyn BreakSink>))
      .unwrap();
    // First sink has received nothing yet: the word is still open.
    assert!(first.bits.borrow().iter().all(|b| b.is_none()));
    breaker
      .append_text("語cd", BOTH, Some(second.clone() as Rc<dyn BreakSink>))
      .unwrap();
    breaker.reset().unwrap();
    let all: Vec<bool> = [first.collected(), second.collected()].concat();
    // UAX #14 allows breaks around the ideographs inside the word.
    assert_eq!(all.len(), 7);
    assert!(all[2], "break before 日");
    assert!(all[3], "break before 本");
    assert!(all[4], "break before 語");
    assert!(!all[0] && !all[1], "no break inside the latin prefix");
  }

  #[test]
  fn test_invisible_whitespace_creates_opportunity() {
    let mut breaker = LineBreaker::new();
    let sink = RecordSink::with_len(2);
    breaker.append_text("a", BOTH, None).unwrap();
    breaker.append_invisible_whitespace().unwrap();
    breaker
      .append_text("bc", BOTH, Some(sink.clone() as Rc<dyn BreakSink>))
      .unwrap();
    breaker.reset().unwrap();
    assert_eq!(sink.collected(), vec![true, false]);
  }

  #[test]
  fn test_reset_preserves_whitespace_carry() {
    let mut breaker = LineBreaker::new();
    breaker.append_text("a ", BOTH, None).unwrap();
    breaker.reset().unwrap();
    let sink = RecordSink::with_len(1);
    breaker
      .append_text("b", BOTH, Some(sink.clone() as Rc<dyn BreakSink>))
      .unwrap();
    breaker.reset().unwrap();
    assert_eq!(sink.collected(), vec![true]);
  }

  // ==========================================================================
  // Chunk invariance (the central contract)
  // ==========================================================================

  #[test]
  fn test_chunk_invariance_exhaustive_splits() {
    let samples = [
      "Hello world",
      "  a  b ",
      "ab日本語cd efg",
      "สวัสดีครับ ok",
      "a\u{200B}b c",
    ];
    for text in samples {
      let chars: Vec<char> = text.chars().collect();
      let whole = breaks_for(&[text], BOTH);
      let n = chars.len();
      // Every two-part and three-part split.
      for i in 0..=n {
        let (a, b): (String, String) =
          (chars[..i].iter().collect(), chars[i..].iter().collect());
        let parts: Vec<&str> = [a.as_str(), b.as_str()]
          .into_iter()
          .filter(|s| !s.is_empty())
          .collect();
        assert_eq!(breaks_for(&parts, BOTH), whole, "{text:?} split at {i}");
        for j in i..=n {
          let (x, y, z): (String, String, String) = (
            chars[..i].iter().collect(),
            chars[i..j].iter().collect(),
            chars[j..].iter().collect(),
          );
          let parts: Vec<&str> = [x.as_str(), y.as_str(), z.as_str()]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect();
          assert_eq!(
            breaks_for(&parts, BOTH),
            whole,
            "{text:?} split at {i},{j}"
          );
        }
      }
    }
  }
}
