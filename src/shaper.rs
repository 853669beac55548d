//! Shaper interface boundary
//!
//! Glyph shaping (font selection, glyph indices, kerning) happens outside
//! this crate. What the engine needs back from a shaper is small: one
//! advance per transformed character, cluster boundaries, and enough
//! metadata to drive spacing and hyphen fallback. [`Shaper`] is that
//! boundary; [`MetricsShaper`] is the built-in fixed-advance
//! implementation used for measurement passes and tests.

use bitflags::bitflags;
use unicode_segmentation::UnicodeSegmentation;

use crate::error::Result;
use crate::style::FontDescriptor;

bitflags! {
  /// Flags passed through to the shaper backend.
  #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
  pub struct ShapingFlags: u16 {
    /// The run is right-to-left.
    const IS_RTL = 1 << 0;
    /// The transformed text is pure ASCII and can use 8-bit storage.
    const EIGHT_BIT = 1 << 1;
    /// Ligatures must not be formed (nonzero letter-spacing).
    const DISABLE_LIGATURES = 1 << 2;
    /// Inter-cluster spacing will be queried during measurement.
    const ENABLE_SPACING = 1 << 3;
    /// Spacing values may be negative.
    const ENABLE_NEGATIVE_SPACING = 1 << 4;
    /// The run contains soft hyphens; hyphen breaks may be requested.
    const ENABLE_HYPHEN_BREAKS = 1 << 5;
    /// Synthesize small caps.
    const SMALL_CAPS = 1 << 6;
    /// Break opportunities have not been computed yet at shaping time.
    const NO_BREAKS_YET = 1 << 7;
  }
}

/// Per-call shaping parameters beyond the text and font.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShapeOptions<'a> {
  pub flags: ShapingFlags,
  /// BCP 47 language tag of the run, if known.
  pub language: Option<&'a str>,
  /// Transformed offsets at which a line is known to start; backends that
  /// cache shaped words may use these as segmentation hints.
  pub initial_breaks: &'a [usize],
}

/// Shaped data for one transformed character.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CharShaping {
  /// Advance width contributed by this character. Cluster continuations
  /// carry zero advance; the cluster's advance sits on its first char.
  pub advance: f32,
  /// This character begins a cluster (base char plus combining marks).
  pub cluster_start: bool,
  /// This character continues a ligature formed with earlier characters.
  pub ligature_continuation: bool,
}

/// The shaper's output for one run: per-character advances and cluster
/// structure, plus the metrics the spacing code needs.
#[derive(Debug, Clone, Default)]
pub struct ShapedText {
  chars: Vec<CharShaping>,
  space_width: f32,
  missing_glyphs: u32,
}

impl ShapedText {
  pub fn new(chars: Vec<CharShaping>, space_width: f32, missing_glyphs: u32) -> Self {
    Self {
      chars,
      space_width,
      missing_glyphs,
    }
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
  pub fn advance(&self, index: usize) -> f32 {
    self.chars[index].advance
  }

  #[inline]
  pub fn is_cluster_start(&self, index: usize) -> bool {
    self.chars[index].cluster_start
  }

  #[inline]
  pub fn is_ligature_continuation(&self, index: usize) -> bool {
    self.chars[index].ligature_continuation
  }

  /// Width of the advance of one space in this font.
  #[inline]
  pub fn space_width(&self) -> f32 {
    self.space_width
  }

  /// Number of characters that had no glyph in the font.
  #[inline]
  pub fn missing_glyphs(&self) -> u32 {
    self.missing_glyphs
  }

  /// Sum of advances over a transformed char range (no spacing applied).
  pub fn advance_width(&self, range: std::ops::Range<usize>) -> f32 {
    self.chars[range].iter().map(|c| c.advance).sum()
  }
}

/// The external shaping backend.
///
/// Implementations must return exactly one [`CharShaping`] per char of
/// `text`. A failure is reported as an error, never as partial output; the
/// scanner degrades the affected objects to unshaped.
pub trait Shaper {
  fn shape(&self, text: &str, font: &FontDescriptor, options: &ShapeOptions<'_>)
    -> Result<ShapedText>;
}

/// Characters that occupy no advance even in a fixed-advance font: soft
/// hyphens (invisible unless a hyphen break is taken), ZWSP, bidi controls
/// and newlines. Tabs also shape to zero width; their advance is supplied
/// as spacing by the property provider, since it depends on the position
/// of the preceding text.
fn is_zero_advance(ch: char) -> bool {
  matches!(ch,
    '\u{00AD}' | '\u{200B}' | '\t' | '\n' | '\r'
    | '\u{200E}' | '\u{200F}' | '\u{202A}'..='\u{202E}' | '\u{2066}'..='\u{2069}')
}

/// Fixed-advance shaper: every cluster takes `advance`, spaces take
/// `space_width`. Grapheme clusters are segmented with
/// `unicode-segmentation`, so a base char plus combining marks measures as
/// one cluster, like a real shaper would report.
#[derive(Debug, Clone)]
pub struct MetricsShaper {
  advance: f32,
  space_width: f32,
  /// Characters this "font" has no glyph for (used to exercise hyphen
  /// fallback).
  missing_chars: Vec<char>,
}

impl MetricsShaper {
  pub fn new(advance: f32, space_width: f32) -> Self {
    Self {
      advance,
      space_width,
      missing_chars: Vec::new(),
    }
  }

  /// A shaper whose advances scale with font size: clusters are half an
  /// em, spaces a quarter em.
  pub fn for_font(font: &FontDescriptor) -> Self {
    Self::new(font.size * 0.5, font.size * 0.25)
  }

  pub fn with_missing_chars(mut self, missing: impl IntoIterator<Item = char>) -> Self {
    self.missing_chars.extend(missing);
    self
  }
}

impl Default for MetricsShaper {
  fn default() -> Self {
    Self::new(8.0, 4.0)
  }
}

impl Shaper for MetricsShaper {
  fn shape(
    &self,
    text: &str,
    _font: &FontDescriptor,
    _options: &ShapeOptions<'_>,
  ) -> Result<ShapedText> {
    let mut chars = Vec::new();
    chars.try_reserve(text.len())?;
    let mut missing = 0;
    for grapheme in text.graphemes(true) {
      for (i, ch) in grapheme.chars().enumerate() {
        let advance = if i > 0 || is_zero_advance(ch) {
          0.0
        } else if ch == ' ' || ch == '\u{00A0}' {
          self.space_width
        } else {
          self.advance
        };
        if self.missing_chars.contains(&ch) {
          missing += 1;
        }
        chars.push(CharShaping {
          advance,
          cluster_start: i == 0,
          ligature_continuation: false,
        });
      }
    }
    Ok(ShapedText::new(chars, self.space_width, missing))
  }
}
