//! Style context consumed by the text-run engine
//!
//! Style resolution happens outside this crate; what arrives here is a
//! read-only snapshot of the properties that influence run construction:
//! white-space handling, spacing, text-transform, language and the bidi
//! embedding level. Two objects can share one text run only when the
//! shaping-relevant subset of these properties matches
//! (see [`StyleContext::shaping_eq`]).

use std::rc::Rc;

/// CSS `white-space` handling, reduced to the four modes the engine
/// distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WhiteSpace {
  /// Collapse whitespace, allow wrapping.
  #[default]
  Normal,
  /// Collapse whitespace, forbid wrapping.
  Nowrap,
  /// Preserve whitespace, forbid wrapping.
  Pre,
  /// Preserve whitespace, allow wrapping.
  PreWrap,
}

impl WhiteSpace {
  /// Whitespace is significant: runs of spaces and newlines are kept
  /// verbatim instead of collapsing to a single space.
  #[inline]
  pub fn is_significant(self) -> bool {
    matches!(self, Self::Pre | Self::PreWrap)
  }

  /// Lines may wrap at break opportunities inside this text.
  #[inline]
  pub fn can_wrap(self) -> bool {
    matches!(self, Self::Normal | Self::PreWrap)
  }
}

/// CSS `text-transform` applied during the text transform.
///
/// All variants map characters 1:1; multi-character case mappings fall back
/// to the untransformed character so offset mapping cardinality never
/// changes. Small caps is not a text rewrite and lives on
/// [`StyleContext::small_caps`] instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextTransform {
  #[default]
  None,
  Uppercase,
  Lowercase,
  Capitalize,
}

/// Identifies a font face and size to the shaper.
///
/// This is an opaque description as far as the engine is concerned; it is
/// compared for equality when deciding whether two objects can share a run,
/// and passed through to the [`crate::shaper::Shaper`] unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct FontDescriptor {
  pub family: String,
  pub size: f32,
  pub weight: u16,
  pub italic: bool,
}

impl FontDescriptor {
  pub fn new(family: impl Into<String>, size: f32) -> Self {
    Self {
      family: family.into(),
      size,
      weight: 400,
      italic: false,
    }
  }
}

impl Default for FontDescriptor {
  fn default() -> Self {
    Self::new("serif", 16.0)
  }
}

/// Read-only style snapshot for one layout object.
#[derive(Debug, Clone, PartialEq)]
pub struct StyleContext {
  pub font: FontDescriptor,
  /// BCP 47 language tag, if any.
  pub language: Option<String>,
  pub white_space: WhiteSpace,
  /// Extra advance after each cluster, in the same units the shaper
  /// reports. May be negative.
  pub letter_spacing: f32,
  /// Extra advance after each word-separating space.
  pub word_spacing: f32,
  /// `text-align: justify` in effect for this object's line.
  pub justify: bool,
  pub text_transform: TextTransform,
  /// `font-variant: small-caps`; forwarded to the shaper as a flag.
  pub small_caps: bool,
  /// Resolved bidi embedding level. Odd levels are right-to-left.
  pub embedding_level: u8,
}

impl Default for StyleContext {
  fn default() -> Self {
    Self {
      font: FontDescriptor::default(),
      language: None,
      white_space: WhiteSpace::Normal,
      letter_spacing: 0.0,
      word_spacing: 0.0,
      justify: false,
      text_transform: TextTransform::None,
      small_caps: false,
      embedding_level: 0,
    }
  }
}

impl StyleContext {
  pub fn shared(self) -> Rc<Self> {
    Rc::new(self)
  }

  /// Nonzero letter-spacing disables ligatures, since a ligature cannot be
  /// split to take spacing in its interior.
  #[inline]
  pub fn ligatures_disabled(&self) -> bool {
    self.letter_spacing != 0.0
  }

  #[inline]
  pub fn is_rtl(&self) -> bool {
    self.embedding_level & 1 != 0
  }

  /// Chinese/Japanese language group, which widens the set of justifiable
  /// characters to the CJK punctuation and ideograph ranges.
  pub fn is_cjk_language(&self) -> bool {
    let Some(lang) = self.language.as_deref() else {
      return false;
    };
    let primary = lang.split('-').next().unwrap_or(lang);
    matches!(primary, "zh" | "ja")
  }

  /// Whether `other` may share a shaped run with this style: same font,
  /// same language and the same ligature treatment.
  pub fn shaping_eq(&self, other: &Self) -> bool {
    self.font == other.font
      && self.language == other.language
      && self.ligatures_disabled() == other.ligatures_disabled()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_white_space_classification() {
    assert!(!WhiteSpace::Normal.is_significant());
    assert!(WhiteSpace::Normal.can_wrap());
    assert!(WhiteSpace::Pre.is_significant());
    assert!(!WhiteSpace::Pre.can_wrap());
    assert!(WhiteSpace::PreWrap.is_significant());
    assert!(WhiteSpace::PreWrap.can_wrap());
    assert!(!WhiteSpace::Nowrap.is_significant());
    assert!(!WhiteSpace::Nowrap.can_wrap());
  }

  #[test]
  fn test_cjk_language_detection() {
    let mut style = StyleContext::default();
    assert!(!style.is_cjk_language());
    style.language = Some("ja".to_string());
    assert!(style.is_cjk_language());
    style.language = Some("zh-Hant".to_string());
    assert!(style.is_cjk_language());
    style.language = Some("en-US".to_string());
    assert!(!style.is_cjk_language());
  }

  #[test]
  fn test_shaping_eq_ignores_non_shaping_properties() {
    let a = StyleContext::default();
    let mut b = StyleContext::default();
    b.word_spacing = 4.0;
    b.justify = true;
    assert!(a.shaping_eq(&b));

    b.letter_spacing = 1.0; // flips ligature treatment
    assert!(!a.shaping_eq(&b));
  }
}
