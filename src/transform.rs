//! Whitespace compression and case transforms
//!
//! Raw fragment text is rewritten before shaping: runs of collapsible
//! whitespace become a single space (or disappear entirely after other
//! whitespace), and `text-transform` case mapping is applied. The rewrite
//! is incremental — one call per fragment — with an explicit
//! [`TransformState`] carried between calls so decisions at fragment
//! boundaries never depend on how the text was chunked.
//!
//! Every call appends to a shared output buffer and offset-map builder;
//! the per-fragment flags it returns are OR-ed into the run flags by the
//! scanner.
//!
//! # Carry state
//!
//! The only cross-fragment inputs are whether the previously emitted
//! transformed character was whitespace-like (which makes a leading
//! whitespace run vanish instead of collapsing to one space) and, for
//! `text-transform: capitalize`, whether the next letter starts a word.
//! Concatenating calls over any split of the input yields identical output
//! text and map; this is property-tested below.

use crate::error::Result;
use crate::offset_map::OffsetMapBuilder;
use crate::style::{StyleContext, TextTransform};
use crate::text_run::RunFlags;

/// Soft hyphen, preserved in the transformed text and flagged.
pub const CH_SHY: char = '\u{00AD}';

/// Carry state threaded through consecutive [`transform_fragment`] calls.
#[derive(Debug, Clone, Copy)]
pub struct TransformState {
  /// The previous transformed character was whitespace-like. Starts `true`
  /// at the beginning of a line so leading whitespace is dropped outright.
  pub incoming_whitespace: bool,
  /// The next alphabetic character starts a word (`capitalize` only).
  pub capitalize_next: bool,
}

impl TransformState {
  /// State for the start of a line.
  pub fn line_start() -> Self {
    Self {
      incoming_whitespace: true,
      capitalize_next: true,
    }
  }

  /// State following already-emitted non-whitespace text.
  pub fn mid_text() -> Self {
    Self {
      incoming_whitespace: false,
      capitalize_next: false,
    }
  }
}

/// Whitespace that collapses under `white-space: normal`: space, tab,
/// newline, carriage return, form feed.
#[inline]
pub fn is_compressible_whitespace(ch: char) -> bool {
  matches!(ch, ' ' | '\t' | '\n' | '\r' | '\x0C')
}

/// Bidi controls that must survive the transform so later stages can see
/// them: embeddings, overrides, isolates and the LRM/RLM marks.
#[inline]
fn is_bidi_control(ch: char) -> bool {
  matches!(ch, '\u{200E}' | '\u{200F}' | '\u{202A}'..='\u{202E}' | '\u{2066}'..='\u{2069}')
}

/// Apply a case mapping only when it is 1:1; multi-char expansions (ß→SS)
/// keep the original so the offset map cardinality never changes.
fn map_case_one_to_one(ch: char, upper: bool) -> char {
  fn single(mut mapped: impl Iterator<Item = char>, fallback: char) -> char {
    match (mapped.next(), mapped.next()) {
      (Some(m), None) => m,
      _ => fallback,
    }
  }
  if upper {
    single(ch.to_uppercase(), ch)
  } else {
    single(ch.to_lowercase(), ch)
  }
}

/// Transform one fragment's characters, appending to `out` and `builder`.
///
/// Returns the content flags observed in this fragment. The call is atomic:
/// all buffer space is reserved up front, so an out-of-memory failure
/// leaves `out`, `builder` and `state` untouched.
pub fn transform_fragment(
  chars: &[char],
  style: &StyleContext,
  state: &mut TransformState,
  builder: &mut OffsetMapBuilder,
  out: &mut String,
) -> Result<RunFlags> {
  out.try_reserve(chars.len() * 4)?;
  builder.try_reserve(chars.len() + 1)?;

  let mut flags = RunFlags::empty();
  let compress = !style.white_space.is_significant();
  let mut i = 0;

  while i < chars.len() {
    let ch = chars[i];

    if compress && is_compressible_whitespace(ch) {
      let mut run_len = 1;
      while i + run_len < chars.len() && is_compressible_whitespace(chars[i + run_len]) {
        run_len += 1;
      }
      if state.incoming_whitespace {
        builder.skip(run_len);
        flags |= RunFlags::WAS_TRANSFORMED;
      } else {
        out.push(' ');
        builder.keep(1);
        builder.skip(run_len - 1);
        if run_len > 1 || ch != ' ' {
          flags |= RunFlags::WAS_TRANSFORMED;
        }
      }
      state.incoming_whitespace = true;
      state.capitalize_next = true;
      i += run_len;
      continue;
    }

    let mut out_ch = ch;
    match ch {
      '\t' => flags |= RunFlags::HAS_TAB,
      '\n' => flags |= RunFlags::HAS_NEWLINE,
      CH_SHY => flags |= RunFlags::HAS_SHY,
      _ => {
        if is_bidi_control(ch) {
          flags |= RunFlags::HAS_BIDI_CONTROL;
        } else if (ch as u32) > 0xFFFF {
          flags |= RunFlags::HAS_NON_BMP;
        }
        out_ch = match style.text_transform {
          TextTransform::None => ch,
          TextTransform::Uppercase => map_case_one_to_one(ch, true),
          TextTransform::Lowercase => map_case_one_to_one(ch, false),
          TextTransform::Capitalize => {
            if state.capitalize_next && ch.is_alphabetic() {
              map_case_one_to_one(ch, true)
            } else {
              ch
            }
          }
        };
      }
    }
    if out_ch != ch {
      flags |= RunFlags::WAS_TRANSFORMED;
    }
    out.push(out_ch);
    builder.keep(1);

    // Soft hyphens are word-internal: they must not start a new
    // capitalization word.
    state.capitalize_next = !ch.is_alphanumeric() && ch != CH_SHY;
    // Significant whitespace is emitted verbatim and must not swallow a
    // following collapsible run (CSS 2.1: a space after a non-collapsible
    // space is not compressed away).
    state.incoming_whitespace = false;
    i += 1;
  }

  Ok(flags)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::offset_map::OffsetMap;
  use crate::style::WhiteSpace;

  fn run_transform(
    fragments: &[&str],
    style: &StyleContext,
    mut state: TransformState,
  ) -> (String, OffsetMap, RunFlags) {
    let mut out = String::new();
    let mut builder = OffsetMapBuilder::new();
    let mut flags = RunFlags::empty();
    for frag in fragments {
      let chars: Vec<char> = frag.chars().collect();
      flags |= transform_fragment(&chars, style, &mut state, &mut builder, &mut out).unwrap();
    }
    (out, builder.finish(), flags)
  }

  // ==========================================================================
  // Whitespace compression
  // ==========================================================================

  #[test]
  fn test_collapses_interior_whitespace() {
    let style = StyleContext::default();
    let (out, map, flags) =
      run_transform(&["a  \t\nb"], &style, TransformState::mid_text());
    assert_eq!(out, "a b");
    assert_eq!(map.original_len(), 6);
    assert_eq!(map.transformed_len(), 3);
    assert!(flags.contains(RunFlags::WAS_TRANSFORMED));
    // The kept space is the first char of the whitespace run.
    assert_eq!(map.transformed_to_original(1), 1);
    assert_eq!(map.transformed_to_original(2), 5);
  }

  #[test]
  fn test_drops_leading_whitespace_at_line_start() {
    let style = StyleContext::default();
    let (out, map, _) = run_transform(&["  Hi"], &style, TransformState::line_start());
    assert_eq!(out, "Hi");
    assert!(map.is_original_dropped(0));
    assert!(map.is_original_dropped(1));
    assert_eq!(map.transformed_to_original(0), 2);
  }

  #[test]
  fn test_idempotent_on_collapsed_text() {
    let style = StyleContext::default();
    let (once, _, _) = run_transform(&["a  b\tc  d"], &style, TransformState::mid_text());
    let (twice, map, _) = run_transform(&[once.as_str()], &style, TransformState::mid_text());
    assert_eq!(once, twice);
    assert_eq!(map.original_len(), map.transformed_len());
  }

  #[test]
  fn test_significant_whitespace_preserved() {
    let style = StyleContext {
      white_space: WhiteSpace::Pre,
      ..StyleContext::default()
    };
    let (out, map, flags) =
      run_transform(&["a \t\n b"], &style, TransformState::line_start());
    assert_eq!(out, "a \t\n b");
    assert_eq!(map.transformed_len(), map.original_len());
    assert!(flags.contains(RunFlags::HAS_TAB));
    assert!(flags.contains(RunFlags::HAS_NEWLINE));
    assert!(!flags.contains(RunFlags::WAS_TRANSFORMED));
  }

  #[test]
  fn test_significant_space_blocks_following_collapse() {
    // Fragment 1 is pre, fragment 2 collapsible: the leading space of
    // fragment 2 must still be emitted (carry resets on verbatim output).
    let pre = StyleContext {
      white_space: WhiteSpace::Pre,
      ..StyleContext::default()
    };
    let normal = StyleContext::default();
    let mut state = TransformState::mid_text();
    let mut out = String::new();
    let mut builder = OffsetMapBuilder::new();
    let frag1: Vec<char> = "a ".chars().collect();
    let frag2: Vec<char> = " b".chars().collect();
    transform_fragment(&frag1, &pre, &mut state, &mut builder, &mut out).unwrap();
    transform_fragment(&frag2, &normal, &mut state, &mut builder, &mut out).unwrap();
    assert_eq!(out, "a  b");
  }

  // ==========================================================================
  // Chunk invariance
  // ==========================================================================

  #[test]
  fn test_split_invariance_exhaustive() {
    let style = StyleContext {
      text_transform: TextTransform::Capitalize,
      ..StyleContext::default()
    };
    let text = " a  bc\u{00AD}d \te ";
    let chars: Vec<char> = text.chars().collect();
    let (whole, whole_map, whole_flags) =
      run_transform(&[text], &style, TransformState::line_start());

    // Every way to split into two fragments, then a few three-way splits.
    for split in 0..=chars.len() {
      let a: String = chars[..split].iter().collect();
      let b: String = chars[split..].iter().collect();
      let (out, map, flags) =
        run_transform(&[a.as_str(), b.as_str()], &style, TransformState::line_start());
      assert_eq!(out, whole, "split at {split}");
      assert_eq!(map.transformed_len(), whole_map.transformed_len());
      assert_eq!(map.original_len(), whole_map.original_len());
      assert_eq!(flags, whole_flags);
      for t in 0..map.transformed_len() {
        assert_eq!(
          map.transformed_to_original(t),
          whole_map.transformed_to_original(t),
          "split at {split}, transformed {t}"
        );
      }
    }
  }

  // ==========================================================================
  // Flagged characters and case transforms
  // ==========================================================================

  #[test]
  fn test_soft_hyphen_kept_and_flagged() {
    let style = StyleContext::default();
    let (out, map, flags) =
      run_transform(&["co\u{00AD}op"], &style, TransformState::mid_text());
    assert_eq!(out, "co\u{00AD}op");
    assert_eq!(map.transformed_len(), 5);
    assert!(flags.contains(RunFlags::HAS_SHY));
  }

  #[test]
  fn test_bidi_controls_and_non_bmp_flagged() {
    let style = StyleContext::default();
    let (_, _, flags) =
      run_transform(&["a\u{202E}b"], &style, TransformState::mid_text());
    assert!(flags.contains(RunFlags::HAS_BIDI_CONTROL));

    let (_, _, flags) = run_transform(&["a𝄞b"], &style, TransformState::mid_text());
    assert!(flags.contains(RunFlags::HAS_NON_BMP));
  }

  #[test]
  fn test_uppercase_is_one_to_one() {
    let style = StyleContext {
      text_transform: TextTransform::Uppercase,
      ..StyleContext::default()
    };
    // ß uppercases to "SS" which is not 1:1, so it stays ß.
    let (out, map, _) = run_transform(&["straße"], &style, TransformState::mid_text());
    assert_eq!(out, "STRAßE");
    assert_eq!(map.transformed_len(), 6);
  }

  #[test]
  fn test_capitalize_across_fragments() {
    let style = StyleContext {
      text_transform: TextTransform::Capitalize,
      ..StyleContext::default()
    };
    let (whole, _, _) = run_transform(&["hello world"], &style, TransformState::line_start());
    assert_eq!(whole, "Hello World");
    // A fragment boundary in mid-word must not re-capitalize.
    let (split, _, _) =
      run_transform(&["hello wo", "rld"], &style, TransformState::line_start());
    assert_eq!(split, whole);
  }
}
