//! Text run construction and line breaking for inline layout
//!
//! This crate implements the text subsystem that sits between a layout
//! tree and a glyph shaper:
//!
//! - **Scanning**: group consecutive compatible layout objects into shaped
//!   text runs ([`scanner::Scanner`]), with per-object ownership and
//!   continuation handling.
//! - **Transforming**: collapse whitespace and apply case transforms while
//!   maintaining an invertible original↔transformed offset map
//!   ([`transform`], [`offset_map::OffsetMap`]).
//! - **Line breaking**: compute break opportunities with whole-word
//!   lookahead, independent of how text was chunked
//!   ([`line_breaker::LineBreaker`]).
//! - **Measuring**: answer letter/word/justification/tab spacing and
//!   hyphenation queries per object ([`provider::PropertyProvider`]).
//! - **Caching**: age idle runs out through a generation-bucket tracker
//!   ([`cache::RunCache`]).
//!
//! Glyph shaping itself stays behind the [`shaper::Shaper`] trait; style
//! resolution and bidi level assignment happen upstream and arrive here as
//! read-only [`style::StyleContext`] snapshots.
//!
//! Everything runs single-threaded within one layout pass; the only
//! time-driven actor is the cache tick, which must run on the layout
//! thread ([`cache::TextRunContext::tick`]).

pub mod cache;
pub mod document;
pub mod error;
pub mod line_breaker;
pub mod offset_map;
pub mod provider;
pub mod scanner;
pub mod shaper;
pub mod style;
pub mod text_run;
pub mod transform;

pub use cache::{RunCache, TextRunContext};
pub use document::{ContentId, Document, LayoutObject, ObjectFlags, ObjectId};
pub use error::{Error, Result};
pub use line_breaker::{BreakFlags, BreakSink, LineBreaker};
pub use offset_map::{OffsetCursor, OffsetMap, OffsetMapBuilder};
pub use provider::{PropertyProvider, Spacing};
pub use scanner::{MappedFlow, MappedRun, Scanner};
pub use shaper::{MetricsShaper, ShapeOptions, ShapedText, Shaper, ShapingFlags};
pub use style::{FontDescriptor, StyleContext, TextTransform, WhiteSpace};
pub use text_run::{OwnerData, RunFlags, RunId, TextRun};
pub use transform::{transform_fragment, TransformState};
