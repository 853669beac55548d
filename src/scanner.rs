//! Text-run construction
//!
//! The scanner walks one line's layout objects in content order, groups
//! consecutive compatible text objects into mapped flows, and turns each
//! group into a single shaped [`TextRun`]: one transform pass over all the
//! fragments, one shaper call, and one feed through the [`LineBreaker`]
//! with a break sink per flow.
//!
//! Grouping decisions are the heart of it:
//!
//! - A continuation of the previous object with the same style extends the
//!   open flow in place.
//! - A new text object may still share the run when
//!   [`Scanner::continue_across_objects`] allows it (same bidi level, no
//!   significant trailing newline, shaping-compatible style).
//! - Anything else — an incompatible text object, or a container a run
//!   cannot pass through — flushes the accumulated flows into a run.
//!
//! The traversal is an explicit worklist, not recursion, and the built run
//! is owned by its first object per content node; all other mapped objects
//! hold the same handle non-owningly.

use std::cell::RefCell;
use std::rc::Rc;

use crate::cache::TextRunContext;
use crate::document::{
  is_trimmable_space, ContentId, Document, ObjectFlags, ObjectId, ObjectKind,
};
use crate::error::{Error, Result};
use crate::line_breaker::{BreakFlags, BreakSink, LineBreaker};
use crate::offset_map::OffsetMapBuilder;
use crate::shaper::{ShapeOptions, Shaper, ShapingFlags};
use crate::text_run::{OwnerData, OwnerFlow, RunFlags, RunId, TextRun};
use crate::transform::{transform_fragment, TransformState};

/// A run of consecutive layout objects feeding one contiguous portion of a
/// text run: `start` through the continuation chain up to (exclusive)
/// `end`, mapping `content_start..content_end` of one content node.
#[derive(Debug, Clone)]
pub struct MappedFlow {
  pub start: ObjectId,
  pub end: Option<ObjectId>,
  /// Nearest common ancestor of `start` and the previous text object on
  /// the line; its white-space style governs whether a break is allowed
  /// between the two. `None` at the start of a line.
  pub ancestor_for_break_control: Option<ObjectId>,
  pub content_start: usize,
  pub content_end: usize,
}

/// An object's view of its (possibly shared) run, as handed out by
/// [`Scanner::ensure_text_run`].
#[derive(Debug, Clone, Copy)]
pub struct MappedRun {
  pub run: RunId,
  /// Content offsets + this = run original offsets; feed to
  /// [`TextRun::cursor`].
  pub delta: i64,
  /// Transformed offset where this object's flow ends inside the run.
  pub flow_end_in_run: usize,
}

/// Sink for one flow's chunk: buffers the delivered bits, which are
/// written into the run once the breaker has flushed. Scoped to one
/// flush batch.
struct RunBreakSink {
  run: RunId,
  offset_in_run: usize,
  bits: RefCell<Vec<bool>>,
  existing_run: bool,
}

impl BreakSink for RunBreakSink {
  fn set_breaks(&self, start: usize, break_before: &[bool]) {
    let mut bits = self.bits.borrow_mut();
    bits[start..start + break_before.len()].copy_from_slice(break_before);
  }
}

struct FlowSinkInfo {
  offset: usize,
  length: usize,
  flags: BreakFlags,
  leading_compressed_whitespace: bool,
}

enum Work {
  Enter(ObjectId),
  Leave { object: ObjectId, flush: bool },
}

/// Builds text runs for the objects of a line.
///
/// One scanner serves one layout pass: the line breaker inside it carries
/// whitespace context from line to line, so runs built later in the pass
/// see the text that preceded them.
pub struct Scanner<'a> {
  doc: &'a mut Document,
  ctx: &'a mut TextRunContext,
  shaper: &'a dyn Shaper,
  breaker: LineBreaker,
  flows: Vec<MappedFlow>,
  /// Text objects that start a line; their positions become forced break
  /// offsets on the run.
  break_before_objects: Vec<ObjectId>,
  /// Sinks of the current flush batch, applied after `breaker.reset()`.
  sinks: Vec<Rc<RunBreakSink>>,
  last_object: Option<ObjectId>,
  common_ancestor: Option<ObjectId>,
  line_container: Option<ObjectId>,
  start_of_line: bool,
  /// Incoming-whitespace carry for the next run to build.
  trim_next_leading: bool,
  /// All accumulated objects share this run (reuse candidate).
  same_run: Option<RunId>,
  /// The carry state `same_run` was captured under.
  current_run_trim_leading: bool,
}

impl<'a> Scanner<'a> {
  pub fn new(doc: &'a mut Document, ctx: &'a mut TextRunContext, shaper: &'a dyn Shaper) -> Self {
    Self {
      doc,
      ctx,
      shaper,
      breaker: LineBreaker::new(),
      flows: Vec::new(),
      break_before_objects: Vec::new(),
      sinks: Vec::new(),
      last_object: None,
      common_ancestor: None,
      line_container: None,
      start_of_line: true,
      trim_next_leading: true,
      same_run: None,
      current_run_trim_leading: false,
    }
  }

  /// Builds (or reuses) runs for every text object under `container`,
  /// whose children are the line's objects in content order.
  pub fn scan_line(&mut self, container: ObjectId) -> Result<()> {
    self.flows.clear();
    self.break_before_objects.clear();
    self.last_object = None;
    self.common_ancestor = None;
    self.line_container = Some(container);
    self.start_of_line = true;
    self.trim_next_leading = true;
    self.same_run = None;

    let children = match &self.doc.object(container).kind {
      ObjectKind::Container(c) => c.children.clone(),
      ObjectKind::Text(_) => vec![container],
    };
    let mut work: Vec<Work> = children.iter().rev().map(|&id| Work::Enter(id)).collect();
    while let Some(item) = work.pop() {
      match item {
        Work::Enter(id) => self.enter_object(id, &mut work)?,
        Work::Leave { object, flush } => {
          if flush {
            self.flush(true)?;
            self.common_ancestor = None;
            self.trim_next_leading = false;
          }
          self.lift_common_ancestor(object);
        }
      }
    }
    self.flush(true)
  }

  /// Returns the run covering `object`, building the line's runs first if
  /// needed, plus the offset delta and flow end locating the object's text
  /// inside it. `None` means shaping failed and the object stays unshaped
  /// (it measures as zero width until a later pass succeeds).
  pub fn ensure_text_run(
    &mut self,
    object: ObjectId,
    line_container: ObjectId,
  ) -> Result<Option<MappedRun>> {
    let existing = self
      .doc
      .object(object)
      .as_text()
      .ok_or(Error::StaleHandle("ensure_text_run on non-text object"))?
      .run
      .filter(|&id| self.ctx.store.contains(id));
    if let Some(id) = existing {
      self.ctx.mark_used(id);
    } else {
      self.scan_line(line_container)?;
    }

    let text_object = self.doc.object(object).as_text().unwrap();
    let content = text_object.content;
    let content_start = text_object.content_start;
    let Some(run_id) = text_object.run.filter(|&id| self.ctx.store.contains(id)) else {
      return Ok(None);
    };
    let run = self.ctx.store.get(run_id).unwrap();
    let (delta, flow_end_in_run) = match run.owners() {
      OwnerData::Simple(_) => (0, run.len()),
      OwnerData::Flows(_) => {
        let index = run
          .flow_index(self.doc, content)
          .ok_or(Error::FlowMismatch {
            offset: content_start,
          })?;
        let flows = run.owner_flows().unwrap();
        let flow = &flows[index];
        let end = match flows.get(index + 1) {
          Some(next) => {
            let next_start = self
              .doc
              .object(next.start_object)
              .as_text()
              .map(|t| t.content_start)
              .unwrap_or(0);
            run
              .offset_map()
              .original_to_transformed((next_start as i64 + next.delta) as usize)
          }
          None => run.len(),
        };
        (flow.delta, end)
      }
    };
    Ok(Some(MappedRun {
      run: run_id,
      delta,
      flow_end_in_run,
    }))
  }

  // ==========================================================================
  // Traversal
  // ==========================================================================

  fn enter_object(&mut self, id: ObjectId, work: &mut Vec<Work>) -> Result<()> {
    let (pass_through, children) = match &self.doc.object(id).kind {
      ObjectKind::Text(_) => return self.scan_text_object(id),
      ObjectKind::Container(container) => (container.pass_through, container.children.clone()),
    };
    if !pass_through {
      // An opaque object ends the run on both sides of its subtree.
      self.flush(true)?;
      self.common_ancestor = None;
      self.start_of_line = false;
      self.trim_next_leading = false;
    }
    work.push(Work::Leave {
      object: id,
      flush: !pass_through,
    });
    for &child in children.iter().rev() {
      work.push(Work::Enter(child));
    }
    Ok(())
  }

  fn scan_text_object(&mut self, id: ObjectId) -> Result<()> {
    // Continuation of the open flow with unchanged style extends it in
    // place. This is the common case for wrapped text.
    if self.flows.last().is_some_and(|flow| flow.end == Some(id)) {
      let last = self.last_object.expect("open flow without last object");
      let same_style = Rc::ptr_eq(&self.doc.object(last).style, &self.doc.object(id).style);
      // A trailing significant newline ends the run even mid-chain,
      // keeping preformatted files from becoming one giant run.
      if same_style && !self.has_terminal_newline(last) {
        let text = self.doc.object(id).as_text().expect("flow sibling is not text");
        let (next, content_start, content_end) =
          (text.next_in_flow, text.content_start, text.content_end);
        let flow = self.flows.last_mut().unwrap();
        debug_assert!(flow.content_end <= content_start, "object offsets overlap");
        flow.end = next;
        flow.content_end = content_end;
        self.accumulate(id);
        return Ok(());
      }
    }

    if let Some(last) = self.last_object {
      if !self.continue_across_objects(last, id) {
        self.flush(false)?;
      }
    }

    let text = self.doc.object(id).as_text().expect("scan_text_object on non-text");
    let run = text.run;
    self.flows.push(MappedFlow {
      start: id,
      end: text.next_in_flow,
      ancestor_for_break_control: self.common_ancestor,
      content_start: text.content_start,
      content_end: text.content_end,
    });
    self.accumulate(id);
    if self.flows.len() == 1 {
      self.same_run = run.filter(|&r| self.ctx.store.contains(r));
      self.current_run_trim_leading = self.trim_next_leading;
    } else if self.same_run != run {
      self.same_run = None;
    }
    Ok(())
  }

  fn accumulate(&mut self, id: ObjectId) {
    self.last_object = Some(id);
    self.common_ancestor = Some(id);
    if self.start_of_line {
      self.break_before_objects.push(id);
      self.start_of_line = false;
    }
  }

  fn lift_common_ancestor(&mut self, object: ObjectId) {
    let parent = self.doc.object(object).parent;
    if let (Some(ancestor), Some(parent)) = (self.common_ancestor, parent) {
      if self.doc.object(ancestor).parent == Some(parent) {
        self.common_ancestor = Some(parent);
      }
    }
  }

  /// Whether two adjacent text objects may share one shaped run.
  pub fn continue_across_objects(&self, first: ObjectId, second: ObjectId) -> bool {
    let a = self.doc.object(first);
    let b = self.doc.object(second);
    if a.style.embedding_level != b.style.embedding_level {
      return false;
    }
    if a.style.white_space.is_significant() && self.has_terminal_newline(first) {
      return false;
    }
    if Rc::ptr_eq(&a.style, &b.style) {
      return true;
    }
    a.style.shaping_eq(&b.style)
  }

  fn has_terminal_newline(&self, id: ObjectId) -> bool {
    let Some(text) = self.doc.object(id).as_text() else {
      return false;
    };
    if text.content_end == text.content_start {
      return false;
    }
    self.doc.content(text.content).char_at(text.content_end - 1) == Some('\n')
  }

  // ==========================================================================
  // Flushing
  // ==========================================================================

  /// Turns the accumulated flows into a run (or reuses the one they all
  /// share), and optionally flushes the line breaker, writing buffered
  /// break bits into their runs.
  fn flush(&mut self, flush_line_breaks: bool) -> Result<()> {
    if !self.flows.is_empty() {
      let reusable = self.same_run.filter(|&id| {
        self
          .ctx
          .store
          .get(id)
          .map(|run| {
            run.flags().contains(RunFlags::INCOMING_WHITESPACE) == self.current_run_trim_leading
          })
          .unwrap_or(false)
      });
      if let Some(run_id) = reusable {
        // The existing run still matches its build conditions: keep the
        // shaped output and only re-feed the breaker for context.
        self.setup_break_sinks(run_id, true)?;
        let run = self.ctx.store.get(run_id).unwrap();
        self.trim_next_leading = run.flags().contains(RunFlags::TRAILING_WHITESPACE);
        log::debug!("reusing text run of {} chars", run.len());
        self.ctx.mark_used(run_id);
      } else {
        self.build_run_for_flows()?;
      }
    }

    if flush_line_breaks {
      self.breaker.reset()?;
      for sink in self.sinks.drain(..) {
        let Some(run) = self.ctx.store.get_mut(sink.run) else {
          continue;
        };
        let changed = run.set_potential_breaks(sink.offset_in_run, &sink.bits.borrow())?;
        if changed && sink.existing_run {
          log::debug!("break opportunities changed on a reused run");
        }
      }
    }

    self.flows.clear();
    self.break_before_objects.clear();
    self.same_run = None;
    Ok(())
  }

  fn build_run_for_flows(&mut self) -> Result<()> {
    let mut state = TransformState {
      incoming_whitespace: self.trim_next_leading,
      capitalize_next: true,
    };
    let mut flags = RunFlags::NO_BREAKS;
    if self.trim_next_leading {
      flags |= RunFlags::INCOMING_WHITESPACE;
    }
    let mut shaping = ShapingFlags::NO_BREAKS_YET;
    let mut text = String::new();
    let mut builder = OffsetMapBuilder::new();
    let mut owner_flows: Vec<OwnerFlow> = Vec::new();
    let mut last_content: Option<ContentId> = None;
    let mut end_of_last_content = 0;

    for flow in &self.flows {
      let object = self.doc.object(flow.start);
      let style = &object.style;
      let text_object = object.as_text().expect("mapped flow over non-text");

      shaping |= spacing_flags(style.letter_spacing);
      shaping |= spacing_flags(style.word_spacing);
      if style.justify && !style.white_space.is_significant() {
        shaping |= ShapingFlags::ENABLE_SPACING;
      }
      if style.small_caps {
        shaping |= ShapingFlags::SMALL_CAPS;
      }

      let content_length = flow.content_end - flow.content_start;
      if last_content == Some(text_object.content) {
        if end_of_last_content != flow.content_start {
          debug_assert!(false, "gap in objects mapping content, or overlap");
          return Err(Error::FlowMismatch {
            offset: flow.content_start,
          });
        }
        owner_flows
          .last_mut()
          .expect("merging into missing owner flow")
          .content_length += content_length;
      } else {
        owner_flows.push(OwnerFlow {
          start_object: flow.start,
          delta: builder.original_len() as i64 - flow.content_start as i64,
          content_length,
        });
      }

      let frag = self.doc.content(text_object.content).chars();
      flags |= transform_fragment(
        &frag[flow.content_start..flow.content_end],
        style,
        &mut state,
        &mut builder,
        &mut text,
      )?;
      last_content = Some(text_object.content);
      end_of_last_content = flow.content_end;
    }

    let map = builder.finish();
    if state.incoming_whitespace {
      flags |= RunFlags::TRAILING_WHITESPACE;
    }
    self.trim_next_leading = state.incoming_whitespace;

    let first_style = self.doc.object(self.flows[0].start).style.clone();
    if first_style.is_rtl() {
      flags |= RunFlags::IS_RTL;
      shaping |= ShapingFlags::IS_RTL;
    }
    if first_style.ligatures_disabled() {
      shaping |= ShapingFlags::DISABLE_LIGATURES;
    }
    if flags.contains(RunFlags::HAS_TAB) {
      shaping |= ShapingFlags::ENABLE_SPACING;
    }
    if flags.contains(RunFlags::HAS_SHY) {
      shaping |= ShapingFlags::ENABLE_HYPHEN_BREAKS;
    }
    if text.is_ascii() {
      shaping |= ShapingFlags::EIGHT_BIT;
    }

    // Forced break-before positions for objects that start a line,
    // translated into transformed offsets.
    let mut forced: Vec<usize> = Vec::new();
    for &object in &self.break_before_objects {
      let Some(text_object) = self.doc.object(object).as_text() else {
        continue;
      };
      let flow = owner_flows.iter().find(|f| {
        self.doc.object(f.start_object).as_text().map(|t| t.content) == Some(text_object.content)
      });
      if let Some(flow) = flow {
        let map_pos = (text_object.content_start as i64 + flow.delta) as usize;
        forced.push(map.original_to_transformed(map_pos));
      }
    }

    let simple = self.flows.len() == 1
      && self.flows[0].content_start == 0
      && self.flows[0].end.is_none();
    let owners = if simple {
      flags |= RunFlags::IS_SIMPLE_FLOW;
      OwnerData::Simple(self.flows[0].start)
    } else {
      OwnerData::Flows(owner_flows)
    };

    let options = ShapeOptions {
      flags: shaping,
      language: first_style.language.as_deref(),
      initial_breaks: &forced,
    };
    let shaped = match self.shaper.shape(&text, &first_style.font, &options) {
      Ok(shaped) => shaped,
      Err(err) => {
        // Degrade, never crash: the mapped objects keep no run and
        // measure as zero width until a later build succeeds.
        log::warn!(
          "shaper failed for {} object(s), leaving them unshaped: {err}",
          self.flows.len()
        );
        return Ok(());
      }
    };
    if shaped.len() != map.transformed_len() {
      log::warn!(
        "shaper returned {} entries for {} chars; discarding",
        shaped.len(),
        map.transformed_len()
      );
      return Ok(());
    }

    let run = TextRun::new(
      text,
      map,
      shaped,
      first_style.font.clone(),
      first_style.language.clone(),
      flags,
      shaping,
      forced,
      owners,
    );
    let run_id = self.ctx.store.insert(run);
    self.setup_break_sinks(run_id, false)?;
    self.assign_run(run_id);
    self.ctx.cache.add(run_id, &mut self.ctx.store);
    Ok(())
  }

  /// Points every mapped object at the run and marks the first object per
  /// content node as the owner.
  fn assign_run(&mut self, run_id: RunId) {
    let mut last_content: Option<ContentId> = None;
    for flow in &self.flows {
      let mut current = Some(flow.start);
      while current != flow.end {
        let Some(id) = current else {
          break;
        };
        let object = self.doc.object_mut(id);
        object.flags.remove(ObjectFlags::IS_RUN_OWNER);
        let Some(text) = object.as_text_mut() else {
          break;
        };
        text.run = Some(run_id);
        current = text.next_in_flow;
      }
      let content = self
        .doc
        .object(flow.start)
        .as_text()
        .expect("mapped flow over non-text")
        .content;
      if last_content != Some(content) {
        self.doc.set_flags(flow.start, ObjectFlags::IS_RUN_OWNER);
        last_content = Some(content);
      }
    }
  }

  /// Feeds the run's text back through the line breaker, one chunk per
  /// flow with that flow's break permissions, collecting sinks to apply
  /// when the breaker flushes. Flows whose leading whitespace was
  /// compressed away inject an invisible-whitespace opportunity first.
  fn setup_break_sinks(&mut self, run_id: RunId, existing_run: bool) -> Result<()> {
    let mut infos: Vec<FlowSinkInfo> = Vec::with_capacity(self.flows.len());
    {
      let run = self
        .ctx
        .store
        .get(run_id)
        .ok_or(Error::StaleHandle("run vanished during sink setup"))?;
      let mut cursor = run.cursor(0);
      let mut map_pos = 0;
      for flow in &self.flows {
        let text_object = self
          .doc
          .object(flow.start)
          .as_text()
          .expect("mapped flow over non-text");
        cursor.set_original(map_pos);
        let offset = cursor.transformed();

        let mut leading_compressed_whitespace = false;
        let frag = self.doc.content(text_object.content).chars();
        let mut probe = cursor.clone();
        let mut pos = flow.content_start;
        while pos < flow.content_end && probe.is_original_dropped() {
          if is_trimmable_space(frag, pos) {
            leading_compressed_whitespace = true;
            break;
          }
          pos += 1;
          probe.advance_original(1);
        }

        map_pos += flow.content_end - flow.content_start;
        cursor.set_original(map_pos);
        let length = cursor.transformed() - offset;

        let controller = flow
          .ancestor_for_break_control
          .or(self.line_container)
          .unwrap_or(flow.start);
        let mut flags = BreakFlags::empty();
        if self.doc.object(controller).style.white_space.can_wrap() {
          flags |= BreakFlags::ALLOW_BREAK_AT_START;
        }
        // With significant whitespace the only break opportunities are at
        // whitespace run ends; interior breaking needs a wrappable style.
        if self.doc.object(flow.start).style.white_space.can_wrap() {
          flags |= BreakFlags::ALLOW_BREAK_INSIDE;
        }
        infos.push(FlowSinkInfo {
          offset,
          length,
          flags,
          leading_compressed_whitespace,
        });
      }
    }

    if infos.iter().any(|info| !info.flags.is_empty()) {
      self
        .ctx
        .store
        .get_mut(run_id)
        .unwrap()
        .clear_flags(RunFlags::NO_BREAKS);
    }
    let run = self.ctx.store.get(run_id).unwrap();
    let unbreakable = run.flags().contains(RunFlags::NO_BREAKS);

    for info in &infos {
      if info.leading_compressed_whitespace {
        self.breaker.append_invisible_whitespace()?;
      }
      if info.length == 0 {
        continue;
      }
      let sink = if info.flags.is_empty() && unbreakable {
        // Nothing could ever be set: feed for context only.
        None
      } else {
        let sink = Rc::new(RunBreakSink {
          run: run_id,
          offset_in_run: info.offset,
          bits: RefCell::new(vec![false; info.length]),
          existing_run,
        });
        self.sinks.push(sink.clone());
        Some(sink as Rc<dyn BreakSink>)
      };
      self.breaker.append_text(
        run.slice_chars(info.offset..info.offset + info.length),
        info.flags,
        sink,
      )?;
    }
    Ok(())
  }
}

fn spacing_flags(spacing: f32) -> ShapingFlags {
  if spacing == 0.0 {
    ShapingFlags::empty()
  } else if spacing > 0.0 {
    ShapingFlags::ENABLE_SPACING
  } else {
    ShapingFlags::ENABLE_SPACING | ShapingFlags::ENABLE_NEGATIVE_SPACING
  }
}
