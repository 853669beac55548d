//! Idle-run expiration cache
//!
//! Built runs that no reflow is actively using are tracked in a small
//! generation-bucket expiration tracker: three buckets aged by a periodic
//! tick. A run that sits untouched long enough to age out of the oldest
//! bucket is evicted — every owner back-reference is unhooked first, then
//! the run is removed from the store. With the default 10 second tick this
//! gives roughly a 20–30 second retention window.
//!
//! Marking a run used removes it from the aging buckets: it is then owned
//! by the active layout pass and survives until content or style
//! invalidation discards it, or until the host returns it to the cache as
//! idle.
//!
//! Ticks mutate owner back-references that layout also reads, so they must
//! run on the layout thread; the host's timer drives
//! [`TextRunContext::tick`].

use crate::document::{Document, ObjectFlags, ObjectId};
use crate::text_run::{ExpirationState, OwnerData, RunId, RunStore, TextRun};

/// Number of generation buckets.
pub const GENERATION_COUNT: usize = 3;

/// Suggested tick interval for the host timer, in seconds.
pub const DEFAULT_TICK_SECONDS: u64 = 10;

/// Generation-bucket expiration tracker for idle runs.
#[derive(Default)]
pub struct RunCache {
  generations: [Vec<RunId>; GENERATION_COUNT],
  /// Index of the newest generation bucket; buckets are used circularly.
  newest: usize,
}

impl RunCache {
  pub fn new() -> Self {
    Self::default()
  }

  /// Number of tracked runs.
  pub fn tracked_count(&self) -> usize {
    self.generations.iter().map(Vec::len).sum()
  }

  /// Start tracking an idle run in the newest generation.
  pub fn add(&mut self, id: RunId, store: &mut RunStore) {
    let Some(run) = store.get_mut(id) else {
      return;
    };
    debug_assert!(run.expiration.generation.is_none(), "run already tracked");
    let bucket = &mut self.generations[self.newest];
    run.expiration = ExpirationState {
      generation: Some(self.newest as u8),
      index: bucket.len(),
    };
    bucket.push(id);
  }

  /// Stop tracking a run because a consumer is using it. The run then
  /// lives until explicitly discarded or re-added as idle.
  pub fn mark_used(&mut self, id: RunId, store: &mut RunStore) {
    self.untrack(id, store);
  }

  /// Stop tracking a run (eviction bookkeeping or explicit discard).
  pub fn remove(&mut self, id: RunId, store: &mut RunStore) {
    self.untrack(id, store);
  }

  pub fn is_tracked(&self, id: RunId, store: &RunStore) -> bool {
    store
      .get(id)
      .is_some_and(|run| run.expiration.generation.is_some())
  }

  /// Age every tracked run by one generation and evict the runs that fall
  /// out of the oldest bucket. Eviction unhooks all owner back-references
  /// before destroying the run, so no stale handle survives in the object
  /// table.
  pub fn tick(&mut self, doc: &mut Document, store: &mut RunStore) {
    let oldest = (self.newest + 1) % GENERATION_COUNT;
    let expired = std::mem::take(&mut self.generations[oldest]);
    for id in expired {
      if let Some(run) = store.get_mut(id) {
        run.expiration = ExpirationState::default();
      }
      if let Some(run) = store.remove(id) {
        unhook_run_from_objects(doc, &run, id);
        log::debug!("evicted idle text run ({} chars)", run.len());
      }
    }
    self.newest = oldest;
  }

  fn untrack(&mut self, id: RunId, store: &mut RunStore) {
    let Some(run) = store.get_mut(id) else {
      return;
    };
    let Some(generation) = run.expiration.generation else {
      return;
    };
    let index = run.expiration.index;
    run.expiration = ExpirationState::default();
    let bucket = &mut self.generations[generation as usize];
    debug_assert_eq!(bucket.get(index), Some(&id));
    bucket.swap_remove(index);
    if let Some(&moved) = bucket.get(index) {
      if let Some(moved_run) = store.get_mut(moved) {
        moved_run.expiration.index = index;
      }
    }
  }
}

/// Clears every object back-reference to `id`, walking the continuation
/// chain of each owner flow, and drops the owner bit from the first object
/// of each chain.
pub(crate) fn unhook_run_from_objects(doc: &mut Document, run: &TextRun, id: RunId) {
  match run.owners() {
    OwnerData::Simple(object) => clear_chain_references(doc, *object, id),
    OwnerData::Flows(flows) => {
      for flow in flows {
        clear_chain_references(doc, flow.start_object, id);
      }
    }
  }
}

fn clear_chain_references(doc: &mut Document, start: ObjectId, id: RunId) {
  // The start object may already own a newer run; only drop the owner bit
  // when it still refers to the run being destroyed.
  if doc.object(start).as_text().map(|t| t.run) == Some(Some(id)) {
    doc.clear_flags(start, ObjectFlags::IS_RUN_OWNER);
  }
  let mut current = Some(start);
  while let Some(object_id) = current {
    let Some(text) = doc.object_mut(object_id).as_text_mut() else {
      break;
    };
    if text.run != Some(id) {
      break;
    }
    text.run = None;
    current = text.next_in_flow;
  }
}

/// Document-scoped home of the run store and its expiration cache — the
/// explicit replacement for a process-global run cache. Create one per
/// document and pass it to the scanner; drop it with the document.
#[derive(Default)]
pub struct TextRunContext {
  pub(crate) store: RunStore,
  pub(crate) cache: RunCache,
}

impl TextRunContext {
  pub fn new() -> Self {
    Self::default()
  }

  #[inline]
  pub fn run(&self, id: RunId) -> Option<&TextRun> {
    self.store.get(id)
  }

  #[inline]
  pub fn live_run_count(&self) -> usize {
    self.store.len()
  }

  /// Track a freshly built (or no longer needed) run as idle.
  pub fn note_idle(&mut self, id: RunId) {
    if !self.cache.is_tracked(id, &self.store) {
      self.cache.add(id, &mut self.store);
    }
  }

  /// A consumer touched the run; stop aging it.
  pub fn mark_used(&mut self, id: RunId) {
    self.cache.mark_used(id, &mut self.store);
  }

  /// Explicitly destroy a run (content or style invalidation), unhooking
  /// all owner back-references first.
  pub fn discard_run(&mut self, doc: &mut Document, id: RunId) {
    self.cache.remove(id, &mut self.store);
    if let Some(run) = self.store.remove(id) {
      unhook_run_from_objects(doc, &run, id);
    }
  }

  /// One aging step; drive this from the layout thread's timer, typically
  /// every [`DEFAULT_TICK_SECONDS`].
  pub fn tick(&mut self, doc: &mut Document) {
    self.cache.tick(doc, &mut self.store);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::offset_map::OffsetMapBuilder;
  use crate::shaper::{MetricsShaper, ShapeOptions, Shaper, ShapingFlags};
  use crate::style::{FontDescriptor, StyleContext};
  use crate::text_run::{RunFlags, TextRun};

  fn build_doc_and_run(ctx: &mut TextRunContext) -> (Document, RunId, ObjectId) {
    let mut doc = Document::new();
    let (id, object) = add_run(ctx, &mut doc);
    (doc, id, object)
  }

  fn add_run(ctx: &mut TextRunContext, doc: &mut Document) -> (RunId, ObjectId) {
    let content = doc.add_content("hello");
    let style = StyleContext::default().shared();
    let object = doc.add_text_object(content, 0..5, style);
    let mut builder = OffsetMapBuilder::new();
    builder.keep(5);
    let shaped = MetricsShaper::default()
      .shape("hello", &FontDescriptor::default(), &ShapeOptions::default())
      .unwrap();
    let run = TextRun::new(
      "hello".to_string(),
      builder.finish(),
      shaped,
      FontDescriptor::default(),
      None,
      RunFlags::IS_SIMPLE_FLOW,
      ShapingFlags::empty(),
      Vec::new(),
      OwnerData::Simple(object),
    );
    let id = ctx.store.insert(run);
    doc.object_mut(object).as_text_mut().unwrap().run = Some(id);
    doc.set_flags(object, ObjectFlags::IS_RUN_OWNER);
    (id, object)
  }

  #[test]
  fn test_untouched_run_evicted_after_three_ticks() {
    let mut ctx = TextRunContext::new();
    let (mut doc, id, object) = build_doc_and_run(&mut ctx);
    ctx.note_idle(id);

    ctx.tick(&mut doc);
    ctx.tick(&mut doc);
    assert!(ctx.run(id).is_some(), "still within retention window");
    ctx.tick(&mut doc);
    assert!(ctx.run(id).is_none(), "aged out of the oldest bucket");
    // The owner back-reference was unhooked before destruction.
    assert_eq!(doc.object(object).as_text().unwrap().run, None);
    assert!(!doc.object(object).flags.contains(ObjectFlags::IS_RUN_OWNER));
  }

  #[test]
  fn test_marked_used_run_survives() {
    let mut ctx = TextRunContext::new();
    let (mut doc, id, _) = build_doc_and_run(&mut ctx);
    ctx.note_idle(id);
    ctx.tick(&mut doc);
    ctx.mark_used(id);
    for _ in 0..10 {
      ctx.tick(&mut doc);
    }
    assert!(ctx.run(id).is_some(), "in-use runs are not aged");
  }

  #[test]
  fn test_reidled_run_restarts_retention() {
    let mut ctx = TextRunContext::new();
    let (mut doc, id, _) = build_doc_and_run(&mut ctx);
    ctx.note_idle(id);
    ctx.tick(&mut doc);
    ctx.tick(&mut doc);
    ctx.mark_used(id);
    ctx.note_idle(id);
    ctx.tick(&mut doc);
    ctx.tick(&mut doc);
    assert!(ctx.run(id).is_some(), "retention restarted from newest bucket");
    ctx.tick(&mut doc);
    assert!(ctx.run(id).is_none());
  }

  #[test]
  fn test_discard_unhooks_references() {
    let mut ctx = TextRunContext::new();
    let (mut doc, id, object) = build_doc_and_run(&mut ctx);
    ctx.note_idle(id);
    ctx.discard_run(&mut doc, id);
    assert!(ctx.run(id).is_none());
    assert_eq!(doc.object(object).as_text().unwrap().run, None);
  }

  #[test]
  fn test_untrack_fixes_swapped_indices() {
    let mut ctx = TextRunContext::new();
    let mut doc = Document::new();
    let (id_a, _) = add_run(&mut ctx, &mut doc);
    // Two more runs in the same bucket.
    let (id_b, _) = add_run(&mut ctx, &mut doc);
    let (id_c, _) = add_run(&mut ctx, &mut doc);
    ctx.note_idle(id_a);
    ctx.note_idle(id_b);
    ctx.note_idle(id_c);
    // Remove the first: the last is swapped into its slot.
    ctx.mark_used(id_a);
    // Untracking the swapped run must still work.
    ctx.mark_used(id_c);
    assert_eq!(ctx.cache.tracked_count(), 1);
    ctx.tick(&mut doc);
    ctx.tick(&mut doc);
    ctx.tick(&mut doc);
    assert!(ctx.run(id_b).is_none(), "remaining tracked run evicted");
    assert!(ctx.run(id_a).is_some());
    assert!(ctx.run(id_c).is_some());
  }
}
