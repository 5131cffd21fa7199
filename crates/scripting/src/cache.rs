//! Applied-configuration cache and the per-file pending slot.
//!
//! Both maps live behind one mutex: `mark_stale` must hide the pending
//! entry in the same critical section that flags the applied entry, and
//! `store` must clear the pending entry atomically with the write.
//!
//! A pending entry hidden by `mark_stale` is not deleted: observers
//! (`has_pending`, `take_pending_fresh`) treat it as absent, but the
//! background task still reads it through `pending_any` so a suggestion
//! whose stamp turns out to be fresh against the live file can be
//! re-raised without another load.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::types::{InputsStamp, LoadedConfiguration, ScriptConfiguration, ScriptId};

/// An applied `(stamp, configuration)` pair.
#[derive(Debug, Clone)]
pub struct CachedEntry {
	pub stamp: InputsStamp,
	pub configuration: ScriptConfiguration,
}

#[derive(Debug)]
struct AppliedSlot {
	entry: CachedEntry,
	/// Forces the next freshness gate to treat the entry as out-of-date
	/// without consulting the host. Cleared on store/refresh or when the
	/// background task observes the live file matching the stamp.
	stale: bool,
}

#[derive(Debug)]
struct PendingSlot {
	loaded: LoadedConfiguration,
	/// Hidden from observers; see module docs.
	stale: bool,
}

#[derive(Debug, Default)]
struct CacheState {
	applied: HashMap<ScriptId, AppliedSlot>,
	pending: HashMap<ScriptId, PendingSlot>,
}

/// In-memory configuration cache (applied entries + pending slot).
#[derive(Debug, Default)]
pub struct ConfigCache {
	state: Mutex<CacheState>,
}

impl ConfigCache {
	pub fn new() -> Self {
		Self::default()
	}

	// ── Applied entries ──

	pub fn applied(&self, id: ScriptId) -> Option<CachedEntry> {
		self.state.lock().applied.get(&id).map(|slot| slot.entry.clone())
	}

	pub fn is_marked_stale(&self, id: ScriptId) -> bool {
		self.state.lock().applied.get(&id).is_some_and(|slot| slot.stale)
	}

	/// Stores an applied entry; removes any pending entry for the key.
	pub fn store(&self, id: ScriptId, entry: CachedEntry) {
		let mut state = self.state.lock();
		state.pending.remove(&id);
		state.applied.insert(id, AppliedSlot { entry, stale: false });
	}

	/// Replaces the stamp of an applied entry, keeping its configuration.
	///
	/// Used when a load produced a configuration equal to the applied one:
	/// the newer inputs are recorded so future freshness checks
	/// short-circuit, but no apply happens. A pending entry for the key is
	/// superseded.
	pub fn refresh_stamp(&self, id: ScriptId, stamp: InputsStamp) {
		let mut state = self.state.lock();
		state.pending.remove(&id);
		if let Some(slot) = state.applied.get_mut(&id) {
			slot.entry.stamp = stamp;
			slot.stale = false;
		}
	}

	/// Flags the applied entry as needing a freshness re-check and hides
	/// any pending entry for the key in the same critical section.
	pub fn mark_stale(&self, id: ScriptId) {
		let mut state = self.state.lock();
		if let Some(slot) = state.applied.get_mut(&id) {
			slot.stale = true;
		}
		if let Some(pending) = state.pending.get_mut(&id) {
			pending.stale = true;
		}
	}

	/// Clears the stale flag after the live file was observed matching the
	/// applied stamp (the coalescing path of the background task).
	pub fn clear_stale_mark(&self, id: ScriptId) {
		let mut state = self.state.lock();
		if let Some(slot) = state.applied.get_mut(&id) {
			slot.stale = false;
		}
	}

	/// Drops everything tracked for the key (editor-close hook).
	pub fn remove(&self, id: ScriptId) {
		let mut state = self.state.lock();
		state.applied.remove(&id);
		state.pending.remove(&id);
	}

	/// Snapshot of all applied entries, for whole-cache reindexing.
	pub fn all(&self) -> Vec<(ScriptId, CachedEntry)> {
		self.state
			.lock()
			.applied
			.iter()
			.map(|(id, slot)| (*id, slot.entry.clone()))
			.collect()
	}

	// ── Pending slot ──

	/// Inserts a fresh (observable) pending entry.
	pub fn put_pending(&self, id: ScriptId, loaded: LoadedConfiguration) {
		self.state.lock().pending.insert(id, PendingSlot { loaded, stale: false });
	}

	/// Observable pending entry, if any.
	pub fn pending(&self, id: ScriptId) -> Option<LoadedConfiguration> {
		let state = self.state.lock();
		state
			.pending
			.get(&id)
			.filter(|slot| !slot.stale)
			.map(|slot| slot.loaded.clone())
	}

	/// Pending entry regardless of staleness; background-task use only.
	pub fn pending_any(&self, id: ScriptId) -> Option<LoadedConfiguration> {
		self.state.lock().pending.get(&id).map(|slot| slot.loaded.clone())
	}

	pub fn has_pending(&self, id: ScriptId) -> bool {
		self.state.lock().pending.get(&id).is_some_and(|slot| !slot.stale)
	}

	pub fn remove_pending(&self, id: ScriptId) -> Option<LoadedConfiguration> {
		self.state.lock().pending.remove(&id).map(|slot| slot.loaded)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn entry(text: &str) -> CachedEntry {
		CachedEntry {
			stamp: InputsStamp::of_text(text),
			configuration: ScriptConfiguration {
				compiler_options: vec![text.to_string()],
				..ScriptConfiguration::default()
			},
		}
	}

	fn loaded(text: &str) -> LoadedConfiguration {
		let e = entry(text);
		LoadedConfiguration::new(e.stamp, e.configuration)
	}

	#[test]
	fn store_clears_pending_atomically() {
		let cache = ConfigCache::new();
		let id = ScriptId(1);

		cache.put_pending(id, loaded("a"));
		assert!(cache.has_pending(id));

		cache.store(id, entry("a"));
		assert!(!cache.has_pending(id));
		assert!(cache.pending_any(id).is_none());
		assert!(cache.applied(id).is_some());
	}

	#[test]
	fn mark_stale_hides_pending_without_deleting() {
		let cache = ConfigCache::new();
		let id = ScriptId(1);

		cache.put_pending(id, loaded("a"));
		cache.mark_stale(id);

		assert!(!cache.has_pending(id));
		assert!(cache.pending(id).is_none());
		assert!(cache.pending_any(id).is_some(), "worker must still see the hidden entry");

		// Re-suggesting makes it observable again.
		cache.put_pending(id, loaded("a"));
		assert!(cache.has_pending(id));
	}

	#[test]
	fn mark_stale_flags_applied_entry() {
		let cache = ConfigCache::new();
		let id = ScriptId(1);

		cache.store(id, entry("a"));
		assert!(!cache.is_marked_stale(id));

		cache.mark_stale(id);
		assert!(cache.is_marked_stale(id));

		cache.clear_stale_mark(id);
		assert!(!cache.is_marked_stale(id));
	}

	#[test]
	fn refresh_stamp_keeps_configuration_and_supersedes_pending() {
		let cache = ConfigCache::new();
		let id = ScriptId(1);

		cache.store(id, entry("a"));
		cache.mark_stale(id);
		cache.put_pending(id, loaded("b"));

		let new_stamp = InputsStamp::of_text("a2");
		cache.refresh_stamp(id, new_stamp.clone());

		let applied = cache.applied(id).unwrap();
		assert_eq!(applied.stamp, new_stamp);
		assert_eq!(applied.configuration, entry("a").configuration);
		assert!(!cache.is_marked_stale(id));
		assert!(cache.pending_any(id).is_none());
	}

	#[test]
	fn remove_drops_both_maps() {
		let cache = ConfigCache::new();
		let id = ScriptId(1);

		cache.store(id, entry("a"));
		cache.put_pending(id, loaded("b"));
		cache.remove(id);

		assert!(cache.applied(id).is_none());
		assert!(cache.pending_any(id).is_none());
		assert!(cache.all().is_empty());
	}
}
