//! Bridge from document-layer events to the updater.

use crate::manager::ScriptConfigManager;
use crate::types::ScriptId;

/// Receives editor events and translates them into engine calls.
///
/// The embedder wires this to its document listeners; the engine itself
/// never subscribes to anything.
#[derive(Debug, Clone)]
pub struct ChangeNotifier {
	manager: ScriptConfigManager,
}

impl ChangeNotifier {
	pub fn new(manager: ScriptConfigManager) -> Self {
		Self { manager }
	}

	/// A script document changed.
	pub fn file_changed(&self, id: ScriptId) {
		tracing::trace!(script = %id, "notifier.file_changed");
		self.manager.invalidate(id);
	}

	/// An editor for the script gained focus: make sure an up-to-date
	/// configuration is at least suggested. Does not mark anything stale,
	/// so a fresh cache entry stays untouched.
	pub fn editor_focused(&self, id: ScriptId) {
		self.manager.ensure_up_to_date_suggested(id);
	}

	/// The definition registry became ready; re-run the reload decision
	/// for scripts that were skipped while it was not.
	pub fn definitions_became_ready(&self, ids: impl IntoIterator<Item = ScriptId>) {
		for id in ids {
			self.manager.ensure_up_to_date_suggested(id);
		}
	}

	/// A script editor closed; drop everything tracked for it.
	pub fn file_closed(&self, id: ScriptId) {
		self.manager.close_script(id);
	}
}
