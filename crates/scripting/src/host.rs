//! Collaborator interfaces the engine consumes.
//!
//! The engine owns no documents, no indexer, and no UI; everything it
//! touches in the surrounding editor goes through the traits here. All of
//! them are object-safe and shared as `Arc<dyn _>` so tests can substitute
//! recording implementations.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::IndexError;
use crate::types::{InputsStamp, LoadedConfiguration, ScriptDefinition, ScriptId, ScriptReport, ScriptSnapshot};

/// Access to live script documents.
pub trait ScriptHost: Send + Sync {
	/// Captures the file's current contents and inputs stamp. `None` when
	/// the file vanished (treated as a transient load failure).
	fn snapshot(&self, id: ScriptId) -> Option<ScriptSnapshot>;

	/// Whether `stamp` is still fresh against the live file. May return
	/// false even for a stamp equal to a freshly captured one, e.g. when a
	/// transitive dependency changed.
	fn is_up_to_date(&self, id: ScriptId, stamp: &InputsStamp) -> bool;
}

/// Script definition lookup. The engine is a no-op until `is_ready`.
pub trait DefinitionProvider: Send + Sync {
	fn is_ready(&self) -> bool;
	fn find_definition(&self, id: ScriptId) -> Option<Arc<ScriptDefinition>>;
}

/// Sink for load diagnostics; other subsystems read what the engine writes.
pub trait ReportSink: Send + Sync {
	fn attach(&self, id: ScriptId, reports: Vec<ScriptReport>);
}

/// Requests re-analysis of a script file after its configuration or
/// reports changed. Invoked from the UI pump, never from the worker.
pub trait Rehighlighter: Send + Sync {
	fn rehighlight(&self, id: ScriptId);
}

/// Callbacks attached to a suggestion notification.
///
/// Implementations of [`NotificationPanel`] invoke these when the user
/// acts; both post a message back to the engine rather than re-entering
/// it, so a panel may fire them from any thread.
pub struct PanelActions {
	pub accept: Box<dyn Fn() + Send + Sync>,
	pub dismiss: Box<dyn Fn() + Send + Sync>,
}

impl std::fmt::Debug for PanelActions {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("PanelActions").finish_non_exhaustive()
	}
}

/// Per-file notification surface for "configuration changed" suggestions.
pub trait NotificationPanel: Send + Sync {
	fn show(&self, id: ScriptId, actions: PanelActions);
	fn hide(&self, id: ScriptId);
	fn is_visible(&self, id: ScriptId) -> bool;
}

/// Indexer integration: one call per committed reindex transaction.
pub trait RootIndexer: Send + Sync {
	fn index_roots(&self, roots: &[PathBuf]) -> Result<(), IndexError>;
}

/// User-facing scripting settings.
pub trait ScriptingSettings: Send + Sync {
	/// When enabled, fresh configurations are applied without a suggestion.
	fn auto_reload_enabled(&self) -> bool;
}

/// Trusted side channel of previously loaded configurations, consumed by
/// [`crate::loader::StoredConfigurationLoader`]. Persistence format and
/// location are the implementation's business.
pub trait ConfigurationStore: Send + Sync {
	fn stored(&self, id: ScriptId) -> Option<LoadedConfiguration>;
}

/// Serializable settings data backing [`MutableSettings`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScriptingSettingsData {
	#[serde(default)]
	pub auto_reload: bool,
}

/// In-memory settings implementation, adjustable at runtime.
#[derive(Debug, Default)]
pub struct MutableSettings {
	data: RwLock<ScriptingSettingsData>,
}

impl MutableSettings {
	pub fn new(data: ScriptingSettingsData) -> Self {
		Self {
			data: RwLock::new(data),
		}
	}

	pub fn set_auto_reload(&self, enabled: bool) {
		self.data.write().auto_reload = enabled;
	}
}

impl ScriptingSettings for MutableSettings {
	fn auto_reload_enabled(&self) -> bool {
		self.data.read().auto_reload
	}
}
