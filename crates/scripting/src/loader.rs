//! Pluggable configuration loaders.
//!
//! Loaders are tried in registration order, first-applicable wins. A
//! loader either runs on the caller thread (`should_run_in_background` =
//! false) or on the background worker. Through the [`LoadContext`] it
//! routes its result down one of two paths: `suggest` (user confirmation
//! required before the configuration takes effect) or `save` (trusted
//! source, applied immediately).

use std::sync::Arc;

use crate::error::LoadError;
use crate::host::ConfigurationStore;
use crate::manager::LoadContext;
use crate::types::{ScriptDefinition, ScriptSnapshot};

/// One strategy for obtaining a script's configuration.
pub trait ScriptConfigLoader: Send + Sync {
	/// Short name, for tracing.
	fn name(&self) -> &str;

	/// Whether this loader must run on the background worker for scripts
	/// of the given definition.
	fn should_run_in_background(&self, definition: &ScriptDefinition) -> bool;

	/// Attempts to load. Returns `Ok(true)` when the script was handled
	/// (the chain stops), `Ok(false)` to pass to the next loader. An error
	/// is a transient failure: it becomes a diagnostic on the script and
	/// stops the chain.
	fn load(
		&self,
		first_load: bool,
		snapshot: &ScriptSnapshot,
		definition: &ScriptDefinition,
		ctx: &LoadContext<'_>,
	) -> Result<bool, LoadError>;
}

/// The canonical loader: runs the definition's resolver against the
/// snapshot. Resolvers execute user code, so results go through the
/// suggestion path.
#[derive(Debug, Default)]
pub struct ResolverLoader;

impl ScriptConfigLoader for ResolverLoader {
	fn name(&self) -> &str {
		"resolver"
	}

	fn should_run_in_background(&self, definition: &ScriptDefinition) -> bool {
		definition.resolve_in_background
	}

	fn load(
		&self,
		_first_load: bool,
		snapshot: &ScriptSnapshot,
		definition: &ScriptDefinition,
		ctx: &LoadContext<'_>,
	) -> Result<bool, LoadError> {
		let loaded = definition.resolver.resolve(snapshot)?;
		ctx.suggest_new_configuration(snapshot.id, loaded);
		Ok(true)
	}
}

/// Bootstrap loader backed by a trusted configuration store.
///
/// Only applicable on the first load of a file, and only when the stored
/// stamp matches the snapshot exactly; anything else falls through to the
/// next loader. Trusted-source results bypass the suggestion.
pub struct StoredConfigurationLoader {
	store: Arc<dyn ConfigurationStore>,
}

impl StoredConfigurationLoader {
	pub fn new(store: Arc<dyn ConfigurationStore>) -> Self {
		Self { store }
	}
}

impl ScriptConfigLoader for StoredConfigurationLoader {
	fn name(&self) -> &str {
		"stored"
	}

	fn should_run_in_background(&self, _definition: &ScriptDefinition) -> bool {
		false
	}

	fn load(
		&self,
		first_load: bool,
		snapshot: &ScriptSnapshot,
		_definition: &ScriptDefinition,
		ctx: &LoadContext<'_>,
	) -> Result<bool, LoadError> {
		if !first_load {
			return Ok(false);
		}
		let Some(stored) = self.store.stored(snapshot.id) else {
			return Ok(false);
		};
		if stored.stamp != snapshot.stamp {
			tracing::trace!(script = %snapshot.id, "loader.stored: stamp mismatch, skipping");
			return Ok(false);
		}
		ctx.save_new_configuration(snapshot.id, stored);
		Ok(true)
	}
}

impl std::fmt::Debug for StoredConfigurationLoader {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("StoredConfigurationLoader").finish_non_exhaustive()
	}
}
