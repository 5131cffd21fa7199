//! Core value types for script configuration tracking.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::LoadError;

/// Stable identity of a tracked script file.
///
/// Survives edits of the file's contents; allocation is the embedding
/// editor's concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScriptId(pub u64);

impl fmt::Display for ScriptId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "script#{}", self.0)
	}
}

/// Opaque fingerprint of a script file's load-affecting inputs.
///
/// Compared only for equality ("same inputs seen again"). Whether a stamp
/// is still fresh against the live file is a separate question answered by
/// [`crate::host::ScriptHost::is_up_to_date`], which may consult state the
/// stamp does not capture (e.g. transitive dependencies).
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct InputsStamp {
	payload: Arc<[u8]>,
}

impl InputsStamp {
	/// Wraps an arbitrary fingerprint payload.
	pub fn from_bytes(payload: impl Into<Vec<u8>>) -> Self {
		Self {
			payload: payload.into().into(),
		}
	}

	/// Content-digest stamp over script text.
	pub fn of_text(text: &str) -> Self {
		let mut hasher = std::hash::DefaultHasher::new();
		text.hash(&mut hasher);
		Self::from_bytes(hasher.finish().to_be_bytes().to_vec())
	}
}

impl fmt::Debug for InputsStamp {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "InputsStamp({} bytes)", self.payload.len())
	}
}

/// Compiler configuration derived for one script file.
///
/// Opaque to the engine beyond cheap equality; the root lists are what the
/// indexer acts on when a configuration is applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptConfiguration {
	/// Class-path style roots the script depends on.
	#[serde(default)]
	pub dependency_roots: Vec<PathBuf>,
	/// Source roots contributed by the script's dependencies.
	#[serde(default)]
	pub source_roots: Vec<PathBuf>,
	/// Compiler options derived by the resolver.
	#[serde(default)]
	pub compiler_options: Vec<String>,
}

impl ScriptConfiguration {
	/// All roots that require indexing when this configuration is applied.
	pub fn roots(&self) -> impl Iterator<Item = &PathBuf> {
		self.dependency_roots.iter().chain(self.source_roots.iter())
	}
}

/// Severity of a load report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportSeverity {
	Error,
	Warning,
	Info,
}

/// Diagnostic produced while loading a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptReport {
	pub severity: ReportSeverity,
	pub message: String,
}

impl ScriptReport {
	pub fn error(message: impl Into<String>) -> Self {
		Self {
			severity: ReportSeverity::Error,
			message: message.into(),
		}
	}

	pub fn warning(message: impl Into<String>) -> Self {
		Self {
			severity: ReportSeverity::Warning,
			message: message.into(),
		}
	}
}

/// Outcome of one load: the inputs it was computed from, the configuration
/// (absent for reports-only outcomes), and any diagnostics.
///
/// A `configuration` of `None` is a valid outcome and never overwrites a
/// previously applied configuration.
#[derive(Debug, Clone)]
pub struct LoadedConfiguration {
	pub stamp: InputsStamp,
	pub configuration: Option<ScriptConfiguration>,
	pub reports: Vec<ScriptReport>,
}

impl LoadedConfiguration {
	pub fn new(stamp: InputsStamp, configuration: ScriptConfiguration) -> Self {
		Self {
			stamp,
			configuration: Some(configuration),
			reports: Vec::new(),
		}
	}

	/// Reports-only outcome (transient failure).
	pub fn reports_only(stamp: InputsStamp, reports: Vec<ScriptReport>) -> Self {
		Self {
			stamp,
			configuration: None,
			reports,
		}
	}
}

/// Immutable capture of a script file at load time.
///
/// Loaders consume snapshots, never the live document, so a load's output
/// is attributable to exactly the inputs recorded in `stamp`.
#[derive(Debug, Clone)]
pub struct ScriptSnapshot {
	pub id: ScriptId,
	pub text: Arc<str>,
	pub stamp: InputsStamp,
}

/// Strategy that derives a configuration from a script snapshot.
///
/// This is the user-supplied piece: it may execute the script's resolver
/// section, spawn an external process, or consult a build model.
pub trait ConfigResolver: Send + Sync {
	fn resolve(&self, snapshot: &ScriptSnapshot) -> Result<LoadedConfiguration, LoadError>;
}

/// Definition a script file is matched against: names the script flavor
/// and carries its resolver.
#[derive(Clone)]
pub struct ScriptDefinition {
	pub name: String,
	/// Whether the resolver performs I/O or runs user code and therefore
	/// belongs on the background worker.
	pub resolve_in_background: bool,
	pub resolver: Arc<dyn ConfigResolver>,
}

impl fmt::Debug for ScriptDefinition {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ScriptDefinition")
			.field("name", &self.name)
			.field("resolve_in_background", &self.resolve_in_background)
			.finish_non_exhaustive()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn stamp_equality_follows_content() {
		assert_eq!(InputsStamp::of_text("a"), InputsStamp::of_text("a"));
		assert_ne!(InputsStamp::of_text("a"), InputsStamp::of_text("b"));
	}

	#[test]
	fn configuration_roots_chains_both_lists() {
		let cfg = ScriptConfiguration {
			dependency_roots: vec![PathBuf::from("/deps/a.jar")],
			source_roots: vec![PathBuf::from("/src/lib")],
			compiler_options: Vec::new(),
		};
		let roots: Vec<_> = cfg.roots().collect();
		assert_eq!(roots.len(), 2);
	}
}
