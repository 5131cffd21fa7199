//! Error types for configuration loading and indexing.

use thiserror::Error;

/// Errors surfaced by loaders and resolvers.
///
/// These never escape the engine's public API: a failed load degrades to a
/// diagnostic report on the affected script and the previous configuration
/// stays in place.
#[derive(Debug, Clone, Error)]
pub enum LoadError {
	/// The user-supplied resolver failed to produce a configuration.
	#[error("resolver failed: {0}")]
	Resolver(String),

	/// A trusted configuration store could not be read.
	#[error("configuration store unavailable: {0}")]
	Store(String),
}

/// Error returned by the root indexer collaborator.
///
/// Fatal to the apply that triggered it: the configuration is not cached
/// and the pending slot is cleared.
#[derive(Debug, Clone, Error)]
#[error("reindex failed: {0}")]
pub struct IndexError(pub String);
