//! Scoped batching of root-set indexing.
//!
//! Applying a configuration adds dependency/source roots that must be
//! indexed. A [`ReindexScope`] batches any number of applies; the indexer
//! runs exactly once, when the outermost scope closes. Nested scopes
//! collapse into the outermost one.
//!
//! Nothing is committed into the applied cache until the index run
//! succeeds: scopes stage `(id, entry)` pairs, and the batcher hands the
//! staged set together with the index result to a committer callback
//! installed by the engine.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::cache::CachedEntry;
use crate::error::IndexError;
use crate::host::RootIndexer;
use crate::types::ScriptId;

/// An apply waiting for the transaction to commit.
#[derive(Debug, Clone)]
pub(crate) struct StagedApply {
	pub id: ScriptId,
	pub entry: CachedEntry,
}

/// What the outermost scope produced.
pub(crate) struct CommitOutcome {
	pub result: Result<(), IndexError>,
	pub staged: Vec<StagedApply>,
}

pub(crate) type Committer = Box<dyn Fn(CommitOutcome) + Send + Sync>;

#[derive(Default)]
struct TxnState {
	depth: usize,
	roots: Vec<PathBuf>,
	seen_roots: HashSet<PathBuf>,
	staged: Vec<StagedApply>,
}

/// Reindex transaction coordinator.
pub struct ReindexBatcher {
	indexer: Arc<dyn RootIndexer>,
	committer: Committer,
	state: Mutex<TxnState>,
}

impl ReindexBatcher {
	pub(crate) fn new(indexer: Arc<dyn RootIndexer>, committer: Committer) -> Self {
		Self {
			indexer,
			committer,
			state: Mutex::new(TxnState::default()),
		}
	}

	/// Opens a (possibly nested) transaction scope.
	pub fn scope(self: &Arc<Self>) -> ReindexScope {
		self.state.lock().depth += 1;
		ReindexScope {
			batcher: Arc::clone(self),
		}
	}

	/// Stages one apply in the current transaction. Staging the same key
	/// twice replaces the earlier entry.
	pub(crate) fn stage(&self, id: ScriptId, entry: CachedEntry) {
		let mut state = self.state.lock();
		debug_assert!(state.depth > 0, "stage outside of a reindex scope");
		for root in entry.configuration.roots() {
			if state.seen_roots.insert(root.clone()) {
				state.roots.push(root.clone());
			}
		}
		if let Some(existing) = state.staged.iter_mut().find(|staged| staged.id == id) {
			existing.entry = entry;
		} else {
			state.staged.push(StagedApply { id, entry });
		}
	}
}

impl std::fmt::Debug for ReindexBatcher {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ReindexBatcher").finish_non_exhaustive()
	}
}

/// Guard for one transaction scope; closing the outermost scope commits.
#[must_use = "a reindex scope commits when dropped"]
pub struct ReindexScope {
	batcher: Arc<ReindexBatcher>,
}

impl Drop for ReindexScope {
	fn drop(&mut self) {
		let finished = {
			let mut state = self.batcher.state.lock();
			state.depth -= 1;
			if state.depth > 0 {
				None
			} else {
				state.seen_roots.clear();
				Some((std::mem::take(&mut state.roots), std::mem::take(&mut state.staged)))
			}
		};

		// Index and commit outside the state lock; both may be slow.
		let Some((roots, staged)) = finished else { return };
		if roots.is_empty() && staged.is_empty() {
			return;
		}

		let result = if roots.is_empty() {
			Ok(())
		} else {
			self.batcher.indexer.index_roots(&roots)
		};
		match &result {
			Ok(()) => tracing::debug!(files = staged.len(), roots = roots.len(), "reindex.commit"),
			Err(err) => tracing::warn!(files = staged.len(), error = %err, "reindex.commit failed"),
		}
		(self.batcher.committer)(CommitOutcome { result, staged });
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

	use super::*;
	use crate::types::{InputsStamp, ScriptConfiguration};

	struct CountingIndexer {
		runs: AtomicUsize,
		root_counts: Mutex<Vec<usize>>,
		fail: AtomicBool,
	}

	impl CountingIndexer {
		fn new() -> Self {
			Self {
				runs: AtomicUsize::new(0),
				root_counts: Mutex::new(Vec::new()),
				fail: AtomicBool::new(false),
			}
		}
	}

	impl RootIndexer for CountingIndexer {
		fn index_roots(&self, roots: &[PathBuf]) -> Result<(), IndexError> {
			self.runs.fetch_add(1, Ordering::SeqCst);
			self.root_counts.lock().push(roots.len());
			if self.fail.load(Ordering::SeqCst) {
				Err(IndexError("disk full".into()))
			} else {
				Ok(())
			}
		}
	}

	fn entry(root: &str) -> CachedEntry {
		CachedEntry {
			stamp: InputsStamp::of_text(root),
			configuration: ScriptConfiguration {
				dependency_roots: vec![PathBuf::from(root)],
				..ScriptConfiguration::default()
			},
		}
	}

	fn batcher_with(indexer: Arc<CountingIndexer>) -> (Arc<ReindexBatcher>, Arc<Mutex<Vec<CommitOutcome>>>) {
		let outcomes = Arc::new(Mutex::new(Vec::new()));
		let sink = Arc::clone(&outcomes);
		let batcher = Arc::new(ReindexBatcher::new(
			indexer,
			Box::new(move |outcome| sink.lock().push(outcome)),
		));
		(batcher, outcomes)
	}

	#[test]
	fn nested_scopes_commit_once_at_outermost_exit() {
		let indexer = Arc::new(CountingIndexer::new());
		let (batcher, outcomes) = batcher_with(Arc::clone(&indexer));

		{
			let _outer = batcher.scope();
			{
				let _inner = batcher.scope();
				batcher.stage(ScriptId(1), entry("/deps/a"));
			}
			assert_eq!(indexer.runs.load(Ordering::SeqCst), 0, "inner scope must not commit");
			batcher.stage(ScriptId(2), entry("/deps/b"));
		}

		assert_eq!(indexer.runs.load(Ordering::SeqCst), 1);
		assert_eq!(indexer.root_counts.lock().as_slice(), &[2]);
		let outcomes = outcomes.lock();
		assert_eq!(outcomes.len(), 1);
		assert_eq!(outcomes[0].staged.len(), 2);
	}

	#[test]
	fn duplicate_roots_and_keys_are_collapsed() {
		let indexer = Arc::new(CountingIndexer::new());
		let (batcher, outcomes) = batcher_with(Arc::clone(&indexer));

		{
			let _scope = batcher.scope();
			batcher.stage(ScriptId(1), entry("/deps/a"));
			batcher.stage(ScriptId(1), entry("/deps/a"));
		}

		assert_eq!(indexer.root_counts.lock().as_slice(), &[1]);
		assert_eq!(outcomes.lock()[0].staged.len(), 1);
	}

	#[test]
	fn empty_scope_does_not_touch_the_indexer() {
		let indexer = Arc::new(CountingIndexer::new());
		let (batcher, outcomes) = batcher_with(Arc::clone(&indexer));

		drop(batcher.scope());

		assert_eq!(indexer.runs.load(Ordering::SeqCst), 0);
		assert!(outcomes.lock().is_empty());
	}

	#[test]
	fn index_failure_reaches_the_committer() {
		let indexer = Arc::new(CountingIndexer::new());
		indexer.fail.store(true, Ordering::SeqCst);
		let (batcher, outcomes) = batcher_with(Arc::clone(&indexer));

		{
			let _scope = batcher.scope();
			batcher.stage(ScriptId(1), entry("/deps/a"));
		}

		let outcomes = outcomes.lock();
		assert!(outcomes[0].result.is_err());
		assert_eq!(outcomes[0].staged.len(), 1);
	}
}
