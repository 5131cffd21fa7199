//! Script configuration lifecycle management.
//!
//! # Purpose
//!
//! - Owns: staleness detection, background reload scheduling, the
//!   suggest-vs-apply decision, and suggestion notification lifecycle.
//! - Does not own: documents, the indexer, report storage, or panel UI
//!   (all collaborators, see [`crate::host`]); loader semantics (opaque
//!   strategies, see [`crate::loader`]).
//! - Source of truth: [`ScriptConfigManager`].
//!
//! # Mental model
//!
//! - Terms: Applied (configuration in the cache, visible to analysis),
//!   Pending (loaded but awaiting user acceptance), Stale (inputs stamp no
//!   longer matches the live file), Coalesced (a background task that
//!   found the cache already fresh and did nothing).
//! - Lifecycle in one sentence: an invalidation marks the cache stale and
//!   schedules a deduplicated background load whose result is either
//!   applied inside a reindex transaction or parked as a suggestion until
//!   the user accepts it.
//!
//! # Invariants
//!
//! 1. MUST keep at most one load in flight per script (queued or running).
//!    - Enforced in: the set-queue semantics of
//!      [`vellum_worker::BackgroundExecutor::ensure_scheduled`].
//!    - Tested by: `manager::tests::single_flight_per_script`,
//!      `manager::tests::queued_edits_dedup_into_one_load`.
//!    - Failure symptom: redundant resolver runs for one file, out-of-order
//!      applies.
//!
//! 2. MUST re-check freshness inside the background task before loading.
//!    - Enforced in: [`ManagerInner::run_background_load`] steps (a)/(b).
//!    - Tested by: `manager::tests::aba_in_queue_loads_nothing`,
//!      `manager::tests::reverted_edit_revives_pending_without_load`.
//!    - Failure symptom: "A → B → A" edit bursts cost a full load and can
//!      raise a notification for a configuration the user already has.
//!
//! 3. MUST hide the pending entry on `mark_stale` and re-raise it only
//!    from the background task, atomically with the cache flag.
//!    - Enforced in: [`crate::cache::ConfigCache::mark_stale`].
//!    - Tested by: `manager::tests::mark_stale_makes_pending_unobservable`.
//!    - Failure symptom: the user accepts a suggestion computed from
//!      inputs that no longer exist.
//!
//! 4. MUST NOT open a reindex transaction or raise a notification when a
//!    load produces a configuration equal to the applied one; only the
//!    stamp is refreshed.
//!    - Enforced in: [`ManagerInner::suggest_or_save`].
//!    - Tested by: `manager::tests::equal_configuration_refreshes_stamp_silently`.
//!    - Failure symptom: spurious notifications and index churn on
//!      whitespace-only edits.
//!
//! 5. MUST serialize suggest-or-save decisions under the save lock, and
//!    never take the save lock while holding the cache or queue locks.
//!    - Enforced in: every public mutation entry point takes `save_lock`
//!      first; cache/queue methods lock internally and never call out.
//!    - Failure symptom: interleaved panel bookkeeping between concurrent
//!      load completions.
//!
//! # Data flow
//!
//! 1. Trigger: [`crate::ChangeNotifier::file_changed`] calls
//!    [`ScriptConfigManager::invalidate`]: cache marked stale, background
//!    load scheduled (deduplicated).
//! 2. Worker: the task re-checks freshness against the live file, then
//!    either coalesces, re-raises a still-fresh pending suggestion, or
//!    runs the first applicable loader on a snapshot.
//! 3. Loader: routes its result through suggest (notification) or save
//!    (trusted, immediate) on the [`LoadContext`].
//! 4. Commit: applies stage into a reindex scope; the indexer runs once at
//!    outermost scope exit, then staged entries enter the cache and a
//!    rehighlight is posted.
//! 5. UI: panel callbacks and rehighlights travel through
//!    [`crate::UiMessage`]; the embedder drains them with
//!    [`ScriptConfigManager::pump_ui`].
//!
//! # Concurrency and ordering
//!
//! - One dedicated worker thread; loads for different files are FIFO.
//! - Lock order: `save_lock` → (cache mutex | queue mutex). Never
//!   reversed; cache and queue methods are leaf calls.
//! - Apply events for one file are totally ordered by the save lock.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use vellum_worker::BackgroundExecutor;

use crate::cache::{CachedEntry, ConfigCache};
use crate::host::{
	DefinitionProvider, NotificationPanel, PanelActions, Rehighlighter, ReportSink, RootIndexer, ScriptHost,
	ScriptingSettings,
};
use crate::loader::ScriptConfigLoader;
use crate::reindex::{CommitOutcome, ReindexBatcher, ReindexScope};
use crate::types::{LoadedConfiguration, ScriptConfiguration, ScriptId, ScriptReport, ScriptSnapshot};
use crate::ui::{UiMessage, UiQueue, UiReceiver};


/// Per-engine load counters.
///
/// Plain atomics rather than an exporter; scenario tests use these as
/// their oracle for "how many loads actually happened".
#[derive(Debug, Default)]
pub struct LoadMetrics {
	loader_runs: AtomicU64,
	loader_failures: AtomicU64,
	loader_panics: AtomicU64,
	tasks_completed: AtomicU64,
	tasks_coalesced: AtomicU64,
	suggestions: AtomicU64,
	applies: AtomicU64,
}

impl LoadMetrics {
	/// Loader invocations that handled a script (including failed ones).
	pub fn loader_runs(&self) -> u64 {
		self.loader_runs.load(Ordering::SeqCst)
	}

	pub fn loader_failures(&self) -> u64 {
		self.loader_failures.load(Ordering::SeqCst)
	}

	pub fn loader_panics(&self) -> u64 {
		self.loader_panics.load(Ordering::SeqCst)
	}

	/// Background tasks that ran to completion, whatever their outcome.
	pub fn tasks_completed(&self) -> u64 {
		self.tasks_completed.load(Ordering::SeqCst)
	}

	/// Background tasks that found the cache already fresh and did nothing.
	pub fn tasks_coalesced(&self) -> u64 {
		self.tasks_coalesced.load(Ordering::SeqCst)
	}

	/// Suggestion notifications raised (re-raises included).
	pub fn suggestions(&self) -> u64 {
		self.suggestions.load(Ordering::SeqCst)
	}

	/// Configurations committed into the applied cache.
	pub fn applies(&self) -> u64 {
		self.applies.load(Ordering::SeqCst)
	}
}

/// External interfaces the engine consumes; see [`crate::host`].
pub struct Collaborators {
	pub host: Arc<dyn ScriptHost>,
	pub definitions: Arc<dyn DefinitionProvider>,
	pub reports: Arc<dyn ReportSink>,
	pub rehighlighter: Arc<dyn Rehighlighter>,
	pub panel: Arc<dyn NotificationPanel>,
	pub indexer: Arc<dyn RootIndexer>,
	pub settings: Arc<dyn ScriptingSettings>,
}

/// How eagerly the reload decision loads when the cache is out of date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReloadMode {
	/// Load only on the first load of the file (or when auto-reload is on).
	FirstLoadOnly,
	/// Load even if the result will only be suggested, not applied.
	ForceSuggest,
}

/// Narrow capability handed to loaders: route a load result down the
/// suggestion path or the trusted save path.
pub struct LoadContext<'a> {
	inner: &'a Arc<ManagerInner>,
}

impl LoadContext<'_> {
	/// Routes through the suggestion path: the configuration becomes
	/// pending and a notification asks the user to apply it. (Still
	/// applies directly when the file had no configuration yet or
	/// auto-reload is enabled.)
	pub fn suggest_new_configuration(&self, id: ScriptId, loaded: LoadedConfiguration) {
		self.inner.suggest_or_save(id, loaded, false);
	}

	/// Applies immediately, bypassing the suggestion. For loaders whose
	/// source is already trusted.
	pub fn save_new_configuration(&self, id: ScriptId, loaded: LoadedConfiguration) {
		self.inner.suggest_or_save(id, loaded, true);
	}
}

/// The script configuration engine. Cheap to clone; all clones share one
/// state.
#[derive(Clone)]
pub struct ScriptConfigManager {
	inner: Arc<ManagerInner>,
}

struct ManagerInner {
	host: Arc<dyn ScriptHost>,
	definitions: Arc<dyn DefinitionProvider>,
	reports: Arc<dyn ReportSink>,
	rehighlighter: Arc<dyn Rehighlighter>,
	panel: Arc<dyn NotificationPanel>,
	settings: Arc<dyn ScriptingSettings>,
	loaders: Vec<Arc<dyn ScriptConfigLoader>>,
	cache: ConfigCache,
	executor: BackgroundExecutor<ScriptId>,
	batcher: Arc<ReindexBatcher>,
	/// Serializes suggest-or-save decisions and panel bookkeeping.
	save_lock: Mutex<()>,
	/// Last reports attached per script, to skip no-op sink writes.
	last_reports: Mutex<HashMap<ScriptId, Vec<ScriptReport>>>,
	ui: UiQueue,
	ui_rx: Mutex<UiReceiver>,
	metrics: LoadMetrics,
	alive: AtomicBool,
	/// Test-mode hook: apply every outcome without suggestion.
	auto_apply_all: AtomicBool,
}

impl std::fmt::Debug for ScriptConfigManager {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ScriptConfigManager").finish_non_exhaustive()
	}
}

impl ScriptConfigManager {
	pub fn new(collaborators: Collaborators, loaders: Vec<Arc<dyn ScriptConfigLoader>>) -> Self {
		let (ui, ui_rx) = UiQueue::new();
		let indexer = Arc::clone(&collaborators.indexer);
		let inner = Arc::new_cyclic(|weak: &Weak<ManagerInner>| {
			let committer_weak = weak.clone();
			let batcher = Arc::new(ReindexBatcher::new(
				indexer,
				Box::new(move |outcome| {
					if let Some(inner) = committer_weak.upgrade() {
						inner.commit_outcome(outcome);
					}
				}),
			));
			ManagerInner {
				host: collaborators.host,
				definitions: collaborators.definitions,
				reports: collaborators.reports,
				rehighlighter: collaborators.rehighlighter,
				panel: collaborators.panel,
				settings: collaborators.settings,
				loaders,
				cache: ConfigCache::new(),
				executor: BackgroundExecutor::new("script-config-loader"),
				batcher,
				save_lock: Mutex::new(()),
				last_reports: Mutex::new(HashMap::new()),
				ui,
				ui_rx: Mutex::new(ui_rx),
				metrics: LoadMetrics::default(),
				alive: AtomicBool::new(true),
				auto_apply_all: AtomicBool::new(false),
			}
		});
		Self { inner }
	}

	/// Current configuration for analysis, scheduling a load when the
	/// cache is absent or stale. Never blocks except when a synchronous
	/// loader handles the file on this thread.
	pub fn get_configuration(&self, id: ScriptId) -> Option<ScriptConfiguration> {
		self.inner.reload_if_out_of_date(id, ReloadMode::FirstLoadOnly);
		self.inner.cache.applied(id).map(|entry| entry.configuration)
	}

	/// Passive read of the applied configuration; never schedules.
	pub fn applied_configuration(&self, id: ScriptId) -> Option<ScriptConfiguration> {
		self.inner.cache.applied(id).map(|entry| entry.configuration)
	}

	/// The document changed: mark the cache stale (hiding any pending
	/// suggestion) and schedule a reload.
	pub fn invalidate(&self, id: ScriptId) {
		self.inner.cache.mark_stale(id);
		self.inner.reload_if_out_of_date(id, ReloadMode::ForceSuggest);
	}

	/// Makes sure an up-to-date configuration is applied or at least
	/// suggested, without disturbing fresh state (editor-focus hook).
	pub fn ensure_up_to_date_suggested(&self, id: ScriptId) {
		self.inner.reload_if_out_of_date(id, ReloadMode::ForceSuggest);
	}

	/// User-accept path: moves the pending configuration into the applied
	/// cache inside a reindex transaction. Returns false when nothing is
	/// pending.
	pub fn apply_pending(&self, id: ScriptId) -> bool {
		let inner = &self.inner;
		let _guard = inner.save_lock.lock();
		let Some(pending) = inner.cache.pending(id) else {
			return false;
		};
		let Some(configuration) = pending.configuration else {
			inner.cache.remove_pending(id);
			return false;
		};
		inner.panel.hide(id);
		inner.apply_now(
			id,
			CachedEntry {
				stamp: pending.stamp,
				configuration,
			},
		);
		true
	}

	/// User-dismiss path: drops the pending configuration.
	pub fn dismiss_pending(&self, id: ScriptId) -> bool {
		let inner = &self.inner;
		let _guard = inner.save_lock.lock();
		let removed = inner.cache.remove_pending(id).is_some();
		if removed {
			inner.panel.hide(id);
		}
		removed
	}

	pub fn has_pending(&self, id: ScriptId) -> bool {
		self.inner.cache.has_pending(id)
	}

	/// Pending configuration awaiting acceptance, if any.
	pub fn pending_configuration(&self, id: ScriptId) -> Option<ScriptConfiguration> {
		self.inner.cache.pending(id).and_then(|loaded| loaded.configuration)
	}

	/// Opens a reindex scope so several [`Self::apply_pending`] calls index
	/// their roots in one pass. Each file commits at most once per scope.
	pub fn reindex_scope(&self) -> ReindexScope {
		self.inner.batcher.scope()
	}

	/// Drains queued UI work (rehighlights, panel accept/dismiss). Call
	/// from the embedder's UI thread.
	pub fn pump_ui(&self) {
		loop {
			let message = self.inner.ui_rx.lock().try_recv();
			let Ok(message) = message else { break };
			match message {
				UiMessage::Rehighlight(id) => self.inner.rehighlighter.rehighlight(id),
				UiMessage::ApplyPending(id) => {
					let _ = self.apply_pending(id);
				}
				UiMessage::DismissPending(id) => {
					let _ = self.dismiss_pending(id);
				}
			}
		}
	}

	/// Blocks until the background queue is empty and no task is running.
	/// Test support; production embedders have no reason to wait.
	pub fn drain(&self) {
		self.inner.executor.drain();
	}

	/// Editor-close hook: drops cache entries, pending state, queued work,
	/// panel, and attached reports for the script.
	pub fn close_script(&self, id: ScriptId) {
		let inner = &self.inner;
		let _guard = inner.save_lock.lock();
		inner.executor.cancel_queued(id);
		inner.cache.remove(id);
		inner.panel.hide(id);
		let had_reports = inner
			.last_reports
			.lock()
			.remove(&id)
			.is_some_and(|reports| !reports.is_empty());
		if had_reports {
			inner.reports.attach(id, Vec::new());
		}
	}

	pub fn metrics(&self) -> &LoadMetrics {
		&self.inner.metrics
	}

	/// Test-mode hook: every load outcome is applied without a suggestion.
	pub fn set_auto_apply_all(&self, enabled: bool) {
		self.inner.auto_apply_all.store(enabled, Ordering::SeqCst);
	}

	/// Stops the engine: the UI queue goes dead, queued loads are
	/// discarded, the running load (if any) finishes and is ignored.
	pub fn shutdown(&self) {
		self.inner.alive.store(false, Ordering::Release);
		self.inner.ui.mark_dead();
		self.inner.executor.shutdown();
	}
}

impl ManagerInner {
	fn auto_apply_enabled(&self) -> bool {
		self.settings.auto_reload_enabled() || self.auto_apply_all.load(Ordering::SeqCst)
	}

	/// The reload decision (spec of record: invalidate/getConfiguration).
	fn reload_if_out_of_date(self: &Arc<Self>, id: ScriptId, mode: ReloadMode) {
		if !self.alive.load(Ordering::Acquire) {
			return;
		}
		if !self.definitions.is_ready() {
			tracing::trace!(script = %id, "config.reload: definitions not ready");
			return;
		}
		let Some(definition) = self.definitions.find_definition(id) else {
			tracing::trace!(script = %id, "config.reload: no definition");
			return;
		};

		let applied = self.cache.applied(id);
		if let Some(entry) = &applied
			&& !self.cache.is_marked_stale(id)
			&& self.host.is_up_to_date(id, &entry.stamp)
		{
			return;
		}

		let first_load = applied.is_none();
		let should_load = first_load || mode == ReloadMode::ForceSuggest || self.auto_apply_enabled();
		if !should_load {
			return;
		}

		// Synchronous phase, on the caller thread.
		let has_sync = self
			.loaders
			.iter()
			.any(|loader| !loader.should_run_in_background(&definition));
		if has_sync {
			let Some(snapshot) = self.host.snapshot(id) else {
				tracing::debug!(script = %id, "config.reload: file vanished");
				return;
			};
			for loader in &self.loaders {
				if loader.should_run_in_background(&definition) {
					continue;
				}
				if self.run_loader(loader.as_ref(), first_load, &snapshot, &definition) {
					return;
				}
			}
		}

		self.schedule_background(id);
	}

	fn schedule_background(self: &Arc<Self>, id: ScriptId) {
		let weak = Arc::downgrade(self);
		let accepted = self.executor.ensure_scheduled(id, move || {
			if let Some(inner) = weak.upgrade() {
				inner.run_background_load(id);
			}
		});
		tracing::trace!(script = %id, accepted, "config.reload: background load requested");
	}

	/// Body of one background task.
	fn run_background_load(self: &Arc<Self>, id: ScriptId) {
		self.metrics.tasks_completed.fetch_add(1, Ordering::SeqCst);
		if !self.alive.load(Ordering::Acquire) {
			return;
		}
		if !self.definitions.is_ready() {
			return;
		}
		let Some(definition) = self.definitions.find_definition(id) else {
			return;
		};

		// (a) Staleness re-check: the live file may already match the
		// applied configuration again (A → B → A within the queue window).
		if let Some(entry) = self.cache.applied(id)
			&& self.host.is_up_to_date(id, &entry.stamp)
		{
			self.cache.clear_stale_mark(id);
			self.metrics.tasks_coalesced.fetch_add(1, Ordering::SeqCst);
			tracing::trace!(script = %id, "config.load: coalesced, cache already fresh");
			return;
		}

		// (b) A pending suggestion whose inputs match the live file is
		// re-raised instead of reloaded (its notification may have been
		// hidden by an intervening mark_stale).
		if let Some(prev) = self.cache.pending_any(id)
			&& self.host.is_up_to_date(id, &prev.stamp)
		{
			tracing::trace!(script = %id, "config.load: re-suggesting still-fresh pending configuration");
			self.suggest_or_save(id, prev, false);
			return;
		}

		// (c) Anything pending is now superseded; load fresh.
		self.cache.remove_pending(id);
		let Some(snapshot) = self.host.snapshot(id) else {
			tracing::debug!(script = %id, "config.load: file vanished, keeping previous state");
			return;
		};
		let first_load = self.cache.applied(id).is_none();
		for loader in &self.loaders {
			if !loader.should_run_in_background(&definition) {
				continue;
			}
			if self.run_loader(loader.as_ref(), first_load, &snapshot, &definition) {
				return;
			}
		}
		tracing::trace!(script = %id, "config.load: no applicable loader");
	}

	/// Runs one loader, containing panics and converting failures to
	/// reports. Returns whether the script was handled (chain stops).
	fn run_loader(
		self: &Arc<Self>,
		loader: &dyn ScriptConfigLoader,
		first_load: bool,
		snapshot: &ScriptSnapshot,
		definition: &crate::types::ScriptDefinition,
	) -> bool {
		let ctx = LoadContext { inner: self };
		let outcome = catch_unwind(AssertUnwindSafe(|| loader.load(first_load, snapshot, definition, &ctx)));
		match outcome {
			Ok(Ok(false)) => false,
			Ok(Ok(true)) => {
				self.metrics.loader_runs.fetch_add(1, Ordering::SeqCst);
				true
			}
			Ok(Err(err)) => {
				self.metrics.loader_runs.fetch_add(1, Ordering::SeqCst);
				self.metrics.loader_failures.fetch_add(1, Ordering::SeqCst);
				tracing::warn!(script = %snapshot.id, loader = loader.name(), error = %err, "config.load failed");
				let _guard = self.save_lock.lock();
				self.store_reports(snapshot.id, &[ScriptReport::error(err.to_string())]);
				true
			}
			Err(_) => {
				self.metrics.loader_runs.fetch_add(1, Ordering::SeqCst);
				self.metrics.loader_panics.fetch_add(1, Ordering::SeqCst);
				tracing::warn!(script = %snapshot.id, loader = loader.name(), "config.load: loader panicked");
				let _guard = self.save_lock.lock();
				self.store_reports(
					snapshot.id,
					&[ScriptReport::error(format!("configuration loader '{}' panicked", loader.name()))],
				);
				true
			}
		}
	}

	/// Decides what happens to a load result. Serialized by the save lock
	/// so concurrent completions do not interleave panel bookkeeping.
	fn suggest_or_save(self: &Arc<Self>, id: ScriptId, loaded: LoadedConfiguration, skip_notification: bool) {
		let _guard = self.save_lock.lock();

		self.store_reports(id, &loaded.reports);

		let Some(new_configuration) = loaded.configuration.clone() else {
			tracing::debug!(script = %id, "config.save: reports-only outcome, keeping previous configuration");
			return;
		};

		let applied = self.cache.applied(id);
		if let Some(entry) = &applied
			&& entry.configuration == new_configuration
		{
			self.panel.hide(id);
			self.cache.refresh_stamp(id, loaded.stamp);
			tracing::trace!(script = %id, "config.save: configuration unchanged, stamp refreshed");
			return;
		}

		let auto_apply = skip_notification || applied.is_none() || self.auto_apply_enabled();
		if auto_apply {
			self.panel.hide(id);
			self.apply_now(
				id,
				CachedEntry {
					stamp: loaded.stamp,
					configuration: new_configuration,
				},
			);
		} else {
			self.metrics.suggestions.fetch_add(1, Ordering::SeqCst);
			self.cache.put_pending(id, loaded);
			let accept_queue = self.ui.clone();
			let dismiss_queue = self.ui.clone();
			self.panel.show(
				id,
				PanelActions {
					accept: Box::new(move || accept_queue.post(UiMessage::ApplyPending(id))),
					dismiss: Box::new(move || dismiss_queue.post(UiMessage::DismissPending(id))),
				},
			);
			tracing::debug!(script = %id, "config.save: new configuration suggested");
		}
	}

	/// Stages an apply in a reindex scope. With no outer scope open, the
	/// scope commits before this returns.
	fn apply_now(&self, id: ScriptId, entry: CachedEntry) {
		let scope = self.batcher.scope();
		self.batcher.stage(id, entry);
		drop(scope);
	}

	/// Handles the outcome of a committed reindex transaction.
	fn commit_outcome(self: &Arc<Self>, outcome: CommitOutcome) {
		match outcome.result {
			Ok(()) => {
				for staged in outcome.staged {
					let stamp = staged.entry.stamp.clone();
					self.cache.store(staged.id, staged.entry);
					self.metrics.applies.fetch_add(1, Ordering::SeqCst);
					tracing::debug!(script = %staged.id, "config.apply: configuration applied");
					self.ui.post(UiMessage::Rehighlight(staged.id));
					// The file may have moved on while the load ran; chase
					// it. (A request from within the file's own running
					// task is dropped by the set-queue; that path is
					// covered by the auto-reload policy on the next
					// getConfiguration instead.)
					if !self.host.is_up_to_date(staged.id, &stamp) {
						self.schedule_background(staged.id);
					}
				}
			}
			Err(err) => {
				for staged in outcome.staged {
					self.cache.remove_pending(staged.id);
					self.store_reports(
						staged.id,
						&[ScriptReport::error(format!("failed to index configuration roots: {err}"))],
					);
				}
			}
		}
	}

	/// Persists reports through the sink when they changed, requesting a
	/// rehighlight of the file.
	fn store_reports(&self, id: ScriptId, reports: &[ScriptReport]) {
		{
			let mut last = self.last_reports.lock();
			if last.get(&id).map(Vec::as_slice).unwrap_or(&[]) == reports {
				return;
			}
			last.insert(id, reports.to_vec());
		}
		self.reports.attach(id, reports.to_vec());
		self.ui.post(UiMessage::Rehighlight(id));
	}
}
