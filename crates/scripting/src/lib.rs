//! Script configuration loading engine.
//!
//! Editor-resident script files derive their compile configuration by
//! running a user-supplied resolver over the file's contents. This crate
//! manages the lifecycle of those configurations: staleness detection
//! against an inputs stamp, deduplicated background reloads on a single
//! worker thread, the apply-vs-suggest decision (with user confirmation
//! through a notification panel), and batched root reindexing around
//! applies.
//!
//! ```text
//! ┌───────────┐ file_changed ┌──────────────────────┐  ensure_scheduled  ┌────────────────────┐
//! │ Documents │─────────────▶│ ScriptConfigManager  │───────────────────▶│ BackgroundExecutor │
//! └───────────┘              │  cache + pending     │                    │  (set-queue)       │
//!                            └──────────┬───────────┘                    └─────────┬──────────┘
//!                             suggest / │ apply                    loader chain    │
//!                            ┌──────────▼───────────┐              ┌───────────────▼────────┐
//!                            │ NotificationPanel /  │◀─────────────│ resolver / stored cfg  │
//!                            │ ReindexBatcher       │ suggest_or_save └──────────────────────┘
//!                            └──────────────────────┘
//! ```
//!
//! The engine owns no documents, indexer, or UI; those are collaborator
//! traits in [`host`], implemented by the embedding editor.

pub mod cache;
pub mod error;
pub mod host;
pub mod loader;
pub mod manager;
pub mod notifier;
pub mod reindex;
pub mod types;
mod ui;

pub use cache::{CachedEntry, ConfigCache};
pub use error::{IndexError, LoadError};
pub use host::{
	ConfigurationStore, DefinitionProvider, MutableSettings, NotificationPanel, PanelActions, Rehighlighter,
	ReportSink, RootIndexer, ScriptHost, ScriptingSettings, ScriptingSettingsData,
};
pub use loader::{ResolverLoader, ScriptConfigLoader, StoredConfigurationLoader};
pub use manager::{Collaborators, LoadContext, LoadMetrics, ScriptConfigManager};
pub use notifier::ChangeNotifier;
pub use reindex::{ReindexBatcher, ReindexScope};
pub use types::{
	ConfigResolver, InputsStamp, LoadedConfiguration, ReportSeverity, ScriptConfiguration, ScriptDefinition,
	ScriptId, ScriptReport, ScriptSnapshot,
};
pub use ui::UiMessage;
