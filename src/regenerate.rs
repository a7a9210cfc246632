//! Bulk regeneration: re-derive every record of a collection from its
//! original file.
//!
//! ## State machine
//!
//! ```text
//!   Idle ──trigger──► Running{current, total} ──last page / cancel / page error──► Idle
//!     ▲                   │
//!     └── trigger while Running returns the current status, no second walk
//! ```
//!
//! "Running" is an entry in the [`RegenerationRegistry`]. The entry is
//! created by an atomic check-and-insert, so two concurrent triggers for the
//! same collection can never both start a walk.
//!
//! ## Iteration
//!
//! Records are read one per page. The trigger awaits page 1 and returns
//! its status; the rest of the walk always continues in the background.
//! After that, [`IterationMode::Sequential`] walks the remaining pages in a
//! single task, while [`IterationMode::Pipelined`] hands every next page to
//! a fresh task.
//!
//! A failed page read ends the run and clears its entry so the collection
//! can be retried.

use crate::config::{CollectionConfig, IterationMode};
use crate::imaging::EncodeEngine;
use crate::pipeline::Pipeline;
use crate::records::{PageQuery, Record, RecordError, RecordStore};
use crate::storage::Storage;
use crate::types::RegenerationStatus;
use crate::variants::GenerateError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum RegenerateError {
    #[error("collection {0} has no derivatives configured")]
    UnknownCollection(String),
    #[error("failed to read page {page} of {collection}: {source}")]
    PageRead {
        collection: String,
        page: u64,
        #[source]
        source: RecordError,
    },
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error(transparent)]
    Generate(#[from] GenerateError),
    #[error("regeneration task aborted: {0}")]
    Aborted(#[from] tokio::task::JoinError),
}

/// Progress notifications for observers of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegenerationEvent {
    Started {
        collection: String,
    },
    Progress {
        collection: String,
        status: RegenerationStatus,
    },
    Skipped {
        collection: String,
        id: String,
        reason: String,
    },
    Finished {
        collection: String,
        total: u64,
    },
    Failed {
        collection: String,
        error: String,
    },
    Cancelled {
        collection: String,
        status: RegenerationStatus,
    },
}

// ============================================================================
// Registry
// ============================================================================

struct RunEntry {
    run_id: u64,
    status: watch::Sender<RegenerationStatus>,
    cancel: CancellationToken,
    /// Set once page 1 has been read and published.
    primed: bool,
}

/// Proof of owning the running entry for one collection.
#[derive(Debug, Clone)]
pub struct RunTicket {
    collection: String,
    run_id: u64,
    cancel: CancellationToken,
}

impl RunTicket {
    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Result of trying to start a run.
#[derive(Debug)]
pub enum Begin {
    Started(RunTicket),
    /// `first_page` is set while the running walk has not yet published
    /// page 1; it changes when it does.
    InProgress {
        status: RegenerationStatus,
        first_page: Option<watch::Receiver<RegenerationStatus>>,
    },
}

/// Which collections are being regenerated, and how far along they are.
///
/// Built once per process and shared by handle. The lock is never held
/// across an await.
#[derive(Default)]
pub struct RegenerationRegistry {
    runs: Mutex<HashMap<String, RunEntry>>,
    next_run: AtomicU64,
}

impl RegenerationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn runs(&self) -> MutexGuard<'_, HashMap<String, RunEntry>> {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Atomically claim `collection`, or report the run already holding it.
    pub fn begin(&self, collection: &str) -> Begin {
        let mut runs = self.runs();
        if let Some(entry) = runs.get(collection) {
            return Begin::InProgress {
                status: entry.status.borrow().clone(),
                first_page: (!entry.primed).then(|| entry.status.subscribe()),
            };
        }

        let run_id = self.next_run.fetch_add(1, Ordering::Relaxed);
        let (status, _) = watch::channel(RegenerationStatus::starting());
        let cancel = CancellationToken::new();
        runs.insert(
            collection.to_string(),
            RunEntry {
                run_id,
                status,
                cancel: cancel.clone(),
                primed: false,
            },
        );
        Begin::Started(RunTicket {
            collection: collection.to_string(),
            run_id,
            cancel,
        })
    }

    /// Publish progress. Ignored if the ticket no longer owns the entry.
    pub fn update(&self, ticket: &RunTicket, status: RegenerationStatus) {
        if let Some(entry) = self.runs().get_mut(&ticket.collection) {
            if entry.run_id == ticket.run_id {
                entry.primed = true;
                entry.status.send_replace(status);
            }
        }
    }

    /// Remove the ticket's entry, returning the collection to idle.
    pub fn finish(&self, ticket: &RunTicket) {
        let mut runs = self.runs();
        if runs
            .get(&ticket.collection)
            .is_some_and(|e| e.run_id == ticket.run_id)
        {
            runs.remove(&ticket.collection);
        }
    }

    pub fn status(&self, collection: &str) -> Option<RegenerationStatus> {
        self.runs()
            .get(collection)
            .map(|e| e.status.borrow().clone())
    }

    /// Watch a running collection's status. The receiver closes when the
    /// run ends.
    pub fn subscribe(&self, collection: &str) -> Option<watch::Receiver<RegenerationStatus>> {
        self.runs().get(collection).map(|e| e.status.subscribe())
    }

    pub fn is_running(&self, collection: &str) -> bool {
        self.runs().contains_key(collection)
    }

    /// Ask a run to stop before its next page. Returns whether one was running.
    pub fn cancel(&self, collection: &str) -> bool {
        match self.runs().get(collection) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }
}

// ============================================================================
// Regenerator
// ============================================================================

struct Run {
    ticket: RunTicket,
    collection: CollectionConfig,
    sort: String,
}

/// Drives regeneration runs over a pipeline.
pub struct Regenerator<S, R, E> {
    pipeline: Arc<Pipeline<S, R, E>>,
    registry: Arc<RegenerationRegistry>,
    iteration: IterationMode,
    events: Option<mpsc::UnboundedSender<RegenerationEvent>>,
}

impl<S: Storage, R: RecordStore, E: EncodeEngine + 'static> Regenerator<S, R, E> {
    pub fn new(pipeline: Arc<Pipeline<S, R, E>>, registry: Arc<RegenerationRegistry>) -> Self {
        let iteration = pipeline.config().regeneration.iteration;
        Self {
            pipeline,
            registry,
            iteration,
            events: None,
        }
    }

    pub fn with_iteration(mut self, iteration: IterationMode) -> Self {
        self.iteration = iteration;
        self
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<RegenerationEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn registry(&self) -> &Arc<RegenerationRegistry> {
        &self.registry
    }

    fn emit(&self, event: RegenerationEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    /// Start regenerating `collection`, or return the status of the run
    /// already in progress.
    ///
    /// A new run processes page 1 before returning; the returned status
    /// reflects it. A trigger that finds a run still reading page 1 waits for
    /// that page, so concurrent triggers observe the same status. The walk
    /// runs on the pipeline's tracker, so dropping the returned future does
    /// not strand the run.
    pub async fn trigger(
        self: &Arc<Self>,
        collection: &str,
        sort: Option<&str>,
    ) -> Result<RegenerationStatus, RegenerateError> {
        let config = self
            .pipeline
            .collection(collection)
            .cloned()
            .ok_or_else(|| RegenerateError::UnknownCollection(collection.to_string()))?;

        let ticket = match self.registry.begin(collection) {
            Begin::Started(ticket) => ticket,
            Begin::InProgress { status, first_page } => {
                let status = match first_page {
                    Some(mut rx) => match rx.changed().await {
                        Ok(()) => rx.borrow_and_update().clone(),
                        Err(_) => status,
                    },
                    None => status,
                };
                debug!(%collection, current = status.current, "regeneration already running");
                return Ok(status);
            }
        };

        let sort = sort
            .map(str::to_string)
            .unwrap_or_else(|| self.pipeline.config().regeneration.default_sort.clone());
        info!(%collection, %sort, "regeneration started");
        self.emit(RegenerationEvent::Started {
            collection: collection.to_string(),
        });

        let run = Run {
            ticket: ticket.clone(),
            collection: config,
            sort,
        };
        let this = Arc::clone(self);
        let first = self.pipeline.spawn(this.start(run));
        match first.await {
            Ok(result) => result,
            Err(error) => {
                self.registry.finish(&ticket);
                Err(error.into())
            }
        }
    }

    async fn start(self: Arc<Self>, run: Run) -> Result<RegenerationStatus, RegenerateError> {
        let step = self.step(&run, 1).await?;
        if let Some(next) = step.next {
            self.spawn_continuation(run, next);
        }
        Ok(step.status)
    }

    /// Current status of a running collection.
    pub fn status(&self, collection: &str) -> Option<RegenerationStatus> {
        self.registry.status(collection)
    }

    pub fn cancel(&self, collection: &str) -> bool {
        self.registry.cancel(collection)
    }

    /// Re-derive one record. `Ok(false)` means it was skipped.
    pub async fn regenerate_one(&self, collection: &str, id: &str) -> Result<bool, RegenerateError> {
        let config = self
            .pipeline
            .collection(collection)
            .ok_or_else(|| RegenerateError::UnknownCollection(collection.to_string()))?;
        let record = self.pipeline.records().find_by_id(collection, id).await?;
        if let Some(reason) = self.skip_reason(&record) {
            debug!(%collection, %id, %reason, "record skipped");
            return Ok(false);
        }
        Ok(self.pipeline.regenerate_from_original(config, &record).await?)
    }

    fn skip_reason(&self, record: &Record) -> Option<String> {
        match record.mime_type() {
            Some(mime) if !self.pipeline.config().conversion.accepts(mime) => {
                Some(format!("mime type {mime} not accepted"))
            }
            _ => None,
        }
    }

    fn spawn_continuation(self: &Arc<Self>, run: Run, page: u64) {
        let this = Arc::clone(self);
        self.pipeline.spawn(this.run_from(run, page));
    }

    async fn run_from(self: Arc<Self>, run: Run, mut page: u64) {
        loop {
            match self.step(&run, page).await {
                Ok(Step { next: Some(next), .. }) => match self.iteration {
                    IterationMode::Sequential => page = next,
                    IterationMode::Pipelined => {
                        self.spawn_continuation(run, next);
                        return;
                    }
                },
                Ok(Step { next: None, .. }) => return,
                Err(error) => {
                    error!(%error, collection = %run.ticket.collection, "regeneration aborted");
                    return;
                }
            }
        }
    }

    /// Process one page. `next` is the page to continue with, if any.
    async fn step(&self, run: &Run, page: u64) -> Result<Step, RegenerateError> {
        let slug = run.ticket.collection.as_str();

        if run.ticket.is_cancelled() {
            let status = self
                .registry
                .status(slug)
                .unwrap_or_else(RegenerationStatus::starting);
            self.registry.finish(&run.ticket);
            info!(collection = %slug, current = status.current, "regeneration cancelled");
            self.emit(RegenerationEvent::Cancelled {
                collection: slug.to_string(),
                status: status.clone(),
            });
            return Ok(Step { status, next: None });
        }

        let query = PageQuery {
            page,
            limit: 1,
            sort: run.sort.clone(),
        };
        let result = match self.pipeline.records().find_page(slug, &query).await {
            Ok(result) => result,
            Err(source) => {
                self.registry.finish(&run.ticket);
                let error = RegenerateError::PageRead {
                    collection: slug.to_string(),
                    page,
                    source,
                };
                self.emit(RegenerationEvent::Failed {
                    collection: slug.to_string(),
                    error: error.to_string(),
                });
                return Err(error);
            }
        };

        let record = result.records.into_iter().next();
        let status = RegenerationStatus {
            current_file: record
                .as_ref()
                .map(|r| r.filename().unwrap_or(r.id.as_str()).to_string()),
            current: page,
            total: result.total_pages,
        };
        self.registry.update(&run.ticket, status.clone());
        self.emit(RegenerationEvent::Progress {
            collection: slug.to_string(),
            status: status.clone(),
        });

        if let Some(record) = record {
            self.regenerate_record(&run.collection, &record).await;
        }

        if page < status.total {
            Ok(Step {
                status,
                next: Some(page + 1),
            })
        } else {
            self.registry.finish(&run.ticket);
            info!(collection = %slug, total = status.total, "regeneration finished");
            self.emit(RegenerationEvent::Finished {
                collection: slug.to_string(),
                total: status.total,
            });
            Ok(Step { status, next: None })
        }
    }

    /// Failures here skip the record; the walk goes on.
    async fn regenerate_record(&self, collection: &CollectionConfig, record: &Record) {
        let reason = match self.skip_reason(record) {
            Some(reason) => Some(reason),
            None => match self
                .pipeline
                .regenerate_from_original(collection, record)
                .await
            {
                Ok(true) => None,
                Ok(false) => Some("original file unavailable".to_string()),
                Err(error) => {
                    warn!(%error, collection = %collection.slug, id = %record.id, "record regeneration failed");
                    Some(error.to_string())
                }
            },
        };

        if let Some(reason) = reason {
            self.emit(RegenerationEvent::Skipped {
                collection: collection.slug.clone(),
                id: record.id.clone(),
                reason,
            });
        }
    }
}

struct Step {
    status: RegenerationStatus,
    next: Option<u64>,
}
