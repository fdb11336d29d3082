//! # Discovery Controller
//!
//! Single owner of the client-side [`ProjectState`]. All changes go through
//! [`DiscoveryController::apply`] (or the analysis helpers built on it), and
//! every persisting change is handed to a background sync task that pushes
//! the latest state to the backend once input has been quiet for the
//! debounce period.

use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use super::coherence::{coherence_score, AnalysisToggles};
use super::mutation::{CompletedAnalysis, Mutation, StageSnapshot};
use super::project::{GroundingSource, ProjectState};
use super::repository::{LoadedProject, SaveReceipt};
use crate::analysis::orchestrator::AnalysisRequest;
use crate::analysis::prompt::strip_thoughts;
use crate::analysis::scraper::ReferenceFetcher;
use crate::analysis::stream::AnalysisEvent;
use crate::analysis::AnalysisBackend;
use crate::error::DiscoveryError;
use crate::stages::DiscoveryStage;

/// Default quiet period before a pending state is pushed
pub const DEFAULT_SYNC_DEBOUNCE: Duration = Duration::from_millis(500);

/// Where project state is loaded from and saved to
#[async_trait]
pub trait ProjectBackend: Send + Sync {
    /// Load the saved project, `None` when nothing has been saved yet
    async fn load(&self) -> Result<Option<LoadedProject>>;

    /// Save the full state. A mismatched `expected_revision` is rejected.
    async fn save(&self, state: &ProjectState, expected_revision: Option<i64>)
        -> Result<SaveReceipt>;
}

/// Controller settings
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub sync_debounce: Duration,
    /// Send the last known revision with each save
    pub track_revision: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            sync_debounce: DEFAULT_SYNC_DEBOUNCE,
            track_revision: false,
        }
    }
}

/// Identifies one in-flight analysis run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalysisTicket {
    pub stage: DiscoveryStage,
    id: u64,
}

/// The live run and what its stage showed before it started
struct InFlight {
    ticket: AnalysisTicket,
    restore: StageSnapshot,
}

enum SyncCommand {
    Push(Arc<ProjectState>),
    Flush(oneshot::Sender<Result<Option<SaveReceipt>>>),
    SetRevision(Option<i64>),
}

/// Handle to the background persistence task
struct SyncHandle {
    tx: mpsc::Sender<SyncCommand>,
}

impl SyncHandle {
    fn spawn(backend: Arc<dyn ProjectBackend>, config: &ControllerConfig) -> Self {
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(sync_loop(
            rx,
            backend,
            config.sync_debounce,
            config.track_revision,
        ));
        Self { tx }
    }

    async fn send(&self, command: SyncCommand) {
        if self.tx.send(command).await.is_err() {
            tracing::warn!("Sync task has stopped; state change not persisted");
        }
    }
}

async fn sync_loop(
    mut rx: mpsc::Receiver<SyncCommand>,
    backend: Arc<dyn ProjectBackend>,
    debounce: Duration,
    track_revision: bool,
) {
    let mut pending: Option<Arc<ProjectState>> = None;
    let mut revision: Option<i64> = None;

    loop {
        let command = if pending.is_some() {
            match tokio::time::timeout(debounce, rx.recv()).await {
                Ok(command) => command,
                Err(_) => {
                    if let Some(state) = pending.take() {
                        if let Err(e) =
                            push(backend.as_ref(), &state, &mut revision, track_revision).await
                        {
                            tracing::warn!(error = %e, "Background project sync failed");
                        }
                    }
                    continue;
                }
            }
        } else {
            rx.recv().await
        };

        match command {
            Some(SyncCommand::Push(state)) => pending = Some(state),
            Some(SyncCommand::Flush(reply)) => {
                let result = match pending.take() {
                    Some(state) => push(backend.as_ref(), &state, &mut revision, track_revision)
                        .await
                        .map(Some),
                    None => Ok(None),
                };
                let _ = reply.send(result);
            }
            Some(SyncCommand::SetRevision(r)) => revision = r,
            None => {
                if let Some(state) = pending.take() {
                    if let Err(e) =
                        push(backend.as_ref(), &state, &mut revision, track_revision).await
                    {
                        tracing::warn!(error = %e, "Final project sync failed");
                    }
                }
                break;
            }
        }
    }
}

async fn push(
    backend: &dyn ProjectBackend,
    state: &ProjectState,
    revision: &mut Option<i64>,
    track_revision: bool,
) -> Result<SaveReceipt> {
    let expected = if track_revision { *revision } else { None };
    let receipt = backend.save(state, expected).await?;
    tracing::debug!(
        revision = receipt.revision,
        versions_added = receipt.versions_added,
        "Project synced"
    );
    *revision = Some(receipt.revision);
    Ok(receipt)
}

/// Owns the project state and mediates every change to it
pub struct DiscoveryController {
    state: Arc<ProjectState>,
    in_flight: Option<InFlight>,
    next_ticket: u64,
    backend: Arc<dyn ProjectBackend>,
    sync: SyncHandle,
}

impl DiscoveryController {
    /// Create a controller with default state. Must be called inside a
    /// tokio runtime; the sync task is spawned immediately.
    pub fn new(backend: Arc<dyn ProjectBackend>, config: ControllerConfig) -> Self {
        let sync = SyncHandle::spawn(Arc::clone(&backend), &config);
        Self {
            state: Arc::new(ProjectState::default()),
            in_flight: None,
            next_ticket: 0,
            backend,
            sync,
        }
    }

    /// Current state snapshot
    pub fn state(&self) -> Arc<ProjectState> {
        Arc::clone(&self.state)
    }

    /// Stage whose analysis is currently in flight
    pub fn analyzing_stage(&self) -> Option<DiscoveryStage> {
        self.in_flight.as_ref().map(|run| run.ticket.stage)
    }

    /// Replace local state with the backend copy. Returns false when the
    /// backend has no project yet, leaving defaults in place.
    pub async fn load(&mut self) -> Result<bool> {
        match self.backend.load().await? {
            Some(loaded) => {
                tracing::info!(
                    revision = loaded.revision,
                    stage = %loaded.state.current_stage,
                    "Loaded project"
                );
                self.state = Arc::new(loaded.state.normalized());
                self.sync
                    .send(SyncCommand::SetRevision(Some(loaded.revision)))
                    .await;
                Ok(true)
            }
            None => {
                tracing::info!("No saved project; starting fresh");
                Ok(false)
            }
        }
    }

    /// Apply a mutation and schedule persistence when it calls for it
    pub async fn apply(&mut self, mutation: Mutation) -> Result<Arc<ProjectState>, DiscoveryError> {
        let persists = mutation.persists();
        let kind = mutation.kind();

        if let Mutation::ResetStage(stage) = &mutation {
            if self.analyzing_stage() == Some(*stage) {
                self.in_flight = None;
            }
        }

        let next = Arc::new(mutation.apply(&self.state)?);
        self.state = Arc::clone(&next);
        tracing::trace!(mutation = kind, "Applied mutation");

        if persists {
            self.sync.send(SyncCommand::Push(Arc::clone(&next))).await;
        }
        Ok(next)
    }

    /// Push any pending state now and wait for the save result
    pub async fn flush(&self) -> Result<Option<SaveReceipt>> {
        let (reply, rx) = oneshot::channel();
        self.sync.send(SyncCommand::Flush(reply)).await;
        rx.await
            .map_err(|_| anyhow::anyhow!("Sync task dropped flush request"))?
    }

    /// Mark `stage` as analyzing and take a ticket for the run. A run that
    /// is still in flight is abandoned and its stage restored first.
    pub async fn begin_analysis(&mut self, stage: DiscoveryStage) -> Result<AnalysisTicket, DiscoveryError> {
        if !self.state.is_metadata_complete() {
            return Err(DiscoveryError::MetadataIncomplete);
        }
        if let Some(previous) = self.in_flight.take() {
            tracing::info!(stage = %previous.ticket.stage, "Superseding in-flight analysis");
            self.apply(Mutation::FailAnalysis {
                stage: previous.ticket.stage,
                restore: previous.restore,
            })
            .await?;
        }

        self.next_ticket += 1;
        let ticket = AnalysisTicket {
            stage,
            id: self.next_ticket,
        };
        let restore = StageSnapshot::of(&self.state.stage(stage));
        self.apply(Mutation::BeginAnalysis(stage)).await?;
        self.in_flight = Some(InFlight { ticket, restore });
        Ok(ticket)
    }

    fn is_current(&self, ticket: AnalysisTicket) -> bool {
        self.in_flight.as_ref().is_some_and(|run| run.ticket == ticket)
    }

    /// Record streamed text for a live run. Stale tickets are ignored.
    pub async fn append_partial(&mut self, ticket: AnalysisTicket, text: &str) -> Result<(), DiscoveryError> {
        if self.is_current(ticket) {
            self.apply(Mutation::AppendPartial {
                stage: ticket.stage,
                text: text.to_string(),
            })
            .await?;
        }
        Ok(())
    }

    /// Fold a finished run into the stage. Returns false when the ticket is
    /// no longer the one in flight and the result was dropped.
    pub async fn complete_analysis(
        &mut self,
        ticket: AnalysisTicket,
        output: String,
        sources: Option<Vec<GroundingSource>>,
        toggles: AnalysisToggles,
    ) -> Result<bool, DiscoveryError> {
        if !self.is_current(ticket) {
            tracing::debug!(stage = %ticket.stage, "Ignoring stale analysis result");
            return Ok(false);
        }

        let score = coherence_score(&self.state, ticket.stage, toggles);
        let result = CompletedAnalysis {
            output,
            grounding_sources: sources,
            search_entry_point_html: None,
            coherence_score: score,
            version_id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        };

        self.in_flight = None;
        self.apply(Mutation::CompleteAnalysis {
            stage: ticket.stage,
            result,
        })
        .await?;
        tracing::info!(stage = %ticket.stage, coherence = score, "Analysis completed");
        Ok(true)
    }

    /// Abandon a run. Stale tickets are ignored.
    pub async fn fail_analysis(&mut self, ticket: AnalysisTicket) -> Result<bool, DiscoveryError> {
        let run = match self.in_flight.take() {
            Some(run) if run.ticket == ticket => run,
            other => {
                self.in_flight = other;
                return Ok(false);
            }
        };
        self.apply(Mutation::FailAnalysis {
            stage: ticket.stage,
            restore: run.restore,
        })
        .await?;
        Ok(true)
    }

    /// Run a full analysis of the current stage: scrape reference URLs,
    /// stream the generated document into the state and record the result.
    ///
    /// `on_progress` receives each streamed text delta.
    pub async fn run_analysis<F>(
        &mut self,
        analyzer: &dyn AnalysisBackend,
        fetcher: &dyn ReferenceFetcher,
        toggles: AnalysisToggles,
        mut on_progress: F,
    ) -> Result<()>
    where
        F: FnMut(&str) + Send,
    {
        let stage = self.state.current_stage;
        if !self.state.is_metadata_complete() {
            return Err(DiscoveryError::MetadataIncomplete.into());
        }

        let urls = self.state.stage(stage).urls;
        let scraped = if urls.is_empty() {
            Vec::new()
        } else {
            tracing::info!(count = urls.len(), "Scraping reference URLs");
            futures::future::join_all(urls.iter().map(|url| fetcher.fetch(url))).await
        };

        let request = AnalysisRequest::for_stage(&self.state, stage, &scraped, toggles);
        let ticket = self.begin_analysis(stage).await?;

        let mut events = match analyzer.analyze(request).await {
            Ok(events) => events,
            Err(e) => {
                self.fail_analysis(ticket).await?;
                return Err(e.context("Analysis request failed"));
            }
        };

        let mut document = String::new();
        let mut sources = None;
        while let Some(event) = events.next().await {
            match event {
                Ok(AnalysisEvent::Sources(found)) => sources = Some(found),
                Ok(AnalysisEvent::Text(delta)) => {
                    document.push_str(&delta);
                    self.append_partial(ticket, &delta).await?;
                    on_progress(&delta);
                }
                Ok(AnalysisEvent::Done) => break,
                Ok(AnalysisEvent::Error(message)) => {
                    self.fail_analysis(ticket).await?;
                    anyhow::bail!("Analysis stream failed: {}", message);
                }
                Err(e) => {
                    self.fail_analysis(ticket).await?;
                    return Err(e.context("Analysis stream failed"));
                }
            }
        }

        if toggles.thinking {
            document = strip_thoughts(&document);
        }
        self.complete_analysis(ticket, document, sources, toggles)
            .await?;
        Ok(())
    }
}
