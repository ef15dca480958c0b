//! Document correlation and dispatch engine.
//!
//! This module implements the single-consumer loop that routes acquisition
//! documents to archive uploads. All correlation state lives in one async
//! task that processes queue items via message-passing; producers enqueue
//! without blocking and never touch the maps.
//!
//! # Flow
//!
//! ```text
//! sources / callers ──(enqueue, non-blocking)──▶ queue
//!                                                  │ (dequeue, one at a time)
//!                                                  ▼
//!                                             Dispatcher ──▶ archive uploads
//! ```
//!
//! A run-start opens an upload and registers the run; descriptors and events
//! resolve their run through the correlation maps; the matching run-stop
//! reclaims every entry the run created. Per-producer FIFO order is
//! preserved; the producer is responsible for temporal order within a run
//! (run-start before its descriptors and events, run-stop last).

use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::archive::ArchiveApi;
use crate::document::{Document, DocumentKind, Event, EventDescriptor, RunStart, RunStop};
use crate::error::{RelayError, RelayResult};

/// Items carried by the document queue.
#[derive(Debug)]
enum RelayCommand {
    /// Dispatch one document.
    Document(Document),
    /// Sentinel: stop consuming. Everything enqueued before it is drained
    /// first; nothing after it is processed.
    Shutdown,
}

/// Cloneable producer handle feeding the relay's queue.
///
/// `send` never blocks; the queue is unbounded. It fails only once the
/// consumer has stopped.
#[derive(Debug, Clone)]
pub struct DocumentSender {
    tx: mpsc::UnboundedSender<RelayCommand>,
}

impl DocumentSender {
    /// Enqueue a document for dispatch.
    pub fn send(&self, document: Document) -> RelayResult<()> {
        self.tx
            .send(RelayCommand::Document(document))
            .map_err(|_| RelayError::QueueClosed)
    }
}

/// Routes documents to archive uploads, tracking run lifecycles.
///
/// The correlation maps are private to this struct and the struct is owned
/// by a single task, so no locking is needed: single-writer by construction.
pub struct Dispatcher<A: ArchiveApi> {
    archive: A,

    // The uid of the run-start to the upload it opened.
    run_to_upload: HashMap<String, String>,

    // The uid of the event descriptor to the uid of its run-start. Kept
    // separate so the entries can be reclaimed when the run-stop comes in.
    descriptor_to_run: HashMap<String, String>,
}

impl<A: ArchiveApi> Dispatcher<A> {
    /// Create a dispatcher pushing to the given archive.
    pub fn new(archive: A) -> Self {
        Self {
            archive,
            run_to_upload: HashMap::new(),
            descriptor_to_run: HashMap::new(),
        }
    }

    /// Runs the consumption loop, processing queue items until the shutdown
    /// sentinel is dequeued.
    ///
    /// Document-level failures (an unsupported kind, a correlation-lookup
    /// miss, a failed archive call) are logged and the loop continues with
    /// the next document. Only the sentinel ends the loop.
    async fn run(mut self, mut queue_rx: mpsc::UnboundedReceiver<RelayCommand>) {
        info!("document relay started");

        while let Some(command) = queue_rx.recv().await {
            match command {
                RelayCommand::Document(document) => {
                    if let Err(error) = self.send_document(&document).await {
                        warn!(
                            kind = %document.kind(),
                            uid = document.uid().unwrap_or("<none>"),
                            %error,
                            "failed to dispatch document"
                        );
                    }
                }
                RelayCommand::Shutdown => {
                    info!("shutdown sentinel received");
                    break;
                }
            }
        }

        info!("document relay stopped");
    }

    /// Dispatch a single document to its upload.
    ///
    /// Routing is an exhaustive match on the document kind; side-channel
    /// kinds are rejected as unsupported.
    pub async fn send_document(&mut self, document: &Document) -> RelayResult<()> {
        match document {
            Document::RunStart(doc) => self.upload_run_start(doc).await,
            Document::RunStop(doc) => self.upload_run_stop(doc).await,
            Document::EventDescriptor(doc) => self.upload_descriptor(doc).await,
            Document::Event(doc) => self.upload_event(doc).await,
            other => Err(RelayError::UnsupportedDocument(other.kind())),
        }
    }

    /// Number of runs currently open (run-start seen, run-stop not yet).
    pub fn open_runs(&self) -> usize {
        self.run_to_upload.len()
    }

    /// Number of event descriptors registered for currently open runs.
    pub fn open_descriptors(&self) -> usize {
        self.descriptor_to_run.len()
    }

    async fn upload_run_start(&mut self, document: &RunStart) -> RelayResult<()> {
        let upload_name = format!("run_{}", document.time);
        let upload_id = self.archive.create_upload(&upload_name).await?;
        info!(%upload_name, %upload_id, "created upload");
        self.run_to_upload
            .insert(document.uid.clone(), upload_id.clone());

        self.push(DocumentKind::RunStart, document.time, document, &upload_id)
            .await?;
        info!(uid = %document.uid, %upload_id, "added run_start document to upload");
        Ok(())
    }

    async fn upload_descriptor(&mut self, document: &EventDescriptor) -> RelayResult<()> {
        // Resolve the run before registering the descriptor, so a descriptor
        // for an unknown run leaves no stale entry behind.
        let upload_id = self
            .run_to_upload
            .get(&document.run_start)
            .ok_or_else(|| RelayError::UnknownRun(document.run_start.clone()))?
            .clone();
        self.descriptor_to_run
            .insert(document.uid.clone(), document.run_start.clone());

        self.push(
            DocumentKind::EventDescriptor,
            document.time,
            document,
            &upload_id,
        )
        .await?;
        debug!(uid = %document.uid, %upload_id, "added event_descriptor document to upload");
        Ok(())
    }

    async fn upload_event(&mut self, document: &Event) -> RelayResult<()> {
        let run_start = self
            .descriptor_to_run
            .get(&document.descriptor)
            .ok_or_else(|| RelayError::UnknownDescriptor(document.descriptor.clone()))?;
        let upload_id = self
            .run_to_upload
            .get(run_start)
            .ok_or_else(|| RelayError::UnknownRun(run_start.clone()))?;

        self.push(DocumentKind::Event, document.time, document, upload_id)
            .await?;
        debug!(uid = %document.uid, %upload_id, "added event document to upload");
        Ok(())
    }

    async fn upload_run_stop(&mut self, document: &RunStop) -> RelayResult<()> {
        let upload_id = self
            .run_to_upload
            .remove(&document.run_start)
            .ok_or_else(|| RelayError::UnknownRun(document.run_start.clone()))?;
        // Reclaim every descriptor the closing run registered; descriptors of
        // other open runs are untouched.
        self.descriptor_to_run
            .retain(|_, run_start| run_start != &document.run_start);

        self.push(DocumentKind::RunStop, document.time, document, &upload_id)
            .await?;
        debug!(uid = %document.uid, %upload_id, "added run_stop document to upload");
        Ok(())
    }

    async fn push<T: serde::Serialize>(
        &self,
        kind: DocumentKind,
        time: f64,
        document: &T,
        upload_id: &str,
    ) -> RelayResult<()> {
        let name = format!("{}_{}", time, kind.as_str());
        let payload = serde_json::to_value(document)?;
        self.archive.add_dictionary(&name, &payload, upload_id).await
    }
}

/// Handle to a serving relay: a spawned consumption loop plus the sending
/// side of its queue.
#[derive(Debug)]
pub struct DocumentRelay {
    tx: mpsc::UnboundedSender<RelayCommand>,
    worker: JoinHandle<()>,
}

impl DocumentRelay {
    /// Spawns the consumption loop on the current runtime and returns
    /// immediately.
    ///
    /// The caller's context stays free to submit documents through
    /// [`DocumentRelay::submit`] or to hand clones of
    /// [`DocumentRelay::sender`] to source adapters.
    pub fn serve<A: ArchiveApi>(archive: A) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::new(archive);
        let worker = tokio::spawn(dispatcher.run(rx));
        Self { tx, worker }
    }

    /// A cloneable producer handle for source adapters.
    pub fn sender(&self) -> DocumentSender {
        DocumentSender {
            tx: self.tx.clone(),
        }
    }

    /// Enqueue a document for dispatch. Never blocks.
    pub fn submit(&self, document: Document) -> RelayResult<()> {
        self.tx
            .send(RelayCommand::Document(document))
            .map_err(|_| RelayError::QueueClosed)
    }

    /// Enqueue the stop sentinel and wait for the loop to finish.
    ///
    /// Every document enqueued strictly before this call is dispatched
    /// exactly once before `join` returns. Documents racing the sentinel from
    /// other producers are not guaranteed to be processed; stop producing
    /// before joining.
    pub async fn join(self) -> RelayResult<()> {
        let _ = self.tx.send(RelayCommand::Shutdown);
        self.worker.await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ArchiveCall, RecordingArchive};

    fn run_documents() -> (RunStart, EventDescriptor, Event, RunStop) {
        let start = RunStart::new();
        let descriptor = EventDescriptor::new(&start.uid);
        let event = Event::new(&descriptor.uid);
        let stop = RunStop::new(&start.uid);
        (start, descriptor, event, stop)
    }

    #[tokio::test]
    async fn test_maps_follow_run_lifecycle() {
        let archive = RecordingArchive::new();
        let mut dispatcher = Dispatcher::new(archive.clone());
        let (start, descriptor, event, stop) = run_documents();

        dispatcher
            .send_document(&Document::RunStart(start))
            .await
            .expect("run_start dispatch");
        assert_eq!(dispatcher.open_runs(), 1);

        dispatcher
            .send_document(&Document::EventDescriptor(descriptor))
            .await
            .expect("descriptor dispatch");
        assert_eq!(dispatcher.open_descriptors(), 1);

        dispatcher
            .send_document(&Document::Event(event))
            .await
            .expect("event dispatch");

        dispatcher
            .send_document(&Document::RunStop(stop))
            .await
            .expect("run_stop dispatch");
        assert_eq!(dispatcher.open_runs(), 0);
        assert_eq!(dispatcher.open_descriptors(), 0);

        // One upload, four payload pushes into it.
        let calls = archive.calls();
        assert_eq!(archive.uploads_created(), 1);
        assert_eq!(
            calls
                .iter()
                .filter(|c| matches!(c, ArchiveCall::AddDictionary { .. }))
                .count(),
            4
        );
    }

    #[tokio::test]
    async fn test_event_for_unknown_descriptor_is_an_error() {
        let archive = RecordingArchive::new();
        let mut dispatcher = Dispatcher::new(archive.clone());

        let result = dispatcher
            .send_document(&Document::Event(Event::new("unknown")))
            .await;
        assert!(matches!(result, Err(RelayError::UnknownDescriptor(d)) if d == "unknown"));
        assert!(archive.calls().is_empty());
    }

    #[tokio::test]
    async fn test_descriptor_for_unknown_run_leaves_no_entry() {
        let archive = RecordingArchive::new();
        let mut dispatcher = Dispatcher::new(archive.clone());

        let result = dispatcher
            .send_document(&Document::EventDescriptor(EventDescriptor::new("ghost")))
            .await;
        assert!(matches!(result, Err(RelayError::UnknownRun(r)) if r == "ghost"));
        assert_eq!(dispatcher.open_descriptors(), 0);
        assert!(archive.calls().is_empty());
    }

    #[tokio::test]
    async fn test_run_stop_for_unknown_run_is_an_error() {
        let archive = RecordingArchive::new();
        let mut dispatcher = Dispatcher::new(archive.clone());

        let result = dispatcher
            .send_document(&Document::RunStop(RunStop::new("ghost")))
            .await;
        assert!(matches!(result, Err(RelayError::UnknownRun(r)) if r == "ghost"));
        assert!(archive.calls().is_empty());
    }

    #[tokio::test]
    async fn test_side_channel_kinds_are_rejected() {
        let archive = RecordingArchive::new();
        let mut dispatcher = Dispatcher::new(archive.clone());

        let result = dispatcher
            .send_document(&Document::Datum(serde_json::json!({"uid": "x"})))
            .await;
        assert!(matches!(
            result,
            Err(RelayError::UnsupportedDocument(DocumentKind::Datum))
        ));
        assert!(archive.calls().is_empty());
    }

    #[tokio::test]
    async fn test_create_upload_failure_leaves_no_run_entry() {
        let archive = RecordingArchive::new();
        archive.fail_next_create();
        let mut dispatcher = Dispatcher::new(archive.clone());

        let result = dispatcher
            .send_document(&Document::RunStart(RunStart::new()))
            .await;
        assert!(matches!(result, Err(RelayError::Api { .. })));
        assert_eq!(dispatcher.open_runs(), 0);
    }

    #[tokio::test]
    async fn test_push_failure_after_create_keeps_run_entry() {
        // No rollback of partial state: the upload exists remotely, so the
        // run stays routable even though its run_start payload never landed.
        let archive = RecordingArchive::new();
        archive.fail_next_dictionary();
        let mut dispatcher = Dispatcher::new(archive.clone());

        let start = RunStart::new();
        let result = dispatcher
            .send_document(&Document::RunStart(start.clone()))
            .await;
        assert!(matches!(result, Err(RelayError::Api { .. })));
        assert_eq!(dispatcher.open_runs(), 1);

        // A later document for the same run still resolves its upload.
        dispatcher
            .send_document(&Document::EventDescriptor(EventDescriptor::new(&start.uid)))
            .await
            .expect("descriptor dispatch after failed push");
    }

    #[tokio::test]
    async fn test_payload_names_carry_time_and_kind() {
        let archive = RecordingArchive::new();
        let mut dispatcher = Dispatcher::new(archive.clone());

        let mut start = RunStart::new();
        start.time = 1717171717.5;
        dispatcher
            .send_document(&Document::RunStart(start))
            .await
            .expect("run_start dispatch");

        let names: Vec<String> = archive
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                ArchiveCall::AddDictionary { name, .. } => Some(name),
                ArchiveCall::CreateUpload { .. } => None,
            })
            .collect();
        assert_eq!(names, vec!["1717171717.5_run_start".to_string()]);
    }
}
