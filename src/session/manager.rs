use std::ops::ControlFlow;
use std::sync::Arc;

use tokio::{
    sync::{broadcast, mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, info, instrument};

use crate::config::Settings;
use crate::error::AppError;
use crate::ingest::{DropPayload, ImageFile, IngestOutcome, IngestPolicy, IngestionController};
use crate::session::command::{SessionCommand, SessionSnapshot};
use crate::workflow::{
    EngineEvent, NoTextExtractor, Scorer, StagePlan, StartOutcome, StubScorer, TextExtractor,
    WorkflowEngine,
};

const COMMAND_BUFFER_SIZE: usize = 100;
const UPDATE_BUFFER_SIZE: usize = 64;

/// Cloneable command surface of a running session.
#[derive(Clone)]
pub struct SessionHandle {
    command_tx: mpsc::Sender<SessionCommand>,
    update_tx: broadcast::Sender<SessionSnapshot>,
}

impl SessionHandle {
    pub async fn select_file(&self, file: ImageFile) -> Result<IngestOutcome, AppError> {
        self.request(|responder| SessionCommand::SelectFile { file, responder })
            .await
    }

    pub async fn drop_files(&self, payload: DropPayload) -> Result<IngestOutcome, AppError> {
        self.request(|responder| SessionCommand::DropFiles { payload, responder })
            .await
    }

    pub async fn drag_enter(&self) -> Result<(), AppError> {
        self.send(SessionCommand::DragEnter).await
    }

    pub async fn drag_leave(&self) -> Result<(), AppError> {
        self.send(SessionCommand::DragLeave).await
    }

    pub async fn start_classification(&self) -> Result<StartOutcome, AppError> {
        self.request(|responder| SessionCommand::StartClassification { responder })
            .await
    }

    pub async fn clear(&self) -> Result<(), AppError> {
        self.request(|responder| SessionCommand::Clear { responder })
            .await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, AppError> {
        self.request(|responder| SessionCommand::Snapshot { responder })
            .await
    }

    pub async fn shutdown(&self) -> Result<(), AppError> {
        self.send(SessionCommand::Shutdown).await
    }

    /// Receives a snapshot after every state change.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionSnapshot> {
        self.update_tx.subscribe()
    }

    async fn send(&self, command: SessionCommand) -> Result<(), AppError> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| AppError::SessionClosed)
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Result<T, AppError> {
        let (responder, response_rx) = oneshot::channel();
        self.send(command(responder)).await?;
        response_rx.await.map_err(|_| AppError::SessionClosed)
    }
}

/// Owns the ingestion controller and the workflow engine. Only the session
/// task touches it, so commands and timer events never interleave.
struct SessionSupervisor {
    ingestion: IngestionController,
    engine: WorkflowEngine,
    update_tx: broadcast::Sender<SessionSnapshot>,
}

impl SessionSupervisor {
    async fn run(
        mut self,
        mut command_rx: mpsc::Receiver<SessionCommand>,
        mut event_rx: mpsc::Receiver<EngineEvent>,
    ) {
        loop {
            tokio::select! {
                biased;
                command = command_rx.recv() => {
                    let Some(command) = command else {
                        info!("All session handles dropped");
                        break;
                    };
                    if self.handle_command(command).is_break() {
                        break;
                    }
                }
                Some(event) = event_rx.recv() => {
                    if self.engine.handle_event(event) {
                        self.publish();
                    }
                }
            }
        }
        self.engine.clear();
    }

    #[instrument(skip_all, fields(command = command.name()))]
    fn handle_command(&mut self, command: SessionCommand) -> ControlFlow<()> {
        debug!("Handling command");
        let changed = match command {
            SessionCommand::SelectFile { file, responder } => {
                let outcome = self.ingestion.select_file(file);
                let changed = outcome.is_accepted();
                let _ = responder.send(outcome);
                changed
            }
            SessionCommand::DropFiles { payload, responder } => {
                let was_drag_over = self.ingestion.is_drag_over();
                let outcome = self.ingestion.drop_files(payload);
                let changed = outcome.is_accepted() || was_drag_over;
                let _ = responder.send(outcome);
                changed
            }
            SessionCommand::DragEnter => {
                let changed = !self.ingestion.is_drag_over();
                self.ingestion.drag_enter();
                changed
            }
            SessionCommand::DragLeave => {
                let changed = self.ingestion.is_drag_over();
                self.ingestion.drag_leave();
                changed
            }
            SessionCommand::StartClassification { responder } => {
                let outcome = self.engine.start(self.ingestion.subject());
                let _ = responder.send(outcome);
                matches!(outcome, StartOutcome::Started { .. })
            }
            SessionCommand::Clear { responder } => {
                let engine_changed = self.engine.clear();
                let subject_changed = self.ingestion.clear();
                let _ = responder.send(());
                engine_changed || subject_changed
            }
            SessionCommand::Snapshot { responder } => {
                let _ = responder.send(self.snapshot());
                false
            }
            SessionCommand::Shutdown => {
                info!("Session shutting down");
                return ControlFlow::Break(());
            }
        };
        if changed {
            self.publish();
        }
        ControlFlow::Continue(())
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            workflow: self.engine.state().clone(),
            subject: self.ingestion.subject().cloned(),
            input_generation: self.ingestion.generation(),
            drag_over: self.ingestion.is_drag_over(),
        }
    }

    fn publish(&self) {
        // No subscribers is fine; the renderer may not be attached yet.
        let _ = self.update_tx.send(self.snapshot());
    }
}

/// The spawned session task.
pub struct Session {
    task: JoinHandle<()>,
}

impl Session {
    /// Waits for the session to finish after [`SessionHandle::shutdown`] or
    /// once every handle is dropped.
    pub async fn join(mut self) -> Result<(), AppError> {
        (&mut self.task)
            .await
            .map_err(|e| AppError::SessionTask(e.to_string()))
    }

    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}

pub struct SessionBuilder {
    settings: Settings,
    scorer: Option<Arc<dyn Scorer>>,
    extractor: Option<Arc<dyn TextExtractor>>,
}

impl SessionBuilder {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            scorer: None,
            extractor: None,
        }
    }

    // Replaces the stub scorer, e.g. with a real model client.
    pub fn scorer(mut self, scorer: Arc<dyn Scorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    // Plugs in OCR. Without one the Text Processing stage reads no text.
    pub fn text_extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn spawn(self) -> (Session, SessionHandle) {
        let workflow = &self.settings.workflow;
        let scorer: Arc<dyn Scorer> = match self.scorer {
            Some(scorer) => scorer,
            None => Arc::new(StubScorer::from_settings(workflow)),
        };
        let extractor: Arc<dyn TextExtractor> = match self.extractor {
            Some(extractor) => extractor,
            None => Arc::new(NoTextExtractor),
        };
        let (engine, event_rx) = WorkflowEngine::new(
            StagePlan::from_settings(workflow),
            scorer,
            extractor,
            workflow.classify_timeout(),
        );
        let ingestion = IngestionController::new(IngestPolicy::from_settings(&self.settings.ingest));

        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER_SIZE);
        let (update_tx, _) = broadcast::channel(UPDATE_BUFFER_SIZE);
        let supervisor = SessionSupervisor {
            ingestion,
            engine,
            update_tx: update_tx.clone(),
        };
        let task = tokio::spawn(supervisor.run(command_rx, event_rx));

        (
            Session { task },
            SessionHandle {
                command_tx,
                update_tx,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::sleep;

    use super::*;
    use crate::view::{OutcomeView, Phase, ViewState};
    use crate::workflow::preprocess::solid_png;
    use crate::workflow::{PreparedInput, WorkflowState};

    fn png(name: &str) -> ImageFile {
        ImageFile::new(name, "image/png", solid_png(16, 16, [90, 160, 220]))
    }

    fn spawn() -> (Session, SessionHandle) {
        let mut settings = Settings::default();
        settings.workflow.seed = Some(11);
        SessionBuilder::new(settings).spawn()
    }

    #[tokio::test(start_paused = true)]
    async fn scenario_a_run_completes_with_a_label() {
        let (_session, handle) = spawn();
        assert!(handle.select_file(png("meme.png")).await.unwrap().is_accepted());
        assert!(matches!(
            handle.start_classification().await.unwrap(),
            StartOutcome::Started { .. }
        ));

        sleep(Duration::from_millis(4600)).await;
        let snapshot = handle.snapshot().await.unwrap();
        let result = snapshot.workflow.result().expect("run completed");
        assert!(!result.label.as_str().is_empty());
        assert_eq!(Some(result.subject_id), snapshot.subject.map(|s| s.id()));
    }

    #[tokio::test(start_paused = true)]
    async fn scenario_b_clear_mid_stage_resets_everything() {
        let (_session, handle) = spawn();
        handle.select_file(png("meme.png")).await.unwrap();
        handle.start_classification().await.unwrap();

        sleep(Duration::from_millis(800)).await;
        assert_eq!(
            handle.snapshot().await.unwrap().workflow,
            WorkflowState::Running { stage: 0 }
        );
        handle.clear().await.unwrap();

        let snapshot = handle.snapshot().await.unwrap();
        assert!(snapshot.workflow.is_idle());
        assert!(snapshot.subject.is_none());
        assert!(snapshot.workflow.result().is_none());

        // No ghost advancement once the cancelled timers would have fired.
        sleep(Duration::from_secs(10)).await;
        assert!(handle.snapshot().await.unwrap().workflow.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn scenario_c_start_without_subject_stays_idle() {
        let (_session, handle) = spawn();
        assert_eq!(
            handle.start_classification().await.unwrap(),
            StartOutcome::NoSubject
        );
        sleep(Duration::from_secs(10)).await;
        assert!(handle.snapshot().await.unwrap().workflow.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn scenario_d_dropping_a_non_image_keeps_the_subject() {
        let (_session, handle) = spawn();
        let pdf = ImageFile::new("doc.pdf", "application/pdf", vec![1u8]);

        let outcome = handle.drop_files(DropPayload::single(pdf.clone())).await.unwrap();
        assert!(!outcome.is_accepted());
        assert!(handle.snapshot().await.unwrap().subject.is_none());

        handle.select_file(png("keep.png")).await.unwrap();
        handle.drop_files(DropPayload::single(pdf)).await.unwrap();
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.subject.map(|s| s.name().to_string()), Some("keep.png".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn clear_after_completion_discards_the_result() {
        let (_session, handle) = spawn();
        handle.select_file(png("meme.png")).await.unwrap();
        handle.start_classification().await.unwrap();
        sleep(Duration::from_secs(5)).await;
        assert!(handle.snapshot().await.unwrap().workflow.result().is_some());

        handle.clear().await.unwrap();
        let snapshot = handle.snapshot().await.unwrap();
        assert!(snapshot.workflow.result().is_none());
        assert!(snapshot.workflow.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn clearing_twice_is_the_same_as_clearing_once() {
        let (_session, handle) = spawn();
        handle.select_file(png("meme.png")).await.unwrap();
        handle.clear().await.unwrap();
        let once = handle.snapshot().await.unwrap();
        handle.clear().await.unwrap();
        let twice = handle.snapshot().await.unwrap();
        assert_eq!(once.workflow, twice.workflow);
        assert_eq!(once.input_generation, twice.input_generation);
        assert!(twice.subject.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn updates_walk_every_stage_in_order() {
        let (_session, handle) = spawn();
        let mut updates = handle.subscribe();
        handle.select_file(png("meme.png")).await.unwrap();
        handle.start_classification().await.unwrap();

        let mut seen = Vec::new();
        loop {
            let snapshot = updates.recv().await.expect("session alive");
            let done = snapshot.workflow.is_terminal();
            seen.push(snapshot.workflow);
            if done {
                break;
            }
        }
        let stages: Vec<usize> = seen.iter().filter_map(WorkflowState::stage_index).collect();
        assert_eq!(stages, vec![0, 1, 2]);
        assert!(matches!(seen.last(), Some(WorkflowState::Completed(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn drag_hints_do_not_touch_the_subject() {
        let (_session, handle) = spawn();
        handle.drag_enter().await.unwrap();
        let snapshot = handle.snapshot().await.unwrap();
        assert!(snapshot.drag_over);
        assert!(snapshot.subject.is_none());

        handle.drop_files(DropPayload::single(png("dropped.png"))).await.unwrap();
        let snapshot = handle.snapshot().await.unwrap();
        assert!(!snapshot.drag_over);
        assert_eq!(snapshot.input_generation, 1);

        handle.drag_enter().await.unwrap();
        handle.drag_leave().await.unwrap();
        assert!(!handle.snapshot().await.unwrap().drag_over);
    }

    #[tokio::test(start_paused = true)]
    async fn replacing_the_subject_mid_run_keeps_the_run_going() {
        let (_session, handle) = spawn();
        handle.select_file(png("first.png")).await.unwrap();
        handle.start_classification().await.unwrap();
        let first = handle.snapshot().await.unwrap().subject.map(|s| s.id());

        sleep(Duration::from_millis(2500)).await;
        handle.select_file(png("second.png")).await.unwrap();
        sleep(Duration::from_secs(3)).await;

        let snapshot = handle.snapshot().await.unwrap();
        let result = snapshot.workflow.result().expect("run completed");
        assert_eq!(Some(result.subject_id), first);
        assert_ne!(snapshot.subject.map(|s| s.id()), first);
    }

    struct UnavailableScorer;

    #[async_trait::async_trait]
    impl Scorer for UnavailableScorer {
        fn name(&self) -> &'static str {
            "UnavailableScorer"
        }

        async fn classify(
            &self,
            _input: &PreparedInput,
        ) -> Result<crate::workflow::ClassificationResult, crate::error::ScoringError> {
            Err(crate::error::ScoringError::Backend("offline".to_string()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn custom_scorer_failures_surface_as_failed() {
        let (_session, handle) = SessionBuilder::new(Settings::default())
            .scorer(Arc::new(UnavailableScorer))
            .spawn();
        handle.select_file(png("meme.png")).await.unwrap();
        handle.start_classification().await.unwrap();
        sleep(Duration::from_secs(5)).await;

        let snapshot = handle.snapshot().await.unwrap();
        assert!(matches!(snapshot.workflow, WorkflowState::Failed { .. }));
        let view = ViewState::derive(&snapshot.workflow);
        assert_eq!(view.phase, Phase::Failed);

        handle.clear().await.unwrap();
        assert!(handle.snapshot().await.unwrap().workflow.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn corrupt_images_fail_in_visual_analysis() {
        let (_session, handle) = spawn();
        let corrupt = ImageFile::new("broken.png", "image/png", vec![0x89u8, b'P', b'N', b'G']);
        assert!(handle.select_file(corrupt).await.unwrap().is_accepted());
        handle.start_classification().await.unwrap();
        sleep(Duration::from_millis(2100)).await;

        let view = ViewState::derive(&handle.snapshot().await.unwrap().workflow);
        assert_eq!(view.phase, Phase::Failed);
        assert!(matches!(
            view.outcome,
            Some(OutcomeView::Failure { reason }) if reason.starts_with("Could not decode image")
        ));
    }

    struct FixedCaption;

    #[async_trait::async_trait]
    impl TextExtractor for FixedCaption {
        fn name(&self) -> &'static str {
            "FixedCaption"
        }

        async fn extract(
            &self,
            _subject: &crate::ingest::Subject,
        ) -> Result<Vec<String>, crate::error::PreprocessError> {
            Ok(vec!["When U see it!!! 😳".to_string()])
        }
    }

    #[tokio::test(start_paused = true)]
    async fn verdict_reports_what_the_scorer_was_given() {
        let (_session, handle) = SessionBuilder::new(Settings::default())
            .text_extractor(Arc::new(FixedCaption))
            .spawn();
        handle.select_file(png("meme.png")).await.unwrap();
        handle.start_classification().await.unwrap();
        sleep(Duration::from_secs(5)).await;

        let view = ViewState::derive(&handle.snapshot().await.unwrap().workflow);
        let json = serde_json::to_value(&view).expect("serialize");
        assert_eq!(json["outcome"]["kind"], "verdict");
        assert_eq!(json["outcome"]["inputs"]["text"], "When U see it!!! 😳");
        assert_eq!(json["outcome"]["inputs"]["preprocessed_text"], "when  see it");
        assert_eq!(
            json["outcome"]["inputs"]["image_tensor_shape"],
            serde_json::json!([1, 3, 224, 224])
        );
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_mid_run_stops_the_session() {
        let (session, handle) = spawn();
        handle.select_file(png("meme.png")).await.unwrap();
        handle.start_classification().await.unwrap();
        sleep(Duration::from_millis(300)).await;

        handle.shutdown().await.unwrap();
        session.join().await.unwrap();
        assert!(matches!(handle.start_classification().await, Err(AppError::SessionClosed)));
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_every_handle_ends_the_session() {
        let (session, handle) = spawn();
        let second = handle.clone();
        drop(handle);
        second.drag_enter().await.unwrap();
        drop(second);
        session.join().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn handle_reports_a_closed_session() {
        let (session, handle) = spawn();
        handle.shutdown().await.unwrap();
        session.join().await.unwrap();
        assert!(matches!(handle.snapshot().await, Err(AppError::SessionClosed)));
    }
}
