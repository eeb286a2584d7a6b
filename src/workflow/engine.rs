use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{PreprocessError, ScoringError};
use crate::ingest::Subject;
use crate::workflow::preprocess::{
    preprocess_image, ExtractedText, ImageTensor, PreparedInput, TextExtractor,
};
use crate::workflow::scoring::Scorer;
use crate::workflow::stage::{AnalysisStage, StagePlan};
use crate::workflow::state::{ClassificationResult, WorkflowState};

pub type RunId = Uuid;

const EVENT_BUFFER_SIZE: usize = 8;

/// What a non-final stage produced while its timer ran.
#[derive(Debug)]
pub enum StageOutput {
    Image(Result<Arc<ImageTensor>, PreprocessError>),
    Text(Result<ExtractedText, PreprocessError>),
}

/// Sent by the pending timer task back to whoever drives the engine.
#[derive(Debug)]
pub enum EngineEvent {
    StageElapsed {
        run: RunId,
        stage: usize,
        output: StageOutput,
    },
    RunFinished {
        run: RunId,
        outcome: Result<ClassificationResult, ScoringError>,
    },
}

impl EngineEvent {
    pub fn run(&self) -> RunId {
        match self {
            EngineEvent::StageElapsed { run, .. } | EngineEvent::RunFinished { run, .. } => *run,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started { run: RunId },
    NoSubject,
    AlreadyActive,
}

/// Work carried out by the timer task of one stage.
enum StageWork {
    Visual(Subject),
    Text(Subject),
    Classify(PreparedInput),
}

/// The run in flight, what its stages have produced so far and its single
/// outstanding timer.
struct ActiveRun {
    id: RunId,
    subject: Subject,
    image: Option<Arc<ImageTensor>>,
    text: Option<ExtractedText>,
    timer: JoinHandle<()>,
}

impl ActiveRun {
    fn work_for(&self, stage: AnalysisStage) -> Option<StageWork> {
        match stage {
            AnalysisStage::VisualAnalysis => Some(StageWork::Visual(self.subject.clone())),
            AnalysisStage::TextProcessing => Some(StageWork::Text(self.subject.clone())),
            AnalysisStage::Classification => Some(StageWork::Classify(PreparedInput {
                subject: self.subject.clone(),
                image: Arc::clone(self.image.as_ref()?),
                text: self.text.clone()?,
            })),
        }
    }
}

/// Sequences the analysis stages of one run at a time.
///
/// The engine never advances on its own: each stage is backed by a spawned
/// timer task that does the stage's work, waits out the stage duration and
/// reports back through the channel returned by [`WorkflowEngine::new`]. The
/// owner feeds those events into [`WorkflowEngine::handle_event`]. Events
/// whose run id or stage does not match the current state are dropped.
pub struct WorkflowEngine {
    plan: StagePlan,
    scorer: Arc<dyn Scorer>,
    extractor: Arc<dyn TextExtractor>,
    classify_timeout: Duration,
    state: WorkflowState,
    active: Option<ActiveRun>,
    event_tx: mpsc::Sender<EngineEvent>,
}

impl WorkflowEngine {
    pub fn new(
        plan: StagePlan,
        scorer: Arc<dyn Scorer>,
        extractor: Arc<dyn TextExtractor>,
        classify_timeout: Duration,
    ) -> (Self, mpsc::Receiver<EngineEvent>) {
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER_SIZE);
        (
            Self {
                plan,
                scorer,
                extractor,
                classify_timeout,
                state: WorkflowState::Idle,
                active: None,
                event_tx,
            },
            event_rx,
        )
    }

    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    pub fn plan(&self) -> &StagePlan {
        &self.plan
    }

    pub fn active_run(&self) -> Option<RunId> {
        self.active.as_ref().map(|run| run.id)
    }

    /// Starts a run on `subject`. Does nothing without a subject or while a
    /// run is in progress or its outcome is still displayed.
    pub fn start(&mut self, subject: Option<&Subject>) -> StartOutcome {
        if !self.state.is_idle() {
            debug!("Ignoring start while {}", self.state.name());
            return StartOutcome::AlreadyActive;
        }
        let Some(subject) = subject else {
            debug!("Ignoring start without a subject");
            return StartOutcome::NoSubject;
        };

        let run = Uuid::new_v4();
        info!(
            "Starting run {} on '{}' using {} and {}",
            run,
            subject.name(),
            self.extractor.name(),
            self.scorer.name()
        );
        let timer = self.schedule(run, 0, StageWork::Visual(subject.clone()));
        self.active = Some(ActiveRun {
            id: run,
            subject: subject.clone(),
            image: None,
            text: None,
            timer,
        });
        self.state = WorkflowState::Running { stage: 0 };
        StartOutcome::Started { run }
    }

    /// Cancels any run in flight and discards any outcome. Returns whether the
    /// state changed.
    pub fn clear(&mut self) -> bool {
        if let Some(run) = self.active.take() {
            run.timer.abort();
            info!("Cancelled run {} during {}", run.id, self.state.name());
        }
        if self.state.is_idle() {
            return false;
        }
        self.state = WorkflowState::Idle;
        true
    }

    /// Applies a timer event. Returns whether the state changed.
    pub fn handle_event(&mut self, event: EngineEvent) -> bool {
        let Some(active) = self.active.as_mut() else {
            debug!("Dropping event for run {} with no run active", event.run());
            return false;
        };
        if active.id != event.run() {
            debug!("Dropping stale event for run {} (active {})", event.run(), active.id);
            return false;
        }
        let Some(current) = self.state.stage_index() else {
            debug!("Dropping event for run {} while {}", active.id, self.state.name());
            return false;
        };

        match event {
            EngineEvent::StageElapsed { run, stage, output } => {
                if stage != current || self.plan.is_last(stage) {
                    warn!("Run {} reported stage {} while at stage {}", run, stage, current);
                    return false;
                }
                let stored = match output {
                    StageOutput::Image(image) => image.map(|image| active.image = Some(image)),
                    StageOutput::Text(text) => text.map(|text| active.text = Some(text)),
                };
                if let Err(e) = stored {
                    self.fail(run, e.to_string());
                    return true;
                }

                let next = stage + 1;
                let Some(work) = AnalysisStage::from_index(next).and_then(|s| active.work_for(s))
                else {
                    self.fail(run, format!("stage {} has no input to work on", next));
                    return true;
                };
                let timer = self.schedule(run, next, work);
                if let Some(active) = self.active.as_mut() {
                    active.timer = timer;
                }
                self.state = WorkflowState::Running { stage: next };
                true
            }
            EngineEvent::RunFinished { run, outcome } => {
                if !self.plan.is_last(current) {
                    warn!("Run {} finished early at stage {}", run, current);
                    return false;
                }
                match outcome {
                    Ok(result) => {
                        info!("Run {} completed: {}", run, result.label);
                        self.active = None;
                        self.state = WorkflowState::Completed(result);
                    }
                    Err(e) => self.fail(run, e.to_string()),
                }
                true
            }
        }
    }

    fn fail(&mut self, run: RunId, reason: String) {
        warn!("Run {} failed: {}", run, reason);
        if let Some(active) = self.active.take() {
            active.timer.abort();
        }
        self.state = WorkflowState::Failed { reason };
    }

    /// Spawns the one timer for `stage`. The deadline is fixed here so a late
    /// first poll of the task does not stretch the stage. Stage work runs
    /// before the wait and counts against the duration.
    fn schedule(&self, run: RunId, stage: usize, work: StageWork) -> JoinHandle<()> {
        let duration = self.plan.duration(stage).unwrap_or_default();
        let deadline = Instant::now() + duration;
        let event_tx = self.event_tx.clone();
        debug!(
            "Run {} entering {} for {}ms",
            run,
            AnalysisStage::from_index(stage).map(|s| s.as_str()).unwrap_or("?"),
            duration.as_millis()
        );

        match work {
            StageWork::Visual(subject) => tokio::spawn(async move {
                let data = Arc::clone(subject.data());
                let decode = tokio::task::spawn_blocking(move || preprocess_image(&data));
                let image = match decode.await {
                    Ok(result) => result.map(Arc::new),
                    Err(e) => Err(PreprocessError::Decode(e.to_string())),
                };
                sleep_until(deadline).await;
                let output = StageOutput::Image(image);
                let _ = event_tx.send(EngineEvent::StageElapsed { run, stage, output }).await;
            }),
            StageWork::Text(subject) => {
                let extractor = Arc::clone(&self.extractor);
                let extract_timeout = self.classify_timeout;
                tokio::spawn(async move {
                    let text = match timeout(extract_timeout, extractor.extract(&subject)).await {
                        Ok(segments) => segments.map(|s| ExtractedText::from_segments(&s)),
                        Err(_) => Err(PreprocessError::Extract(format!(
                            "no answer within {:?}",
                            extract_timeout
                        ))),
                    };
                    sleep_until(deadline).await;
                    let output = StageOutput::Text(text);
                    let _ = event_tx.send(EngineEvent::StageElapsed { run, stage, output }).await;
                })
            }
            StageWork::Classify(input) => {
                let scorer = Arc::clone(&self.scorer);
                let classify_timeout = self.classify_timeout;
                tokio::spawn(async move {
                    sleep_until(deadline).await;
                    let outcome = match timeout(classify_timeout, scorer.classify(&input)).await {
                        Ok(Ok(result)) => result
                            .validate()
                            .map(|_| result.with_inputs(input.summary())),
                        Ok(Err(e)) => Err(e),
                        Err(_) => Err(ScoringError::Timeout(classify_timeout)),
                    };
                    let _ = event_tx.send(EngineEvent::RunFinished { run, outcome }).await;
                })
            }
        }
    }
}

impl Drop for WorkflowEngine {
    fn drop(&mut self) {
        if let Some(run) = self.active.take() {
            run.timer.abort();
        }
    }
}
