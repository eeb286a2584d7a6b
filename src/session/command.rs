use tokio::sync::oneshot;

use crate::ingest::{DropPayload, ImageFile, IngestOutcome, Subject};
use crate::workflow::{StartOutcome, WorkflowState};

/// UI-originated commands, serialized through the session task.
pub enum SessionCommand {
    SelectFile {
        file: ImageFile,
        responder: oneshot::Sender<IngestOutcome>,
    },
    DropFiles {
        payload: DropPayload,
        responder: oneshot::Sender<IngestOutcome>,
    },
    DragEnter,
    DragLeave,
    StartClassification {
        responder: oneshot::Sender<StartOutcome>,
    },
    Clear {
        responder: oneshot::Sender<()>,
    },
    Snapshot {
        responder: oneshot::Sender<SessionSnapshot>,
    },
    Shutdown,
}

impl SessionCommand {
    pub fn name(&self) -> &'static str {
        match self {
            SessionCommand::SelectFile { .. } => "select_file",
            SessionCommand::DropFiles { .. } => "drop_files",
            SessionCommand::DragEnter => "drag_enter",
            SessionCommand::DragLeave => "drag_leave",
            SessionCommand::StartClassification { .. } => "start_classification",
            SessionCommand::Clear { .. } => "clear",
            SessionCommand::Snapshot { .. } => "snapshot",
            SessionCommand::Shutdown => "shutdown",
        }
    }
}

/// What the rendering side sees after every change.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub workflow: WorkflowState,
    pub subject: Option<Subject>,
    pub input_generation: u64,
    pub drag_over: bool,
}
