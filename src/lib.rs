pub mod config;
pub mod error;
pub mod ingest;
pub mod session;
pub mod view;
pub mod workflow;

pub use config::Settings;
pub use error::{AppError, PreprocessError, ScoringError};

pub use ingest::{DropPayload, ImageFile, IngestOutcome, Subject};
pub use session::{Session, SessionBuilder, SessionHandle, SessionSnapshot};
pub use view::ViewState;
pub use workflow::{PreparedInput, Scorer, StartOutcome, TextExtractor, WorkflowState};
