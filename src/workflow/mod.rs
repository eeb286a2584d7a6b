pub mod engine;
pub mod preprocess;
pub mod scoring;
pub mod stage;
pub mod state;

pub use engine::{EngineEvent, RunId, StageOutput, StartOutcome, WorkflowEngine};
pub use preprocess::{
    preprocess_image, preprocess_text, ExtractedText, ImageTensor, InputSummary, NoTextExtractor,
    PreparedInput, TextExtractor,
};
pub use scoring::{Scorer, StubScorer};
pub use stage::{AnalysisStage, StagePlan};
pub use state::{ClassificationResult, Label, SubScores, WorkflowState};
