use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::ScoringError;
use crate::workflow::preprocess::InputSummary;
use crate::workflow::stage::AnalysisStage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Label {
    Safe,
    Explicit,
}

impl Label {
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Safe => "Safe",
            Label::Explicit => "Explicit",
        }
    }
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-modality scores on a 0-100 scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SubScores {
    pub visual: f32,
    pub text: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationResult {
    pub subject_id: Uuid,
    pub label: Label,
    /// 0-100 when the scorer reports one.
    pub confidence: Option<f32>,
    pub sub_scores: Option<SubScores>,
    /// What the scorer was given, filled in by the engine.
    pub inputs: Option<InputSummary>,
    pub classified_at: DateTime<Utc>,
}

impl ClassificationResult {
    pub fn new(subject_id: Uuid, label: Label) -> Self {
        Self {
            subject_id,
            label,
            confidence: None,
            sub_scores: None,
            inputs: None,
            classified_at: Utc::now(),
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_sub_scores(mut self, visual: f32, text: f32) -> Self {
        self.sub_scores = Some(SubScores { visual, text });
        self
    }

    pub fn with_inputs(mut self, inputs: InputSummary) -> Self {
        self.inputs = Some(inputs);
        self
    }

    /// Rejects scores that are not finite or fall outside 0-100.
    pub fn validate(&self) -> Result<(), ScoringError> {
        check_score("confidence", self.confidence)?;
        if let Some(scores) = &self.sub_scores {
            check_score("visual score", Some(scores.visual))?;
            check_score("text score", Some(scores.text))?;
        }
        Ok(())
    }
}

fn check_score(what: &str, score: Option<f32>) -> Result<(), ScoringError> {
    match score {
        Some(value) if !value.is_finite() || !(0.0..=100.0).contains(&value) => Err(
            ScoringError::Malformed(format!("{} {} is outside 0-100", what, value)),
        ),
        _ => Ok(()),
    }
}

/// The single source of truth for an analysis run.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum WorkflowState {
    #[default]
    Idle,
    Running {
        stage: usize,
    },
    Completed(ClassificationResult),
    /// Preprocessing or the scoring collaborator failed.
    Failed {
        reason: String,
    },
}

impl WorkflowState {
    pub fn is_idle(&self) -> bool {
        matches!(self, WorkflowState::Idle)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, WorkflowState::Running { .. })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowState::Completed(_) | WorkflowState::Failed { .. })
    }

    pub fn stage_index(&self) -> Option<usize> {
        match self {
            WorkflowState::Running { stage } => Some(*stage),
            _ => None,
        }
    }

    pub fn current_stage(&self) -> Option<AnalysisStage> {
        self.stage_index().and_then(AnalysisStage::from_index)
    }

    pub fn result(&self) -> Option<&ClassificationResult> {
        match self {
            WorkflowState::Completed(result) => Some(result),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            WorkflowState::Idle => "idle",
            WorkflowState::Running { .. } => "running",
            WorkflowState::Completed(_) => "completed",
            WorkflowState::Failed { .. } => "failed",
        }
    }
}
