use serde::Serialize;

use crate::workflow::preprocess::InputSummary;
use crate::workflow::stage::AnalysisStage;
use crate::workflow::state::{Label, SubScores, WorkflowState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageView {
    pub stage: AnalysisStage,
    pub name: &'static str,
    pub reached: bool,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutcomeView {
    Verdict {
        label: Label,
        confidence: Option<f32>,
        sub_scores: Option<SubScores>,
        /// RFC 3339 timestamp of the verdict.
        classified_at: String,
        inputs: Option<InputSummary>,
    },
    Failure {
        reason: String,
    },
}

/// Everything a renderer needs, derived from a [`WorkflowState`] alone.
///
/// Nothing here is cached between states; call [`ViewState::derive`] again on
/// every change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewState {
    pub phase: Phase,
    /// Fraction of stages reached, 0.0 to 1.0.
    pub progress: f32,
    pub active_stage: Option<AnalysisStage>,
    pub stages: Vec<StageView>,
    pub outcome: Option<OutcomeView>,
}

impl ViewState {
    pub fn derive(state: &WorkflowState) -> Self {
        let total = AnalysisStage::ALL.len();
        let (phase, reached_through, progress) = match state {
            WorkflowState::Idle => (Phase::Idle, None, 0.0),
            WorkflowState::Running { stage } => (
                Phase::Running,
                Some(*stage),
                (*stage + 1).min(total) as f32 / total as f32,
            ),
            WorkflowState::Completed(_) => (Phase::Completed, Some(total), 1.0),
            WorkflowState::Failed { .. } => (Phase::Failed, Some(total), 1.0),
        };
        let active_stage = state.current_stage();

        let stages = AnalysisStage::ALL
            .iter()
            .map(|stage| StageView {
                stage: *stage,
                name: stage.as_str(),
                reached: reached_through
                    .map(|through| stage.index() <= through)
                    .unwrap_or(false),
                active: active_stage == Some(*stage),
            })
            .collect();

        let outcome = match state {
            WorkflowState::Completed(result) => Some(OutcomeView::Verdict {
                label: result.label,
                confidence: result.confidence,
                sub_scores: result.sub_scores,
                classified_at: result.classified_at.to_rfc3339(),
                inputs: result.inputs.clone(),
            }),
            WorkflowState::Failed { reason } => Some(OutcomeView::Failure {
                reason: reason.clone(),
            }),
            _ => None,
        };

        Self {
            phase,
            progress,
            active_stage,
            stages,
            outcome,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.phase, Phase::Completed | Phase::Failed)
    }

    pub fn reached(&self) -> Vec<bool> {
        self.stages.iter().map(|stage| stage.reached).collect()
    }
}
