use std::time::Duration;

use serde::Serialize;

use crate::config::WorkflowSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AnalysisStage {
    VisualAnalysis,
    TextProcessing,
    Classification,
}

impl AnalysisStage {
    /// Every run walks the stages in exactly this order.
    pub const ALL: [AnalysisStage; 3] = [
        AnalysisStage::VisualAnalysis,
        AnalysisStage::TextProcessing,
        AnalysisStage::Classification,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStage::VisualAnalysis => "Visual Analysis",
            AnalysisStage::TextProcessing => "Text Processing",
            AnalysisStage::Classification => "Classification",
        }
    }

    pub fn index(&self) -> usize {
        match self {
            AnalysisStage::VisualAnalysis => 0,
            AnalysisStage::TextProcessing => 1,
            AnalysisStage::Classification => 2,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

impl std::fmt::Display for AnalysisStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Nominal duration of each stage, indexed like [`AnalysisStage::ALL`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagePlan {
    durations: [Duration; 3],
}

impl StagePlan {
    pub fn new(visual_analysis: Duration, text_processing: Duration, classification: Duration) -> Self {
        Self {
            durations: [visual_analysis, text_processing, classification],
        }
    }

    pub fn from_settings(settings: &WorkflowSettings) -> Self {
        Self::new(
            Duration::from_millis(settings.visual_analysis_ms),
            Duration::from_millis(settings.text_processing_ms),
            Duration::from_millis(settings.classification_ms),
        )
    }

    pub fn stage_count(&self) -> usize {
        self.durations.len()
    }

    pub fn duration(&self, index: usize) -> Option<Duration> {
        self.durations.get(index).copied()
    }

    pub fn is_last(&self, index: usize) -> bool {
        index + 1 == self.stage_count()
    }

    pub fn total(&self) -> Duration {
        self.durations.iter().sum()
    }

    pub fn stages(&self) -> impl Iterator<Item = (AnalysisStage, Duration)> + '_ {
        AnalysisStage::ALL.into_iter().zip(self.durations.iter().copied())
    }
}

impl Default for StagePlan {
    fn default() -> Self {
        Self::from_settings(&WorkflowSettings::default())
    }
}
