use std::sync::Mutex;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::config::WorkflowSettings;
use crate::error::ScoringError;
use crate::workflow::preprocess::PreparedInput;
use crate::workflow::state::{ClassificationResult, Label};

/// Produces the verdict once the last stage has elapsed.
///
/// The engine only ever holds an `Arc<dyn Scorer>`, so a real vision/text
/// model can replace [`StubScorer`] without touching the state machine. It is
/// handed the normalized image tensor and text produced by the earlier stages.
/// A call may be cancelled at any await point when the run is cleared.
#[async_trait]
pub trait Scorer: Send + Sync {
    fn name(&self) -> &'static str;

    async fn classify(&self, input: &PreparedInput) -> Result<ClassificationResult, ScoringError>;
}

/// Placeholder scorer: random label, confidence and sub-scores. Ignores the
/// prepared tensor and text.
pub struct StubScorer {
    rng: Mutex<StdRng>,
    explicit_rate: f64,
}

impl StubScorer {
    pub fn new(explicit_rate: f64) -> Self {
        Self {
            rng: Mutex::new(StdRng::from_os_rng()),
            explicit_rate: sanitize_rate(explicit_rate),
        }
    }

    pub fn seeded(explicit_rate: f64, seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            explicit_rate: sanitize_rate(explicit_rate),
        }
    }

    pub fn from_settings(settings: &WorkflowSettings) -> Self {
        match settings.seed {
            Some(seed) => Self::seeded(settings.explicit_rate, seed),
            None => Self::new(settings.explicit_rate),
        }
    }
}

fn sanitize_rate(rate: f64) -> f64 {
    if rate.is_finite() {
        rate.clamp(0.0, 1.0)
    } else {
        0.5
    }
}

#[async_trait]
impl Scorer for StubScorer {
    fn name(&self) -> &'static str {
        "StubScorer"
    }

    async fn classify(&self, input: &PreparedInput) -> Result<ClassificationResult, ScoringError> {
        let mut rng = self
            .rng
            .lock()
            .map_err(|e| ScoringError::Backend(e.to_string()))?;

        let explicit = rng.random_bool(self.explicit_rate);
        let (label, visual, text): (Label, f32, f32) = if explicit {
            (
                Label::Explicit,
                rng.random_range(50.0..=100.0),
                rng.random_range(30.0..=100.0),
            )
        } else {
            (
                Label::Safe,
                rng.random_range(0.0..50.0),
                rng.random_range(0.0..70.0),
            )
        };
        let confidence: f32 = rng.random_range(60.0..=99.0);
        drop(rng);

        debug!(
            "Stub verdict for '{}': {} ({:.1}%)",
            input.subject.name(),
            label,
            confidence
        );
        Ok(ClassificationResult::new(input.subject.id(), label)
            .with_confidence(confidence)
            .with_sub_scores(visual, text))
    }
}
