use std::sync::Arc;

use image::ImageFormat;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ingest::file::{DropPayload, ImageFile};
use crate::ingest::policy::{IngestPolicy, RejectReason};

/// The image currently selected for analysis. Cloning shares the byte buffer.
#[derive(Debug, Clone)]
pub struct Subject {
    id: Uuid,
    name: String,
    mime: String,
    format: Option<ImageFormat>,
    data: Arc<[u8]>,
}

impl Subject {
    fn from_file(file: ImageFile) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: file.name().to_string(),
            mime: file.mime().to_string(),
            format: ImageFormat::from_mime_type(file.mime()),
            data: Arc::clone(file.data()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mime(&self) -> &str {
        &self.mime
    }

    pub fn format(&self) -> Option<ImageFormat> {
        self.format
    }

    pub fn data(&self) -> &Arc<[u8]> {
        &self.data
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Accepted { generation: u64 },
    Ignored(RejectReason),
}

impl IngestOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, IngestOutcome::Accepted { .. })
    }
}

/// Owns the current [`Subject`], the input generation token and the drag hint.
#[derive(Debug, Default)]
pub struct IngestionController {
    policy: IngestPolicy,
    subject: Option<Subject>,
    generation: u64,
    drag_over: bool,
}

impl IngestionController {
    pub fn new(policy: IngestPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    pub fn select_file(&mut self, file: ImageFile) -> IngestOutcome {
        self.accept(file, "picker")
    }

    pub fn drop_files(&mut self, payload: DropPayload) -> IngestOutcome {
        self.drag_over = false;
        let extra = payload.len().saturating_sub(1);
        if extra > 0 {
            debug!("Ignoring {} extra dropped file(s)", extra);
        }
        match payload.into_first() {
            Some(file) => self.accept(file, "drop"),
            None => {
                warn!("Ignoring drop: {}", RejectReason::EmptyPayload);
                IngestOutcome::Ignored(RejectReason::EmptyPayload)
            }
        }
    }

    pub fn drag_enter(&mut self) {
        self.drag_over = true;
    }

    pub fn drag_leave(&mut self) {
        self.drag_over = false;
    }

    /// Drops the subject and resets the input. Returns `false` when there was
    /// nothing to clear, in which case the generation is left alone.
    pub fn clear(&mut self) -> bool {
        match self.subject.take() {
            Some(subject) => {
                self.generation += 1;
                info!("Cleared subject '{}' (generation {})", subject.name, self.generation);
                true
            }
            None => false,
        }
    }

    pub fn subject(&self) -> Option<&Subject> {
        self.subject.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_drag_over(&self) -> bool {
        self.drag_over
    }

    fn accept(&mut self, file: ImageFile, source: &'static str) -> IngestOutcome {
        if let Err(reason) = self.policy.validate(&file) {
            warn!("Ignoring {} of '{}': {}", source, file.name(), reason);
            return IngestOutcome::Ignored(reason);
        }

        let subject = Subject::from_file(file);
        if let Some(previous) = &self.subject {
            debug!("Replacing subject '{}'", previous.name);
        }
        self.generation += 1;
        info!(
            "Selected '{}' ({}, {} bytes) via {}, generation {}",
            subject.name,
            subject.mime,
            subject.data.len(),
            source,
            self.generation
        );
        self.subject = Some(subject);
        IngestOutcome::Accepted {
            generation: self.generation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png(name: &str) -> ImageFile {
        ImageFile::new(name, "image/png", vec![0x89u8, b'P', b'N', b'G'])
    }

    fn text(name: &str) -> ImageFile {
        ImageFile::new(name, "text/plain", b"not an image".to_vec())
    }

    #[test]
    fn selecting_an_image_publishes_it_and_bumps_generation() {
        let mut controller = IngestionController::default();
        let outcome = controller.select_file(png("a.png"));
        assert_eq!(outcome, IngestOutcome::Accepted { generation: 1 });
        let subject = controller.subject().expect("subject set");
        assert_eq!(subject.name(), "a.png");
        assert_eq!(subject.format(), Some(ImageFormat::Png));
        assert_eq!(subject.data().len(), 4);
    }

    #[test]
    fn a_new_selection_replaces_the_previous_subject() {
        let mut controller = IngestionController::default();
        controller.select_file(png("a.png"));
        let first = controller.subject().map(Subject::id);
        controller.select_file(png("a.png"));
        assert_ne!(controller.subject().map(Subject::id), first);
        assert_eq!(controller.generation(), 2);
    }

    #[test]
    fn non_image_selection_is_ignored() {
        let mut controller = IngestionController::default();
        let outcome = controller.select_file(text("notes.txt"));
        assert!(!outcome.is_accepted());
        assert!(controller.subject().is_none());
        assert_eq!(controller.generation(), 0);
    }

    #[test]
    fn dropping_a_non_image_keeps_the_prior_subject() {
        let mut controller = IngestionController::default();
        controller.select_file(png("keep.png"));
        let kept = controller.subject().map(Subject::id);

        let outcome = controller.drop_files(DropPayload::single(text("notes.txt")));
        assert_eq!(
            outcome,
            IngestOutcome::Ignored(RejectReason::NotImage {
                mime: "text/plain".to_string()
            })
        );
        assert_eq!(controller.subject().map(Subject::id), kept);
        assert_eq!(controller.generation(), 1);
    }

    #[test]
    fn drop_uses_only_the_first_file() {
        let mut controller = IngestionController::default();
        controller.drop_files(DropPayload::new(vec![png("first.png"), png("second.png")]));
        assert_eq!(controller.subject().map(Subject::name), Some("first.png"));

        // A non-image first file wins over an image second file.
        let outcome = controller.drop_files(DropPayload::new(vec![text("a.txt"), png("b.png")]));
        assert!(!outcome.is_accepted());
        assert_eq!(controller.subject().map(Subject::name), Some("first.png"));
    }

    #[test]
    fn empty_drop_is_ignored() {
        let mut controller = IngestionController::default();
        let outcome = controller.drop_files(DropPayload::default());
        assert_eq!(outcome, IngestOutcome::Ignored(RejectReason::EmptyPayload));
    }

    #[test]
    fn drag_flags_toggle_and_drop_resets_them() {
        let mut controller = IngestionController::default();
        controller.drag_enter();
        controller.drag_enter();
        assert!(controller.is_drag_over());
        controller.drag_leave();
        controller.drag_leave();
        assert!(!controller.is_drag_over());

        controller.drag_enter();
        controller.drop_files(DropPayload::single(text("a.txt")));
        assert!(!controller.is_drag_over());
        assert!(controller.subject().is_none());
    }

    #[test]
    fn clear_drops_the_subject_and_is_idempotent() {
        let mut controller = IngestionController::default();
        controller.select_file(png("a.png"));
        assert!(controller.clear());
        assert!(controller.subject().is_none());
        assert_eq!(controller.generation(), 2);

        assert!(!controller.clear());
        assert_eq!(controller.generation(), 2);
    }

    #[test]
    fn strict_policy_is_applied_to_drops() {
        let mut controller = IngestionController::new(IngestPolicy::Strict {
            allowed_extensions: vec!["png".to_string()],
        });
        let outcome = controller.drop_files(DropPayload::single(ImageFile::new(
            "anim.gif",
            "image/gif",
            vec![1u8],
        )));
        assert!(matches!(
            outcome,
            IngestOutcome::Ignored(RejectReason::ExtensionNotAllowed { .. })
        ));
        assert!(controller.drop_files(DropPayload::single(png("ok.png"))).is_accepted());
    }
}
