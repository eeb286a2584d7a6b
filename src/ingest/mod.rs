pub mod controller;
pub mod file;
pub mod policy;

pub use controller::{IngestOutcome, IngestionController, Subject};
pub use file::{DropPayload, ImageFile};
pub use policy::{IngestPolicy, RejectReason};
