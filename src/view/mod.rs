pub mod binder;

pub use binder::{OutcomeView, Phase, StageView, ViewState};
