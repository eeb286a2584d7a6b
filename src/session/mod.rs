pub mod command;
pub mod manager;

pub use command::{SessionCommand, SessionSnapshot};
pub use manager::{Session, SessionBuilder, SessionHandle};
