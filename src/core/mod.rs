pub mod error;
pub mod types;

pub use error::{HistoryError, Result};
pub use types::{ANONYMOUS_ID, ANONYMOUS_NAME, Actor, Operation, Revision, RevisionInfo};
