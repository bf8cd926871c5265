pub mod identifier;
pub mod layout;
pub mod locks;
pub mod store;

pub use identifier::{ID_FORMAT, RevisionId, RevisionIdentifier};
pub use layout::{HISTORY_FILE, JOBS_DIR, SNAPSHOT_FILE, decode_entity_name, encode_entity_name};
pub use locks::EntityLocks;
pub use store::{RevisionIter, RevisionListing, RevisionStore, SweepReport};
