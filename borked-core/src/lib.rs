pub mod model;
pub mod snapshot;
pub mod source;

pub use model::*;
pub use snapshot::{
    decode_failed_numbers, encode_failed_numbers, should_snapshot, snapshot_trigger,
    SnapshotCandidate, SnapshotTrigger, SNAPSHOT_MAX_AGE_HOURS,
};
pub use source::*;
