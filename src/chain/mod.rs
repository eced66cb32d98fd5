//! Option-chain snapshots and the strike filter that linearizes them.

mod extract;
mod snapshot;

pub use extract::{CaptureBatch, CaptureRecord, Extraction, OptionQuote, OptionSide, extract};
pub use snapshot::{Snapshot, SnapshotError, TIMESTAMP_FORMAT};
