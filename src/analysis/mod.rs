//! Local change analysis.
//!
//! Raw notifications go through four stages before they can be submitted:
//!
//! ```text
//! RawEvent --ChangeBuilder--> candidates --correlate--> changes
//!          --squash_moves--> --final_sort--> --split_off_wip--> applicable
//! ```
//!
//! Building is asynchronous (checksums, existence checks, mirror lookups).
//! Everything after it is pure and runs on one cycle's batch at a time.

pub mod builder;
pub mod change;
pub mod checksum;
pub mod correlate;
pub mod error;
pub mod event;
pub mod order;
pub mod pending;
pub mod squash;

pub use builder::ChangeBuilder;
pub use change::{Deletion, LocalChange, Move, Put};
pub use checksum::{Checksummer, Sha256Checksummer};
pub use correlate::{Correlator, correlate};
pub use error::{AnalysisError, AnalysisResult};
pub use event::{RawEvent, RawEventKind, Stats};
pub use order::final_sort;
pub use pending::PendingChanges;
pub use squash::squash_moves;

/// Turn one cycle's candidates into the changes applicable now.
///
/// `pending` is drained into the correlation first and refilled with
/// whatever is still in progress afterwards. A failed cycle leaves it as it
/// was.
pub fn analyse(
    candidates: Vec<LocalChange>,
    pending: &mut PendingChanges,
) -> AnalysisResult<Vec<LocalChange>> {
    let carried = pending.take();
    let changes = match correlate(candidates, carried.clone()) {
        Ok(changes) => changes,
        Err(e) => {
            *pending = PendingChanges::from(carried);
            return Err(e);
        }
    };
    let changes = squash_moves(changes);
    let ordered = final_sort(changes);
    Ok(pending.split_off_wip(ordered))
}
