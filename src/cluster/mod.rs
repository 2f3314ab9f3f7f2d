//! Push-based distribution of the admin/client token table from the core
//! instance to its replicas.
//!
//! There is no consensus: the core applies a table locally, then posts it to
//! every replica and reports each outcome on its own. A replica that missed a
//! push catches up on the next one, since every push carries the full table.

mod sync;

pub use crate::config::ClusterMode;
pub use sync::{ClusterSync, PushOutcome, SyncError, TokenPush};
