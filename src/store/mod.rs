// ABOUTME: Durable stores for update operations and pre-update backups.
// ABOUTME: In-memory or JSON-file backed; locked writes let processes share a state dir.

mod backup;
mod error;
mod lock;
mod operation;
mod owner;
mod persist;

pub use backup::{BACKUPS_FILE, BackupStore, ImageBackup, NewBackup};
pub use error::StoreError;
pub use lock::{LOCK_WAIT, LockInfo};
pub use operation::{
    NewOperation, OPERATIONS_FILE, OperationPatch, OperationStore, Phase, Status,
    UpdateOperation, temp_name_for,
};
pub use owner::{Abandonment, OperationOwner};
