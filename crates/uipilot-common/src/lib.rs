#![deny(clippy::all)]

mod process;
mod sync;

pub use process::process_alive;
pub use sync::mutex_lock_or_recover;
pub use sync::poison_recovery_count;
pub use sync::rwlock_read_or_recover;
pub use sync::rwlock_write_or_recover;
