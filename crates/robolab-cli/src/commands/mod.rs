pub mod common;
pub mod files;
pub mod lock;
pub mod status;
pub mod sync;
pub mod watch;
