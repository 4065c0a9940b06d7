pub mod recovery_service;
pub mod watcher;

pub use recovery_service::{RecoveryReport, RecoveryService, SystemRecoveryService};
pub use watcher::{JobWatcher, WatchReport};
