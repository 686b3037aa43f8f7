pub mod backup;
pub mod log;
pub mod restore;
pub mod show;
pub mod verify;

pub use backup::{BackupArgs, backup_command};
pub use log::log_command;
pub use restore::{RestoreArgs, restore_command};
pub use show::show_command;
pub use verify::verify_command;
