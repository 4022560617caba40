pub mod file;
pub mod files;

pub use file::{Config, FileIoWithBackup};
