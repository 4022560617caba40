pub mod comm;
pub mod config;
pub mod error;
pub mod fleet;
pub mod instance;
pub mod log;
pub mod minecraft;
pub mod ports;
pub mod template;

pub use config::LaunchConfig;
pub use error::{FleetError, FleetResult};
pub use fleet::Fleet;
pub use instance::Instance;
pub use log::{LogEmitter, LogEvent, LogSource};
pub use template::{LocalTemplateProvider, TemplateProvider};
