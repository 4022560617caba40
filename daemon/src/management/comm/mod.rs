mod process;

pub use process::{InstanceProcess, OutputObserver, ProcessStartInfo};
