mod properties;
mod report;
mod status;

pub use properties::{
    PortPair, PropertiesError, ServerProperties, SERVER_NAME_KEY, SERVER_PORT_KEY,
    SERVER_PORT_V6_KEY,
};
pub use report::InstanceReport;
pub use status::InstanceStatus;
