use bedrock_protocol::management::instance::PropertiesError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FleetError {
    #[error("template name must not contain '_': {0}")]
    InvalidTemplateName(String),
    #[error("instance directory {0:?} does not end with a numeric id")]
    InvalidInstanceName(String),
    #[error("instance id {id} is used by both {first:?} and {second:?}")]
    DuplicateInstanceId {
        id: u32,
        first: String,
        second: String,
    },
    #[error("template directory {0} does not exist")]
    TemplateMissing(PathBuf),
    #[error("template directory {0} already exists, delete it first")]
    TemplateExists(PathBuf),
    #[error("template at {0} has no version.txt")]
    MissingVersionMarker(PathBuf),
    #[error("invalid server.properties in {name}: {source}")]
    Properties {
        name: String,
        #[source]
        source: PropertiesError,
    },
    #[error("no free port above {ports} for instance {id}")]
    PortOverflow { id: u32, ports: String },
    #[error("could not start {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("template provider failed: {0}")]
    Provider(#[source] anyhow::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type FleetResult<T> = Result<T, FleetError>;
