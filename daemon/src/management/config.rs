use crate::management::comm::ProcessStartInfo;
use bedrock_protocol::utils::Encoding;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

#[cfg(windows)]
const DEFAULT_PROGRAM: &str = "bedrock_server.exe";
#[cfg(not(windows))]
const DEFAULT_PROGRAM: &str = "bedrock_server";

/// How an instance's server process is launched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LaunchConfig {
    /// Absolute, relative to the instance directory, or looked up on `PATH`.
    #[serde(default = "default_program")]
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub encoding: Encoding,
}

fn default_program() -> String {
    DEFAULT_PROGRAM.to_owned()
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: vec![],
            encoding: Encoding::default(),
        }
    }
}

impl LaunchConfig {
    /// The program path for an instance rooted at `working_dir`.
    pub fn resolve_program(&self, working_dir: &Path) -> PathBuf {
        let program = Path::new(&self.program);
        if program.is_absolute() {
            return program.to_path_buf();
        }
        let local = working_dir.join(program);
        if local.exists() {
            local
        } else {
            program.to_path_buf()
        }
    }

    pub fn start_info(&self, working_dir: &Path) -> ProcessStartInfo {
        let mut envs = HashMap::new();
        if cfg!(unix) {
            // the server ships its own shared libraries next to the binary
            envs.insert(
                OsString::from("LD_LIBRARY_PATH"),
                working_dir.as_os_str().to_os_string(),
            );
        }
        ProcessStartInfo {
            target: self.resolve_program(working_dir),
            args: self.args.clone(),
            working_dir: working_dir.to_path_buf(),
            envs,
        }
    }
}
