use crate::management::comm::{InstanceProcess, OutputObserver, ProcessStartInfo};
use crate::management::config::LaunchConfig;
use crate::management::error::{FleetError, FleetResult};
use crate::management::log::LogEmitter;
use crate::management::minecraft::{PlayerEvent, PlayerTable, PresenceUpdate};
use crate::storage::files;
use bedrock_protocol::management::instance::{
    InstanceReport, InstanceStatus, PortPair, ServerProperties,
};
use bedrock_protocol::management::minecraft::Player;
use bedrock_protocol::utils::Encoding;
use log::{debug, info, warn};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

pub const PROPERTIES_FILE_NAME: &str = "server.properties";
pub const VERSION_FILE_NAME: &str = "version.txt";
pub const WORLDS_DIR_NAME: &str = "worlds";
pub const ID_SEPARATOR: char = '_';
pub const STOP_COMMAND: &str = "stop";

/// Numeric id encoded after the last `_` of an instance directory name.
pub fn parse_instance_id(name: &str) -> Option<u32> {
    let (_, suffix) = name.rsplit_once(ID_SEPARATOR)?;
    suffix.parse::<u32>().ok().filter(|id| *id > 0)
}

/// Forwards server output to the log channel and keeps the player table current.
struct OutputHandler {
    log: LogEmitter,
    players: Arc<Mutex<PlayerTable>>,
}

impl OutputObserver for OutputHandler {
    fn on_line(&self, line: &str) {
        self.log.emit(line);

        let Some(event) = PlayerEvent::parse(line) else {
            return;
        };
        let update = self.players.lock().unwrap().apply(&event);
        if update == PresenceUpdate::UnknownDisconnect {
            warn!(
                "{}: disconnect of unknown player {} (xuid={})",
                self.log.source(),
                event.username,
                event.xuid
            );
            self.log.emit(format!(
                "Player {} (xuid {}) disconnected without a recorded connect",
                event.username, event.xuid
            ));
        }
    }

    fn on_stderr_line(&self, line: &str) {
        self.log.emit(format!("[STDERR] {}", line));
    }

    fn on_unexpected_exit(&self) {
        warn!("{}: server process exited unexpectedly", self.log.source());
        self.log.emit("Server process exited unexpectedly");
    }
}

/// One server cloned from the template.
pub struct Instance {
    id: u32,
    name: String,
    path: PathBuf,
    start_info: ProcessStartInfo,
    encoding: Encoding,
    properties: RwLock<ServerProperties>,
    players: Arc<Mutex<PlayerTable>>,
    process: tokio::sync::Mutex<Option<InstanceProcess>>,
    current_run: Mutex<Option<Arc<AtomicBool>>>,
    log: LogEmitter,
}

impl Instance {
    /// Reads an instance directory. The process is described but not spawned.
    pub fn load(path: impl Into<PathBuf>, launch: &LaunchConfig, log: &LogEmitter) -> FleetResult<Self> {
        let path = path.into();
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        let id = parse_instance_id(&name).ok_or_else(|| FleetError::InvalidInstanceName(name.clone()))?;

        let content = std::fs::read_to_string(path.join(PROPERTIES_FILE_NAME))?;
        let properties = content
            .parse::<ServerProperties>()
            .unwrap_or_else(|never| match never {});
        properties.ports().map_err(|source| FleetError::Properties {
            name: name.clone(),
            source,
        })?;

        let start_info = launch.start_info(&path);
        if start_info.target.starts_with(&path) {
            if let Err(err) = files::ensure_executable(&start_info.target) {
                warn!(
                    "could not mark {} as executable: {}",
                    start_info.target.display(),
                    err
                );
            }
        }

        Ok(Self {
            id,
            name,
            path,
            start_info,
            encoding: launch.encoding,
            properties: RwLock::new(properties),
            players: Arc::new(Mutex::new(PlayerTable::new(id))),
            process: tokio::sync::Mutex::new(None),
            current_run: Mutex::new(None),
            log: log.for_instance(id),
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_running(&self) -> bool {
        self.current_run
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    pub fn status(&self) -> InstanceStatus {
        if self.is_running() {
            InstanceStatus::Running
        } else {
            InstanceStatus::Stopped
        }
    }

    pub async fn pid(&self) -> Option<u32> {
        let process = self.process.lock().await;
        process
            .as_ref()
            .filter(|process| process.is_running())
            .and_then(InstanceProcess::id)
    }

    pub fn properties(&self) -> ServerProperties {
        self.properties.read().unwrap().clone()
    }

    /// Edits the in-memory properties. Call [`Instance::update_properties`]
    /// to persist them; a running server only sees them after a restart.
    pub fn edit_properties<R>(&self, edit: impl FnOnce(&mut ServerProperties) -> R) -> R {
        edit(&mut self.properties.write().unwrap())
    }

    pub fn ports(&self) -> FleetResult<PortPair> {
        self.properties
            .read()
            .unwrap()
            .ports()
            .map_err(|source| FleetError::Properties {
                name: self.name.clone(),
                source,
            })
    }

    pub fn set_ports(&self, ports: PortPair) {
        self.edit_properties(|properties| properties.set_ports(ports));
    }

    /// Overwrites `server.properties` with the in-memory properties.
    pub fn update_properties(&self) -> FleetResult<()> {
        let content = self.properties.read().unwrap().to_string();
        std::fs::write(self.path.join(PROPERTIES_FILE_NAME), content)?;
        debug!("{}: {} written", self.name, PROPERTIES_FILE_NAME);
        Ok(())
    }

    pub fn players(&self) -> Vec<Player> {
        self.players.lock().unwrap().players().to_vec()
    }

    /// First line of `version.txt`, if the instance has one.
    pub fn version(&self) -> Option<String> {
        files::read_first_line(self.path.join(VERSION_FILE_NAME))
            .ok()
            .flatten()
    }

    /// World directories under `worlds/`, or `None` when there is no such directory.
    pub fn available_worlds(&self) -> Option<Vec<PathBuf>> {
        let worlds = self.path.join(WORLDS_DIR_NAME);
        if !worlds.is_dir() {
            return None;
        }
        files::subdirectories(worlds).ok()
    }

    pub fn report(&self) -> InstanceReport {
        let properties = self.properties();
        InstanceReport {
            id: self.id,
            name: self.name.clone(),
            status: self.status(),
            version: self.version(),
            server_name: properties.server_name().map(str::to_string),
            ports: properties.ports().ok(),
            players: self.players(),
        }
    }

    pub async fn start(&self) -> FleetResult<()> {
        let mut process = self.process.lock().await;
        if self.is_running() {
            return Ok(());
        }

        let observer = Arc::new(OutputHandler {
            log: self.log.clone(),
            players: self.players.clone(),
        });
        let spawned = InstanceProcess::spawn(&self.start_info, self.encoding, observer).map_err(
            |source| {
                warn!("{}: could not start server: {}", self.name, source);
                self.log.emit(format!("Could not start server: {}", source));
                FleetError::Spawn {
                    name: self.name.clone(),
                    source,
                }
            },
        )?;

        *self.current_run.lock().unwrap() = Some(spawned.running_flag());
        *process = Some(spawned);

        info!("{} started", self.name);
        self.log.emit("Server started");
        Ok(())
    }

    /// Sends `stop` and waits for the process to exit, however long that takes.
    pub async fn stop(&self) -> FleetResult<()> {
        let mut process = self.process.lock().await;
        if !self.is_running() {
            return Ok(());
        }
        let Some(running) = process.take() else {
            return Ok(());
        };

        let result = running.stop(STOP_COMMAND).await;
        *self.current_run.lock().unwrap() = None;
        match result {
            Ok(status) => {
                info!("{} stopped ({})", self.name, status);
                self.log.emit("Server stopped");
                Ok(())
            }
            Err(err) => {
                warn!("{}: error while waiting for exit: {}", self.name, err);
                self.log.emit(format!("Server stopped with error: {}", err));
                Err(err.into())
            }
        }
    }

    /// Stops then starts a running server. A stopped server stays stopped.
    pub async fn restart(&self) -> FleetResult<()> {
        if self.is_running() {
            self.stop().await?;
            self.start().await?;
        }
        Ok(())
    }

    /// Writes one command line to the server. Never fails; problems are logged.
    pub async fn run_command(&self, command: &str) {
        if !self.is_running() {
            self.reject_command(command);
            return;
        }

        let mut process = self.process.lock().await;
        match process.as_mut() {
            Some(running) if running.is_running() => {
                if let Err(err) = running.write_line(command).await {
                    warn!("{}: could not send {:?}: {}", self.name, command, err);
                    self.log
                        .emit(format!("Failed to send command \"{}\": {}", command, err));
                }
            }
            _ => self.reject_command(command),
        }
    }

    fn reject_command(&self, command: &str) {
        self.log.emit(format!(
            "Can't run command \"{}\" because server isn't running.",
            command
        ));
    }
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let properties = self.properties.read().unwrap();
        write!(
            f,
            "{} - {} - {} - {}",
            self.id,
            self.name,
            properties.server_name().unwrap_or(""),
            properties
                .server_port()
                .map(|port| port.to_string())
                .unwrap_or_default()
        )
    }
}
