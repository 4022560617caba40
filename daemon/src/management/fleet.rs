use crate::management::config::LaunchConfig;
use crate::management::error::{FleetError, FleetResult};
use crate::management::instance::{parse_instance_id, Instance, ID_SEPARATOR, VERSION_FILE_NAME};
use crate::management::log::{LogEmitter, LogEvent};
use crate::management::ports::plan_port_fixes;
use crate::management::template::TemplateProvider;
use crate::storage::files;
use bedrock_protocol::management::instance::InstanceReport;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BulkAction {
    Start,
    Stop,
    Restart,
}

impl fmt::Display for BulkAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BulkAction::Start => f.write_str("start"),
            BulkAction::Stop => f.write_str("stop"),
            BulkAction::Restart => f.write_str("restart"),
        }
    }
}

/// All server instances cloned from one template under one root directory.
///
/// Instances are kept in fleet order: discovery appends newly found
/// instances in ascending id order, and every bulk operation and the port
/// deconfliction walk that order.
pub struct Fleet {
    root: PathBuf,
    template_name: String,
    launch: LaunchConfig,
    instances: RwLock<Vec<Arc<Instance>>>,
    log: LogEmitter,
}

impl Fleet {
    pub fn new(
        root: impl Into<PathBuf>,
        template_name: impl Into<String>,
        launch: LaunchConfig,
        log: LogEmitter,
    ) -> FleetResult<Self> {
        let root = root.into();
        let template_name = template_name.into();
        if template_name.is_empty() || template_name.contains(ID_SEPARATOR) {
            return Err(FleetError::InvalidTemplateName(template_name));
        }
        std::fs::create_dir_all(&root)?;

        Ok(Self {
            root,
            template_name,
            launch,
            instances: RwLock::new(vec![]),
            log,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn template_name(&self) -> &str {
        &self.template_name
    }

    pub fn template_path(&self) -> PathBuf {
        self.root.join(&self.template_name)
    }

    pub fn template_exists(&self) -> bool {
        self.template_path().is_dir()
    }

    pub fn log(&self) -> &LogEmitter {
        &self.log
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEvent> {
        self.log.subscribe()
    }

    /// Snapshot of the tracked instances in fleet order.
    pub fn instances(&self) -> Vec<Arc<Instance>> {
        self.instances.read().unwrap().clone()
    }

    pub fn get(&self, id: u32) -> Option<Arc<Instance>> {
        self.instances
            .read()
            .unwrap()
            .iter()
            .find(|instance| instance.id() == id)
            .cloned()
    }

    pub fn reports(&self) -> Vec<InstanceReport> {
        self.instances()
            .iter()
            .map(|instance| instance.report())
            .collect()
    }

    /// Loads every instance directory not tracked yet, then deconflicts ports.
    ///
    /// Returns the ids of the newly loaded instances. Nothing is registered
    /// when any directory fails to load.
    pub async fn discover(&self) -> FleetResult<Vec<u32>> {
        let root = self.root.clone();
        let names = blocking(move || Ok(files::subdirectory_names(root)?)).await?;
        let found = self.untracked(names)?;

        let (root, launch, log) = (self.root.clone(), self.launch.clone(), self.log.clone());
        let loaded = blocking(move || {
            found
                .iter()
                .map(|(_, name)| Instance::load(root.join(name), &launch, &log))
                .collect::<FleetResult<Vec<_>>>()
        })
        .await?;

        let mut ids = Vec::with_capacity(loaded.len());
        {
            let mut instances = self.instances.write().unwrap();
            for instance in loaded {
                ids.push(instance.id());
                instances.push(Arc::new(instance));
            }
        }
        for instance in self.instances().iter().filter(|i| ids.contains(&i.id())) {
            debug!("loaded {}", instance);
            self.log.emit(format!("Loaded {}", instance.name()));
        }

        self.fix_ports().await?;
        Ok(ids)
    }

    /// Instance directories among `names` that are not tracked yet, by ascending id.
    fn untracked(&self, names: Vec<String>) -> FleetResult<Vec<(u32, String)>> {
        let mut known = self
            .instances
            .read()
            .unwrap()
            .iter()
            .map(|instance| (instance.id(), instance.name().to_string()))
            .collect::<HashMap<_, _>>();

        let mut found = vec![];
        for name in names {
            if !name.contains(ID_SEPARATOR) || known.values().any(|tracked| *tracked == name) {
                continue;
            }
            let id = parse_instance_id(&name)
                .ok_or_else(|| FleetError::InvalidInstanceName(name.clone()))?;
            if let Some(first) = known.get(&id) {
                return Err(FleetError::DuplicateInstanceId {
                    id,
                    first: first.clone(),
                    second: name,
                });
            }
            known.insert(id, name.clone());
            found.push((id, name));
        }
        found.sort_by_key(|(id, _)| *id);
        Ok(found)
    }

    /// Moves every instance that shares a port with another one, except
    /// instance 1, to fresh ports and writes them to disk.
    pub async fn fix_ports(&self) -> FleetResult<()> {
        let instances = self.instances();
        let log = self.log.clone();
        blocking(move || apply_port_fixes(&instances, &log)).await
    }

    /// Copies the template into a new instance directory and returns its id.
    ///
    /// The new instance is picked up by the next [`Fleet::discover`].
    pub async fn create_instance(&self) -> FleetResult<u32> {
        let template = self.template_path();
        if !template.is_dir() {
            return Err(FleetError::TemplateMissing(template));
        }

        let id = files::subdirectory_names(&self.root)?
            .iter()
            .filter_map(|name| parse_instance_id(name))
            .max()
            .map_or(1, |max| max + 1);
        let name = format!("{}{}{}", self.template_name, ID_SEPARATOR, id);
        let target = self.root.join(&name);

        blocking(move || Ok(files::copy_dir_all(template, target)?)).await?;

        info!("created {}", name);
        self.log.emit(format!("Created {}", name));
        Ok(id)
    }

    /// Fills the template directory through `provider`.
    ///
    /// A failed acquisition leaves no template directory behind.
    pub async fn acquire_template(&self, provider: &dyn TemplateProvider) -> FleetResult<()> {
        let template = self.template_path();
        if template.exists() {
            return Err(FleetError::TemplateExists(template));
        }
        tokio::fs::create_dir_all(&template).await?;
        self.log.emit("Acquiring server template");

        let result = match provider.acquire(&template).await {
            Err(err) => Err(FleetError::Provider(err)),
            Ok(()) if !template.join(VERSION_FILE_NAME).is_file() => {
                Err(FleetError::MissingVersionMarker(template.clone()))
            }
            Ok(()) => Ok(()),
        };

        match result {
            Ok(()) => {
                let version = files::read_first_line(template.join(VERSION_FILE_NAME))
                    .ok()
                    .flatten()
                    .unwrap_or_default();
                info!("template {} ready (version {})", template.display(), version);
                self.log
                    .emit(format!("Server template ready, version {}", version));
                Ok(())
            }
            Err(err) => {
                warn!("could not acquire template: {}", err);
                self.log.emit(format!("Could not acquire template: {}", err));
                if let Err(cleanup) = tokio::fs::remove_dir_all(&template).await {
                    warn!("could not remove {}: {}", template.display(), cleanup);
                }
                Err(err)
            }
        }
    }

    /// Sends `command` to instance `id`. Unknown ids are reported on the log channel.
    pub async fn dispatch(&self, id: u32, command: &str) {
        match self.get(id) {
            Some(instance) => instance.run_command(command).await,
            None => self.log.emit(format!(
                "Couldn't run command \"{}\" because server with the ID \"{}\" doesn't exist.",
                command, id
            )),
        }
    }

    pub async fn start_all(&self) -> FleetResult<()> {
        self.run_all(BulkAction::Start).await
    }

    pub async fn stop_all(&self) -> FleetResult<()> {
        self.run_all(BulkAction::Stop).await
    }

    pub async fn restart_all(&self) -> FleetResult<()> {
        self.run_all(BulkAction::Restart).await
    }

    /// Stops every running instance. Called once before the process exits.
    pub async fn shutdown(&self) -> FleetResult<()> {
        let running = self
            .instances()
            .iter()
            .filter(|instance| instance.is_running())
            .count();
        info!("shutting down, {} running instance(s)", running);
        self.log.emit("Shutting down");
        self.stop_all().await
    }

    async fn run_all(&self, action: BulkAction) -> FleetResult<()> {
        let mut first_error = None;
        for instance in self.instances() {
            let result = match action {
                BulkAction::Start => instance.start().await,
                BulkAction::Stop => instance.stop().await,
                BulkAction::Restart => instance.restart().await,
            };
            if let Err(err) = result {
                warn!("could not {} {}: {}", action, instance.name(), err);
                self.log
                    .emit(format!("Failed to {} {}: {}", action, instance.name(), err));
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// Runs filesystem work off the async runtime.
async fn blocking<T, F>(work: F) -> FleetResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> FleetResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(std::io::Error::other)?
}

fn apply_port_fixes(instances: &[Arc<Instance>], log: &LogEmitter) -> FleetResult<()> {
    let current = instances
        .iter()
        .map(|instance| Ok((instance.id(), instance.ports()?)))
        .collect::<FleetResult<Vec<_>>>()?;

    let plan = plan_port_fixes(&current).map_err(|overflow| FleetError::PortOverflow {
        id: overflow.id,
        ports: overflow.after.to_string(),
    })?;

    for assignment in plan {
        let Some(instance) = instances.iter().find(|i| i.id() == assignment.id) else {
            continue;
        };
        let before = instance.ports()?;
        instance.set_ports(assignment.ports);
        instance.update_properties()?;
        if before == assignment.ports {
            continue;
        }
        info!(
            "{}: ports {} -> {}",
            instance.name(),
            before,
            assignment.ports
        );
        log.emit(format!(
            "Changed ports of {} from {} to {}",
            instance.name(),
            before,
            assignment.ports
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::management::instance::tests::{fake_launch, wait_for, write_instance_dir, FAKE_SERVER};
    use crate::management::instance::PROPERTIES_FILE_NAME;
    use crate::management::log::LogSource;
    use crate::management::template::LocalTemplateProvider;
    use async_trait::async_trait;
    use bedrock_protocol::management::instance::{InstanceStatus, PortPair};
    use std::fs;
    use tokio::sync::broadcast::error::TryRecvError;

    const TEMPLATE: &str = "bedServer";

    fn pair(v4: u16) -> PortPair {
        PortPair::new(v4, v4 + 1)
    }

    fn fleet(root: &Path) -> Fleet {
        Fleet::new(root, TEMPLATE, fake_launch(), LogEmitter::new()).unwrap()
    }

    fn write_template(root: &Path) {
        let dir = root.join(TEMPLATE);
        fs::create_dir_all(dir.join("worlds")).unwrap();
        fs::write(
            dir.join(PROPERTIES_FILE_NAME),
            "server-name=Dedicated Server\nserver-port=19132\nserver-portv6=19133\n",
        )
        .unwrap();
        fs::write(dir.join(VERSION_FILE_NAME), "1.16.1.02\n").unwrap();
        fs::write(dir.join("fake_server.sh"), FAKE_SERVER).unwrap();
    }

    fn on_disk_ports(root: &Path, name: &str) -> PortPair {
        fs::read_to_string(root.join(name).join(PROPERTIES_FILE_NAME))
            .unwrap()
            .parse::<bedrock_protocol::management::instance::ServerProperties>()
            .unwrap()
            .ports()
            .unwrap()
    }

    #[test]
    fn template_name_must_not_contain_separator() {
        let root = tempfile::tempdir().unwrap();
        for name in ["bed_Server", ""] {
            assert!(matches!(
                Fleet::new(root.path(), name, fake_launch(), LogEmitter::new()),
                Err(FleetError::InvalidTemplateName(_))
            ));
        }
    }

    #[test]
    fn new_creates_missing_root() {
        let root = tempfile::tempdir().unwrap();
        let fleet = fleet(&root.path().join("servers"));
        assert!(fleet.root().is_dir());
        assert!(!fleet.template_exists());
    }

    #[tokio::test]
    async fn missing_root_is_a_filesystem_error() {
        let root = tempfile::tempdir().unwrap();
        let servers = root.path().join("servers");
        let fleet = fleet(&servers);
        fs::remove_dir(&servers).unwrap();
        assert!(matches!(fleet.discover().await, Err(FleetError::Io(_))));
    }

    #[tokio::test]
    async fn discover_loads_in_id_order_and_skips_template() {
        let root = tempfile::tempdir().unwrap();
        write_template(root.path());
        write_instance_dir(root.path(), "bedServer_10", pair(19140));
        write_instance_dir(root.path(), "bedServer_2", pair(19134));
        write_instance_dir(root.path(), "bedServer_1", pair(19132));
        let fleet = fleet(root.path());
        let mut rx = fleet.subscribe();

        assert_eq!(fleet.discover().await.unwrap(), [1, 2, 10]);
        assert_eq!(
            fleet.instances().iter().map(|i| i.id()).collect::<Vec<_>>(),
            [1, 2, 10]
        );
        assert_eq!(fleet.get(10).unwrap().name(), "bedServer_10");
        assert!(fleet.get(3).is_none());
        assert_eq!(rx.try_recv().unwrap().message, "Loaded bedServer_1");

        // already tracked instances are not loaded twice
        assert!(fleet.discover().await.unwrap().is_empty());
        assert_eq!(fleet.instances().len(), 3);

        write_instance_dir(root.path(), "bedServer_5", pair(19150));
        assert_eq!(fleet.discover().await.unwrap(), [5]);
        assert_eq!(
            fleet.instances().iter().map(|i| i.id()).collect::<Vec<_>>(),
            [1, 2, 10, 5]
        );
    }

    #[tokio::test]
    async fn duplicate_and_invalid_ids_are_config_errors() {
        let root = tempfile::tempdir().unwrap();
        write_instance_dir(root.path(), "bedServer_1", pair(19132));
        write_instance_dir(root.path(), "bedServer_01", pair(19134));
        let fleet = fleet(root.path());
        assert!(matches!(
            fleet.discover().await,
            Err(FleetError::DuplicateInstanceId { id: 1, .. })
        ));
        assert!(fleet.instances().is_empty());

        let root = tempfile::tempdir().unwrap();
        write_instance_dir(root.path(), "bedServer_abc", pair(19132));
        assert!(matches!(
            self::fleet(root.path()).discover().await,
            Err(FleetError::InvalidInstanceName(name)) if name == "bedServer_abc"
        ));
    }

    #[tokio::test]
    async fn discover_deconflicts_ports_on_disk() {
        let root = tempfile::tempdir().unwrap();
        write_instance_dir(root.path(), "bedServer_1", pair(19130));
        write_instance_dir(root.path(), "bedServer_2", pair(19132));
        write_instance_dir(root.path(), "bedServer_3", pair(19132));
        let fleet = fleet(root.path());
        let mut rx = fleet.subscribe();

        fleet.discover().await.unwrap();

        let mut changes = vec![];
        while let Ok(event) = rx.try_recv() {
            if event.message.starts_with("Changed ports") {
                changes.push(event.message);
            }
        }
        // instance 2 anchors the cascade at its own ports, nothing to report
        assert_eq!(
            changes,
            ["Changed ports of bedServer_3 from 19132/19133 to 19134/19135"]
        );

        assert_eq!(on_disk_ports(root.path(), "bedServer_1"), pair(19130));
        assert_eq!(on_disk_ports(root.path(), "bedServer_2"), pair(19132));
        assert_eq!(on_disk_ports(root.path(), "bedServer_3"), pair(19134));
        assert_eq!(fleet.get(3).unwrap().ports().unwrap(), pair(19134));
        // comments and other keys are untouched
        assert!(fs::read_to_string(root.path().join("bedServer_3").join(PROPERTIES_FILE_NAME))
            .unwrap()
            .starts_with("server-name=Dedicated Server\n# ports\n"));
    }

    #[tokio::test]
    async fn unreadable_ports_fail_deconfliction() {
        let root = tempfile::tempdir().unwrap();
        write_instance_dir(root.path(), "bedServer_1", pair(19132));
        write_instance_dir(root.path(), "bedServer_2", pair(19134));
        write_instance_dir(root.path(), "bedServer_3", pair(19136));
        let fleet = fleet(root.path());
        fleet.discover().await.unwrap();

        fleet
            .get(2)
            .unwrap()
            .edit_properties(|properties| properties.set("server-port", "not a port"));

        assert!(matches!(
            fleet.fix_ports().await,
            Err(FleetError::Properties { name, .. }) if name == "bedServer_2"
        ));
        assert_eq!(on_disk_ports(root.path(), "bedServer_3"), pair(19136));
    }

    #[tokio::test]
    async fn instance_one_is_never_rewritten() {
        let root = tempfile::tempdir().unwrap();
        write_instance_dir(root.path(), "bedServer_1", pair(19132));
        write_instance_dir(root.path(), "bedServer_2", pair(19132));
        write_instance_dir(root.path(), "bedServer_3", pair(19132));
        let fleet = fleet(root.path());

        fleet.discover().await.unwrap();

        assert_eq!(on_disk_ports(root.path(), "bedServer_1"), pair(19132));
        assert_eq!(on_disk_ports(root.path(), "bedServer_2"), pair(19134));
        assert_eq!(on_disk_ports(root.path(), "bedServer_3"), pair(19136));
    }

    #[tokio::test]
    async fn create_then_discover_yields_next_id() {
        let root = tempfile::tempdir().unwrap();
        write_template(root.path());
        let fleet = fleet(root.path());

        assert_eq!(fleet.create_instance().await.unwrap(), 1);
        assert!(fleet.instances().is_empty());
        assert_eq!(fleet.create_instance().await.unwrap(), 2);

        write_instance_dir(root.path(), "bedServer_7", pair(19200));
        assert_eq!(fleet.create_instance().await.unwrap(), 8);

        assert_eq!(fleet.discover().await.unwrap(), [1, 2, 7, 8]);
        let created = fleet.get(8).unwrap();
        assert_eq!(created.version().as_deref(), Some("1.16.1.02"));
        assert!(created.available_worlds().is_some());
        // copies of the template clash with each other, instance 1 keeps its ports
        assert_eq!(fleet.get(1).unwrap().ports().unwrap(), pair(19132));
        assert_eq!(fleet.get(2).unwrap().ports().unwrap(), pair(19202));
        assert_eq!(fleet.get(8).unwrap().ports().unwrap(), pair(19204));
    }

    #[tokio::test]
    async fn create_without_template_fails() {
        let root = tempfile::tempdir().unwrap();
        let fleet = fleet(root.path());
        assert!(matches!(
            fleet.create_instance().await,
            Err(FleetError::TemplateMissing(_))
        ));
    }

    #[tokio::test]
    async fn dispatch_to_unknown_id_only_logs() {
        let root = tempfile::tempdir().unwrap();
        let fleet = fleet(root.path());
        let mut rx = fleet.subscribe();

        fleet.dispatch(42, "say hi").await;

        let event = rx.try_recv().unwrap();
        assert_eq!(event.source, LogSource::Fleet);
        assert_eq!(
            event.message,
            "Couldn't run command \"say hi\" because server with the ID \"42\" doesn't exist."
        );
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn dispatch_to_stopped_instance_is_reported_by_instance() {
        let root = tempfile::tempdir().unwrap();
        write_instance_dir(root.path(), "bedServer_1", pair(19132));
        let fleet = fleet(root.path());
        fleet.discover().await.unwrap();
        let mut rx = fleet.subscribe();

        fleet.dispatch(1, "say hi").await;

        let event = rx.try_recv().unwrap();
        assert_eq!(event.source, LogSource::Instance(1));
        assert_eq!(
            event.message,
            "Can't run command \"say hi\" because server isn't running."
        );
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn acquire_template_from_local_installation() {
        let source = tempfile::tempdir().unwrap();
        write_template(source.path());
        let root = tempfile::tempdir().unwrap();
        let fleet = fleet(root.path());

        let provider = LocalTemplateProvider::new(source.path().join(TEMPLATE));
        fleet.acquire_template(&provider).await.unwrap();
        assert!(fleet.template_exists());
        assert_eq!(fleet.create_instance().await.unwrap(), 1);

        assert!(matches!(
            fleet.acquire_template(&provider).await,
            Err(FleetError::TemplateExists(_))
        ));
    }

    struct FailingProvider;

    #[async_trait]
    impl TemplateProvider for FailingProvider {
        async fn acquire(&self, template_dir: &Path) -> anyhow::Result<()> {
            fs::write(template_dir.join("partial.zip"), b"")?;
            anyhow::bail!("download interrupted")
        }
    }

    #[tokio::test]
    async fn failed_acquisition_leaves_no_template() {
        let root = tempfile::tempdir().unwrap();
        let fleet = fleet(root.path());

        assert!(matches!(
            fleet.acquire_template(&FailingProvider).await,
            Err(FleetError::Provider(_))
        ));
        assert!(!fleet.template_exists());

        let empty = tempfile::tempdir().unwrap();
        assert!(matches!(
            fleet
                .acquire_template(&LocalTemplateProvider::new(empty.path()))
                .await,
            Err(FleetError::MissingVersionMarker(_))
        ));
        assert!(!fleet.template_exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn bulk_operations_and_shutdown() {
        let root = tempfile::tempdir().unwrap();
        write_instance_dir(root.path(), "bedServer_1", pair(19132));
        write_instance_dir(root.path(), "bedServer_2", pair(19134));
        let fleet = fleet(root.path());
        fleet.discover().await.unwrap();
        let mut rx = fleet.subscribe();

        fleet.start_all().await.unwrap();
        assert!(fleet.instances().iter().all(|i| i.is_running()));

        fleet.dispatch(2, "hello").await;
        let event = wait_for(&mut rx, |e| e.message == "echo: hello").await;
        assert_eq!(event.source, LogSource::Instance(2));

        fleet.restart_all().await.unwrap();
        assert!(fleet.instances().iter().all(|i| i.is_running()));

        fleet.shutdown().await.unwrap();
        assert!(fleet
            .reports()
            .iter()
            .all(|report| report.status == InstanceStatus::Stopped));

        // restart leaves stopped instances stopped
        fleet.restart_all().await.unwrap();
        assert!(fleet.instances().iter().all(|i| !i.is_running()));
    }

    #[tokio::test]
    async fn bulk_start_continues_after_a_failure() {
        let root = tempfile::tempdir().unwrap();
        write_instance_dir(root.path(), "bedServer_1", pair(19132));
        write_instance_dir(root.path(), "bedServer_2", pair(19134));
        let launch = LaunchConfig {
            program: "/nonexistent/bedrock_server".to_string(),
            ..fake_launch()
        };
        let fleet = Fleet::new(root.path(), TEMPLATE, launch, LogEmitter::new()).unwrap();
        fleet.discover().await.unwrap();
        let mut rx = fleet.subscribe();

        assert!(matches!(
            fleet.start_all().await,
            Err(FleetError::Spawn { name, .. }) if name == "bedServer_1"
        ));

        let mut failures = 0;
        while let Ok(event) = rx.try_recv() {
            if event.message.starts_with("Failed to start") {
                failures += 1;
            }
        }
        assert_eq!(failures, 2);
    }
}
