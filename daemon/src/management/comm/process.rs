use bedrock_protocol::utils::Encoding;
use log::{debug, warn};
use std::collections::HashMap;
use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};

pub struct ProcessStartInfo {
    pub target: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub envs: HashMap<OsString, OsString>,
}

impl ProcessStartInfo {
    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.target);
        cmd.args(&self.args)
            .current_dir(&self.working_dir)
            .envs(&self.envs)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

/// Receives what a running server writes.
pub trait OutputObserver: Send + Sync {
    fn on_line(&self, line: &str);

    fn on_stderr_line(&self, line: &str);

    /// stdout closed while the run was still marked as running.
    fn on_unexpected_exit(&self);
}

/// One run of a server process.
///
/// Each run owns its own running flag; a reader left over from an earlier run
/// can only ever clear its own flag.
pub struct InstanceProcess {
    child: Child,
    stdin: ChildStdin,
    running: Arc<AtomicBool>,
    encoding: Encoding,
}

impl InstanceProcess {
    pub fn spawn(
        start_info: &ProcessStartInfo,
        encoding: Encoding,
        observer: Arc<dyn OutputObserver>,
    ) -> io::Result<Self> {
        let mut child = start_info.command().spawn()?;
        debug!(
            "spawned {} (pid={})",
            start_info.target.display(),
            child.id().unwrap_or(0)
        );

        let stdin = child.stdin.take().ok_or_else(|| missing_pipe("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing_pipe("stderr"))?;
        let running = Arc::new(AtomicBool::new(true));

        tokio::spawn({
            let running = running.clone();
            let observer = observer.clone();
            async move {
                read_lines(stdout, encoding, &running, |line| observer.on_line(line)).await;
                if running.swap(false, Ordering::SeqCst) {
                    observer.on_unexpected_exit();
                }
            }
        });
        tokio::spawn({
            let running = running.clone();
            async move {
                read_lines(stderr, encoding, &running, |line| observer.on_stderr_line(line))
                    .await;
            }
        });

        Ok(Self {
            child,
            stdin,
            running,
            encoding,
        })
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn write_line(&mut self, line: &str) -> io::Result<()> {
        let mut bytes = self.encoding.encode(line);
        bytes.push(b'\n');
        self.stdin.write_all(&bytes).await?;
        self.stdin.flush().await
    }

    /// Marks the run as over, sends `command` and waits for the process to exit.
    ///
    /// There is no timeout: a server that ignores `command` keeps this pending.
    pub async fn stop(mut self, command: &str) -> io::Result<ExitStatus> {
        self.running.store(false, Ordering::SeqCst);
        if let Err(err) = self.write_line(command).await {
            // already gone, wait() below reports how it ended
            warn!("could not send {:?} to server: {}", command, err);
        }
        self.child.wait().await
    }
}

fn missing_pipe(name: &str) -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, format!("child {} was not captured", name))
}

/// Reads `\n` terminated lines until EOF. Lines read after `running` is
/// cleared are drained but not forwarded, so the pipe stays open while the
/// server writes its shutdown output.
async fn read_lines<R, F>(stream: R, encoding: Encoding, running: &AtomicBool, mut on_line: F)
where
    R: AsyncRead + Unpin,
    F: FnMut(&str),
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                if !running.load(Ordering::SeqCst) {
                    continue;
                }
                let line = encoding.decode(&buf);
                on_line(line.trim_end_matches(['\r', '\n']));
            }
            Err(err) => {
                warn!("error reading server output: {}", err);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn read_lines_splits_and_trims() {
        let input: &[u8] = b"first\r\nsecond\nlast without newline";
        let running = AtomicBool::new(true);
        let mut lines = vec![];
        read_lines(input, Encoding::UTF8, &running, |line| lines.push(line.to_string())).await;
        assert_eq!(lines, ["first", "second", "last without newline"]);
    }

    #[tokio::test]
    async fn read_lines_drains_without_forwarding_once_flag_is_cleared() {
        let input: &[u8] = b"one\ntwo\n";
        let running = AtomicBool::new(false);
        let mut lines = vec![];
        read_lines(input, Encoding::UTF8, &running, |line| lines.push(line.to_string())).await;
        assert!(lines.is_empty());
    }

    #[tokio::test]
    async fn read_lines_decodes_with_configured_encoding() {
        let input: &[u8] = &[0xB7, 0xFE, 0xCE, 0xF1, b'\n'];
        let running = AtomicBool::new(true);
        let mut lines = vec![];
        read_lines(input, Encoding::GBK, &running, |line| lines.push(line.to_string())).await;
        assert_eq!(lines, ["服务"]);
    }

    #[derive(Default)]
    struct CountingObserver {
        lines: AtomicUsize,
        unexpected_exits: AtomicUsize,
    }

    impl OutputObserver for CountingObserver {
        fn on_line(&self, _line: &str) {
            self.lines.fetch_add(1, Ordering::SeqCst);
        }

        fn on_stderr_line(&self, _line: &str) {}

        fn on_unexpected_exit(&self) {
            self.unexpected_exits.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stop_lets_the_server_finish_its_shutdown_output() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("server.sh"),
            r#"echo "ready"
while IFS= read -r line; do
  if [ "$line" = "stop" ]; then
    echo "Stopping server..."; sleep 0.3
    echo "Saving..." >&2; sleep 0.3
    echo "Quit correctly"; sleep 0.3
    touch saved_marker
    exit 0
  fi
done
"#,
        )
        .unwrap();
        let start_info = ProcessStartInfo {
            target: PathBuf::from("/bin/sh"),
            args: vec!["server.sh".to_string()],
            working_dir: dir.path().to_path_buf(),
            envs: HashMap::new(),
        };
        let observer = Arc::new(CountingObserver::default());

        let process = InstanceProcess::spawn(&start_info, Encoding::UTF8, observer.clone()).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(10), async {
            while observer.lines.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let status = process.stop("stop").await.unwrap();

        assert!(status.success());
        assert!(dir.path().join("saved_marker").exists());
        assert_eq!(observer.lines.load(Ordering::SeqCst), 1);
        assert_eq!(observer.unexpected_exits.load(Ordering::SeqCst), 0);
    }
}
