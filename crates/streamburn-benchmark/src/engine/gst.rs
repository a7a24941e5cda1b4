use async_trait::async_trait;
use regex::Regex;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::{mpsc, OnceCell};
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use super::{FrameCounter, Pipeline, PipelineDescriptor, PipelineEngine, PipelineError};

const DEFAULT_LAUNCHER: &str = "gst-launch-1.0";
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const READY_TIMEOUT: Duration = Duration::from_secs(15);
const PLAYING_MARKER: &str = "Setting pipeline to PLAYING";
const FATAL_MARKERS: &[&str] = &["erroneous pipeline", "ERROR:"];

/// Runs each instance as its own `gst-launch-1.0 -v` process and counts the
/// `last-message = chain` lines its counter element prints per buffer.
pub struct GstLaunchEngine {
    program: String,
    prefix_args: Vec<String>,
    probe_timeout: Duration,
    ready_timeout: Duration,
    launcher: OnceCell<LauncherStatus>,
}

#[derive(Debug, Clone)]
enum LauncherStatus {
    Ready,
    Missing,
    Broken(String),
}

impl GstLaunchEngine {
    pub fn new(launcher: impl Into<String>) -> Self {
        Self::with_command(launcher, Vec::new())
    }

    /// Launch through a wrapper, e.g. `sh run-gst.sh`.
    pub fn with_command(program: impl Into<String>, prefix_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            prefix_args,
            probe_timeout: PROBE_TIMEOUT,
            ready_timeout: READY_TIMEOUT,
            launcher: OnceCell::new(),
        }
    }

    /// Bound on the one-time `--version` check.
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// How long a started instance may take to reach PLAYING.
    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.prefix_args);
        cmd
    }

    async fn ensure_launcher(&self) -> Result<(), PipelineError> {
        let status = self.launcher.get_or_init(|| self.probe_launcher()).await;
        match status {
            LauncherStatus::Ready => Ok(()),
            LauncherStatus::Missing => Err(PipelineError::LauncherNotFound(self.program.clone())),
            LauncherStatus::Broken(reason) => Err(PipelineError::Construction(reason.clone())),
        }
    }

    async fn probe_launcher(&self) -> LauncherStatus {
        let status = self
            .command()
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();

        match tokio::time::timeout(self.probe_timeout, status).await {
            Ok(Ok(s)) if s.success() => LauncherStatus::Ready,
            Ok(Ok(s)) => {
                LauncherStatus::Broken(format!("{} --version exited with {}", self.program, s))
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => LauncherStatus::Missing,
            Ok(Err(e)) => LauncherStatus::Broken(format!("{}: {}", self.program, e)),
            Err(_) => LauncherStatus::Broken(format!(
                "{} --version did not answer within {:?}",
                self.program, self.probe_timeout
            )),
        }
    }
}

impl Default for GstLaunchEngine {
    fn default() -> Self {
        Self::new(DEFAULT_LAUNCHER)
    }
}

#[async_trait]
impl PipelineEngine for GstLaunchEngine {
    fn name(&self) -> &'static str {
        "gst-launch"
    }

    #[instrument(skip(self, descriptor, counter), fields(instance = %descriptor.counter_name))]
    async fn create(
        &self,
        descriptor: &PipelineDescriptor,
        counter: FrameCounter,
    ) -> Result<Box<dyn Pipeline>, PipelineError> {
        self.ensure_launcher().await?;

        let pattern = Regex::new(&format!(
            r":{}: last-message = chain",
            regex::escape(&descriptor.counter_name)
        ))
        .map_err(|e| PipelineError::Construction(e.to_string()))?;

        debug!("Prepared gst-launch pipeline on {}", descriptor.device);
        Ok(Box::new(GstLaunchPipeline {
            command: self.command(),
            description: descriptor.description.clone(),
            pattern,
            counter,
            ready_timeout: self.ready_timeout,
            child: None,
            readers: Vec::new(),
        }))
    }
}

/// What a launching instance reports before it is declared running.
#[derive(Debug)]
enum Startup {
    Playing,
    Diagnostic(String),
}

struct GstLaunchPipeline {
    command: Command,
    description: String,
    pattern: Regex,
    counter: FrameCounter,
    ready_timeout: Duration,
    child: Option<Child>,
    readers: Vec<JoinHandle<()>>,
}

impl GstLaunchPipeline {
    fn abort_readers(&mut self) {
        for reader in self.readers.drain(..) {
            reader.abort();
        }
    }
}

#[async_trait]
impl Pipeline for GstLaunchPipeline {
    /// Returns once the launcher reports PLAYING. A launcher that exits, logs
    /// an error or stays silent past the ready timeout is a construction
    /// failure.
    async fn start(&mut self) -> Result<(), PipelineError> {
        let mut child = self
            .command
            .arg("-v")
            .arg(&self.description)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            let _ = child.kill().await;
            return Err(PipelineError::Construction("output not captured".into()));
        };

        let (events_tx, mut events) = mpsc::unbounded_channel();
        self.readers.push(tokio::spawn(read_stdout(
            stdout,
            self.pattern.clone(),
            self.counter.clone(),
            events_tx.clone(),
        )));
        self.readers.push(tokio::spawn(read_stderr(stderr, events_tx)));

        match await_playing(&mut child, &mut events, self.ready_timeout).await {
            Ok(()) => {
                self.child = Some(child);
                Ok(())
            }
            Err(e) => {
                let _ = child.kill().await;
                self.abort_readers();
                Err(e)
            }
        }
    }

    async fn stop(&mut self) -> Result<(), PipelineError> {
        self.abort_readers();
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        if let Ok(Some(status)) = child.try_wait() {
            debug!("gst-launch already exited with {}", status);
            return Ok(());
        }
        child
            .kill()
            .await
            .map_err(|e| PipelineError::Stop(e.to_string()))
    }
}

async fn await_playing(
    child: &mut Child,
    events: &mut mpsc::UnboundedReceiver<Startup>,
    timeout: Duration,
) -> Result<(), PipelineError> {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut diagnostics = Vec::new();
    let mut streams_open = true;

    loop {
        tokio::select! {
            event = events.recv(), if streams_open => match event {
                Some(Startup::Playing) => return Ok(()),
                Some(Startup::Diagnostic(line)) => {
                    if FATAL_MARKERS.iter().any(|m| line.contains(m)) {
                        return Err(PipelineError::Construction(line));
                    }
                    diagnostics.push(line);
                }
                None => streams_open = false,
            },
            status = child.wait() => {
                let status = status?;
                // Output still buffered in the pipes may explain the exit.
                while let Ok(Some(event)) = tokio::time::timeout_at(deadline, events.recv()).await {
                    if let Startup::Diagnostic(line) = event {
                        diagnostics.push(line);
                    }
                }
                let reason = if diagnostics.is_empty() {
                    format!("gst-launch exited with {} before PLAYING", status)
                } else {
                    format!("gst-launch exited with {}: {}", status, diagnostics.join("; "))
                };
                return Err(PipelineError::Construction(reason));
            }
            _ = tokio::time::sleep_until(deadline) => {
                return Err(PipelineError::Construction(format!(
                    "pipeline did not reach PLAYING within {:?}",
                    timeout
                )));
            }
        }
    }
}

async fn read_stdout(
    stdout: ChildStdout,
    pattern: Regex,
    counter: FrameCounter,
    events: mpsc::UnboundedSender<Startup>,
) {
    let mut ready = Some(events);
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if pattern.is_match(&line) => counter.record(),
            Ok(Some(line)) if line.contains(PLAYING_MARKER) => {
                if let Some(tx) = ready.take() {
                    let _ = tx.send(Startup::Playing);
                }
            }
            Ok(Some(_)) => {}
            Ok(None) => break,
            Err(e) => {
                warn!("gst-launch output unreadable: {}", e);
                break;
            }
        }
    }
}

async fn read_stderr(stderr: ChildStderr, events: mpsc::UnboundedSender<Startup>) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!("gst-launch: {}", line);
        let _ = events.send(Startup::Diagnostic(line));
    }
}
