//! Out-of-process fallback tasks and the interrupt signal that can cut them short.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::{Result, ScrapeError};

/// How a supervised task ended on its own.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Completion {
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl Completion {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn describe_exit(&self) -> String {
        match self.exit_code {
            Some(code) => format!("code {code}"),
            None => "signal".to_owned(),
        }
    }
}

#[async_trait]
pub trait RunningTask: Send {
    /// Wait for the task to exit. Dropping this future leaves the task running.
    async fn wait(&mut self) -> Result<Completion>;

    /// Forcibly terminate the task and reap it.
    async fn cancel(&mut self) -> Result<()>;
}

#[async_trait]
pub trait TaskLauncher: Send + Sync {
    /// Start an extraction of up to `max_tweets` posts for `handle`.
    async fn start(&self, handle: &str, max_tweets: usize) -> Result<Box<dyn RunningTask>>;
}

/// Runs `<program> [args..] <handle> <max_tweets>` as a child process.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: vec![],
        }
    }

    /// Arguments placed before the handle.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Full argument list for one account.
    pub fn command_args(&self, handle: &str, max_tweets: usize) -> Vec<String> {
        let mut args = self.args.clone();
        args.push(handle.to_owned());
        args.push(max_tweets.to_string());
        args
    }
}

#[async_trait]
impl TaskLauncher for ProcessLauncher {
    async fn start(&self, handle: &str, max_tweets: usize) -> Result<Box<dyn RunningTask>> {
        let mut command = Command::new(&self.program);
        command
            .args(self.command_args(handle, max_tweets))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| ScrapeError::Launch(format!("{}: {e}", self.program.display())))?;
        info!(program = %self.program.display(), handle, pid = ?child.id(), "Fallback task started");

        let stdout = child.stdout.take().map(|out| capture(out, handle.to_owned(), false));
        let stderr = child.stderr.take().map(|err| capture(err, handle.to_owned(), true));
        Ok(Box::new(ProcessTask {
            child,
            stdout,
            stderr,
        }))
    }
}

/// Forward a child's output lines to the log while keeping a copy.
fn capture<R>(reader: R, handle: String, is_stderr: bool) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        let mut captured = String::new();
        while let Ok(Some(line)) = lines.next_line().await {
            if is_stderr {
                warn!(handle = %handle, "[fallback] {line}");
            } else {
                info!(handle = %handle, "[fallback] {line}");
            }
            captured.push_str(&line);
            captured.push('\n');
        }
        captured
    })
}

struct ProcessTask {
    child: Child,
    stdout: Option<JoinHandle<String>>,
    stderr: Option<JoinHandle<String>>,
}

async fn join_output(handle: &mut Option<JoinHandle<String>>) -> String {
    match handle.take() {
        Some(h) => h.await.unwrap_or_default(),
        None => String::new(),
    }
}

#[async_trait]
impl RunningTask for ProcessTask {
    async fn wait(&mut self) -> Result<Completion> {
        let status = self.child.wait().await?;
        Ok(Completion {
            exit_code: status.code(),
            stdout: join_output(&mut self.stdout).await,
            stderr: join_output(&mut self.stderr).await,
        })
    }

    async fn cancel(&mut self) -> Result<()> {
        warn!(pid = ?self.child.id(), "Killing fallback task");
        self.child.kill().await?;
        Ok(())
    }
}

/// Fires once the user asks the run to stop.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }
}

impl Shutdown {
    pub fn channel() -> (ShutdownTrigger, Shutdown) {
        let (tx, rx) = watch::channel(false);
        (ShutdownTrigger { tx }, Shutdown { rx })
    }

    /// Never fires.
    pub fn never() -> Self {
        Self::channel().1
    }

    /// Fires on Ctrl-C.
    pub fn on_ctrl_c() -> Self {
        let (trigger, shutdown) = Self::channel();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received");
                trigger.trigger();
            }
        });
        shutdown
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves when triggered; pends forever if the trigger is gone without firing.
    pub async fn triggered(&mut self) {
        if self.rx.wait_for(|stopped| *stopped).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
