//! Transport abstraction for running PowerShell on a host.
//!
//! The [`Transport`] trait runs one script and returns its raw output,
//! allowing for different implementations (ssh, a scripted fake for tests).

use crate::error::{Error, Result};
use converge::Host;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use wait_timeout::ChildExt;

/// Remote shell that reads a PowerShell script from stdin.
const REMOTE_SHELL: &str = "powershell -NoProfile -NonInteractive -Command -";

/// Longest a single script may run; fixed-size disk creation is the slow case
const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Keepalive probes, so a dead connection is noticed before the command timeout
const SERVER_ALIVE_INTERVAL_SECS: u32 = 15;
const SERVER_ALIVE_COUNT_MAX: u32 = 4;

/// Raw output of one script.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs scripts on one host.
pub trait Transport: Send {
    /// Run a script. Only failures to run it at all are errors; a script
    /// that fails is reported through the output.
    fn run(&self, script: &str) -> Result<CommandOutput>;
}

/// Transport over the system `ssh` client.
#[derive(Debug, Clone)]
pub struct SshTransport {
    destination: String,
    port: u16,
    identity_file: Option<PathBuf>,
    connect_timeout_secs: u32,
    command_timeout: Duration,
}

impl SshTransport {
    /// Transport for a host's connection descriptor
    pub fn for_host(host: &Host) -> Self {
        let destination = match &host.user {
            Some(user) => format!("{user}@{}", host.address()),
            None => host.address().to_string(),
        };
        Self {
            destination,
            port: host.port,
            identity_file: host.identity_file.clone(),
            connect_timeout_secs: 10,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Error for a script still running after the command timeout
    pub fn timed_out(&self) -> Error {
        Error::Unreachable {
            message: format!(
                "no response from {} within {}s",
                self.destination,
                self.command_timeout.as_secs()
            ),
        }
    }

    /// Arguments passed to `ssh`
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout_secs),
            "-o".to_string(),
            format!("ServerAliveInterval={SERVER_ALIVE_INTERVAL_SECS}"),
            "-o".to_string(),
            format!("ServerAliveCountMax={SERVER_ALIVE_COUNT_MAX}"),
            "-p".to_string(),
            self.port.to_string(),
        ];
        if let Some(identity) = &self.identity_file {
            args.push("-i".to_string());
            args.push(identity.display().to_string());
        }
        args.push(self.destination.clone());
        args.push(REMOTE_SHELL.to_string());
        args
    }
}

impl Transport for SshTransport {
    fn run(&self, script: &str) -> Result<CommandOutput> {
        log::trace!("ssh {} <<<\n{script}", self.destination);

        let mut child = Command::new("ssh")
            .args(self.args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(script.as_bytes())?;
        }
        // Read while waiting; a full pipe would stall the child
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let Some(status) = child.wait_timeout(self.command_timeout)? else {
            log::warn!("killing ssh to {} after {}s", self.destination, self.command_timeout.as_secs());
            child.kill()?;
            child.wait()?;
            return Err(self.timed_out());
        };

        Ok(CommandOutput {
            stdout: collect(stdout)?,
            stderr: collect(stderr)?,
            exit_code: status.code(),
        })
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<io::Result<Vec<u8>>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            pipe.read_to_end(&mut buf)?;
        }
        Ok(buf)
    })
}

fn collect(reader: JoinHandle<io::Result<Vec<u8>>>) -> Result<String> {
    let bytes = reader
        .join()
        .map_err(|_| io::Error::other("output reader panicked"))??;
    Ok(String::from_utf8_lossy(&bytes).to_string())
}
