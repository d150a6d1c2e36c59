//! Abstractions for host access so evidence gathering can be mocked.
//!
//! The classifier never touches `std::fs` or `std::process` directly. It reads
//! through [`FileSystem`] and [`CommandRunner`], which have real implementations
//! for production and in-memory ones under [`crate::collector::mock`] for tests.

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// Abstraction for filesystem operations.
pub trait FileSystem: Send + Sync {
    /// Reads the entire contents of a file as a string.
    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    /// Checks if a path exists.
    fn exists(&self, path: &Path) -> bool;

    /// Lists entries in a directory.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;
}

/// Real filesystem implementation that delegates to `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFs;

impl RealFs {
    pub fn new() -> Self {
        Self
    }
}

impl FileSystem for RealFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let entries = std::fs::read_dir(path)?;
        let mut paths = Vec::new();
        for entry in entries {
            paths.push(entry?.path());
        }
        Ok(paths)
    }
}

/// Captured result of an external command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `true` if the process exited with status 0.
    pub success: bool,
    /// Standard output, lossily decoded.
    pub stdout: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            stdout: stdout.into(),
        }
    }

    pub fn failed(stdout: impl Into<String>) -> Self {
        Self {
            success: false,
            stdout: stdout.into(),
        }
    }
}

/// Abstraction for running short-lived external tools.
///
/// Implementations must never block longer than `timeout`. A tool that is not
/// installed yields `io::ErrorKind::NotFound`, one that overruns yields
/// `io::ErrorKind::TimedOut`.
pub trait CommandRunner: Send + Sync {
    fn run(&self, program: &str, args: &[&str], timeout: Duration) -> io::Result<CommandOutput>;
}

/// Runs commands with `std::process`, polling for exit until the deadline.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealCommands;

impl RealCommands {
    pub fn new() -> Self {
        Self
    }
}

/// Poll period while waiting for a child to exit.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

impl CommandRunner for RealCommands {
    fn run(&self, program: &str, args: &[&str], timeout: Duration) -> io::Result<CommandOutput> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        // Drain stdout on a separate thread: tools like `sc query` print more than
        // a pipe buffer holds and would otherwise stall until the deadline.
        let reader = child.stdout.take().map(|mut stdout| {
            thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = stdout.read_to_end(&mut buf);
                buf
            })
        });

        let start = Instant::now();
        let status = loop {
            match child.try_wait()? {
                Some(status) => break status,
                None => {
                    if start.elapsed() >= timeout {
                        let _ = child.kill();
                        let _ = child.wait();
                        if let Some(handle) = reader {
                            let _ = handle.join();
                        }
                        return Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            format!("{} did not exit within {:?}", program, timeout),
                        ));
                    }
                    thread::sleep(POLL_INTERVAL);
                }
            }
        };

        let bytes = reader
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        Ok(CommandOutput {
            success: status.success(),
            stdout: String::from_utf8_lossy(&bytes).into_owned(),
        })
    }
}
