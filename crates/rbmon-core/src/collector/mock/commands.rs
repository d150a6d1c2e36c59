//! Scripted command runner for tests.

use crate::collector::traits::{CommandOutput, CommandRunner};
use std::collections::HashMap;
use std::io;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone)]
enum Scripted {
    Output(CommandOutput),
    TimedOut,
}

/// Command runner that answers from a table keyed by the full command line.
///
/// Unknown commands fail with `NotFound`, which is what a missing tool looks
/// like to the real runner. Every invocation is recorded.
#[derive(Debug, Default)]
pub struct MockCommands {
    responses: HashMap<String, Scripted>,
    calls: Mutex<Vec<String>>,
}

impl MockCommands {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the output for `program args...`.
    pub fn add(&mut self, command_line: &str, output: CommandOutput) {
        self.responses
            .insert(command_line.to_string(), Scripted::Output(output));
    }

    /// Registers a command that never finishes within its timeout.
    pub fn add_timeout(&mut self, command_line: &str) {
        self.responses
            .insert(command_line.to_string(), Scripted::TimedOut);
    }

    /// Command lines invoked so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

fn command_line(program: &str, args: &[&str]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

impl CommandRunner for MockCommands {
    fn run(&self, program: &str, args: &[&str], _timeout: Duration) -> io::Result<CommandOutput> {
        let line = command_line(program, args);
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(line.clone());
        }
        match self.responses.get(&line) {
            Some(Scripted::Output(out)) => Ok(out.clone()),
            Some(Scripted::TimedOut) => Err(io::Error::new(io::ErrorKind::TimedOut, line)),
            None => Err(io::Error::new(io::ErrorKind::NotFound, line)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_commands_lookup() {
        let mut cmds = MockCommands::new();
        cmds.add("systemd-detect-virt", CommandOutput::ok("kvm\n"));
        cmds.add_timeout("systeminfo");

        let out = cmds
            .run("systemd-detect-virt", &[], Duration::from_secs(1))
            .unwrap();
        assert_eq!(out.stdout, "kvm\n");

        let err = cmds.run("systeminfo", &[], Duration::from_secs(1)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);

        let err = cmds.run("sysctl", &["-n", "x"], Duration::from_secs(1)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);

        assert_eq!(
            cmds.calls(),
            vec!["systemd-detect-virt", "systeminfo", "sysctl -n x"]
        );
    }
}
