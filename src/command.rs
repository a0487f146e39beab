//! External program execution
//!
//! Everything the harness learns about the system comes from running a
//! program and reading its output. [`CommandRunner`] is the seam between
//! the checks and the operating system so checks can be exercised against
//! scripted output.

use crate::error::{QaError, Result};
use log::debug;
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Captured result of a finished program
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs external programs
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args` and capture its output.
    ///
    /// Implementations return the output whatever the exit status is;
    /// only a failure to start the program is an error.
    fn output(&self, program: &str, args: &[&str]) -> Result<CommandOutput>;

    /// Run `program` and require a zero exit status, returning stdout
    fn run(&self, program: &str, args: &[&str]) -> Result<String> {
        let output = self.output(program, args)?;
        if output.is_success() {
            Ok(output.stdout)
        } else {
            Err(QaError::CommandFailed {
                program: program.to_string(),
                args: args.iter().map(|a| a.to_string()).collect(),
                code: output.code,
                stdout: output.stdout,
                stderr: output.stderr,
            })
        }
    }
}

/// Runs programs on the host with `std::process::Command`
#[derive(Debug, Clone, Default)]
pub struct SystemRunner {
    sudo: bool,
}

impl SystemRunner {
    pub fn new() -> Self {
        Self { sudo: false }
    }

    /// Runner that prefixes every program with `sudo`
    pub fn privileged() -> Self {
        Self { sudo: true }
    }
}

impl CommandRunner for SystemRunner {
    fn output(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        let mut command = if self.sudo {
            let mut c = Command::new("sudo");
            c.arg(program);
            c
        } else {
            Command::new(program)
        };
        command.args(args);

        debug!("Running {}{} {}", if self.sudo { "sudo " } else { "" }, program, args.join(" "));

        let output = command.output()?;
        let result = CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        debug!("{} exited with {:?}", program, result.code);
        Ok(result)
    }
}

/// Refuses to start commands once its abort flag is raised
///
/// A command already running when the flag goes up is left to finish.
pub struct AbortableRunner {
    inner: Arc<dyn CommandRunner>,
    abort: Arc<AtomicBool>,
}

impl AbortableRunner {
    pub fn new(inner: Arc<dyn CommandRunner>, abort: Arc<AtomicBool>) -> Self {
        Self { inner, abort }
    }
}

impl CommandRunner for AbortableRunner {
    fn output(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        if self.abort.load(Ordering::SeqCst) {
            return Err(QaError::Timeout(format!(
                "`{program} {}` not started, the case was aborted",
                args.join(" ")
            )));
        }
        self.inner.output(program, args)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted runner used by unit tests across the crate

    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    type Matcher = Box<dyn Fn(&str) -> bool + Send + Sync>;

    /// Replays canned output for commands whose joined command line
    /// matches a rule. Rules added with [`ScriptedRunner::once`] are
    /// consumed in order before falling back to persistent rules.
    #[derive(Default)]
    pub struct ScriptedRunner {
        once: Mutex<VecDeque<(String, CommandOutput)>>,
        always: Mutex<Vec<(Matcher, CommandOutput)>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedRunner {
        pub fn new() -> Self {
            Self::default()
        }

        /// Answer the next command starting with `prefix` once
        pub fn once(self, prefix: &str, output: CommandOutput) -> Self {
            self.once
                .lock()
                .unwrap()
                .push_back((prefix.to_string(), output));
            self
        }

        /// Answer every command starting with `prefix`
        pub fn always(self, prefix: &str, output: CommandOutput) -> Self {
            let prefix = prefix.to_string();
            self.always
                .lock()
                .unwrap()
                .push((Box::new(move |line: &str| line.starts_with(&prefix)), output));
            self
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        pub fn count(&self, prefix: &str) -> usize {
            self.calls()
                .iter()
                .filter(|c| c.starts_with(prefix))
                .count()
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn output(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
            let line = std::iter::once(program)
                .chain(args.iter().copied())
                .collect::<Vec<_>>()
                .join(" ");
            self.calls.lock().unwrap().push(line.clone());

            {
                let mut once = self.once.lock().unwrap();
                if let Some(pos) = once.iter().position(|(p, _)| line.starts_with(p.as_str())) {
                    let (_, output) = once.remove(pos).unwrap();
                    return Ok(output);
                }
            }

            let always = self.always.lock().unwrap();
            match always.iter().find(|(m, _)| m(&line)) {
                Some((_, output)) => Ok(output.clone()),
                None => Err(QaError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("no scripted output for `{line}`"),
                ))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedRunner;
    use super::*;

    #[test]
    fn test_run_returns_stdout_on_success() {
        let runner = ScriptedRunner::new().always("echo", CommandOutput::success("hi\n"));
        assert_eq!(runner.run("echo", &["hi"]).unwrap(), "hi\n");
    }

    #[test]
    fn test_run_maps_nonzero_exit() {
        let runner =
            ScriptedRunner::new().always("ping", CommandOutput::failure(1, "unreachable"));
        let err = runner.run("ping", &["-c", "1", "10.0.0.1"]).unwrap_err();
        match err {
            QaError::CommandFailed {
                program, args, code, ..
            } => {
                assert_eq!(program, "ping");
                assert_eq!(args, vec!["-c", "1", "10.0.0.1"]);
                assert_eq!(code, Some(1));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_once_rules_take_priority() {
        let runner = ScriptedRunner::new()
            .always("nordvpn status", CommandOutput::success("Status: Disconnected"))
            .once("nordvpn status", CommandOutput::success("Status: Connected"));

        assert_eq!(runner.run("nordvpn", &["status"]).unwrap(), "Status: Connected");
        assert_eq!(runner.run("nordvpn", &["status"]).unwrap(), "Status: Disconnected");
        assert_eq!(runner.count("nordvpn status"), 2);
    }

    #[test]
    fn test_abortable_runner_stops_starting_commands() {
        let inner = Arc::new(ScriptedRunner::new().always("nordvpn", CommandOutput::success("ok")));
        let abort = Arc::new(AtomicBool::new(false));
        let runner = AbortableRunner::new(inner.clone(), abort.clone());

        assert_eq!(runner.run("nordvpn", &["status"]).unwrap(), "ok");
        abort.store(true, Ordering::SeqCst);

        let err = runner.run("nordvpn", &["disconnect"]).unwrap_err();
        assert!(matches!(err, QaError::Timeout(ref m) if m.contains("nordvpn disconnect")));
        assert_eq!(inner.calls(), vec!["nordvpn status"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_system_runner_captures_output() {
        let runner = SystemRunner::new();
        let out = runner.output("sh", &["-c", "echo out; echo err >&2; exit 3"]).unwrap();
        assert_eq!(out.code, Some(3));
        assert_eq!(out.stdout, "out\n");
        assert_eq!(out.stderr, "err\n");
    }

    #[test]
    fn test_system_runner_missing_program() {
        let runner = SystemRunner::new();
        let err = runner.output("definitely-not-a-real-program-vpnqa", &[]).unwrap_err();
        assert!(matches!(err, QaError::Io(_)));
    }
}
