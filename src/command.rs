//! Host command execution used for mounting, formatting, and ownership
//! changes.

use std::ffi::OsString;
use std::process::Command;

use thiserror::Error;

/// Errors raised when a host command cannot be started.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CommandError {
    /// Raised when the process cannot be spawned.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Error reported by the operating system.
        message: String,
    },
}

/// Result of running an external command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Describes the exit status for log lines and error messages.
    #[must_use]
    pub fn status_text(&self) -> String {
        let stderr = self.stderr.trim();
        match self.code {
            Some(code) if stderr.is_empty() => format!("exit status {code}"),
            Some(code) => format!("exit status {code}: {stderr}"),
            None if stderr.is_empty() => String::from("terminated without an exit status"),
            None => format!("terminated without an exit status: {stderr}"),
        }
    }
}

/// Abstraction over command execution to support fakes in tests.
pub trait CommandRunner {
    /// Runs `program` with the given arguments, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Spawn`] if the command cannot be started.
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, CommandError>;
}

/// Real command runner that shells out to the host operating system.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, CommandError> {
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|err| CommandError::Spawn {
                program: program.to_owned(),
                message: err.to_string(),
            })?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Runs a command and folds spawn failures and non-zero exits into one
/// message, returning `Ok(())` only on a zero exit.
pub(crate) fn run_checked<R: CommandRunner + ?Sized>(
    runner: &R,
    program: &str,
    args: &[OsString],
) -> Result<(), String> {
    match runner.run(program, args) {
        Ok(output) if output.is_success() => Ok(()),
        Ok(output) => Err(format!("{program} {}", output.status_text())),
        Err(err) => Err(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Some(0), "", "exit status 0")]
    #[case(Some(32), "", "exit status 32")]
    #[case(Some(1), " bad superblock \n", "exit status 1: bad superblock")]
    #[case(None, "", "terminated without an exit status")]
    #[case(None, "killed", "terminated without an exit status: killed")]
    fn status_text_describes_exit(
        #[case] code: Option<i32>,
        #[case] stderr: &str,
        #[case] expected: &str,
    ) {
        let output = CommandOutput {
            code,
            stdout: String::new(),
            stderr: stderr.to_owned(),
        };
        assert_eq!(output.status_text(), expected);
    }

    #[test]
    fn process_runner_reports_spawn_failure() {
        let err = ProcessCommandRunner
            .run("/nonexistent/ballast-test-binary", &[])
            .expect_err("spawn should fail");
        assert!(matches!(err, CommandError::Spawn { .. }));
    }
}
