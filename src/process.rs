//! Centralized command execution with consistent error handling.
//!
//! Every external tool the builder drives (debootstrap, apt, mksquashfs,
//! xorriso, mount, ...) goes through this module. Commands are built from a
//! program name and an argument list; arguments are never interpolated into
//! a shell string, so paths and version tags cannot break out of their
//! argument position. The few places that genuinely need a composed shell
//! pipeline go through [`run_in_chroot`] with values quoted via
//! [`crate::shell::quote`].

use anyhow::{Context, Result};
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};

/// Result of a command execution.
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// Exit status of the command.
    pub status: ExitStatus,
    /// Captured stdout as a string.
    pub stdout: String,
    /// Captured stderr as a string.
    pub stderr: String,
}

impl CommandResult {
    /// Returns true if the command exited successfully.
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Get the exit code, or -1 if terminated by signal.
    pub fn code(&self) -> i32 {
        self.status.code().unwrap_or(-1)
    }

    /// Get stdout, trimmed of whitespace.
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }

    /// Get stderr, trimmed of whitespace.
    pub fn stderr_trimmed(&self) -> &str {
        self.stderr.trim()
    }
}

/// Builder for configuring command execution.
pub struct Cmd {
    program: String,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    current_dir: Option<std::path::PathBuf>,
    /// If true, don't fail on non-zero exit.
    allow_fail: bool,
    /// Custom error message prefix.
    error_prefix: Option<String>,
}

impl Cmd {
    /// Create a new command builder.
    pub fn new(program: impl AsRef<str>) -> Self {
        Self {
            program: program.as_ref().to_string(),
            args: Vec::new(),
            envs: Vec::new(),
            current_dir: None,
            allow_fail: false,
            error_prefix: None,
        }
    }

    /// Add a single argument.
    pub fn arg(mut self, arg: impl AsRef<str>) -> Self {
        self.args.push(arg.as_ref().to_string());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for arg in args {
            self.args.push(arg.as_ref().to_string());
        }
        self
    }

    /// Add a path as an argument.
    pub fn arg_path(mut self, path: &Path) -> Self {
        self.args.push(path.to_string_lossy().into_owned());
        self
    }

    /// Set an environment variable for the child.
    pub fn env(mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        self.envs
            .push((key.as_ref().to_string(), value.as_ref().to_string()));
        self
    }

    /// Set the working directory.
    pub fn dir(mut self, dir: &Path) -> Self {
        self.current_dir = Some(dir.to_path_buf());
        self
    }

    /// Allow non-zero exit codes without failing.
    pub fn allow_fail(mut self) -> Self {
        self.allow_fail = true;
        self
    }

    /// Set a custom error message prefix.
    pub fn error_msg(mut self, msg: impl AsRef<str>) -> Self {
        self.error_prefix = Some(msg.as_ref().to_string());
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        for (k, v) in &self.envs {
            cmd.env(k, v);
        }
        if let Some(ref dir) = self.current_dir {
            cmd.current_dir(dir);
        }
        cmd
    }

    fn fail(&self, code: i32, stderr: &str) -> anyhow::Error {
        let prefix = self
            .error_prefix
            .clone()
            .unwrap_or_else(|| format!("'{}' failed", self.program));
        if stderr.is_empty() {
            anyhow::anyhow!("{} (exit code {})", prefix, code)
        } else {
            anyhow::anyhow!("{} (exit code {}):\n{}", prefix, code, stderr)
        }
    }

    /// Run the command and capture output.
    pub fn run(self) -> Result<CommandResult> {
        let output = self.command().output().with_context(|| {
            format!("Failed to execute '{}'. Is it installed?", self.program)
        })?;

        let result = CommandResult {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !self.allow_fail && !result.success() {
            return Err(self.fail(result.code(), result.stderr_trimmed()));
        }

        Ok(result)
    }

    /// Run the command, forwarding child stdout line-by-line with an indent.
    ///
    /// Used for long-running tools (debootstrap, apt, mksquashfs, xorriso)
    /// so operators see progress. Stderr is inherited so errors stay visible.
    pub fn run_streamed(self) -> Result<ExitStatus> {
        let mut child = self
            .command()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| {
                format!("Failed to execute '{}'. Is it installed?", self.program)
            })?;

        if let Some(stdout) = child.stdout.take() {
            for line in BufReader::new(stdout).lines() {
                let line = line.unwrap_or_default();
                println!("  {}", line);
            }
        }

        let status = child
            .wait()
            .with_context(|| format!("Failed to wait for '{}'", self.program))?;

        if !self.allow_fail && !status.success() {
            return Err(self.fail(status.code().unwrap_or(-1), ""));
        }

        Ok(status)
    }
}

/// Run a shell script inside a chroot, capturing output.
///
/// The rootfs path and the script are separate argv entries; dynamic values
/// embedded in `script` must be pre-quoted by the caller.
pub fn run_in_chroot(rootfs: &Path, script: &str) -> Result<CommandResult> {
    Cmd::new("chroot")
        .arg_path(rootfs)
        .args(["/bin/sh", "-c"])
        .arg(script)
        .error_msg(format!("chroot command failed: {}", script))
        .run()
}

/// Run a shell script inside a chroot with indented streaming output.
pub fn run_in_chroot_streamed(rootfs: &Path, script: &str) -> Result<ExitStatus> {
    Cmd::new("chroot")
        .arg_path(rootfs)
        .args(["/bin/sh", "-c"])
        .arg(script)
        .error_msg(format!("chroot command failed: {}", script))
        .run_streamed()
}

/// Run a command with arguments. Fails with stderr on error.
pub fn run<I, S>(program: &str, args: I) -> Result<CommandResult>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    Cmd::new(program).args(args).run()
}

/// Run a shell command via `sh -c`.
///
/// Only for composed pipelines (redirection, `&&`); quote embedded values
/// with [`crate::shell::quote`].
pub fn shell(command: &str) -> Result<CommandResult> {
    run("sh", ["-c", command])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_success() {
        let result = run("echo", ["hello"]).unwrap();
        assert!(result.success());
        assert_eq!(result.stdout_trimmed(), "hello");
    }

    #[test]
    fn test_run_captures_stderr() {
        // `ls` on a non-existent file writes to stderr
        let result = Cmd::new("ls")
            .arg("/nonexistent_path_12345")
            .allow_fail()
            .run()
            .unwrap();

        assert!(!result.success());
        assert!(!result.stderr.is_empty());
    }

    #[test]
    fn test_run_failure_includes_stderr() {
        let err = run("ls", ["/nonexistent_path_12345"]).unwrap_err();
        let msg = err.to_string();

        assert!(msg.contains("No such file") || msg.contains("cannot access"));
    }

    #[test]
    fn test_missing_program_is_spawn_error() {
        let err = Cmd::new("definitely_not_a_real_command_12345")
            .run()
            .unwrap_err();
        assert!(err.to_string().contains("Is it installed?"));
    }

    #[test]
    fn test_args_are_not_shell_interpreted() {
        // A hostile "path" stays a single argument.
        let result = run("echo", ["$(touch /tmp/limeiso-pwned); rm -rf /"]).unwrap();
        assert!(result.stdout.contains("$(touch"));
    }

    #[test]
    fn test_env_passed_to_child() {
        let result = Cmd::new("sh")
            .args(["-c", "printf %s \"$LIMEISO_TEST_VAR\""])
            .env("LIMEISO_TEST_VAR", "on")
            .run()
            .unwrap();
        assert_eq!(result.stdout_trimmed(), "on");
    }

    #[test]
    fn test_custom_error_message() {
        let err = Cmd::new("false")
            .error_msg("Custom build step failed")
            .run()
            .unwrap_err();

        assert!(err.to_string().contains("Custom build step failed"));
    }

    #[test]
    fn test_allow_fail() {
        let result = Cmd::new("false").allow_fail().run().unwrap();

        assert!(!result.success());
        assert_eq!(result.code(), 1);
    }

    #[test]
    fn test_run_streamed_success() {
        let status = Cmd::new("echo").arg("streamed").run_streamed().unwrap();
        assert!(status.success());
    }

    #[test]
    fn test_run_streamed_failure() {
        let err = Cmd::new("false").run_streamed().unwrap_err();
        assert!(err.to_string().contains("'false' failed"));
    }

    #[test]
    fn test_shell_command() {
        let result = shell("echo hello && echo world").unwrap();
        assert!(result.success());
        assert!(result.stdout.contains("hello"));
        assert!(result.stdout.contains("world"));
    }

    #[test]
    fn test_run_in_directory() {
        let result = Cmd::new("pwd").dir(Path::new("/tmp")).run().unwrap();
        assert!(result.stdout_trimmed().contains("tmp"));
    }
}
