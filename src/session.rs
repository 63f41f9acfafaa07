//! Command execution abstraction used to run build scripts and, when
//! `--external-builder` is selected, `dpkg-buildpackage`.
//!
//! Grounded on the teacher crate's `PlainSession`: a thin wrapper around
//! [`std::process::Command`] behind a trait, so tests can swap in a fake
//! executor without touching the real filesystem or network.

use std::collections::HashMap;
use std::path::Path;

/// Errors raised while running a command through a [`Session`].
#[derive(Debug)]
pub enum Error {
    /// The process could not even be spawned (binary not found, permissions, ...).
    Io(std::io::Error),
    /// The process ran and exited with a non-zero status.
    NonZeroExit {
        /// Exit code, `None` if the process was killed by a signal.
        code: Option<i32>,
        /// Captured standard error, truncated to a reasonable size upstream.
        stderr: String,
    },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Io(e) => write!(f, "failed to run command: {e}"),
            Error::NonZeroExit { code, stderr } => {
                write!(f, "command exited with {code:?}")?;
                if !stderr.is_empty() {
                    write!(f, ": {stderr}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

/// Runs a command line, optionally in a given working directory and with
/// additional environment variables.
pub trait Session: Send + Sync {
    /// Run `argv[0] argv[1..]` to completion and return its captured stdout.
    fn check_output(
        &self,
        argv: &[&str],
        cwd: Option<&Path>,
        env: Option<&HashMap<String, String>>,
    ) -> Result<Vec<u8>, Error>;

    /// Run `argv[0] argv[1..]` to completion, inheriting stdout/stderr.
    fn check_call(
        &self,
        argv: &[&str],
        cwd: Option<&Path>,
        env: Option<&HashMap<String, String>>,
    ) -> Result<(), Error>;
}

/// A [`Session`] that runs commands directly on the host via
/// [`std::process::Command`]. No sandboxing, no user switching — sandboxing
/// user build scripts is an explicit non-goal of this tool.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainSession;

impl PlainSession {
    /// Construct a new [`PlainSession`].
    pub fn new() -> Self {
        PlainSession
    }

    fn build_command(
        &self,
        argv: &[&str],
        cwd: Option<&Path>,
        env: Option<&HashMap<String, String>>,
    ) -> std::process::Command {
        let mut cmd = std::process::Command::new(argv[0]);
        cmd.args(&argv[1..]);
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }
        if let Some(env) = env {
            cmd.envs(env);
        }
        cmd
    }
}

impl Session for PlainSession {
    fn check_output(
        &self,
        argv: &[&str],
        cwd: Option<&Path>,
        env: Option<&HashMap<String, String>>,
    ) -> Result<Vec<u8>, Error> {
        let output = self.build_command(argv, cwd, env).output()?;
        if output.status.success() {
            Ok(output.stdout)
        } else {
            Err(Error::NonZeroExit {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
    }

    fn check_call(
        &self,
        argv: &[&str],
        cwd: Option<&Path>,
        env: Option<&HashMap<String, String>>,
    ) -> Result<(), Error> {
        let status = self.build_command(argv, cwd, env).status()?;
        if status.success() {
            Ok(())
        } else {
            Err(Error::NonZeroExit {
                code: status.code(),
                stderr: String::new(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_output_captures_stdout() {
        let session = PlainSession::new();
        let out = session
            .check_output(&["echo", "hello"], None, None)
            .unwrap();
        assert_eq!(String::from_utf8(out).unwrap().trim(), "hello");
    }

    #[test]
    fn check_call_fails_on_nonzero_exit() {
        let session = PlainSession::new();
        let err = session.check_call(&["false"], None, None).unwrap_err();
        assert!(matches!(err, Error::NonZeroExit { .. }));
    }

    #[test]
    fn cwd_is_honoured() {
        let dir = tempfile::tempdir().unwrap();
        let session = PlainSession::new();
        let out = session.check_output(&["pwd"], Some(dir.path()), None).unwrap();
        let printed = String::from_utf8(out).unwrap();
        assert_eq!(printed.trim(), dir.path().to_str().unwrap());
    }
}
