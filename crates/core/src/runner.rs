use std::process::{Command, Stdio};

use tracing::debug;

use crate::pipeline::Invocation;

/// Outcome of a finished stage process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunStatus {
    success: bool,
    code: Option<i32>,
}

impl RunStatus {
    pub fn success(&self) -> bool {
        self.success
    }

    /// OS exit code; None when the process died to a signal.
    pub fn code(&self) -> Option<i32> {
        self.code
    }

    pub fn ok() -> Self {
        Self {
            success: true,
            code: Some(0),
        }
    }

    pub fn from_code(code: i32) -> Self {
        Self {
            success: code == 0,
            code: Some(code),
        }
    }

    pub fn killed() -> Self {
        Self {
            success: false,
            code: None,
        }
    }
}

impl From<std::process::ExitStatus> for RunStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        Self {
            success: status.success(),
            code: status.code(),
        }
    }
}

/// Seam between the pipeline and the operating system. Stages run through
/// this trait so tests can substitute a recording fake.
pub trait ProcessRunner {
    fn run(&mut self, invocation: &Invocation) -> std::io::Result<RunStatus>;
}

/// Runs stage processes on the host with inherited stdio, blocking until
/// each one exits.
#[derive(Debug, Default)]
pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
    fn run(&mut self, invocation: &Invocation) -> std::io::Result<RunStatus> {
        debug!("exec: {}", invocation);

        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        if let Some(ref dir) = invocation.cwd {
            command.current_dir(dir);
        }

        let status = command.status()?;
        Ok(status.into())
    }
}
