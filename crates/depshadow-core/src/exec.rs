//! External toolchain commands (`dotnet new sln`, `dotnet sln add`).

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Runs a program to completion and reports its exit status.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, cwd: &Path, program: &str, args: &[String]) -> Result<i32>;
}

/// Runs commands as child processes, capturing their output into the log.
#[derive(Clone, Debug, Default)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, cwd: &Path, program: &str, args: &[String]) -> Result<i32> {
        let command = command_line(program, args);
        debug!(cwd = %cwd.display(), %command, "running");

        let output = tokio::process::Command::new(program)
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| Error::CommandSpawn {
                command: command.clone(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
            debug!(program, "{line}");
        }
        let code = output.status.code().unwrap_or(-1);
        if code != 0 {
            let stderr = String::from_utf8_lossy(&output.stderr);
            for line in stderr.lines().filter(|l| !l.trim().is_empty()) {
                warn!(program, "{line}");
            }
        }
        Ok(code)
    }
}

/// `program arg1 arg2` for messages.
pub fn command_line(program: &str, args: &[String]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Run and turn a non-zero exit into `CommandFailed`.
pub async fn run_checked(
    runner: &dyn CommandRunner,
    cwd: &Path,
    program: &str,
    args: &[String],
) -> Result<()> {
    let status = runner.run(cwd, program, args).await?;
    if status != 0 {
        return Err(Error::CommandFailed {
            command: command_line(program, args),
            status,
        });
    }
    Ok(())
}
