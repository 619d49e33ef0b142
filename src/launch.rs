//! Server process launcher.
//!
//! Resolves the executable (explicit override, else the well-known name on
//! the search path) and spawns it with the project root as working
//! directory. Launch failure degrades rather than aborts: the user gets one
//! warning and the caller falls back to a dead transport, leaving the
//! session alive so a later restart can pick up fixed configuration.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

use crate::host::{Notifier, ProjectRoot};
use crate::settings::ServerConfig;

/// Well-known server executable name, resolved via the search path when no
/// override is configured.
pub const DEFAULT_SERVER_EXE: &str = "oraide-language-server";

const EXIT_GRACE: Duration = Duration::from_secs(2);

/// Handle for a spawned server process. Owned by one client lifetime and
/// replaced, never reused, on restart. Dropping it kills the child.
pub(crate) struct ServerProcess {
    child: Child,
}

impl ServerProcess {
    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.child.stdin.take()
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    /// Wait briefly for the child to exit on its own, then kill it.
    pub async fn shutdown(mut self) {
        if tokio::time::timeout(EXIT_GRACE, self.child.wait())
            .await
            .is_err()
        {
            tracing::debug!("server process did not exit in time, killing");
            let _ = self.child.kill().await;
        }
    }
}

fn resolve_executable(config: &ServerConfig) -> Result<PathBuf, which::Error> {
    match &config.exe_override {
        Some(path) => Ok(path.clone()),
        None => which::which(DEFAULT_SERVER_EXE),
    }
}

/// Spawn the analysis server for `root`.
///
/// Returns `None` after reporting the failure — once, visibly — when the
/// executable cannot be resolved or spawned. stderr is captured only when
/// the config asks for file logging.
pub(crate) fn launch(
    config: &ServerConfig,
    root: &ProjectRoot,
    notifier: &dyn Notifier,
) -> Option<ServerProcess> {
    let exe = match resolve_executable(config) {
        Ok(exe) => exe,
        Err(err) => {
            report_failure(DEFAULT_SERVER_EXE, &err.to_string(), notifier);
            return None;
        }
    };

    let mut command = Command::new(&exe);
    command
        .current_dir(root.path())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(if config.log_to_file {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .kill_on_drop(true);

    match command.spawn() {
        Ok(child) => {
            tracing::info!(root = %root, exe = %exe.display(), "spawned language server");
            Some(ServerProcess { child })
        }
        Err(err) => {
            report_failure(&exe.display().to_string(), &err.to_string(), notifier);
            None
        }
    }
}

fn report_failure(exe: &str, detail: &str, notifier: &dyn Notifier) {
    let message = format!("Could not spawn `{exe}`: {detail}");
    tracing::warn!("{message}");
    notifier.show_warning(&message);
}
