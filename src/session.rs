//! Per-root workspace session: one protocol client bound to one server
//! process, with explicit lifecycle.
//!
//! The state machine is `Stopped → Starting → Running → Stopping → Stopped`,
//! re-enterable. `start` builds the client around a lazy transport factory
//! (config → spawn → logger → streams), registers the restart command, and
//! returns without waiting for the protocol handshake. `stop` awaits the
//! client's shutdown and then releases every accumulated disposable, even if
//! the shutdown reported a fault.

use std::sync::{Arc, Weak};

use tokio::sync::{Mutex, mpsc};

use crate::client::{
    ClientFactory, ClientOptions, DocumentFilter, LanguageClient, RevealOutputChannelOn,
    Transport, TransportFactory,
};
use crate::host::{CommandHandler, Disposable, Host, Notifier, ProjectRoot};
use crate::launch;
use crate::logfile::{self, LogfileEvent};
use crate::settings::{ServerConfig, SettingsSource};

/// Primary language identifier the client registers for.
pub const LANGUAGE_ID: &str = "miniyaml";

/// Legacy identifier still accepted at activation time.
pub const LEGACY_LANGUAGE_ID: &str = "yaml";

/// Command id bound to each live session.
pub const RESTART_COMMAND: &str = "oraide.server.restart";

/// Settings namespace synchronized with the server.
pub const CONFIG_SECTION: &str = "oraide";

const OUTPUT_CHANNEL_NAME: &str = "OpenRA IDE";

const DIAGNOSTICS_NAME: &str = "OpenRA IDE";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session is already running")]
    AlreadyRunning,
    #[error("session is not running")]
    NotRunning,
    #[error("another lifecycle operation is in progress")]
    Busy,
    #[error("invalid document scope pattern: {0}")]
    InvalidScope(#[from] globset::Error),
}

/// Shared handle to a session; the registry and the restart command both
/// hold one.
pub type SharedSession = Arc<Mutex<WorkspaceSession>>;

/// One session per project root, living for the process lifetime once
/// created.
pub struct WorkspaceSession {
    root: ProjectRoot,
    host: Arc<dyn Host>,
    settings: Arc<dyn SettingsSource>,
    client_factory: ClientFactory,
    client: Option<Box<dyn LanguageClient>>,
    disposables: Vec<Box<dyn Disposable>>,
    state: SessionState,
    self_handle: Weak<Mutex<WorkspaceSession>>,
    logfile_events_tx: mpsc::UnboundedSender<LogfileEvent>,
    #[cfg_attr(not(test), allow(dead_code))]
    logfile_events_rx: mpsc::UnboundedReceiver<LogfileEvent>,
}

impl WorkspaceSession {
    /// Construct a stopped session. The returned handle is the only way to
    /// reach it; the restart command holds a weak reference to the same
    /// allocation.
    #[must_use]
    pub fn new(
        root: ProjectRoot,
        host: Arc<dyn Host>,
        settings: Arc<dyn SettingsSource>,
        client_factory: ClientFactory,
    ) -> SharedSession {
        let (logfile_events_tx, logfile_events_rx) = mpsc::unbounded_channel();
        Arc::new_cyclic(|weak| {
            Mutex::new(Self {
                root,
                host,
                settings,
                client_factory,
                client: None,
                disposables: Vec::new(),
                state: SessionState::Stopped,
                self_handle: weak.clone(),
                logfile_events_tx,
                logfile_events_rx,
            })
        })
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn root(&self) -> &ProjectRoot {
        &self.root
    }

    /// Bring the session up. Valid only from `Stopped`.
    ///
    /// Spawn failure does not fail this call: the launcher warns the user
    /// and the client runs over a dead transport until a restart with fixed
    /// configuration.
    pub async fn start(&mut self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Stopped => {}
            SessionState::Starting | SessionState::Running => {
                return Err(SessionError::AlreadyRunning);
            }
            SessionState::Stopping => return Err(SessionError::Busy),
        }
        self.state = SessionState::Starting;
        tracing::info!(root = %self.root, "starting workspace session");

        let options = match self.client_options() {
            Ok(options) => options,
            Err(error) => {
                self.state = SessionState::Stopped;
                return Err(error.into());
            }
        };
        let mut client = (self.client_factory)(options, self.transport_factory());

        self.disposables
            .push(self.host.register_command(RESTART_COMMAND, self.restart_handler()));

        if let Err(error) = client.start().await {
            // Client-level faults surface through the client's own channel;
            // the session stays up so a restart can recover.
            tracing::warn!(root = %self.root, error = %format!("{error:#}"), "client start reported a fault");
        }

        self.client = Some(client);
        self.state = SessionState::Running;
        Ok(())
    }

    /// Tear the session down. Valid from `Running` or `Starting`.
    ///
    /// The only suspension point pending an external process: the client's
    /// shutdown sequence is awaited before disposables are released.
    pub async fn stop(&mut self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Running | SessionState::Starting => {}
            SessionState::Stopped => return Err(SessionError::NotRunning),
            SessionState::Stopping => return Err(SessionError::Busy),
        }
        self.state = SessionState::Stopping;
        tracing::info!(root = %self.root, "stopping workspace session");

        if let Some(mut client) = self.client.take() {
            if let Err(error) = client.stop().await {
                tracing::warn!(root = %self.root, error = %format!("{error:#}"), "client shutdown reported a fault");
            }
        }

        // Released unconditionally, shutdown fault or not.
        for mut disposable in self.disposables.drain(..) {
            disposable.dispose();
        }

        self.state = SessionState::Stopped;
        Ok(())
    }

    /// The externally triggered re-launch path: `stop` then `start`.
    pub async fn restart(&mut self) -> Result<(), SessionError> {
        self.stop().await?;
        self.start().await
    }

    fn client_options(&self) -> Result<ClientOptions, globset::Error> {
        let document_selector = vec![
            DocumentFilter::for_root(LANGUAGE_ID, "file", &self.root)?,
            DocumentFilter::for_root(LANGUAGE_ID, "untitled", &self.root)?,
        ];
        let config = ServerConfig::load(&self.root, self.settings.as_ref());
        Ok(ClientOptions {
            root: self.root.clone(),
            document_selector,
            diagnostics_name: DIAGNOSTICS_NAME.to_string(),
            output_channel_name: OUTPUT_CHANNEL_NAME.to_string(),
            output: self.host.create_output_channel(OUTPUT_CHANNEL_NAME),
            reveal: RevealOutputChannelOn::Info,
            config_section: CONFIG_SECTION.to_string(),
            configuration: config.as_section_value(),
        })
    }

    /// The deferred spawn: config is re-read here, on every start, so a
    /// restart observes current settings.
    fn transport_factory(&self) -> TransportFactory {
        let root = self.root.clone();
        let settings = Arc::clone(&self.settings);
        let host = Arc::clone(&self.host);
        let logfile_events = self.logfile_events_tx.clone();
        Box::new(move || {
            Box::pin(async move {
                let config = ServerConfig::load(&root, settings.as_ref());
                let notifier: &dyn Notifier = host.as_ref();
                let Some(mut process) = launch::launch(&config, &root, notifier) else {
                    return Transport::dead();
                };
                if config.log_to_file {
                    match process.take_stderr() {
                        Some(stderr) => {
                            logfile::attach(stderr, &root, logfile_events);
                        }
                        None => {
                            tracing::warn!(root = %root, "server stderr unavailable for logging");
                        }
                    }
                }
                Transport::from_process(process)
            })
        })
    }

    /// Handler for the restart command. Re-registered on every `start`; each
    /// registration closes over the same session allocation.
    fn restart_handler(&self) -> CommandHandler {
        let weak = self.self_handle.clone();
        Box::new(move || {
            let weak = weak.clone();
            Box::pin(async move {
                let Some(session) = weak.upgrade() else {
                    return;
                };
                // Overlap policy: a restart fired while another lifecycle
                // operation holds the session is rejected, not queued.
                let Ok(mut session) = session.try_lock() else {
                    tracing::warn!("restart ignored: session is busy");
                    return;
                };
                if let Err(error) = session.restart().await {
                    tracing::warn!(root = %session.root, %error, "restart failed");
                }
            })
        })
    }

    #[cfg(test)]
    pub(crate) fn logfile_events(&mut self) -> &mut mpsc::UnboundedReceiver<LogfileEvent> {
        &mut self.logfile_events_rx
    }
}
