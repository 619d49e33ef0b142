//! Editor-side supervisor for OpenRA IDE language-server sessions.
//!
//! For each open project root this crate locates or launches a backing
//! `oraide-language-server` process and bridges it to the editor through a
//! protocol client. The host editor is abstracted behind the capability
//! traits in [`host`], so the whole lifecycle runs against fakes in tests.

pub mod client;
pub mod framing;
pub mod host;
pub mod logfile;
pub mod settings;

pub(crate) mod launch;
pub(crate) mod protocol;

mod registry;
mod session;

pub use client::{
    ClientFactory, ClientOptions, DocumentFilter, LanguageClient, RevealOutputChannelOn,
    StdioClient, Transport, TransportFactory, stdio_client_factory,
};
pub use host::{
    CommandHandler, Disposable, DocumentOpened, Host, Notifier, OutputChannel, ProjectRoot,
};
pub use launch::DEFAULT_SERVER_EXE;
pub use registry::{ActivationRouter, SessionRegistry};
pub use session::{
    CONFIG_SECTION, LANGUAGE_ID, LEGACY_LANGUAGE_ID, RESTART_COMMAND, SessionError, SessionState,
    SharedSession, WorkspaceSession,
};
pub use settings::{LayeredSettings, ServerConfig, SettingsSource};
