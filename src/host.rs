//! Narrow capability interfaces over the editor host.
//!
//! The session and registry logic never talks to a concrete editor API.
//! Everything it needs from the host — workspace-folder resolution, user
//! warnings, command registration, output channels — is expressed as a small
//! trait here so the whole subsystem runs against fakes in tests.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use url::Url;

/// A top-level directory the host treats as one workspace unit.
///
/// Unique key in the session registry. Immutable once created; supplied by
/// the host when it resolves a document's owning folder.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProjectRoot(PathBuf);

impl ProjectRoot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.0
    }

    /// Last path component, for log and channel labelling.
    #[must_use]
    pub fn name(&self) -> String {
        self.0
            .file_name()
            .map_or_else(|| self.0.display().to_string(), |n| n.to_string_lossy().into_owned())
    }
}

impl fmt::Display for ProjectRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.display().fmt(f)
    }
}

/// A document-open notification from the host's event model.
#[derive(Debug, Clone)]
pub struct DocumentOpened {
    pub uri: Url,
    pub language_id: String,
}

impl DocumentOpened {
    pub fn new(uri: Url, language_id: impl Into<String>) -> Self {
        Self {
            uri,
            language_id: language_id.into(),
        }
    }
}

/// A handle for an acquired host resource with an explicit release.
///
/// Sessions accumulate these during `start()` and release every one during
/// `stop()`, regardless of whether the client's own shutdown succeeded.
pub trait Disposable: Send {
    fn dispose(&mut self);
}

/// Handler invoked when the host fires a registered command.
pub type CommandHandler = Box<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// User-visible warning surface.
///
/// Split from [`Host`] so the launcher depends on exactly the capability it
/// uses.
pub trait Notifier: Send + Sync {
    fn show_warning(&self, message: &str);
}

/// A named output channel in the host UI.
pub trait OutputChannel: Send + Sync {
    fn append_line(&self, line: &str);
    fn reveal(&self);
}

/// The full set of host capabilities the supervisor needs.
pub trait Host: Notifier {
    /// Resolve the workspace folder owning `uri`, if any.
    fn resolve_root(&self, uri: &Url) -> Option<ProjectRoot>;

    /// Register a command id with the host. The returned disposable
    /// unregisters it.
    fn register_command(&self, id: &str, handler: CommandHandler) -> Box<dyn Disposable>;

    /// Create (or look up) a named output channel.
    fn create_output_channel(&self, name: &str) -> Arc<dyn OutputChannel>;
}

#[cfg(test)]
pub(crate) mod testing {
    //! Host fakes shared by session and registry tests.

    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::{
        Arc, CommandHandler, Disposable, Host, Notifier, OutputChannel, ProjectRoot, Url,
    };

    /// Disposable that flips a shared flag, so tests can assert release.
    pub(crate) struct FlagDisposable(pub Arc<AtomicBool>);

    impl Disposable for FlagDisposable {
        fn dispose(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    pub(crate) struct RegisteredCommand {
        pub id: String,
        pub handler: CommandHandler,
        pub disposed: Arc<AtomicBool>,
    }

    #[derive(Default)]
    pub(crate) struct FakeChannel {
        pub lines: Mutex<Vec<String>>,
        pub reveal_count: AtomicUsize,
    }

    impl OutputChannel for FakeChannel {
        fn append_line(&self, line: &str) {
            self.lines.lock().unwrap().push(line.to_string());
        }

        fn reveal(&self) {
            self.reveal_count.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// In-memory host: resolves roots by path prefix, records warnings and
    /// command registrations.
    #[derive(Default)]
    pub(crate) struct FakeHost {
        pub roots: Vec<ProjectRoot>,
        pub warnings: Mutex<Vec<String>>,
        pub commands: Mutex<Vec<RegisteredCommand>>,
        pub channels: Mutex<Vec<(String, Arc<FakeChannel>)>>,
    }

    impl FakeHost {
        pub fn with_roots(roots: Vec<ProjectRoot>) -> Self {
            Self {
                roots,
                ..Self::default()
            }
        }

        pub fn warning_count(&self) -> usize {
            self.warnings.lock().unwrap().len()
        }

        /// Invoke the most recently registered handler for `id`.
        pub async fn fire_command(&self, id: &str) {
            let fut = {
                let commands = self.commands.lock().unwrap();
                let cmd = commands
                    .iter()
                    .rev()
                    .find(|c| c.id == id)
                    .unwrap_or_else(|| panic!("no command registered for {id}"));
                (cmd.handler)()
            };
            fut.await;
        }
    }

    impl Notifier for FakeHost {
        fn show_warning(&self, message: &str) {
            self.warnings.lock().unwrap().push(message.to_string());
        }
    }

    impl Host for FakeHost {
        fn resolve_root(&self, uri: &Url) -> Option<ProjectRoot> {
            let path = uri.to_file_path().ok()?;
            self.roots
                .iter()
                .find(|root| path.starts_with(root.path()))
                .cloned()
        }

        fn register_command(&self, id: &str, handler: CommandHandler) -> Box<dyn Disposable> {
            let disposed = Arc::new(AtomicBool::new(false));
            self.commands.lock().unwrap().push(RegisteredCommand {
                id: id.to_string(),
                handler,
                disposed: Arc::clone(&disposed),
            });
            Box::new(FlagDisposable(disposed))
        }

        fn create_output_channel(&self, name: &str) -> Arc<dyn OutputChannel> {
            let channel = Arc::new(FakeChannel::default());
            self.channels
                .lock()
                .unwrap()
                .push((name.to_string(), Arc::clone(&channel)));
            channel
        }
    }
}
