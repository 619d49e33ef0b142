//! Session registry and activation routing.
//!
//! The registry is an explicitly owned root → session store, passed into
//! the router rather than living as a module global, so tests can run many
//! independent instances. The router watches document-open events, creates
//! a session the first time a recognized document appears under a root, and
//! tears everything down concurrently at deactivation.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;

use crate::client::ClientFactory;
use crate::host::{DocumentOpened, Host, ProjectRoot};
use crate::session::{
    LANGUAGE_ID, LEGACY_LANGUAGE_ID, SessionError, SharedSession, WorkspaceSession,
};
use crate::settings::SettingsSource;

/// Process-wide map from project root to its session.
///
/// Keys are unique; entries are created once per root and live until
/// process shutdown. Only the activation router mutates it.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: HashMap<ProjectRoot, SharedSession>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, root: &ProjectRoot) -> Option<&SharedSession> {
        self.sessions.get(root)
    }

    #[must_use]
    pub fn contains(&self, root: &ProjectRoot) -> bool {
        self.sessions.contains_key(root)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ProjectRoot, &SharedSession)> {
        self.sessions.iter()
    }

    fn insert(&mut self, root: ProjectRoot, session: SharedSession) {
        self.sessions.insert(root, session);
    }
}

/// Observes document-open events and services each root with exactly one
/// session.
pub struct ActivationRouter {
    registry: SessionRegistry,
    host: Arc<dyn Host>,
    settings: Arc<dyn SettingsSource>,
    client_factory: ClientFactory,
}

impl ActivationRouter {
    #[must_use]
    pub fn new(
        registry: SessionRegistry,
        host: Arc<dyn Host>,
        settings: Arc<dyn SettingsSource>,
        client_factory: ClientFactory,
    ) -> Self {
        Self {
            registry,
            host,
            settings,
            client_factory,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Route one document-open event.
    ///
    /// Unrecognized language ids are skipped. A document outside any open
    /// project cannot be serviced, so an unresolvable root is logged and
    /// ignored. The first recognized document under a root creates and
    /// starts that root's session; later ones are no-ops.
    pub async fn on_document_opened(&mut self, doc: &DocumentOpened) {
        if doc.language_id != LANGUAGE_ID && doc.language_id != LEGACY_LANGUAGE_ID {
            return;
        }

        let Some(root) = self.host.resolve_root(&doc.uri) else {
            tracing::debug!(uri = %doc.uri, "no workspace folder for document, ignoring");
            return;
        };

        if self.registry.contains(&root) {
            return;
        }

        let session = WorkspaceSession::new(
            root.clone(),
            Arc::clone(&self.host),
            Arc::clone(&self.settings),
            Arc::clone(&self.client_factory),
        );
        self.registry.insert(root.clone(), Arc::clone(&session));

        if let Err(error) = session.lock().await.start().await {
            tracing::warn!(root = %root, %error, "session failed to start");
        }
    }

    /// Process-wide teardown: stop every session concurrently and wait for
    /// all of them before the host exits.
    pub async fn deactivate(&mut self) {
        let stops = self.registry.iter().map(|(root, session)| {
            let root = root.clone();
            let session = Arc::clone(session);
            async move {
                match session.lock().await.stop().await {
                    Ok(()) | Err(SessionError::NotRunning) => {}
                    Err(error) => {
                        tracing::warn!(root = %root, %error, "session did not stop cleanly");
                    }
                }
            }
        });
        join_all(stops).await;
    }
}
