//! Protocol client capability and its default stdio implementation.
//!
//! A session hands the client a [`TransportFactory`] and [`ClientOptions`];
//! the client invokes the factory exactly once when started, frames JSON-RPC
//! over the returned streams, runs the `initialize` handshake in the
//! background, and owns the shutdown sequence on stop. Sessions talk to it
//! only through the [`LanguageClient`] trait, so tests substitute fakes.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use futures_util::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use url::Url;

use crate::framing::{MessageReader, MessageWriter};
use crate::host::{OutputChannel, ProjectRoot};
use crate::launch::ServerProcess;
use crate::protocol::{
    self, ConfigurationParams, LogMessageParams, Notification, Request,
};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

const STOP_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

const WRITE_QUEUE_CAPACITY: usize = 64;

/// When to surface the output channel to the user, by LSP `MessageType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevealOutputChannelOn {
    Never,
    Error,
    Warn,
    /// Informational-or-worse; plain `Log` traffic stays quiet.
    Info,
}

impl RevealOutputChannelOn {
    #[must_use]
    pub fn covers(self, message_type: u64) -> bool {
        let threshold = match self {
            Self::Never => return false,
            Self::Error => 1,
            Self::Warn => 2,
            Self::Info => 3,
        };
        (1..=threshold).contains(&message_type)
    }
}

/// Restricts a client registration to documents of one language, one URI
/// scheme, and paths under one root.
#[derive(Debug, Clone)]
pub struct DocumentFilter {
    pub language: String,
    pub scheme: String,
    pattern: globset::GlobMatcher,
}

impl DocumentFilter {
    pub fn for_root(
        language: &str,
        scheme: &str,
        root: &ProjectRoot,
    ) -> Result<Self, globset::Error> {
        let escaped = globset::escape(&root.path().display().to_string());
        let pattern = globset::Glob::new(&format!("{escaped}/**/*"))?.compile_matcher();
        Ok(Self {
            language: language.to_string(),
            scheme: scheme.to_string(),
            pattern,
        })
    }

    #[must_use]
    pub fn matches(&self, uri: &Url, language_id: &str) -> bool {
        if language_id != self.language || uri.scheme() != self.scheme {
            return false;
        }
        let path = uri
            .to_file_path()
            .unwrap_or_else(|()| PathBuf::from(uri.path()));
        self.pattern.is_match(&path)
    }
}

/// Everything a client needs to know about one workspace registration.
#[derive(Clone)]
pub struct ClientOptions {
    pub root: ProjectRoot,
    pub document_selector: Vec<DocumentFilter>,
    pub diagnostics_name: String,
    pub output_channel_name: String,
    pub output: Arc<dyn OutputChannel>,
    pub reveal: RevealOutputChannelOn,
    /// Settings namespace synchronized with the server.
    pub config_section: String,
    /// Snapshot of that namespace, served for `workspace/configuration`.
    pub configuration: serde_json::Value,
}

/// The raw byte-stream pair the client frames messages over, plus ownership
/// of the process behind it (dropping the transport kills the child).
pub struct Transport {
    reader: Box<dyn AsyncRead + Send + Unpin>,
    writer: Box<dyn AsyncWrite + Send + Unpin>,
    process: Option<ServerProcess>,
}

impl Transport {
    pub fn new(
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            process: None,
        }
    }

    /// A transport with no server behind it: reads EOF, swallows writes.
    /// Used when the spawn failed and the session degrades.
    #[must_use]
    pub fn dead() -> Self {
        Self::new(tokio::io::empty(), tokio::io::sink())
    }

    pub(crate) fn from_process(mut process: ServerProcess) -> Self {
        let (Some(stdout), Some(stdin)) = (process.take_stdout(), process.take_stdin()) else {
            // Piped stdio was requested at spawn; missing streams mean the
            // handle was already consumed. Degrade rather than panic.
            tracing::warn!("server process handed over without usable stdio");
            return Self::dead();
        };
        Self {
            reader: Box::new(stdout),
            writer: Box::new(stdin),
            process: Some(process),
        }
    }
}

/// Deferred "spawn on demand" transport production; invoked by the client
/// runtime exactly once per start.
pub type TransportFactory = Box<dyn FnOnce() -> BoxFuture<'static, Transport> + Send>;

/// The client half of the editor-server protocol, as the session sees it.
pub trait LanguageClient: Send {
    fn start(&mut self) -> BoxFuture<'_, Result<()>>;
    fn stop(&mut self) -> BoxFuture<'_, Result<()>>;
}

/// Constructor for protocol clients, injected into sessions so tests can
/// substitute recording fakes.
pub type ClientFactory =
    Arc<dyn Fn(ClientOptions, TransportFactory) -> Box<dyn LanguageClient> + Send + Sync>;

/// The production factory: stdio-framed clients.
#[must_use]
pub fn stdio_client_factory() -> ClientFactory {
    Arc::new(|options, transport_factory| Box::new(StdioClient::new(options, transport_factory)))
}

enum WriterCommand {
    Send(serde_json::Value),
    Shutdown,
}

type PendingMap = HashMap<u64, oneshot::Sender<serde_json::Value>>;

enum Incoming {
    Response {
        id: u64,
        body: serde_json::Value,
    },
    ServerRequest {
        id: serde_json::Value,
        method: String,
        params: Option<serde_json::Value>,
    },
    Notification {
        method: String,
        params: Option<serde_json::Value>,
    },
}

fn classify(frame: &serde_json::Value) -> Option<Incoming> {
    let method = frame.get("method").and_then(|m| m.as_str());
    match (frame.get("id"), method) {
        (Some(id), None) => id.as_u64().map(|id| Incoming::Response {
            id,
            body: frame.clone(),
        }),
        (Some(id), Some(method)) => Some(Incoming::ServerRequest {
            id: id.clone(),
            method: method.to_string(),
            params: frame.get("params").cloned(),
        }),
        (None, Some(method)) => Some(Incoming::Notification {
            method: method.to_string(),
            params: frame.get("params").cloned(),
        }),
        (None, None) => None,
    }
}

/// State the reader task needs to service server-initiated traffic.
struct ReaderContext {
    output: Arc<dyn OutputChannel>,
    reveal: RevealOutputChannelOn,
    config_section: String,
    configuration: serde_json::Value,
}

impl ReaderContext {
    /// Resolve a `workspace/configuration` section against the snapshot.
    fn configuration_for(&self, section: Option<&str>) -> serde_json::Value {
        let Some(section) = section else {
            return serde_json::Value::Null;
        };
        let Some(rest) = section.strip_prefix(self.config_section.as_str()) else {
            return serde_json::Value::Null;
        };
        if rest.is_empty() {
            return self.configuration.clone();
        }
        let Some(rest) = rest.strip_prefix('.') else {
            return serde_json::Value::Null;
        };
        let mut value = &self.configuration;
        for key in rest.split('.') {
            match value.get(key) {
                Some(inner) => value = inner,
                None => return serde_json::Value::Null,
            }
        }
        value.clone()
    }
}

/// Default [`LanguageClient`]: frames JSON-RPC over the transport's streams.
pub struct StdioClient {
    options: ClientOptions,
    transport_factory: Option<TransportFactory>,
    writer_tx: Option<mpsc::Sender<WriterCommand>>,
    pending: Arc<tokio::sync::Mutex<PendingMap>>,
    next_id: Arc<AtomicU64>,
    process: Option<ServerProcess>,
    reader_handle: Option<JoinHandle<()>>,
    handshake_handle: Option<JoinHandle<()>>,
    #[allow(dead_code)]
    writer_handle: Option<JoinHandle<()>>,
}

impl StdioClient {
    #[must_use]
    pub fn new(options: ClientOptions, transport_factory: TransportFactory) -> Self {
        Self {
            options,
            transport_factory: Some(transport_factory),
            writer_tx: None,
            pending: Arc::new(tokio::sync::Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            process: None,
            reader_handle: None,
            handshake_handle: None,
            writer_handle: None,
        }
    }

    async fn start_inner(&mut self) -> Result<()> {
        let factory = self
            .transport_factory
            .take()
            .context("client was already started")?;
        let mut transport = factory().await;
        self.process = transport.process.take();

        let (writer_tx, mut writer_rx) = mpsc::channel::<WriterCommand>(WRITE_QUEUE_CAPACITY);
        let mut writer = MessageWriter::new(transport.writer);
        self.writer_handle = Some(tokio::spawn(async move {
            while let Some(command) = writer_rx.recv().await {
                match command {
                    WriterCommand::Send(frame) => {
                        if let Err(error) = writer.write_message(&frame).await {
                            tracing::warn!(%error, "client write failed");
                            break;
                        }
                    }
                    WriterCommand::Shutdown => break,
                }
            }
        }));

        let context = ReaderContext {
            output: Arc::clone(&self.options.output),
            reveal: self.options.reveal,
            config_section: self.options.config_section.clone(),
            configuration: self.options.configuration.clone(),
        };
        let reader_pending = Arc::clone(&self.pending);
        let reader_writer_tx = writer_tx.clone();
        let mut reader = MessageReader::new(transport.reader);
        self.reader_handle = Some(tokio::spawn(async move {
            loop {
                match reader.read_message().await {
                    Ok(Some(frame)) => {
                        dispatch(&frame, &reader_pending, &reader_writer_tx, &context).await;
                    }
                    Ok(None) => {
                        tracing::info!("server closed its end of the transport");
                        break;
                    }
                    Err(error) => {
                        tracing::warn!(%error, "transport read failed");
                        break;
                    }
                }
            }
            // Unblock any request still waiting for a response.
            reader_pending.lock().await.clear();
        }));

        self.handshake_handle = Some(self.spawn_handshake(writer_tx.clone()));
        self.writer_tx = Some(writer_tx);
        Ok(())
    }

    /// Issue `initialize` → `initialized` without blocking the caller.
    fn spawn_handshake(&self, writer_tx: mpsc::Sender<WriterCommand>) -> JoinHandle<()> {
        let pending = Arc::clone(&self.pending);
        let next_id = Arc::clone(&self.next_id);
        let root = self.options.root.clone();
        tokio::spawn(async move {
            let root_uri = match protocol::path_to_file_uri(root.path()) {
                Ok(uri) => uri,
                Err(error) => {
                    tracing::warn!(%error, "skipping handshake");
                    return;
                }
            };
            let params = protocol::initialize_params(root_uri.as_str(), &root.name());
            let response = request(
                &pending,
                &writer_tx,
                &next_id,
                "initialize",
                Some(params),
                HANDSHAKE_TIMEOUT,
            )
            .await;
            match response {
                Ok(body) if body.get("error").is_none() => {
                    if notify(&writer_tx, "initialized", Some(serde_json::json!({})))
                        .await
                        .is_ok()
                    {
                        tracing::info!(root = %root, "language client handshake complete");
                    }
                }
                Ok(body) => {
                    tracing::warn!(root = %root, error = %body["error"], "initialize rejected");
                }
                Err(error) => {
                    tracing::warn!(root = %root, %error, "initialize failed");
                }
            }
        })
    }

    async fn stop_inner(&mut self) -> Result<()> {
        if let Some(handle) = self.handshake_handle.take() {
            handle.abort();
        }
        if let Some(writer_tx) = self.writer_tx.take() {
            match request(
                &self.pending,
                &writer_tx,
                &self.next_id,
                "shutdown",
                None,
                STOP_REQUEST_TIMEOUT,
            )
            .await
            {
                Ok(body) if body.get("error").is_none() => {
                    let _ = notify(&writer_tx, "exit", None).await;
                }
                Ok(body) => {
                    tracing::debug!(error = %body["error"], "server rejected shutdown");
                }
                Err(error) => {
                    tracing::debug!(%error, "shutdown request went unanswered");
                }
            }
            let _ = writer_tx.send(WriterCommand::Shutdown).await;
        }
        if let Some(process) = self.process.take() {
            process.shutdown().await;
        }
        if let Some(handle) = self.reader_handle.take() {
            handle.abort();
        }
        Ok(())
    }
}

impl LanguageClient for StdioClient {
    fn start(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(self.start_inner())
    }

    fn stop(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(self.stop_inner())
    }
}

async fn dispatch(
    frame: &serde_json::Value,
    pending: &tokio::sync::Mutex<PendingMap>,
    writer_tx: &mpsc::Sender<WriterCommand>,
    context: &ReaderContext,
) {
    let Some(incoming) = classify(frame) else {
        tracing::trace!("ignoring malformed frame from server");
        return;
    };

    match incoming {
        Incoming::Response { id, body } => {
            if let Some(waiter) = pending.lock().await.remove(&id) {
                let _ = waiter.send(body);
            }
        }
        Incoming::ServerRequest { id, method, params } => {
            let reply = answer_server_request(&method, params, context);
            let _ = writer_tx.send(WriterCommand::Send(reply_frame(id, reply))).await;
        }
        Incoming::Notification { method, params } => {
            handle_notification(&method, params, context);
        }
    }
}

fn reply_frame(id: serde_json::Value, reply: Result<serde_json::Value, String>) -> serde_json::Value {
    match reply {
        Ok(result) => serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": result,
        }),
        Err(message) => serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": -32601, "message": message },
        }),
    }
}

fn answer_server_request(
    method: &str,
    params: Option<serde_json::Value>,
    context: &ReaderContext,
) -> Result<serde_json::Value, String> {
    match method {
        "workspace/configuration" => {
            let items = params
                .and_then(|p| serde_json::from_value::<ConfigurationParams>(p).ok())
                .map(|p| p.items)
                .unwrap_or_default();
            let values: Vec<serde_json::Value> = items
                .iter()
                .map(|item| context.configuration_for(item.section.as_deref()))
                .collect();
            Ok(serde_json::Value::Array(values))
        }
        // Anything else must still get a reply or the server may block.
        other => {
            tracing::debug!("declining server request: {other}");
            Err(format!("Method not found: {other}"))
        }
    }
}

fn handle_notification(
    method: &str,
    params: Option<serde_json::Value>,
    context: &ReaderContext,
) {
    match method {
        "window/logMessage" => {
            let Some(params) = params else { return };
            match serde_json::from_value::<LogMessageParams>(params) {
                Ok(log) => {
                    context
                        .output
                        .append_line(&format!("[{}] {}", log.label(), log.message));
                    if context.reveal.covers(log.kind) {
                        context.output.reveal();
                    }
                }
                Err(error) => {
                    tracing::debug!(%error, "unparseable window/logMessage");
                }
            }
        }
        other => {
            tracing::trace!("ignoring server notification: {other}");
        }
    }
}

async fn request(
    pending: &tokio::sync::Mutex<PendingMap>,
    writer_tx: &mpsc::Sender<WriterCommand>,
    next_id: &AtomicU64,
    method: &'static str,
    params: Option<serde_json::Value>,
    timeout: Duration,
) -> Result<serde_json::Value> {
    let id = next_id.fetch_add(1, Ordering::Relaxed);
    let (tx, rx) = oneshot::channel();
    pending.lock().await.insert(id, tx);

    let frame = serde_json::to_value(Request::new(id, method, params))
        .context("serializing request")?;
    if writer_tx.send(WriterCommand::Send(frame)).await.is_err() {
        pending.lock().await.remove(&id);
        bail!("writer task is gone");
    }

    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(body)) => Ok(body),
        Ok(Err(_)) => {
            pending.lock().await.remove(&id);
            bail!("server closed before answering {method}");
        }
        Err(_) => {
            pending.lock().await.remove(&id);
            bail!("{method} request timed out");
        }
    }
}

async fn notify(
    writer_tx: &mpsc::Sender<WriterCommand>,
    method: &'static str,
    params: Option<serde_json::Value>,
) -> Result<()> {
    let frame = serde_json::to_value(Notification::new(method, params))
        .context("serializing notification")?;
    writer_tx
        .send(WriterCommand::Send(frame))
        .await
        .map_err(|_| anyhow::anyhow!("writer task is gone"))
}

#[cfg(test)]
pub(crate) mod testing {
    //! Recording client doubles shared by session and registry tests.

    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::{
        Arc, BoxFuture, ClientFactory, ClientOptions, LanguageClient, Result, Transport,
        TransportFactory,
    };

    #[derive(Default)]
    pub(crate) struct ClientLog {
        pub starts: AtomicUsize,
        pub stops: AtomicUsize,
        pub options: StdMutex<Vec<ClientOptions>>,
    }

    impl ClientLog {
        pub fn start_count(&self) -> usize {
            self.starts.load(Ordering::SeqCst)
        }

        pub fn stop_count(&self) -> usize {
            self.stops.load(Ordering::SeqCst)
        }
    }

    pub(crate) struct RecordingClient {
        log: Arc<ClientLog>,
        transport_factory: Option<TransportFactory>,
        transport: Option<Transport>,
        invoke_factory: bool,
    }

    impl LanguageClient for RecordingClient {
        fn start(&mut self) -> BoxFuture<'_, Result<()>> {
            Box::pin(async move {
                self.log.starts.fetch_add(1, Ordering::SeqCst);
                if self.invoke_factory
                    && let Some(factory) = self.transport_factory.take()
                {
                    self.transport = Some(factory().await);
                }
                Ok(())
            })
        }

        fn stop(&mut self) -> BoxFuture<'_, Result<()>> {
            Box::pin(async move {
                self.log.stops.fetch_add(1, Ordering::SeqCst);
                // Dropping the transport releases the server process.
                self.transport = None;
                Ok(())
            })
        }
    }

    /// A factory of recording clients. When `invoke_factory` is set the
    /// fake honors the runtime contract of running the transport factory
    /// once on start.
    pub(crate) fn recording_factory(invoke_factory: bool) -> (ClientFactory, Arc<ClientLog>) {
        let log = Arc::new(ClientLog::default());
        let factory_log = Arc::clone(&log);
        let factory: ClientFactory = Arc::new(move |options, transport_factory| {
            factory_log.options.lock().unwrap().push(options.clone());
            Box::new(RecordingClient {
                log: Arc::clone(&factory_log),
                transport_factory: Some(transport_factory),
                transport: None,
                invoke_factory,
            })
        });
        (factory, log)
    }
}
