//! Best-effort duplication of the server's stderr to a log file.
//!
//! One file per session start, timestamp-qualified so restarts within the
//! same root never collide. The copy runs as a detached task; failures go
//! into an event sink (and the log) but never fault the session.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::host::ProjectRoot;

/// Observable outcomes of the copy task.
#[derive(Debug)]
pub enum LogfileEvent {
    Created(PathBuf),
    Failed { path: PathBuf, error: std::io::Error },
}

pub(crate) fn log_file_path(root: &ProjectRoot) -> PathBuf {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    root.path().join(format!("oraide-{millis}.log"))
}

/// Pipe `stderr` into a fresh `<root>/oraide-<epoch-millis>.log`.
///
/// Fire-and-forget: the returned handle exists for tests to await the copy;
/// callers in the session path drop it. The stream is consumed exclusively
/// by this task, so it cannot stall or reorder anyone else's reads.
pub(crate) fn attach<R>(
    stderr: R,
    root: &ProjectRoot,
    events: mpsc::UnboundedSender<LogfileEvent>,
) -> JoinHandle<()>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let path = log_file_path(root);
    tokio::spawn(async move {
        let mut file = match tokio::fs::File::create(&path).await {
            Ok(file) => {
                tracing::info!(path = %path.display(), "logging server stderr to file");
                let _ = events.send(LogfileEvent::Created(path.clone()));
                file
            }
            Err(error) => {
                tracing::warn!(path = %path.display(), %error, "could not create server log file");
                let _ = events.send(LogfileEvent::Failed { path, error });
                return;
            }
        };

        let mut stderr = stderr;
        if let Err(error) = tokio::io::copy(&mut stderr, &mut file).await {
            tracing::warn!(path = %path.display(), %error, "server log copy ended with error");
            let _ = events.send(LogfileEvent::Failed { path, error });
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_path_is_under_root_and_timestamped() {
        let root = ProjectRoot::new("/proj");
        let path = log_file_path(&root);
        assert!(path.starts_with("/proj"));

        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("oraide-"));
        assert!(name.ends_with(".log"));
        let stamp = &name["oraide-".len()..name.len() - ".log".len()];
        assert!(stamp.parse::<u128>().is_ok(), "stamp must be epoch millis");
    }

    #[tokio::test]
    async fn copies_stderr_into_a_fresh_file() {
        let dir = tempfile::tempdir().unwrap();
        let root = ProjectRoot::new(dir.path());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let stderr: &[u8] = b"server said something\n";
        attach(stderr, &root, tx).await.unwrap();

        let Some(LogfileEvent::Created(path)) = rx.recv().await else {
            panic!("expected Created event");
        };
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "server said something\n");
    }

    #[tokio::test]
    async fn creation_failure_reports_into_the_sink() {
        let root = ProjectRoot::new("/nonexistent-dir-for-oraide-tests");
        let (tx, mut rx) = mpsc::unbounded_channel();

        let stderr: &[u8] = b"never written";
        attach(stderr, &root, tx).await.unwrap();

        match rx.recv().await {
            Some(LogfileEvent::Failed { path, .. }) => {
                assert!(path.starts_with("/nonexistent-dir-for-oraide-tests"));
            }
            other => panic!("expected Failed event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn consecutive_attaches_use_distinct_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = ProjectRoot::new(dir.path());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let first: &[u8] = b"first";
        attach(first, &root, tx.clone()).await.unwrap();
        // A restart within the same millisecond would collide; the stamp has
        // millisecond resolution, so give the clock a tick.
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let second: &[u8] = b"second";
        attach(second, &root, tx).await.unwrap();

        let Some(LogfileEvent::Created(a)) = rx.recv().await else {
            panic!("expected Created");
        };
        let Some(LogfileEvent::Created(b)) = rx.recv().await else {
            panic!("expected Created");
        };
        assert_ne!(a, b);
    }
}
