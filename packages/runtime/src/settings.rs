//! Configuration file loading and change watching.
//!
//! The watcher polls the file's metadata on a tokio interval and re-parses
//! on change. A malformed edit is logged and skipped; the running
//! configuration is never replaced by a document that does not parse.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use qbridge_core::{Config, ConfigError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Failures while reading the configuration file.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Reads and parses the configuration document at `path`.
///
/// # Errors
///
/// Returns [`SettingsError`] on read or parse failure.
pub async fn load(path: &Path) -> Result<Config, SettingsError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(Config::from_yaml(&text)?)
}

/// Change fingerprint: mtime alone is too coarse on some filesystems for
/// rapid successive writes, so the length is folded in.
#[derive(PartialEq, Eq, Clone, Copy)]
struct Fingerprint {
    modified: Option<SystemTime>,
    len: u64,
}

fn fingerprint(path: &Path) -> Option<Fingerprint> {
    let meta = std::fs::metadata(path).ok()?;
    Some(Fingerprint {
        modified: meta.modified().ok(),
        len: meta.len(),
    })
}

/// Polls the configuration file and sends each successfully re-parsed
/// revision down the channel.
pub struct ConfigWatcher {
    cancel: CancellationToken,
}

impl ConfigWatcher {
    /// Spawns the polling loop. The state of the file at spawn time counts
    /// as already-seen; only subsequent changes are sent.
    #[must_use]
    pub fn spawn(path: PathBuf, tx: mpsc::Sender<Config>, poll_interval: Duration) -> Self {
        let cancel = CancellationToken::new();
        let stop = cancel.clone();
        // Baseline taken here, not inside the task: a change racing the
        // task's first execution must still be detected.
        let mut seen = fingerprint(&path);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    () = stop.cancelled() => return,
                    _ = interval.tick() => {}
                }
                let current = fingerprint(&path);
                if current.is_none() || current == seen {
                    continue;
                }
                seen = current;
                match load(&path).await {
                    Ok(config) => {
                        tracing::info!(path = %path.display(), "configuration file changed");
                        if tx.send(config).await.is_err() {
                            return;
                        }
                    }
                    Err(error) => {
                        tracing::warn!(
                            path = %path.display(),
                            %error,
                            "ignoring unparseable configuration change"
                        );
                    }
                }
            }
        });
        Self { cancel }
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for ConfigWatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::*;

    const VALID: &str = "
bindings:
  - name: first
    source: { kind: echo.source }
    target: { kind: echo.target }
";

    const VALID_TWO: &str = "
api_port: 9090
bindings:
  - name: second
    source: { kind: echo.source }
    target: { kind: echo.target }
";

    fn write_file(file: &tempfile::NamedTempFile, content: &str) {
        let mut handle = std::fs::File::create(file.path()).unwrap();
        handle.write_all(content.as_bytes()).unwrap();
        handle.sync_all().unwrap();
    }

    #[tokio::test]
    async fn load_parses_a_valid_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        write_file(&file, VALID);
        let config = load(file.path()).await.unwrap();
        assert_eq!(config.bindings[0].name, "first");
    }

    #[tokio::test]
    async fn load_reports_a_missing_file() {
        let err = load(Path::new("/nonexistent/qbridge.yaml")).await.unwrap_err();
        assert!(matches!(err, SettingsError::Io { .. }));
    }

    #[tokio::test]
    async fn watcher_sends_changed_configs() {
        let file = tempfile::NamedTempFile::new().unwrap();
        write_file(&file, VALID);

        let (tx, mut rx) = mpsc::channel(4);
        let watcher = ConfigWatcher::spawn(
            file.path().to_path_buf(),
            tx,
            Duration::from_millis(20),
        );

        // No await between spawn and this write: the change races the
        // watcher task's first execution and must still be delivered.
        write_file(&file, VALID_TWO);
        let config = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(config.api_port, 9090);
        assert_eq!(config.bindings[0].name, "second");
        watcher.stop();
    }

    #[tokio::test]
    async fn malformed_edit_is_skipped_not_fatal() {
        let file = tempfile::NamedTempFile::new().unwrap();
        write_file(&file, VALID);

        let (tx, mut rx) = mpsc::channel(4);
        let _watcher = ConfigWatcher::spawn(
            file.path().to_path_buf(),
            tx,
            Duration::from_millis(20),
        );

        write_file(&file, "bindings: [");
        tokio::time::sleep(Duration::from_millis(100)).await;

        // The watcher survived the bad revision and picks up the next good
        // one.
        write_file(&file, VALID_TWO);
        let config = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(config.bindings[0].name, "second");
    }
}
