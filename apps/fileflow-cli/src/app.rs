//! Send and receive flows.
//!
//! Blobs travel through the terminal: the sending side prints its offer and
//! reads the answer from stdin, the receiving side does the reverse.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use fileflow_signaling::{SessionDescription, format_connection_code};
use fileflow_session::{SessionEvent, SessionState, TransferSession};
use fileflow_transfer::{
    ChunkSource, DirectoryStore, FileMeta, MemoryStore, ProgressTracker, TransferSnapshot,
    TransferStatus, format_bytes, format_speed, sanitize_file_name,
};

use crate::config::Config;

/// Hidden directory under the output directory where files land first.
const STAGING_DIR: &str = ".fileflow-incoming";

pub async fn send(config: Config, files: Vec<PathBuf>) -> anyhow::Result<()> {
    for file in &files {
        if !file.is_file() {
            bail!("not a file: {}", file.display());
        }
    }

    let session = TransferSession::new(
        config.capabilities(),
        Arc::new(MemoryStore::new()),
        config.session.clone(),
    )?;

    let offer = session.start().await?;
    print_blob("offer", &offer)?;
    eprintln!("Paste the receiver's answer and press Enter:");

    let mut stdin = BufReader::new(tokio::io::stdin());
    let answer = read_blob(&mut stdin)
        .await?
        .context("stdin closed before an answer arrived")?;
    session.complete(&answer).await?;
    tracing::info!(
        capabilities = ?session.negotiated_capabilities(),
        "connected"
    );

    let mut events = session.subscribe();
    let mut ids = Vec::with_capacity(files.len());
    for path in &files {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .context("file has no name")?;
        let meta = FileMeta::new(name, 0).with_mime_type(guess_mime(path));
        let id = session
            .send_file(meta, ChunkSource::from_path(path))
            .await?;
        tracing::info!(id = %id, path = %path.display(), "queued");
        ids.push(id);
    }

    let mut progress = Progress::default();
    loop {
        if ids
            .iter()
            .all(|id| session.transfer(id).is_some_and(|s| s.is_terminal()))
        {
            break;
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
            event = events.recv() => match event {
                Ok(SessionEvent::TransferUpdated(snapshot)) => progress.report(&snapshot),
                Ok(SessionEvent::RemoteError { transfer_id, message }) => {
                    tracing::warn!(transfer_id = ?transfer_id, %message, "receiver reported an error");
                }
                Ok(SessionEvent::StateChanged(SessionState::Closed)) => break,
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => {
                    tracing::debug!(missed, "progress events skipped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    let failed: Vec<TransferSnapshot> = ids
        .iter()
        .filter_map(|id| session.transfer(id))
        .filter(|s| s.status != TransferStatus::Completed)
        .collect();
    session.close().await;

    if !failed.is_empty() {
        for snapshot in &failed {
            tracing::error!(
                name = %snapshot.name,
                status = ?snapshot.status,
                failure = ?snapshot.failure,
                "not delivered"
            );
        }
        bail!("{} of {} files were not delivered", failed.len(), ids.len());
    }
    tracing::info!(count = ids.len(), "all files delivered");
    Ok(())
}

pub async fn receive(config: Config) -> anyhow::Result<()> {
    let output_dir = config.output_dir.clone();
    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("cannot create {}", output_dir.display()))?;
    let staging = Arc::new(DirectoryStore::open(output_dir.join(STAGING_DIR))?);

    let session = TransferSession::new(
        config.capabilities(),
        staging.clone(),
        config.session.clone(),
    )?;
    let mut events = session.subscribe();

    eprintln!("Paste the sender's offer and press Enter:");
    let mut stdin = BufReader::new(tokio::io::stdin());
    let offer = read_blob(&mut stdin)
        .await?
        .context("stdin closed before an offer arrived")?;

    let answer = session.accept(&offer).await?;
    print_blob("answer", &answer)?;
    session.wait_active().await?;
    tracing::info!(
        output_dir = %output_dir.display(),
        capabilities = ?session.negotiated_capabilities(),
        "connected, waiting for files"
    );

    let mut progress = Progress::default();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
            event = events.recv() => match event {
                Ok(SessionEvent::TransferAdded(snapshot)) => {
                    tracing::info!(
                        name = %snapshot.name,
                        size = %format_bytes(snapshot.declared_size),
                        "incoming"
                    );
                }
                Ok(SessionEvent::TransferUpdated(snapshot)) => {
                    progress.report(&snapshot);
                    if snapshot.status == TransferStatus::Completed {
                        match deliver(&staging, &output_dir, &snapshot) {
                            Ok(path) => tracing::info!(path = %path.display(), "saved"),
                            Err(e) => tracing::error!(name = %snapshot.name, error = %e, "cannot save"),
                        }
                    }
                }
                Ok(SessionEvent::StateChanged(SessionState::Closed)) => break,
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => {
                    // Completion events may be among the skipped ones.
                    tracing::debug!(missed, "events skipped, resynchronising");
                    for snapshot in session.transfers() {
                        if snapshot.status == TransferStatus::Completed
                            && staging.path_for(&snapshot.id).is_ok_and(|p| p.exists())
                        {
                            if let Err(e) = deliver(&staging, &output_dir, &snapshot) {
                                tracing::error!(name = %snapshot.name, error = %e, "cannot save");
                            }
                        }
                    }
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    if let Some(reason) = session.close_reason() {
        tracing::info!(%reason, "session ended");
    }
    session.close().await;
    Ok(())
}

/// Writes a blob to stdout along with its connection code.
fn print_blob(kind: &str, blob: &str) -> anyhow::Result<()> {
    let description = SessionDescription::from_blob(blob)?;
    eprintln!(
        "Session {} ({kind}), share this line with the other device:",
        format_connection_code(&description.session_id)
    );
    println!("{blob}");
    Ok(())
}

/// Reads lines until one is not blank. `None` on end of input.
async fn read_blob<R>(reader: &mut R) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            return Ok(Some(trimmed.to_string()));
        }
    }
}

/// Moves a completed file out of staging under its announced name.
fn deliver(
    staging: &DirectoryStore,
    output_dir: &Path,
    snapshot: &TransferSnapshot,
) -> anyhow::Result<PathBuf> {
    let staged = staging.path_for(&snapshot.id)?;
    let name = sanitize_file_name(&snapshot.name).unwrap_or_else(|e| {
        tracing::warn!(name = %snapshot.name, error = %e, "unusable name, using transfer id");
        snapshot.id.clone()
    });
    let target = unique_destination(output_dir, &name);
    std::fs::rename(&staged, &target)
        .with_context(|| format!("cannot move {} into place", staged.display()))?;
    Ok(target)
}

/// `dir/name`, or `dir/stem (n).ext` for the first `n` that is free.
fn unique_destination(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }
    let path = Path::new(name);
    let stem = path
        .file_stem()
        .map_or_else(|| name.to_string(), |s| s.to_string_lossy().into_owned());
    let ext = path.extension().map(|e| e.to_string_lossy().into_owned());
    (1..)
        .map(|n| match &ext {
            Some(ext) => dir.join(format!("{stem} ({n}).{ext}")),
            None => dir.join(format!("{stem} ({n})")),
        })
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}

/// MIME type from the file extension; `application/octet-stream` otherwise.
fn guess_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("txt" | "log" | "md") => "text/plain",
        Some("html" | "htm") => "text/html",
        Some("csv") => "text/csv",
        Some("json") => "application/json",
        Some("pdf") => "application/pdf",
        Some("zip") => "application/zip",
        Some("gz" | "tgz") => "application/gzip",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mkv") => "video/x-matroska",
        _ => "application/octet-stream",
    }
}

/// Logs progress once per tenth of a transfer.
#[derive(Default)]
struct Progress {
    tracker: ProgressTracker,
    reported: HashMap<String, u8>,
}

impl Progress {
    fn report(&mut self, snapshot: &TransferSnapshot) {
        let speed = self.tracker.observe(snapshot);
        if snapshot.is_terminal() {
            self.reported.remove(&snapshot.id);
            match snapshot.status {
                TransferStatus::Completed => tracing::info!(
                    name = %snapshot.name,
                    size = %format_bytes(snapshot.declared_size),
                    "completed"
                ),
                _ => tracing::warn!(
                    name = %snapshot.name,
                    failure = ?snapshot.failure,
                    "failed"
                ),
            }
            return;
        }

        let decile = (snapshot.percent() / 10.0).floor() as u8;
        let last = self.reported.entry(snapshot.id.clone()).or_insert(0);
        if decile > *last {
            *last = decile;
            tracing::info!(
                name = %snapshot.name,
                progress = %format!("{:.0}%", snapshot.percent()),
                done = %format_bytes(snapshot.bytes_acknowledged),
                speed = %format_speed(speed),
                eta = ?self.tracker.eta(snapshot),
                "transferring"
            );
        }
    }
}
