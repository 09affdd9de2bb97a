//! DVR recording manager.
//!
//! Each recording owns an ffmpeg subprocess whose input is a *local* proxy
//! URL (so rewriting, decryption and remuxing are reused) and whose output
//! is an MPEG-TS file on disk. Lifecycle state is persisted wholesale to a
//! JSON catalog after every mutation.

use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    process::{ChildStdin, Command},
    sync::{oneshot, watch, Mutex, RwLock},
    time::timeout,
};

use crate::{
    config::Config,
    types::{Recording, RecordingStatus},
    Error, Result,
};

const STOP_GRACE: Duration = Duration::from_secs(5);
const STDERR_TAIL: usize = 1000;
const CATALOG_FILE: &str = "recordings.json";

struct RecordingState {
    recording: Recording,
    stdin: Option<ChildStdin>,
    kill: Option<oneshot::Sender<()>>,
    done_rx: watch::Receiver<bool>,
    stop_requested: bool,
}

pub struct RecordingManager {
    recordings_dir: PathBuf,
    db_path: PathBuf,
    base_url: String,
    ffmpeg_path: String,
    max_duration: Duration,
    retention_days: i64,

    // Lock order: the map lock is always taken before any state lock.
    recordings: RwLock<HashMap<String, Arc<Mutex<RecordingState>>>>,
    shutdown: watch::Sender<bool>,
    /// Weak handle back to the owning Arc, set at construction; monitors
    /// upgrade it to persist the catalog after process exit.
    self_handle: std::sync::OnceLock<std::sync::Weak<RecordingManager>>,
}

impl RecordingManager {
    pub async fn new(cfg: &Config, base_url: String) -> Result<Arc<Self>> {
        let recordings_dir = PathBuf::from(&cfg.recordings_dir);
        tokio::fs::create_dir_all(&recordings_dir).await?;

        let (shutdown, _) = watch::channel(false);
        let manager = Arc::new(Self {
            db_path: recordings_dir.join(CATALOG_FILE),
            recordings_dir,
            base_url,
            ffmpeg_path: cfg.ffmpeg_path.clone(),
            max_duration: cfg.max_recording_duration,
            retention_days: cfg.recordings_retention_days,
            recordings: RwLock::new(HashMap::new()),
            shutdown,
            self_handle: std::sync::OnceLock::new(),
        });
        let _ = manager.self_handle.set(Arc::downgrade(&manager));

        if let Err(err) = manager.load_catalog().await {
            tracing::warn!(%err, "failed to load existing recordings");
        } else {
            // Re-persist so recovered statuses and file sizes are durable.
            manager.save_catalog().await;
        }

        let sweeper = manager.clone();
        tokio::spawn(async move { sweeper.retention_loop().await });

        Ok(manager)
    }

    /// Begin recording a stream. Idempotent per URL: a second start while
    /// the first is active returns the existing recording.
    pub async fn start(
        &self,
        url: &str,
        name: &str,
        clear_key: Option<&str>,
    ) -> Result<Recording> {
        let now = Utc::now();
        let id = format!("rec_{}", now.timestamp_nanos_opt().unwrap_or_default());
        let filename = format!(
            "{}_{}.ts",
            now.format("%Y%m%d_%H%M%S"),
            sanitize_filename(name)
        );
        let file_path = self.recordings_dir.join(filename);

        let recording = Recording {
            id: id.clone(),
            name: name.to_string(),
            url: url.to_string(),
            started_at: now.timestamp(),
            status: RecordingStatus::Recording,
            duration: 0,
            file_path: file_path.to_string_lossy().to_string(),
            file_size: 0,
            clearkey: clear_key.map(str::to_string),
        };

        let (done_tx, done_rx) = watch::channel(false);

        // Duplicate scan and slot reservation happen under one write lock.
        {
            let mut map = self.recordings.write().await;
            for state in map.values() {
                let state = state.lock().await;
                if state.recording.url == url
                    && state.recording.status == RecordingStatus::Recording
                {
                    tracing::info!(url, existing_id = %state.recording.id, "recording already exists for URL");
                    return Ok(state.recording.clone());
                }
            }
            map.insert(
                id.clone(),
                Arc::new(Mutex::new(RecordingState {
                    recording: recording.clone(),
                    stdin: None,
                    kill: None,
                    done_rx: done_rx.clone(),
                    stop_requested: false,
                })),
            );
        }

        tracing::info!(%id, name, url, "starting recording");

        let input_url = self.build_input_url(url, clear_key);
        let spawn_result = Command::new(&self.ffmpeg_path)
            .args(recording_args(&input_url, &recording.file_path))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn();

        let mut child = match spawn_result {
            Ok(child) => child,
            Err(err) => {
                // Release the reserved slot on failure.
                self.recordings.write().await.remove(&id);
                let _ = done_tx.send(true);
                return Err(Error::Subprocess(format!("failed to start ffmpeg: {err}")));
            }
        };

        let stdin = child.stdin.take();
        let stderr = child.stderr.take();
        let (kill_tx, kill_rx) = oneshot::channel();

        let state = self
            .recordings
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::Internal("recording slot vanished".into()))?;
        {
            let mut state = state.lock().await;
            state.stdin = stdin;
            state.kill = Some(kill_tx);
        }

        self.save_catalog().await;

        let monitor_state = state.clone();
        let manager = self
            .self_handle
            .get()
            .and_then(std::sync::Weak::upgrade)
            .ok_or_else(|| Error::Internal("recording manager handle unavailable".into()))?;
        tokio::spawn(async move {
            monitor_recording(
                manager,
                monitor_state,
                child,
                stderr,
                kill_rx,
                done_tx,
            )
            .await;
        });

        Ok(recording)
    }

    /// Stop an active recording: write the graceful `q`, wait, then kill.
    pub async fn stop(&self, id: &str) -> Result<()> {
        let state = self.get_state(id).await?;

        let (mut done_rx, kill) = {
            let mut state = state.lock().await;
            if state.recording.status != RecordingStatus::Recording {
                return Err(Error::RecordingNotActive(id.to_string()));
            }
            state.stop_requested = true;

            if let Some(stdin) = state.stdin.as_mut() {
                if stdin.write_all(b"q").await.is_ok() {
                    let _ = stdin.flush().await;
                    tracing::debug!(id, "sent quit command to ffmpeg");
                }
            }
            (state.done_rx.clone(), state.kill.take())
        };

        tracing::info!(id, "stopping recording");

        let graceful = timeout(STOP_GRACE, done_rx.wait_for(|done| *done))
            .await
            .is_ok();

        if !graceful {
            tracing::warn!(id, "graceful shutdown timed out");
            if let Some(kill) = kill {
                let _ = kill.send(());
            }
            if timeout(STOP_GRACE, done_rx.wait_for(|done| *done))
                .await
                .is_err()
            {
                tracing::error!(id, "failed to stop recording");
            }
        }

        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Recording> {
        let state = self.get_state(id).await?;
        let state = state.lock().await;
        Ok(state.recording.clone())
    }

    pub async fn list(&self) -> Vec<Recording> {
        let map = self.recordings.read().await;
        let mut result = Vec::with_capacity(map.len());
        for state in map.values() {
            let mut state = state.lock().await;
            if state.recording.file_size == 0 {
                if let Ok(meta) = tokio::fs::metadata(&state.recording.file_path).await {
                    state.recording.file_size = meta.len();
                }
            }
            result.push(state.recording.clone());
        }
        result.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        result
    }

    /// Active recordings with live file size and elapsed duration.
    pub async fn list_active(&self) -> Vec<Recording> {
        let map = self.recordings.read().await;
        let mut result = Vec::new();
        for state in map.values() {
            let mut state = state.lock().await;
            if state.recording.status != RecordingStatus::Recording {
                continue;
            }
            if let Ok(meta) = tokio::fs::metadata(&state.recording.file_path).await {
                state.recording.file_size = meta.len();
            }
            state.recording.duration = Utc::now().timestamp() - state.recording.started_at;
            result.push(state.recording.clone());
        }
        result
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let state = {
            let mut map = self.recordings.write().await;
            map.remove(id)
                .ok_or_else(|| Error::NotFound(format!("recording not found: {id}")))?
        };

        let (active, file_path, kill, mut done_rx) = {
            let mut state = state.lock().await;
            (
                state.recording.status == RecordingStatus::Recording,
                state.recording.file_path.clone(),
                state.kill.take(),
                state.done_rx.clone(),
            )
        };

        if active {
            if let Some(kill) = kill {
                let _ = kill.send(());
            }
            let _ = timeout(STOP_GRACE, done_rx.wait_for(|done| *done)).await;
        }

        if let Err(err) = tokio::fs::remove_file(&file_path).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %file_path, %err, "failed to remove recording file");
            }
        }

        tracing::info!(id, "deleted recording");
        self.save_catalog().await;
        Ok(())
    }

    /// Shut down: cancel every active subprocess and persist once more.
    pub async fn close(&self) {
        tracing::info!("shutting down recording manager");
        let _ = self.shutdown.send(true);

        let states: Vec<_> = self.recordings.read().await.values().cloned().collect();
        for state in states {
            let (kill, mut done_rx, active) = {
                let mut state = state.lock().await;
                (
                    state.kill.take(),
                    state.done_rx.clone(),
                    state.recording.status == RecordingStatus::Recording,
                )
            };
            if active {
                if let Some(kill) = kill {
                    let _ = kill.send(());
                }
                let _ = timeout(STOP_GRACE, done_rx.wait_for(|done| *done)).await;
            }
        }

        self.save_catalog().await;
    }

    #[cfg(test)]
    async fn insert_active_for_test(&self, recording: Recording) {
        let (_, done_rx) = watch::channel(false);
        self.recordings.write().await.insert(
            recording.id.clone(),
            Arc::new(Mutex::new(RecordingState {
                recording,
                stdin: None,
                kill: None,
                done_rx,
                stop_requested: false,
            })),
        );
    }

    async fn get_state(&self, id: &str) -> Result<Arc<Mutex<RecordingState>>> {
        self.recordings
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("recording not found: {id}")))
    }

    /// The recorder feeds ffmpeg a local proxy URL with bypass disabled so
    /// every byte is rewritten, decrypted and remuxed by this process.
    fn build_input_url(&self, original_url: &str, clear_key: Option<&str>) -> String {
        let lower = original_url.to_lowercase();
        let endpoint = if lower.contains(".mpd") || lower.contains("/dash/") {
            "/proxy/mpd/manifest.m3u8"
        } else {
            "/proxy/manifest.m3u8"
        };

        let mut url = match url::Url::parse(&format!("{}{}", self.base_url, endpoint)) {
            Ok(url) => url,
            Err(_) => return original_url.to_string(),
        };
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("url", original_url);
            if let Some(clear_key) = clear_key.filter(|k| !k.is_empty()) {
                query.append_pair("clearkey", clear_key);
            }
            query.append_pair("no_bypass", "1");
        }
        url.to_string()
    }

    /// On load, any entry still marked `recording` did not survive the
    /// restart and flips to `failed`; file sizes refresh from disk.
    async fn load_catalog(&self) -> Result<()> {
        let data = match tokio::fs::read(&self.db_path).await {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        let recordings: Vec<Recording> = serde_json::from_slice(&data)
            .map_err(|e| Error::Internal(format!("catalog parse: {e}")))?;

        let mut map = self.recordings.write().await;
        for mut recording in recordings {
            if recording.status == RecordingStatus::Recording {
                recording.status = RecordingStatus::Failed;
            }
            match tokio::fs::metadata(&recording.file_path).await {
                Ok(meta) => recording.file_size = meta.len(),
                Err(_) => {
                    tracing::warn!(id = %recording.id, path = %recording.file_path, "recording file not found");
                }
            }

            let (_, done_rx) = watch::channel(true);
            map.insert(
                recording.id.clone(),
                Arc::new(Mutex::new(RecordingState {
                    recording,
                    stdin: None,
                    kill: None,
                    done_rx,
                    stop_requested: false,
                })),
            );
        }

        tracing::info!(count = map.len(), "loaded recordings");
        Ok(())
    }

    /// Snapshot under the locks, write outside them.
    async fn save_catalog(&self) {
        let snapshot = {
            let map = self.recordings.read().await;
            let mut all = Vec::with_capacity(map.len());
            for state in map.values() {
                all.push(state.lock().await.recording.clone());
            }
            all
        };

        let data = match serde_json::to_vec_pretty(&snapshot) {
            Ok(data) => data,
            Err(err) => {
                tracing::error!(%err, "failed to serialize recordings");
                return;
            }
        };

        if let Err(err) = tokio::fs::write(&self.db_path, data).await {
            tracing::error!(%err, "failed to save recordings");
        }
    }

    /// Hourly sweep removing non-active recordings past retention.
    async fn retention_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        let mut ticker = tokio::time::interval(Duration::from_secs(3600));
        ticker.tick().await; // consume the immediate first tick

        loop {
            tokio::select! {
                _ = shutdown.wait_for(|stop| *stop) => return,
                _ = ticker.tick() => self.sweep_expired().await,
            }
        }
    }

    async fn sweep_expired(&self) {
        let cutoff = Utc::now().timestamp() - self.retention_days * 24 * 3600;

        let mut expired = Vec::new();
        {
            let map = self.recordings.read().await;
            for (id, state) in map.iter() {
                let state = state.lock().await;
                if state.recording.status != RecordingStatus::Recording
                    && state.recording.started_at < cutoff
                {
                    expired.push(id.clone());
                }
            }
        }

        for id in expired {
            tracing::info!(%id, "removing old recording");
            let _ = self.delete(&id).await;
        }
    }
}

async fn monitor_recording(
    manager: Arc<RecordingManager>,
    state: Arc<Mutex<RecordingState>>,
    mut child: tokio::process::Child,
    stderr: Option<tokio::process::ChildStderr>,
    kill_rx: oneshot::Receiver<()>,
    done_tx: watch::Sender<bool>,
) {
    // Drain stderr concurrently, keeping only the tail for diagnostics.
    let stderr_task = tokio::spawn(async move {
        let mut output = Vec::new();
        if let Some(mut stderr) = stderr {
            let _ = stderr.read_to_end(&mut output).await;
        }
        if output.len() > STDERR_TAIL {
            output.drain(..output.len() - STDERR_TAIL);
        }
        String::from_utf8_lossy(&output).to_string()
    });

    let max_duration = manager.max_duration;
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill_rx => {
            let _ = child.kill().await;
            child.wait().await
        }
        _ = tokio::time::sleep(max_duration) => {
            tracing::warn!("recording hit max duration, killing");
            let _ = child.kill().await;
            child.wait().await
        }
    };

    let stderr_tail = stderr_task.await.unwrap_or_default();

    {
        let mut state = state.lock().await;

        let completed = match &status {
            // ffmpeg exits 255 on the graceful `q` command.
            Ok(status) => status.success() || status.code() == Some(255),
            Err(_) => false,
        };

        if completed || state.stop_requested {
            state.recording.status = RecordingStatus::Completed;
            tracing::info!(id = %state.recording.id, "recording stopped");
        } else {
            state.recording.status = RecordingStatus::Failed;
            tracing::warn!(
                id = %state.recording.id,
                status = ?status,
                ffmpeg_output = %stderr_tail,
                "recording failed"
            );
        }

        if let Ok(meta) = tokio::fs::metadata(&state.recording.file_path).await {
            state.recording.file_size = meta.len();
        }
        state.recording.duration = Utc::now().timestamp() - state.recording.started_at;
    }

    manager.save_catalog().await;
    let _ = done_tx.send(true);
}

fn recording_args(input_url: &str, output_path: &str) -> Vec<String> {
    [
        "-hide_banner",
        "-loglevel",
        "warning",
        "-y",
        "-err_detect",
        "ignore_err",
        "-fflags",
        "+genpts+discardcorrupt+igndts",
        "-analyzeduration",
        "10000000",
        "-probesize",
        "10000000",
        "-rw_timeout",
        "30000000",
        "-reconnect",
        "1",
        "-reconnect_streamed",
        "1",
        "-reconnect_delay_max",
        "2",
        "-live_start_index",
        "-1",
        "-i",
        input_url,
        "-map",
        "0:v:0",
        "-map",
        "0:a:0?",
        "-c",
        "copy",
        "-f",
        "mpegts",
        output_path,
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

/// Reduce a user-supplied name to `[A-Za-z0-9_-]`, at most 50 chars.
pub fn sanitize_filename(name: &str) -> String {
    let mut out = String::new();
    for c in name.chars() {
        if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
            out.push(c);
        } else if c == ' ' {
            out.push('_');
        }
    }

    while out.contains("__") {
        out = out.replace("__", "_");
    }
    let mut out = out.trim_matches('_').to_string();

    out.truncate(50);
    if out.is_empty() {
        out = "recording".to_string();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn test_config(dir: &Path) -> Config {
        let mut cfg = Config::load();
        cfg.recordings_dir = dir.to_string_lossy().to_string();
        cfg.recordings_retention_days = 7;
        cfg
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("My Show S01E02"), "My_Show_S01E02");
        assert_eq!(sanitize_filename("a/b\\c:d"), "abcd");
        assert_eq!(sanitize_filename("__x__"), "x");
        assert_eq!(sanitize_filename(""), "recording");
        assert_eq!(sanitize_filename("!!!"), "recording");
        let long = "a".repeat(80);
        assert_eq!(sanitize_filename(&long).len(), 50);
    }

    #[test]
    fn test_recording_args_shape() {
        let args = recording_args("http://localhost/in.m3u8", "/tmp/out.ts");
        assert_eq!(args.last().unwrap(), "/tmp/out.ts");
        let i = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(args[i + 1], "http://localhost/in.m3u8");
        assert!(args.contains(&"mpegts".to_string()));
    }

    #[tokio::test]
    async fn test_build_input_url() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path());
        let manager = RecordingManager::new(&cfg, "http://localhost:7860".to_string())
            .await
            .unwrap();

        let url = manager.build_input_url("https://cdn.com/live/master.m3u8", None);
        assert!(url.starts_with("http://localhost:7860/proxy/manifest.m3u8?"));
        assert!(url.contains("no_bypass=1"));

        let url = manager.build_input_url("https://cdn.com/live/stream.mpd", Some("kid:key"));
        assert!(url.starts_with("http://localhost:7860/proxy/mpd/manifest.m3u8?"));
        assert!(url.contains("clearkey=kid%3Akey"));
    }

    #[tokio::test]
    async fn test_crash_recovery_flips_to_failed_and_refreshes_size() {
        let dir = tempfile::tempdir().unwrap();

        // A recording file with real bytes on disk.
        let file_path = dir.path().join("20240101_000000_t1.ts");
        tokio::fs::write(&file_path, vec![0u8; 2048]).await.unwrap();

        let catalog = serde_json::json!([{
            "id": "rec_1",
            "name": "t1",
            "url": "http://u/m.m3u8",
            "started_at": 1700000000,
            "status": "recording",
            "duration": 0,
            "file_path": file_path.to_string_lossy(),
            "file_size": 0
        }]);
        tokio::fs::write(
            dir.path().join(CATALOG_FILE),
            serde_json::to_vec_pretty(&catalog).unwrap(),
        )
        .await
        .unwrap();

        let cfg = test_config(dir.path());
        let manager = RecordingManager::new(&cfg, "http://localhost".to_string())
            .await
            .unwrap();

        let rec = manager.get("rec_1").await.unwrap();
        assert_eq!(rec.status, RecordingStatus::Failed);
        assert_eq!(rec.file_size, 2048);

        // The recovered state was re-persisted.
        let data = tokio::fs::read(dir.path().join(CATALOG_FILE)).await.unwrap();
        let persisted: Vec<Recording> = serde_json::from_slice(&data).unwrap();
        assert_eq!(persisted[0].status, RecordingStatus::Failed);
        assert_eq!(persisted[0].file_size, 2048);
    }

    #[tokio::test]
    async fn test_completed_entries_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = serde_json::json!([{
            "id": "rec_2",
            "name": "done",
            "url": "http://u/m.m3u8",
            "started_at": 1700000000,
            "status": "completed",
            "duration": 120,
            "file_path": dir.path().join("gone.ts").to_string_lossy(),
            "file_size": 555
        }]);
        tokio::fs::write(
            dir.path().join(CATALOG_FILE),
            serde_json::to_vec(&catalog).unwrap(),
        )
        .await
        .unwrap();

        let cfg = test_config(dir.path());
        let manager = RecordingManager::new(&cfg, "http://localhost".to_string())
            .await
            .unwrap();

        let rec = manager.get("rec_2").await.unwrap();
        assert_eq!(rec.status, RecordingStatus::Completed);
        assert_eq!(rec.duration, 120);
    }

    #[tokio::test]
    async fn test_delete_removes_file_and_entry() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("x.ts");
        tokio::fs::write(&file_path, b"data").await.unwrap();

        let catalog = serde_json::json!([{
            "id": "rec_3",
            "name": "x",
            "url": "http://u/m.m3u8",
            "started_at": 1700000000,
            "status": "completed",
            "file_path": file_path.to_string_lossy(),
            "file_size": 4
        }]);
        tokio::fs::write(
            dir.path().join(CATALOG_FILE),
            serde_json::to_vec(&catalog).unwrap(),
        )
        .await
        .unwrap();

        let cfg = test_config(dir.path());
        let manager = RecordingManager::new(&cfg, "http://localhost".to_string())
            .await
            .unwrap();

        manager.delete("rec_3").await.unwrap();
        assert!(manager.get("rec_3").await.is_err());
        assert!(!file_path.exists());

        // Deleting again reports not-found.
        assert!(matches!(
            manager.delete("rec_3").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_start_is_idempotent_per_url() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path());
        let manager = RecordingManager::new(&cfg, "http://localhost".to_string())
            .await
            .unwrap();

        manager
            .insert_active_for_test(Recording {
                id: "rec_active".to_string(),
                name: "live".to_string(),
                url: "http://u/m.m3u8".to_string(),
                started_at: Utc::now().timestamp(),
                status: RecordingStatus::Recording,
                duration: 0,
                file_path: dir.path().join("live.ts").to_string_lossy().to_string(),
                file_size: 0,
                clearkey: None,
            })
            .await;

        // A second start for the same URL returns the active recording
        // without spawning anything.
        let rec = manager
            .start("http://u/m.m3u8", "live again", None)
            .await
            .unwrap();
        assert_eq!(rec.id, "rec_active");

        let active = manager.list_active().await;
        assert_eq!(active.len(), 1);
    }

    #[tokio::test]
    async fn test_stop_inactive_recording_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = serde_json::json!([{
            "id": "rec_4",
            "name": "x",
            "url": "http://u/m.m3u8",
            "started_at": 1700000000,
            "status": "completed",
            "file_path": dir.path().join("x.ts").to_string_lossy(),
            "file_size": 0
        }]);
        tokio::fs::write(
            dir.path().join(CATALOG_FILE),
            serde_json::to_vec(&catalog).unwrap(),
        )
        .await
        .unwrap();

        let cfg = test_config(dir.path());
        let manager = RecordingManager::new(&cfg, "http://localhost".to_string())
            .await
            .unwrap();

        assert!(matches!(
            manager.stop("rec_4").await,
            Err(Error::RecordingNotActive(_))
        ));
    }
}
