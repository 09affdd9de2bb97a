//! ffmpeg transcoder supervisor: one child per stream writing a local HLS
//! directory, swept after inactivity.

use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::{
    process::Command,
    sync::{oneshot, watch, Mutex},
};

use crate::{config::Config, Error, Result};

const INACTIVITY_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

struct TranscodeStream {
    output_dir: PathBuf,
    kill: Option<oneshot::Sender<()>>,
    last_access: Instant,
}

pub struct Transcoder {
    output_dir: PathBuf,
    ffmpeg_path: String,
    streams: Mutex<HashMap<String, TranscodeStream>>,
    shutdown: watch::Sender<bool>,
}

impl Transcoder {
    pub async fn new(cfg: &Config) -> Result<Arc<Self>> {
        let output_dir = PathBuf::from(&cfg.ffmpeg_output_dir);
        tokio::fs::create_dir_all(&output_dir).await?;

        let (shutdown, _) = watch::channel(false);
        let transcoder = Arc::new(Self {
            output_dir,
            ffmpeg_path: cfg.ffmpeg_path.clone(),
            streams: Mutex::new(HashMap::new()),
            shutdown,
        });

        let sweeper = transcoder.clone();
        tokio::spawn(async move { sweeper.sweep_loop().await });

        Ok(transcoder)
    }

    /// Launch a transcode of `url` into a per-stream HLS directory and
    /// return the stream id.
    pub async fn start_stream(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        clear_key: Option<&str>,
    ) -> Result<String> {
        let stream_id = format!("stream_{}", Utc::now().timestamp_nanos_opt().unwrap_or_default());
        let stream_dir = self.output_dir.join(&stream_id);
        tokio::fs::create_dir_all(&stream_dir).await?;

        let output_path = stream_dir.join("index.m3u8");
        let args = transcode_args(url, headers, clear_key, &output_path);

        tracing::info!(%stream_id, url, "starting ffmpeg transcode");

        let mut child = Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .map_err(|e| Error::Subprocess(format!("failed to start ffmpeg: {e}")))?;

        let (kill_tx, kill_rx) = oneshot::channel();
        let monitor_id = stream_id.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            let status = tokio::select! {
                status = child.wait() => status,
                _ = kill_rx => {
                    let _ = child.kill().await;
                    child.wait().await
                }
            };
            match status {
                Ok(status) if status.success() => {
                    tracing::info!(stream_id = %monitor_id, elapsed = ?started.elapsed(), "ffmpeg transcode completed");
                }
                status => {
                    tracing::warn!(stream_id = %monitor_id, ?status, "ffmpeg transcode exited");
                }
            }
        });

        self.streams.lock().await.insert(
            stream_id.clone(),
            TranscodeStream {
                output_dir: stream_dir,
                kill: Some(kill_tx),
                last_access: Instant::now(),
            },
        );

        Ok(stream_id)
    }

    /// Directory holding the stream's HLS output.
    pub fn stream_path(&self, stream_id: &str) -> PathBuf {
        self.output_dir.join(stream_id)
    }

    /// Refresh last access; called on every served file.
    pub async fn touch(&self, stream_id: &str) {
        if let Some(stream) = self.streams.lock().await.get_mut(stream_id) {
            stream.last_access = Instant::now();
        }
    }

    pub async fn stop_stream(&self, stream_id: &str) -> Result<()> {
        let stream = self
            .streams
            .lock()
            .await
            .remove(stream_id)
            .ok_or_else(|| Error::NotFound(format!("stream not found: {stream_id}")))?;

        tracing::info!(stream_id, "stopping ffmpeg stream");
        if let Some(kill) = stream.kill {
            let _ = kill.send(());
        }
        if let Err(err) = tokio::fs::remove_dir_all(&stream.output_dir).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(stream_id, %err, "failed to remove stream directory");
            }
        }
        Ok(())
    }

    async fn sweep_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.wait_for(|stop| *stop) => return,
                _ = ticker.tick() => self.sweep_inactive().await,
            }
        }
    }

    async fn sweep_inactive(&self) {
        let stale: Vec<String> = {
            let streams = self.streams.lock().await;
            streams
                .iter()
                .filter(|(_, s)| s.last_access.elapsed() > INACTIVITY_TIMEOUT)
                .map(|(id, _)| id.clone())
                .collect()
        };

        for stream_id in stale {
            tracing::info!(%stream_id, "cleaning up inactive stream");
            let _ = self.stop_stream(&stream_id).await;
        }
    }

    /// Stop every stream and remove the output directory.
    pub async fn close(&self) {
        tracing::info!("shutting down transcoder");
        let _ = self.shutdown.send(true);

        let ids: Vec<String> = self.streams.lock().await.keys().cloned().collect();
        for id in ids {
            let _ = self.stop_stream(&id).await;
        }

        let _ = tokio::fs::remove_dir_all(&self.output_dir).await;
    }
}

fn transcode_args(
    url: &str,
    headers: &HashMap<String, String>,
    clear_key: Option<&str>,
    output_path: &Path,
) -> Vec<String> {
    let mut args: Vec<String> = [
        "-hide_banner",
        "-loglevel",
        "warning",
        "-fflags",
        "+genpts+discardcorrupt+igndts",
        "-reconnect",
        "1",
        "-reconnect_streamed",
        "1",
        "-reconnect_delay_max",
        "5",
    ]
    .into_iter()
    .map(str::to_string)
    .collect();

    if !headers.is_empty() {
        let mut pairs: Vec<String> = headers.iter().map(|(k, v)| format!("{k}: {v}")).collect();
        pairs.sort();
        args.push("-headers".to_string());
        args.push(pairs.join("\r\n"));
    }

    if let Some(clear_key) = clear_key {
        // KID:KEY — ffmpeg takes the raw key only.
        if let Some((_, key)) = clear_key.split_once(':') {
            args.push("-cenc_decryption_key".to_string());
            args.push(key.to_string());
        }
    }

    args.push("-i".to_string());
    args.push(url.to_string());

    args.extend(
        [
            "-threads",
            "0",
            "-vf",
            "scale=-2:720",
            "-c:v",
            "libx264",
            "-preset",
            "ultrafast",
            "-profile:v",
            "baseline",
            "-level",
            "3.1",
            "-c:a",
            "aac",
            "-b:a",
            "128k",
            "-ac",
            "2",
            "-hls_time",
            "10",
            "-hls_list_size",
            "0",
            "-hls_flags",
            "delete_segments+append_list",
            "-f",
            "hls",
        ]
        .into_iter()
        .map(str::to_string),
    );
    args.push(output_path.to_string_lossy().to_string());

    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transcode_args_headers_and_key() {
        let mut headers = HashMap::new();
        headers.insert("Referer".to_string(), "https://o/".to_string());

        let args = transcode_args(
            "https://x/m.m3u8",
            &headers,
            Some("kid:secretkey"),
            Path::new("/tmp/out/index.m3u8"),
        );

        let h = args.iter().position(|a| a == "-headers").unwrap();
        assert_eq!(args[h + 1], "Referer: https://o/");

        let k = args.iter().position(|a| a == "-cenc_decryption_key").unwrap();
        assert_eq!(args[k + 1], "secretkey");

        assert_eq!(args.last().unwrap(), "/tmp/out/index.m3u8");
    }

    #[test]
    fn test_transcode_args_no_optional_parts() {
        let args = transcode_args(
            "https://x/m.m3u8",
            &HashMap::new(),
            None,
            Path::new("/tmp/out/index.m3u8"),
        );
        assert!(!args.contains(&"-headers".to_string()));
        assert!(!args.contains(&"-cenc_decryption_key".to_string()));
    }

    #[tokio::test]
    async fn test_stream_path_and_stop_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = Config::load();
        cfg.ffmpeg_output_dir = dir.path().to_string_lossy().to_string();

        let transcoder = Transcoder::new(&cfg).await.unwrap();
        let path = transcoder.stream_path("stream_1");
        assert!(path.starts_with(dir.path()));

        assert!(matches!(
            transcoder.stop_stream("missing").await,
            Err(Error::NotFound(_))
        ));
    }
}
