//! fMP4 → MPEG-TS remux through an ffmpeg subprocess (stdin→stdout).

use bytes::Bytes;
use std::process::Stdio;
use tokio::{io::AsyncWriteExt, process::Command};

use crate::{Error, Result};

#[derive(Clone)]
pub struct Remuxer {
    ffmpeg_path: String,
}

impl Remuxer {
    pub fn new(ffmpeg_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }

    /// Remux an fMP4 byte string to MPEG-TS.
    ///
    /// Streams are copied, not re-encoded. A non-zero exit with non-empty
    /// stdout is accepted: ffmpeg warns on non-fatal container issues.
    pub async fn remux_to_ts(&self, input: Bytes) -> Result<Bytes> {
        let mut child = Command::new(&self.ffmpeg_path)
            .args([
                "-y",
                "-i",
                "pipe:0",
                "-c",
                "copy",
                "-copyts",
                "-bsf:v",
                "h264_mp4toannexb",
                "-bsf:a",
                "aac_adtstoasc",
                "-f",
                "mpegts",
                "pipe:1",
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Subprocess(format!("spawn {}: {}", self.ffmpeg_path, e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Subprocess("ffmpeg stdin unavailable".into()))?;

        // Feed stdin from a task so a full stdout pipe cannot deadlock us.
        let writer = tokio::spawn(async move {
            let _ = stdin.write_all(&input).await;
            let _ = stdin.shutdown().await;
        });

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| Error::Subprocess(e.to_string()))?;
        let _ = writer.await;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !output.stdout.is_empty() {
                tracing::debug!(
                    output_size = output.stdout.len(),
                    stderr = %stderr,
                    "ffmpeg completed with warnings"
                );
                return Ok(Bytes::from(output.stdout));
            }
            return Err(Error::RemuxFailed(format!(
                "ffmpeg exit {:?}: {}",
                output.status.code(),
                stderr
            )));
        }

        if output.stdout.is_empty() {
            return Err(Error::RemuxFailed("ffmpeg produced no output".into()));
        }

        Ok(Bytes::from(output.stdout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_binary_is_subprocess_error() {
        let remuxer = Remuxer::new("/nonexistent/ffmpeg-binary");
        let err = remuxer.remux_to_ts(Bytes::from_static(b"x")).await.unwrap_err();
        assert!(matches!(err, Error::Subprocess(_)));
    }
}
