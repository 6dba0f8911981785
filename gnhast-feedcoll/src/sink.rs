//! JSON-lines point file
//!
//! Each point is appended as one JSON object per line. The file is opened
//! lazily and reopened after a failed write, so a rotated or briefly
//! unavailable file does not stop the collector.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use gnhast_client::sink::{Point, Sink};
use gnhast_client::{Error, Result};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

pub struct JsonLinesSink {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl JsonLinesSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn open(&self) -> Result<File> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Sink(format!("cannot create {}: {e}", parent.display())))?;
        }
        debug!(path = %self.path.display(), "opening point file");
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| Error::Sink(format!("cannot open {}: {e}", self.path.display())))
    }
}

#[async_trait]
impl Sink for JsonLinesSink {
    async fn write(&self, point: &Point) -> Result<()> {
        let mut line = serde_json::to_string(point).map_err(|e| Error::Sink(e.to_string()))?;
        line.push('\n');

        let mut guard = self.file.lock().await;
        let mut file = match guard.take() {
            Some(file) => file,
            None => self.open().await?,
        };
        let written = async {
            file.write_all(line.as_bytes()).await?;
            file.flush().await
        }
        .await;
        if let Err(e) = written {
            return Err(Error::Sink(format!("cannot write {}: {e}", self.path.display())));
        }
        *guard = Some(file);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[tokio::test]
    async fn test_appends_one_object_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonLinesSink::new(dir.path().join("points/feed.jsonl"));

        let first = Point::new("temp", Utc.timestamp_opt(100, 0).unwrap())
            .tag("id", "t1")
            .field("data", 21.5);
        let second = Point::new("dimmer", Utc.timestamp_opt(160, 0).unwrap())
            .tag("id", "d1")
            .field("data", 0.5);
        sink.write(&first).await.unwrap();
        sink.write(&second).await.unwrap();

        let text = std::fs::read_to_string(sink.path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let decoded: Point = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(decoded, second);
        let raw: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(raw["tags"]["id"], "t1");
        assert_eq!(raw["fields"]["data"], 21.5);
    }

    #[tokio::test]
    async fn test_unwritable_path_is_a_sink_error() {
        let dir = tempfile::tempdir().unwrap();
        // a directory where the file should be
        let sink = JsonLinesSink::new(dir.path());
        let point = Point::new("temp", Utc.timestamp_opt(100, 0).unwrap()).field("data", 1.0);
        assert!(matches!(sink.write(&point).await, Err(Error::Sink(_))));
    }
}
