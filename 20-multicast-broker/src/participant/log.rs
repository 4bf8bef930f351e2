use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use tokio::{fs::OpenOptions, io::AsyncWriteExt};

/// Append-only file of received messages, one per line.
#[derive(Debug, Clone)]
pub struct MessageLog {
    path: Arc<PathBuf>,
}

impl MessageLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Arc::new(path.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, message: &str) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path.as_path())
            .await?;
        file.write_all(format!("{message}\n").as_bytes()).await?;
        file.flush().await
    }
}
