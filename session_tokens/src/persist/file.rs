//! A session store backed by a local file

use std::{io, path::PathBuf};

use async_trait::async_trait;
use tokio::fs::OpenOptions;

use super::{BoxError, SessionStore};
use crate::TokenPair;

/// A session store that keeps the token pair as JSON in a local file
///
/// On unix, the file is created readable and writable only by its owner. A
/// missing file is treated as having no persisted session.
#[derive(Debug)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    /// Constructs a new file session store
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn read_pair(&self) -> Result<Option<TokenPair>, io::Error> {
        use tokio::io::AsyncReadExt;

        let mut file = match OpenOptions::new().read(true).open(&self.path).await {
            Ok(file) => file,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(error),
        };
        let mut data = String::new();
        file.read_to_string(&mut data).await?;
        let pair = serde_json::from_str(&data)?;
        Ok(Some(pair))
    }

    async fn write_pair(&self, pair: &TokenPair) -> Result<(), io::Error> {
        use tokio::io::AsyncWriteExt;

        let mut file_opts = OpenOptions::new();

        file_opts.create(true).truncate(true).write(true);

        #[cfg(unix)]
        file_opts.mode(0o600);

        let mut file = file_opts.open(&self.path).await?;
        let data = serde_json::to_string_pretty(pair)?;
        file.write_all(data.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load(&self) -> Result<Option<TokenPair>, BoxError> {
        Ok(self.read_pair().await?)
    }

    async fn persist(&self, pair: &TokenPair) -> Result<(), BoxError> {
        Ok(self.write_pair(pair).await?)
    }

    async fn clear(&self) -> Result<(), BoxError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }
}
