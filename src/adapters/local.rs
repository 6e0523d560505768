use crate::domain::ports::ArtifactStore;
use crate::utils::error::{MortgageError, Result};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Artifact store rooted at a local directory; keys are relative paths.
#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    base_path: String,
}

impl LocalArtifactStore {
    pub fn new(base_path: String) -> Self {
        Self { base_path }
    }

    fn full_path(&self, key: &str) -> PathBuf {
        Path::new(&self.base_path).join(key)
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn read_object(&self, key: &str) -> Result<Vec<u8>> {
        match fs::read(self.full_path(key)).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(MortgageError::not_found("artifact", key)),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_object(&self, key: &str, data: &[u8]) -> Result<()> {
        let full_path = self.full_path(key);

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        fs::write(full_path, data).await?;
        Ok(())
    }

    fn location(&self, key: &str) -> String {
        self.full_path(key).display().to_string()
    }
}
