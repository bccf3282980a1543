//! Document sink for downloads chosen through the document-creation flow.

use std::path::{Component, Path, PathBuf};

use futures::FutureExt;
use hostbridge_core::{CapabilityError, CapabilityFuture, DocumentStore};
use tracing::info;

/// Writes downloaded documents to the location a surface picked.
///
/// Relative locations land under the downloads directory and may not climb
/// out of it.
pub struct FileDocuments {
    downloads_dir: PathBuf,
}

impl FileDocuments {
    pub fn new(downloads_dir: PathBuf) -> Self {
        Self { downloads_dir }
    }

    fn resolve(&self, location: &str) -> Result<PathBuf, CapabilityError> {
        let path = Path::new(location);
        if path.is_absolute() {
            return Ok(path.to_path_buf());
        }
        if path
            .components()
            .any(|component| !matches!(component, Component::Normal(_) | Component::CurDir))
        {
            return Err(CapabilityError::Failed(format!(
                "document location escapes downloads: {location}"
            )));
        }
        Ok(self.downloads_dir.join(path))
    }
}

impl DocumentStore for FileDocuments {
    fn write(&self, location: String, bytes: Vec<u8>) -> CapabilityFuture<()> {
        let target = self.resolve(&location);
        async move {
            let target = target?;
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&target, &bytes).await?;
            info!(
                component = "documents",
                event = "documents.written",
                path = %target.display(),
                bytes = bytes.len(),
                "Wrote document"
            );
            Ok(())
        }
        .boxed()
    }
}
