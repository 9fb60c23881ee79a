use std::io;
use std::path::{Path, PathBuf};

use uuid::Uuid;

/// Long-term home for payloads of permanently failed entries.
#[derive(Debug, Clone)]
pub struct Archive {
    dir: PathBuf,
}

impl Archive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Where the payload of `id` ends up, keeping the source extension.
    pub fn path_for(&self, id: Uuid, bundle_ref: &str) -> PathBuf {
        let name = match Path::new(bundle_ref).extension().and_then(|e| e.to_str()) {
            Some(ext) => format!("{id}_failed.{ext}"),
            None => format!("{id}_failed"),
        };
        self.dir.join(name)
    }

    /// Move the payload into the archive. `Ok(None)` when there is nothing
    /// left at `bundle_ref`, which makes repeated calls harmless.
    pub async fn relocate(&self, id: Uuid, bundle_ref: &str) -> io::Result<Option<PathBuf>> {
        let source = Path::new(bundle_ref);
        if !tokio::fs::try_exists(source).await? {
            return Ok(None);
        }

        tokio::fs::create_dir_all(&self.dir).await?;
        let target = self.path_for(id, bundle_ref);

        if let Err(rename_err) = tokio::fs::rename(source, &target).await {
            // Cross-device moves cannot rename.
            tracing::debug!("rename of {bundle_ref} failed ({rename_err}), copying instead");
            tokio::fs::copy(source, &target).await?;
            tokio::fs::remove_file(source).await?;
        }

        tracing::info!("Archived payload of {id} to {}", target.display());
        Ok(Some(target))
    }
}
