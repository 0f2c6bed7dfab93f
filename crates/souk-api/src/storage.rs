use std::path::{Path, PathBuf};

use anyhow::Result;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// On-disk store for listing and message images.
///
/// Files are content-addressed: `{dir}/{sha256}.{ext}`. Uploading the same
/// picture twice returns the same name and writes nothing.
pub struct Storage {
    dir: PathBuf,
}

impl Storage {
    pub async fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir).await?;
        info!("Media directory: {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn file_path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Stores `data` and returns its file name.
    pub async fn save(&self, data: &[u8], ext: &str) -> Result<String> {
        let name = format!("{}.{}", hex::encode(Sha256::digest(data)), ext);
        let path = self.file_path(&name);

        if fs::try_exists(&path).await? {
            debug!("{} already stored", name);
            return Ok(name);
        }

        // Write under a temporary name so readers never see a partial file
        let tmp = self.dir.join(format!(".{}.part", name));
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(data).await?;
        file.flush().await?;
        drop(file);
        fs::rename(&tmp, &path).await?;

        Ok(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn identical_uploads_share_one_file() {
        let dir = std::env::temp_dir().join(format!("souk-storage-{}", uuid::Uuid::new_v4()));
        let storage = Storage::new(dir.clone()).await.unwrap();

        let a = storage.save(b"jpeg bytes", "jpg").await.unwrap();
        let b = storage.save(b"jpeg bytes", "jpg").await.unwrap();
        let c = storage.save(b"other bytes", "jpg").await.unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.ends_with(".jpg"));
        assert_eq!(a.len(), 64 + 4);
        assert_eq!(fs::read(storage.file_path(&a)).await.unwrap(), b"jpeg bytes");

        fs::remove_dir_all(dir).await.unwrap();
    }
}
