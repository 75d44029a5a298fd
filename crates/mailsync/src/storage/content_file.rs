//! File-based content storage with zstd compression

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::content::{ContentKey, ContentStore};

/// File-based content storage with zstd compression
///
/// Blobs live under the store root at their key path plus a `.zst` suffix:
/// ```text
/// content/
///   conn-1/
///     conn-1#5.json.zst                     # body document for uid 5
///     attachments/
///       conn-1#5/
///         conn-1#5#0.zst                    # attachment 0 of uid 5
/// ```
pub struct FileContentStore {
    root: PathBuf,
    compression_level: i32,
}

impl FileContentStore {
    /// Create a new file content store at the given path
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).context("Failed to create content storage directory")?;
        Ok(Self {
            root,
            compression_level: 3,
        })
    }

    /// Filesystem path for a content key
    fn blob_path(&self, key: &ContentKey) -> PathBuf {
        self.root.join(format!("{}.zst", key.as_str()))
    }
}

impl ContentStore for FileContentStore {
    fn put(&self, key: &ContentKey, data: &[u8], _content_type: &str) -> Result<ContentKey> {
        let path = self.blob_path(key);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let compressed =
            zstd::encode_all(data, self.compression_level).context("Failed to compress blob")?;

        // Write atomically (write to temp, then rename)
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, &compressed)?;
        fs::rename(&temp_path, &path)?;

        Ok(key.clone())
    }

    fn get(&self, key: &ContentKey) -> Result<Option<Vec<u8>>> {
        let path = self.blob_path(key);

        if !path.exists() {
            return Ok(None);
        }

        let compressed = fs::read(&path)?;
        let mut decoder = zstd::Decoder::new(compressed.as_slice())?;
        let mut decompressed = Vec::new();
        decoder
            .read_to_end(&mut decompressed)
            .context("Failed to decompress blob")?;

        Ok(Some(decompressed))
    }

    fn exists(&self, key: &ContentKey) -> Result<bool> {
        Ok(self.blob_path(key).exists())
    }

    fn delete_all_for_connection(&self, connection_id: &str) -> Result<()> {
        let dir = self.root.join(connection_id);
        if dir.exists() {
            fs::remove_dir_all(&dir).with_context(|| {
                format!("Failed to delete content for connection {}", connection_id)
            })?;
        }
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        if self.root.exists() {
            fs::remove_dir_all(&self.root)?;
            fs::create_dir_all(&self.root)?;
        }
        Ok(())
    }
}
