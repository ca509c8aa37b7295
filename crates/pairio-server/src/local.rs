//! File-backed key/value cache on the client machine
//!
//! Each pair lives in its own file under the database directory. The file
//! name is the SHA-1 of `{"collection":..,"key":..}` as compact sorted JSON,
//! sharded by its first two byte pairs:
//!
//! ```text
//! $PAIRIO_DB_PATH/
//!   3f/a1/3fa1...e9    <- value text
//! ```

use pairio_core::hash_key;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tracing::debug;

/// Directory name under `$HOME` used when no path is configured
pub const DEFAULT_DIR_NAME: &str = ".pairio";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Local store rooted at one directory
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `$HOME/.pairio`, or `.pairio` in the working directory without a home
    pub fn default_path() -> PathBuf {
        std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_default()
            .join(DEFAULT_DIR_NAME)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File holding the value of `collection`/`key`
    pub fn path_for(&self, collection: &str, key: &str) -> PathBuf {
        let document = serde_json::json!({ "collection": collection, "key": key });
        let hash = hash_key(&document.to_string());
        self.root.join(&hash[0..2]).join(&hash[2..4]).join(hash)
    }

    pub async fn get(&self, collection: &str, key: &str) -> io::Result<Option<String>> {
        let path = self.path_for(collection, key);
        match fs::read_to_string(&path).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Write the value through a temp file and rename it into place
    pub async fn set(&self, collection: &str, key: &str, value: &str) -> io::Result<()> {
        let path = self.path_for(collection, key);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).await?;
        }

        let temp_path = path.with_extension(format!(
            "tmp.{}.{}",
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        fs::write(&temp_path, value).await?;
        if let Err(e) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e);
        }

        debug!("Stored {}/{} at {}", collection, key, path.display());
        Ok(())
    }
}
