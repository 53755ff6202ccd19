use std::path::PathBuf;

use tracing::{debug, info, warn};

/// Durable snapshot store: one `<doc>.bin` full-state file per document,
/// plus an optional `<doc>.txt` mirror of the primary text field for
/// external tooling. Only the binary file is ever read back.
pub struct DocStore {
    storage_dir: PathBuf,
    text_mirror: bool,
}

impl DocStore {
    pub fn new(storage_dir: impl Into<PathBuf>, text_mirror: bool) -> Self {
        let storage_dir = storage_dir.into();
        if let Err(e) = std::fs::create_dir_all(&storage_dir) {
            warn!(dir = %storage_dir.display(), "failed to create storage directory: {}", e);
        }
        Self {
            storage_dir,
            text_mirror,
        }
    }

    /// Read the durable snapshot for a document. Absence is a cold start,
    /// not an error; read failures are logged and treated as absent.
    pub async fn load(&self, doc_name: &str) -> Option<Vec<u8>> {
        let path = self.snapshot_path(doc_name);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                info!(doc = %doc_name, bytes = bytes.len(), "loaded snapshot from disk");
                Some(bytes)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(doc = %doc_name, "no snapshot on disk, starting cold");
                None
            }
            Err(e) => {
                warn!(doc = %doc_name, "error reading snapshot, starting cold: {}", e);
                None
            }
        }
    }

    /// Overwrite the snapshot (and text mirror) for a document. Failures are
    /// logged and swallowed; the next persist cycle simply tries again.
    pub async fn write(&self, doc_name: &str, snapshot: Vec<u8>, text: Option<String>) {
        let path = self.snapshot_path(doc_name);
        match tokio::fs::write(&path, &snapshot).await {
            Ok(()) => debug!(doc = %doc_name, bytes = snapshot.len(), "snapshot saved"),
            Err(e) => warn!(doc = %doc_name, "error saving snapshot: {}", e),
        }
        if let Some(content) = text {
            let txt_path = self.text_path(doc_name);
            if let Err(e) = tokio::fs::write(&txt_path, content).await {
                warn!(doc = %doc_name, "error saving text mirror: {}", e);
            }
        }
    }

    pub fn text_mirror_enabled(&self) -> bool {
        self.text_mirror
    }

    pub fn snapshot_path(&self, doc_name: &str) -> PathBuf {
        self.storage_dir.join(format!("{}.bin", file_stem(doc_name)))
    }

    pub fn text_path(&self, doc_name: &str) -> PathBuf {
        self.storage_dir.join(format!("{}.txt", file_stem(doc_name)))
    }
}

/// Document names come straight off the connection URL; keep them from
/// reaching into parent directories.
fn file_stem(doc_name: &str) -> String {
    let cleaned: String = doc_name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            _ => c,
        })
        .collect();
    cleaned.trim_start_matches('.').to_string()
}
