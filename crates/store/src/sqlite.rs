//! Shared SQLite plumbing for the two store adapters.

use pubvec_core::{AppError, AppResult};
use rusqlite::Connection;
use std::path::Path;

/// Open a connection to the database at `path`, creating parent directories
/// as needed. Connections are scoped per operation, never held process-wide.
pub fn open(path: &Path) -> AppResult<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AppError::StoreUnavailable(format!(
                    "Failed to create store directory {:?}: {}",
                    parent, e
                ))
            })?;
        }
    }

    Connection::open(path)
        .map_err(|e| AppError::StoreUnavailable(format!("Failed to open {:?}: {}", path, e)))
}

/// Map a rusqlite error onto the pipeline taxonomy: constraint violations
/// are data problems (`Integrity`), everything else is treated as the store
/// being unavailable.
pub fn store_err(context: &str, err: rusqlite::Error) -> AppError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            AppError::Integrity(format!("{}: {}", context, err))
        }
        _ => AppError::StoreUnavailable(format!("{}: {}", context, err)),
    }
}

/// Convert an embedding vector to little-endian bytes for BLOB storage.
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for &value in embedding {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Convert BLOB bytes back to an embedding vector.
pub fn bytes_to_embedding(bytes: &[u8]) -> AppResult<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(AppError::Integrity(
            "Invalid embedding bytes length".to_string(),
        ));
    }

    let mut embedding = Vec::with_capacity(bytes.len() / 4);
    for chunk in bytes.chunks_exact(4) {
        let value = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        embedding.push(value);
    }

    Ok(embedding)
}

/// Build a `?, ?, ...` placeholder list for an IN clause.
pub fn placeholders(n: usize) -> String {
    let mut s = String::with_capacity(n * 2);
    for i in 0..n {
        if i > 0 {
            s.push(',');
        }
        s.push('?');
    }
    s
}
