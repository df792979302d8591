//! Content checksums for files under the sync root.

use std::io::{self, Read};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};

/// Computes content checksums.
///
/// Implementations must report a vanished file as `io::ErrorKind::NotFound`
/// so the builder can tell an in-progress write from a real failure.
#[async_trait]
pub trait Checksummer: Send + Sync {
    async fn checksum(&self, path: &Path) -> io::Result<String>;
}

/// SHA-256 of the file content, hex encoded, computed on a blocking thread.
#[derive(Debug, Clone, Default)]
pub struct Sha256Checksummer;

impl Sha256Checksummer {
    pub fn new() -> Self {
        Self
    }
}

fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[async_trait]
impl Checksummer for Sha256Checksummer {
    async fn checksum(&self, path: &Path) -> io::Result<String> {
        let path: PathBuf = path.to_path_buf();
        tokio::task::spawn_blocking(move || hash_file(&path))
            .await
            .map_err(io::Error::other)?
    }
}
