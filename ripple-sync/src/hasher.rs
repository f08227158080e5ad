//! Content checksums for files under the sync root

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use tracing::warn;

/// Default read block size (8 KiB)
pub const DEFAULT_BLOCK_SIZE: usize = 8 * 1024;

/// Content hash wrapper for blake3::Hash
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash(blake3::Hash);

impl ContentHash {
    pub fn from_blake3(hash: blake3::Hash) -> Self {
        Self(hash)
    }

    /// Lowercase hex, the form carried on the wire
    pub fn to_hex(&self) -> String {
        self.0.to_hex().to_string()
    }

    pub fn from_hex(hex: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(hex)?;
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(Self(blake3::Hash::from_bytes(array)))
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({}...)", &self.to_hex()[..8])
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HasherConfig {
    pub block_size: usize,
}

impl Default for HasherConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

/// Streams files through BLAKE3 in fixed-size blocks
#[derive(Debug, Clone)]
pub struct ContentHasher {
    block_size: usize,
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new(HasherConfig::default())
    }
}

impl ContentHasher {
    pub fn new(config: HasherConfig) -> Self {
        Self {
            block_size: config.block_size.max(1),
        }
    }

    pub fn hash_bytes(data: &[u8]) -> ContentHash {
        ContentHash::from_blake3(blake3::hash(data))
    }

    pub fn hash_file(&self, path: &Path) -> io::Result<ContentHash> {
        let mut file = File::open(path)?;
        let mut hasher = blake3::Hasher::new();
        let mut block = vec![0u8; self.block_size];

        loop {
            let n = match file.read(&mut block) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            hasher.update(&block[..n]);
        }

        Ok(ContentHash::from_blake3(hasher.finalize()))
    }

    /// Hex digest of a file, or an empty string when it cannot be read.
    pub fn checksum(&self, path: &Path) -> String {
        match self.hash_file(path) {
            Ok(hash) => hash.to_hex(),
            Err(e) => {
                warn!("Couldn't checksum file {}: {}", path.display(), e);
                String::new()
            }
        }
    }

    /// [`checksum`](Self::checksum) on the blocking pool
    pub async fn checksum_async(&self, path: PathBuf) -> String {
        let hasher = self.clone();
        let shown = path.display().to_string();
        match tokio::task::spawn_blocking(move || hasher.checksum(&path)).await {
            Ok(checksum) => checksum,
            Err(e) => {
                warn!("Checksum task for {} failed: {}", shown, e);
                String::new()
            }
        }
    }
}
