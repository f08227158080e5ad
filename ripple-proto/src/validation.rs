//! Input validation for records crossing the broker
#![allow(clippy::missing_errors_doc)]

use std::path::{Component, Path, PathBuf};

use thiserror::Error;

/// Size limits applied to inbound records
pub mod limits {
    /// Maximum length for a relative path (4096 bytes)
    pub const MAX_PATH_LENGTH: usize = 4096;

    /// Maximum length for a node identity (256 bytes)
    pub const MAX_NODE_ID_LENGTH: usize = 256;

    /// Maximum size for a single transfer chunk (16 MB)
    pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

    /// Hex length of a BLAKE3 digest
    pub const HASH_HEX_LENGTH: usize = 64;
}

/// Validation errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Path length {length} exceeds maximum {max}")]
    PathTooLong { length: usize, max: usize },

    #[error("Invalid path: {reason}")]
    InvalidPath { reason: String },

    #[error("Path {path} is outside the sync root")]
    OutsideRoot { path: PathBuf },

    #[error("Node identity length {length} exceeds maximum {max}")]
    NodeIdTooLong { length: usize, max: usize },

    #[error("Invalid hash format: {reason}")]
    InvalidHash { reason: String },

    #[error("Chunk size {size} is invalid (max: {max})")]
    InvalidChunkSize { size: usize, max: usize },

    #[error("Missing required field: {field}")]
    MissingField { field: String },
}

/// Validator for wire records
pub struct Validator;

impl Validator {
    /// Validate a relative sync path as it appears on the wire
    pub fn validate_path(path: &str) -> Result<(), ValidationError> {
        if path.is_empty() {
            return Err(ValidationError::MissingField {
                field: "path".to_string(),
            });
        }

        if path.len() > limits::MAX_PATH_LENGTH {
            return Err(ValidationError::PathTooLong {
                length: path.len(),
                max: limits::MAX_PATH_LENGTH,
            });
        }

        if path.contains('\0') {
            return Err(ValidationError::InvalidPath {
                reason: "contains null bytes".to_string(),
            });
        }

        if path.starts_with('/') || path.starts_with('\\') {
            return Err(ValidationError::InvalidPath {
                reason: "absolute paths not allowed".to_string(),
            });
        }

        // Normalized form: no empty, "." or ".." segments, no backslashes
        for segment in path.split('/') {
            match segment {
                "" | "." => {
                    return Err(ValidationError::InvalidPath {
                        reason: "path is not normalized".to_string(),
                    })
                }
                ".." => {
                    return Err(ValidationError::InvalidPath {
                        reason: "contains directory traversal".to_string(),
                    })
                }
                s if s.contains('\\') => {
                    return Err(ValidationError::InvalidPath {
                        reason: "contains a backslash".to_string(),
                    })
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// Validate a node identity
    pub fn validate_node_id(id: &str) -> Result<(), ValidationError> {
        if id.is_empty() {
            return Err(ValidationError::MissingField {
                field: "node_id".to_string(),
            });
        }

        if id.len() > limits::MAX_NODE_ID_LENGTH {
            return Err(ValidationError::NodeIdTooLong {
                length: id.len(),
                max: limits::MAX_NODE_ID_LENGTH,
            });
        }

        Ok(())
    }

    /// Validate a hex content digest
    pub fn validate_hash(hash: &str) -> Result<(), ValidationError> {
        if hash.is_empty() {
            return Err(ValidationError::InvalidHash {
                reason: "empty hash".to_string(),
            });
        }

        if hash.len() != limits::HASH_HEX_LENGTH {
            return Err(ValidationError::InvalidHash {
                reason: format!(
                    "invalid length: {} (expected {})",
                    hash.len(),
                    limits::HASH_HEX_LENGTH
                ),
            });
        }

        if !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ValidationError::InvalidHash {
                reason: "not valid hexadecimal".to_string(),
            });
        }

        Ok(())
    }

    /// Validate a configured transfer chunk size
    pub fn validate_chunk_size(size: usize) -> Result<(), ValidationError> {
        if size == 0 || size > limits::MAX_CHUNK_SIZE {
            return Err(ValidationError::InvalidChunkSize {
                size,
                max: limits::MAX_CHUNK_SIZE,
            });
        }
        Ok(())
    }
}

/// Turn an absolute path under `root` into the normalized wire form
/// (`/`-separated, no `.` or `..` segments).
pub fn relative_path(root: &Path, path: &Path) -> Result<String, ValidationError> {
    let rest = path
        .strip_prefix(root)
        .map_err(|_| ValidationError::OutsideRoot {
            path: path.to_path_buf(),
        })?;

    let mut segments = Vec::new();
    for component in rest.components() {
        match component {
            Component::Normal(part) => {
                let part = part.to_str().ok_or_else(|| ValidationError::InvalidPath {
                    reason: "path is not valid UTF-8".to_string(),
                })?;
                segments.push(part);
            }
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(ValidationError::OutsideRoot {
                    path: path.to_path_buf(),
                })
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(ValidationError::InvalidPath {
                    reason: "unexpected root component".to_string(),
                })
            }
        }
    }

    let relative = segments.join("/");
    Validator::validate_path(&relative)?;
    Ok(relative)
}

/// Resolve a wire path back to a location under `root`.
pub fn local_path(root: &Path, relative: &str) -> Result<PathBuf, ValidationError> {
    Validator::validate_path(relative)?;
    let mut full = root.to_path_buf();
    full.extend(relative.split('/'));
    Ok(full)
}
