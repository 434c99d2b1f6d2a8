//! Content hashing for incremental writes

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{BuildError, BuildResult};

/// Compute the SHA-256 hash of `data` as a hex string.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Compute the SHA-256 hash of a file's contents without loading it whole.
pub fn hash_file(path: &Path) -> BuildResult<String> {
    let file = File::open(path).map_err(|e| BuildError::io(path, e))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();

    let mut buffer = [0u8; 8192];
    loop {
        let read = reader.read(&mut buffer).map_err(|e| BuildError::io(path, e))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}
