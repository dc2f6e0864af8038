use std::fs::File;
use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::Result;

const CHUNK_SIZE: usize = 4096;

/// Compute the SHA-256 digest of a file, hex encoded in lower case.
///
/// The file is streamed in fixed-size chunks so arbitrarily large update
/// packages never have to fit in memory. Blocking; async callers should run
/// this under `tokio::task::spawn_blocking`.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; CHUNK_SIZE];

    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(hex::encode(hasher.finalize()))
}
