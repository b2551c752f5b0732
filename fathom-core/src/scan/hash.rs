//! Streaming content hashing for duplicate detection.

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use crate::client::FileReader;
use crate::error::{FsError, Result};

/// Records carry the hex of the first 16 digest bytes; plenty of spread for
/// grouping duplicates without bloating every record with a full digest.
const HASH_PREFIX_LEN: usize = 16;

const CHUNK: usize = 64 * 1024;

pub async fn hash_reader(mut reader: FileReader) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK];
    loop {
        let read = reader.read(&mut buf).await.map_err(|err| {
            FsError::Transient(format!("reading content for hash: {err}"))
        })?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    let digest = hasher.finalize();
    Ok(hex::encode(&digest[..HASH_PREFIX_LEN]))
}
