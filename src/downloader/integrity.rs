//! Digest verification of finished transfers

use md5::Md5;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::error::{ClientError, ClientResult};
use crate::{Checksum, ChecksumAlgorithm};

const HASH_BUFFER_BYTES: usize = 1024 * 1024;

/// Lowercase hex digest of the file at `path`.
pub fn file_digest(path: &Path, algorithm: ChecksumAlgorithm) -> ClientResult<String> {
    match algorithm {
        ChecksumAlgorithm::Md5 => hash_file::<Md5>(path),
        ChecksumAlgorithm::Sha256 => hash_file::<Sha256>(path),
    }
}

fn hash_file<D: Digest>(path: &Path) -> ClientResult<String>
where
    sha2::digest::Output<D>: std::fmt::LowerHex,
{
    let mut file = std::fs::File::open(path).map_err(|e| ClientError::io(path, e))?;
    let mut hasher = D::new();
    let mut buffer = vec![0u8; HASH_BUFFER_BYTES];
    loop {
        let read = file.read(&mut buffer).map_err(|e| ClientError::io(path, e))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Check the size and digest of a finished partial file.
///
/// Size is checked first since it is free; the digest is only computed when
/// the product declares a supported checksum.
///
/// # Errors
/// [`ClientError::Integrity`] on any mismatch.
pub fn verify_file(
    path: &Path,
    product_id: &str,
    expected_size: Option<u64>,
    checksum: Option<&Checksum>,
) -> ClientResult<()> {
    if let Some(expected) = expected_size {
        let actual = std::fs::metadata(path)
            .map_err(|e| ClientError::io(path, e))?
            .len();
        if actual != expected {
            return Err(ClientError::Integrity {
                product_id: product_id.to_string(),
                algorithm: "size".to_string(),
                expected: expected.to_string(),
                actual: actual.to_string(),
            });
        }
    }

    if let Some(checksum) = checksum {
        let actual = file_digest(path, checksum.algorithm)?;
        if !checksum.matches(&actual) {
            return Err(ClientError::Integrity {
                product_id: product_id.to_string(),
                algorithm: checksum.algorithm.to_string(),
                expected: checksum.value.clone(),
                actual,
            });
        }
    }

    Ok(())
}

/// Run [`verify_file`] on the blocking thread pool.
pub async fn verify_file_blocking(
    path: PathBuf,
    product_id: String,
    expected_size: Option<u64>,
    checksum: Option<Checksum>,
) -> ClientResult<()> {
    let task_path = path.clone();
    tokio::task::spawn_blocking(move || {
        verify_file(&task_path, &product_id, expected_size, checksum.as_ref())
    })
    .await
    .map_err(|e| ClientError::io(&path, format!("verification task failed: {e}")))?
}
