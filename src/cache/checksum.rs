use anyhow::{Context, Result};
use sha2::{Digest, Sha256, Sha512};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

const CHUNK_SIZE: usize = 8192;

/// Digest algorithm used for cache verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChecksumAlgorithm {
    #[default]
    Sha256,
    Sha512,
}

impl FromStr for ChecksumAlgorithm {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" => Ok(Self::Sha256),
            "sha512" => Ok(Self::Sha512),
            other => Err(anyhow::anyhow!("Unsupported checksum algorithm: {}", other)),
        }
    }
}

/// Compute the hex digest of a file, streaming in fixed-size chunks so
/// arbitrarily large media files never get loaded into memory.
///
/// Any IO failure is an error; callers treat that as "verification
/// failed", never as "file is valid".
pub fn digest(path: &Path, algorithm: ChecksumAlgorithm) -> Result<String> {
    debug!("Calculating {:?} checksum for {:?}", algorithm, path);
    match algorithm {
        ChecksumAlgorithm::Sha256 => hash_file::<Sha256>(path),
        ChecksumAlgorithm::Sha512 => hash_file::<Sha512>(path),
    }
}

fn hash_file<D: Digest>(path: &Path) -> Result<String> {
    let mut file =
        File::open(path).with_context(|| format!("Failed to open {:?} for hashing", path))?;
    let mut hasher = D::new();
    let mut buffer = [0u8; CHUNK_SIZE];

    loop {
        let read = file
            .read(&mut buffer)
            .with_context(|| format!("Failed to read {:?} while hashing", path))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(hex::encode(hasher.finalize()))
}
