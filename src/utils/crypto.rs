use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use md5::Md5;
use sha2::{Digest, Sha256};

use crate::errors::Result;

const HASH_BUFFER_BYTES: usize = 256 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChecksumAlgorithm {
    Md5,
    Sha256,
}

impl ChecksumAlgorithm {
    /// Infers the digest from the hex length of the expected value.
    pub fn from_hex(expected: &str) -> Option<Self> {
        let normalized = sanitize_hash(expected)?;
        match normalized.len() {
            32 => Some(ChecksumAlgorithm::Md5),
            64 => Some(ChecksumAlgorithm::Sha256),
            _ => None,
        }
    }
}

pub enum StreamHasher {
    Md5(Md5),
    Sha256(Sha256),
}

impl StreamHasher {
    pub fn new(algorithm: ChecksumAlgorithm) -> Self {
        match algorithm {
            ChecksumAlgorithm::Md5 => StreamHasher::Md5(Md5::new()),
            ChecksumAlgorithm::Sha256 => StreamHasher::Sha256(Sha256::new()),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            StreamHasher::Md5(hasher) => hasher.update(data),
            StreamHasher::Sha256(hasher) => hasher.update(data),
        }
    }

    pub fn finalize_hex(self) -> String {
        match self {
            StreamHasher::Md5(hasher) => hex::encode(hasher.finalize()),
            StreamHasher::Sha256(hasher) => hex::encode(hasher.finalize()),
        }
    }
}

pub fn sanitize_hash(hash: &str) -> Option<String> {
    let trimmed = hash.trim().to_ascii_lowercase();
    if trimmed.is_empty() || !trimmed.bytes().all(|byte| byte.is_ascii_hexdigit()) {
        return None;
    }
    Some(trimmed)
}

pub fn compute_hex(algorithm: ChecksumAlgorithm, data: &[u8]) -> String {
    let mut hasher = StreamHasher::new(algorithm);
    hasher.update(data);
    hasher.finalize_hex()
}

pub fn compute_file_hex(path: &Path, algorithm: ChecksumAlgorithm) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = StreamHasher::new(algorithm);
    let mut buffer = vec![0u8; HASH_BUFFER_BYTES];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hasher.finalize_hex())
}

pub fn compute_range_hex(
    file: &mut File,
    offset: u64,
    length: u64,
    algorithm: ChecksumAlgorithm,
) -> Result<String> {
    file.seek(SeekFrom::Start(offset))?;
    let mut hasher = StreamHasher::new(algorithm);
    let mut remaining = length;
    let mut buffer = vec![0u8; HASH_BUFFER_BYTES.min(length.max(1) as usize)];
    while remaining > 0 {
        let want = remaining.min(buffer.len() as u64) as usize;
        let read = file.read(&mut buffer[..want])?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        remaining -= read as u64;
    }
    Ok(hasher.finalize_hex())
}

pub fn matches_checksum(actual_hex: &str, expected: &str) -> bool {
    sanitize_hash(expected)
        .map(|normalized| normalized == actual_hex)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn infers_algorithm_from_digest_length() {
        assert_eq!(
            ChecksumAlgorithm::from_hex("D41D8CD98F00B204E9800998ECF8427E"),
            Some(ChecksumAlgorithm::Md5)
        );
        assert_eq!(
            ChecksumAlgorithm::from_hex(&"a".repeat(64)),
            Some(ChecksumAlgorithm::Sha256)
        );
        assert_eq!(ChecksumAlgorithm::from_hex("abc"), None);
        assert_eq!(ChecksumAlgorithm::from_hex("zz"), None);
    }

    #[test]
    fn md5_of_known_input() {
        assert_eq!(
            compute_hex(ChecksumAlgorithm::Md5, b""),
            "d41d8cd98f00b204e9800998ecf8427e"
        );
        assert!(matches_checksum(
            &compute_hex(ChecksumAlgorithm::Md5, b"abc"),
            " 900150983CD24FB0D6963F7D28E17F72 "
        ));
    }

    #[test]
    fn range_hash_matches_slice_hash() {
        let path = std::env::temp_dir().join(format!("pipeline-crypto-test-{}", Uuid::new_v4()));
        let payload: Vec<u8> = (0..10_000u32).map(|value| (value % 251) as u8).collect();
        std::fs::write(&path, &payload).expect("write payload");

        let mut file = File::open(&path).expect("open payload");
        let ranged = compute_range_hex(&mut file, 1000, 4000, ChecksumAlgorithm::Md5)
            .expect("hash range");
        assert_eq!(ranged, compute_hex(ChecksumAlgorithm::Md5, &payload[1000..5000]));
        assert_eq!(
            compute_file_hex(&path, ChecksumAlgorithm::Sha256).expect("hash file"),
            compute_hex(ChecksumAlgorithm::Sha256, &payload)
        );
    }
}
