//! Content hashing for document identity

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Bytes hashed from each end of a file by the PocketBook scheme
const POCKETBOOK_BLOCK: u64 = 4096;

/// Read buffer for full-file hashing
const READ_BUFFER: usize = 64 * 1024;

/// Hash algorithms a document identity can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    /// SHA-1 of the whole file, as recorded by Mendeley. Never computed
    /// locally; only known when a store seeds it.
    Sha1,
    /// SHA-256 of the whole file
    Sha256,
    /// MD5 over the first 4096 bytes, the last 4096 bytes and the decimal
    /// file length. PocketBook names annotation files with it.
    PocketbookMd5,
}

/// Algorithm computed when two documents share no known hash
pub const DEFAULT_HASH_ALGORITHM: HashAlgorithm = HashAlgorithm::Sha256;

impl HashAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            HashAlgorithm::Sha1 => "sha1",
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::PocketbookMd5 => "md5pb",
        }
    }

    /// Hash the file at `path`, returning lowercase hex
    pub fn compute(self, path: &Path) -> io::Result<String> {
        match self {
            HashAlgorithm::Sha256 => sha256_file(path),
            HashAlgorithm::PocketbookMd5 => pocketbook_md5(path),
            HashAlgorithm::Sha1 => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "sha1 is only available when recorded by the store",
            )),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn sha256_file(path: &Path) -> io::Result<String> {
    let mut reader = BufReader::with_capacity(READ_BUFFER, File::open(path)?);
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; READ_BUFFER];

    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

fn pocketbook_md5(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let size = file.metadata()?.len();
    let mut hasher = Md5::new();

    let mut head = Vec::with_capacity(POCKETBOOK_BLOCK as usize);
    (&mut file).take(POCKETBOOK_BLOCK).read_to_end(&mut head)?;
    hasher.update(&head);

    file.seek(SeekFrom::Start(size.saturating_sub(POCKETBOOK_BLOCK)))?;
    let mut tail = Vec::with_capacity(POCKETBOOK_BLOCK as usize);
    file.take(POCKETBOOK_BLOCK).read_to_end(&mut tail)?;
    hasher.update(&tail);

    hasher.update(size.to_string().as_bytes());

    Ok(hex::encode(hasher.finalize()))
}
