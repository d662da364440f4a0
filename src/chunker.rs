//! §4.2 Chunker & hasher.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use sha1::{Digest, Sha1};
use std::fs;
use std::io::Read;
use std::path::Path;

pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Stats computed for a local file ahead of sync: chunk count, whole-file
/// hash, mtime in seconds, and unix permission bits.
#[derive(Debug, Clone)]
pub struct FileStats {
    pub size: u64,
    pub chunk_count: u32,
    pub file_hash: String,
    pub last_mod: i64,
    pub permissions: u32,
}

/// Compute §4.2 stats for a local regular file, given the server's
/// configured max chunk size N.
pub fn stat_file(path: &Path, chunk_size: usize) -> anyhow::Result<FileStats> {
    let metadata = fs::metadata(path)?;
    let size = metadata.len();
    let chunk_count = (size as usize).div_ceil(chunk_size) as u32;
    let file_hash = hash_bytes(&fs::read(path)?);

    #[cfg(unix)]
    let permissions = {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode()
    };
    #[cfg(not(unix))]
    let permissions: u32 = if metadata.permissions().readonly() { 0o444 } else { 0o644 };

    #[cfg(unix)]
    let last_mod = {
        use std::os::unix::fs::MetadataExt;
        metadata.mtime()
    };
    #[cfg(not(unix))]
    let last_mod = metadata
        .modified()?
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);

    Ok(FileStats {
        size,
        chunk_count,
        file_hash,
        last_mod,
        permissions,
    })
}

/// Read chunk number `n` (0-based) of `path` under the given max chunk size:
/// exactly `chunk_size` bytes, except the last chunk which may be shorter.
pub fn read_chunk(path: &Path, chunk_size: usize, chunk_number: u32) -> anyhow::Result<Vec<u8>> {
    use std::io::{Seek, SeekFrom};
    let mut file = fs::File::open(path)?;
    let offset = chunk_number as u64 * chunk_size as u64;
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; chunk_size];
    let mut total = 0;
    loop {
        let n = file.read(&mut buf[total..])?;
        if n == 0 {
            break;
        }
        total += n;
        if total == buf.len() {
            break;
        }
    }
    buf.truncate(total);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn chunk_count_is_ceil_division() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.bin");
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(&vec![1u8; 9 * 1024 * 1024]).unwrap();
        drop(f);

        let stats = stat_file(&path, 4 * 1024 * 1024).unwrap();
        assert_eq!(stats.chunk_count, 3);
    }

    #[test]
    fn empty_file_has_zero_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.bin");
        fs::File::create(&path).unwrap();

        let stats = stat_file(&path, 4 * 1024 * 1024).unwrap();
        assert_eq!(stats.chunk_count, 0);
    }

    #[test]
    fn chunk_hash_is_stable_across_reencryption() {
        let bytes = b"plaintext chunk contents";
        assert_eq!(hash_bytes(bytes), hash_bytes(bytes));
    }

    #[test]
    fn reading_chunks_reconstructs_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.bin");
        let data: Vec<u8> = (0..(5 * 1024 + 37)).map(|i| (i % 251) as u8).collect();
        fs::write(&path, &data).unwrap();

        let chunk_size = 1024;
        let stats = stat_file(&path, chunk_size).unwrap();
        let mut reassembled = Vec::new();
        for n in 0..stats.chunk_count {
            reassembled.extend(read_chunk(&path, chunk_size, n).unwrap());
        }
        assert_eq!(reassembled, data);
        assert_eq!(hash_bytes(&reassembled), stats.file_hash);
    }
}
