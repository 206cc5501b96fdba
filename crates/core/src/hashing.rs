use std::fs::File;
use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};
use swarm_config::PIECE_SIZE;

use crate::error::{SwarmError, SwarmResult};

/// Number of `PIECE_SIZE` pieces a file of `size` bytes splits into.
/// An empty file has no pieces, only a whole-file hash.
pub fn piece_count(size: u64) -> u32 {
    size.div_ceil(PIECE_SIZE as u64) as u32
}

/// Hex SHA-256 of one piece.
pub fn piece_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Compute the hash vector of a file: entry 0 is the whole-file hash,
/// entries 1..=N are the per-piece hashes in file order. The last piece
/// hashes its actual (short) length.
pub fn hash_vector(path: &Path) -> SwarmResult<Vec<String>> {
    let mut file = File::open(path)?;

    let mut whole = Sha256::new();
    let mut pieces: Vec<String> = Vec::new();
    let mut buf = vec![0u8; PIECE_SIZE];

    loop {
        let n = read_up_to(&mut file, &mut buf)?;
        if n == 0 {
            break;
        }
        whole.update(&buf[..n]);
        pieces.push(piece_hash(&buf[..n]));
        if n < PIECE_SIZE {
            break;
        }
    }

    let mut hashes = Vec::with_capacity(pieces.len() + 1);
    hashes.push(hex::encode(whole.finalize()));
    hashes.extend(pieces);
    Ok(hashes)
}

/// Size of a file in bytes.
pub fn file_size(path: &Path) -> SwarmResult<u64> {
    let meta = std::fs::metadata(path)
        .map_err(|_| SwarmError::Validation(format!("cannot stat {}", path.display())))?;
    Ok(meta.len())
}

// Fill `buf` as far as the reader allows; plain read() may return short.
fn read_up_to(reader: &mut impl Read, buf: &mut [u8]) -> SwarmResult<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
