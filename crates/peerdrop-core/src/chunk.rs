//! File chunking and reassembly
//!
//! Chunks carry no index: their position is their arrival order on the
//! direct channel, which is ordered and reliable. A transport without those
//! guarantees would need sequence numbers and a reorder buffer on top.

use crate::CHUNK_SIZE;
use bytes::{Bytes, BytesMut};

/// Lengths of the consecutive slices a file of `size` bytes is cut into
///
/// Every slice is `chunk_size` bytes except the last, which holds the
/// remainder. An empty file yields no slices.
pub fn chunk_lengths(size: u64, chunk_size: usize) -> impl Iterator<Item = usize> {
    assert!(chunk_size > 0, "chunk size must be positive");
    let chunk_size = chunk_size as u64;
    let mut offset = 0u64;
    std::iter::from_fn(move || {
        if offset >= size {
            return None;
        }
        let len = (size - offset).min(chunk_size);
        offset += len;
        Some(len as usize)
    })
}

/// Number of chunks a file of `size` bytes is sent as
pub fn chunk_count(size: u64, chunk_size: usize) -> u64 {
    size.div_ceil(chunk_size as u64)
}

/// Split an in-memory buffer into chunks of at most [`CHUNK_SIZE`] bytes
pub fn chunk_bytes(data: &Bytes) -> Vec<Bytes> {
    let mut offset = 0;
    chunk_lengths(data.len() as u64, CHUNK_SIZE)
        .map(|len| {
            let chunk = data.slice(offset..offset + len);
            offset += len;
            chunk
        })
        .collect()
}

/// Concatenate chunks in arrival order
pub fn reassemble(chunks: &[Bytes]) -> Bytes {
    let total: usize = chunks.iter().map(|c| c.len()).sum();
    let mut buf = BytesMut::with_capacity(total);
    for chunk in chunks {
        buf.extend_from_slice(chunk);
    }
    buf.freeze()
}

/// Hex BLAKE3 digest of a file's contents
pub fn digest(data: &[u8]) -> String {
    hex::encode(blake3::hash(data).as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(len: usize) -> Bytes {
        (0..len).map(|i| (i % 251) as u8).collect::<Vec<_>>().into()
    }

    #[test]
    fn test_chunk_lengths_40000() {
        let lengths: Vec<_> = chunk_lengths(40000, CHUNK_SIZE).collect();
        assert_eq!(lengths, vec![16384, 16384, 7232]);
    }

    #[test]
    fn test_chunk_lengths_partition() {
        let sizes = [
            0u64,
            1,
            CHUNK_SIZE as u64 - 1,
            CHUNK_SIZE as u64,
            CHUNK_SIZE as u64 + 1,
            3 * CHUNK_SIZE as u64,
            1_000_003,
        ];
        for size in sizes {
            let lengths: Vec<_> = chunk_lengths(size, CHUNK_SIZE).collect();
            assert_eq!(lengths.iter().map(|l| *l as u64).sum::<u64>(), size);
            assert_eq!(lengths.len() as u64, chunk_count(size, CHUNK_SIZE));

            let (last, full) = match lengths.split_last() {
                Some(split) => split,
                None => {
                    assert_eq!(size, 0);
                    continue;
                }
            };
            assert!(full.iter().all(|l| *l == CHUNK_SIZE));
            let remainder = (size % CHUNK_SIZE as u64) as usize;
            let expected_last = if remainder == 0 { CHUNK_SIZE } else { remainder };
            assert_eq!(*last, expected_last);
        }
    }

    #[test]
    fn test_chunk_and_reassemble() {
        for len in [0, 10, CHUNK_SIZE, CHUNK_SIZE * 2 + 1000] {
            let data = pattern(len);
            let chunks = chunk_bytes(&data);
            assert!(chunks.iter().all(|c| c.len() <= CHUNK_SIZE));
            assert_eq!(reassemble(&chunks), data);
        }
    }

    #[test]
    fn test_digest_matches_blake3() {
        let data = b"hash-me-now";
        assert_eq!(digest(data), hex::encode(blake3::hash(data).as_bytes()));
    }
}
