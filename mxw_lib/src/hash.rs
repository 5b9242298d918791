//! Content hashes used to identify shader programs and pipelines.
use xxhash_rust::xxh3::xxh3_64;

/// Hash the instruction words of a shader program.
///
/// Programs with identical code always have identical hashes,
/// so the hash can be used in place of the code in pipeline keys.
pub fn hash_code(code: &[u64]) -> u64 {
    xxh3_64(bytemuck::cast_slice(code))
}

/// Hash arbitrary bytes like the raw bytes of a pipeline key.
pub fn hash_bytes(bytes: &[u8]) -> u64 {
    xxh3_64(bytes)
}
