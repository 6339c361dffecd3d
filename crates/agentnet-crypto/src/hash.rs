/// Compute BLAKE3 hash of arbitrary bytes → 32-byte array.
pub fn blake3_hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// BLAKE3 hash as lowercase hex; used for gossip message ids.
pub fn blake3_hex(data: &[u8]) -> String {
    hex::encode(blake3_hash(data))
}
