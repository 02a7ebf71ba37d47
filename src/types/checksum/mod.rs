#![forbid(unsafe_code)]

/// CRC32 over a page number and a page body, used to seal store metadata.
pub fn page_crc32(page_no: u64, payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&page_no.to_le_bytes());
    hasher.update(payload);
    hasher.finalize()
}
