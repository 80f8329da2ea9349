//! Run fingerprints recorded in variable metadata.

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of `content`.
pub fn calculate_checksum(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_is_stable_hex() {
        let a = calculate_checksum("tasmax|ssp245|ACCESS-CM2,MIROC6|84");
        assert_eq!(a, calculate_checksum("tasmax|ssp245|ACCESS-CM2,MIROC6|84"));
        assert_eq!(a.len(), 64);
        assert_ne!(a, calculate_checksum("tasmax|ssp585|ACCESS-CM2,MIROC6|84"));
    }
}
