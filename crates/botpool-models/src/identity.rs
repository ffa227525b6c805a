use sha2::{Digest, Sha256};

/// Hex SHA-256 of a bot credential. The credential itself is secret; this
/// hash is the stable public handle used in the store keyspace, the session
/// registry, and logs.
pub fn hash_credential(credential: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(credential.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

/// Short prefix of an identity-hash, safe for log lines.
pub fn short(hash: &str) -> &str {
    &hash[..hash.len().min(8)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_sha256_hex() {
        // Known vector: sha256("abc")
        assert_eq!(
            hash_credential("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(hash_credential("abc"), hash_credential("abc"));
        assert_eq!(hash_credential("").len(), 64);
    }

    #[test]
    fn short_handles_tiny_input() {
        assert_eq!(short("abcdef0123456789"), "abcdef01");
        assert_eq!(short("ab"), "ab");
    }
}
