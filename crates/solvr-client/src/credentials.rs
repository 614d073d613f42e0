//! Password digests sent in place of clear-text passwords.

use sha2::{Digest, Sha256};

/// SHA-256 of `password`, as 64 lowercase hex characters.
///
/// The digest alphabet never contains `|` or `$`, so it is always safe to
/// place in a protocol field.
#[must_use]
pub fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_password_known_vector() {
        assert_eq!(
            hash_password("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_hash_password_empty() {
        assert_eq!(
            hash_password(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_hash_password_shape() {
        let hash = hash_password("Secr3t!");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(hash, hash_password("Secr3t!"));
        assert_ne!(hash, hash_password("Secr3t?"));
    }
}
