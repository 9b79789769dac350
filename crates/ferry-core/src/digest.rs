//! Content digests and generated file names.

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Number of hex characters kept from the salted digest for generated names.
pub const NAME_DIGEST_CHARS: usize = 16;

/// Hex-encoded SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Generate a storage name from a content checksum.
///
/// The checksum is salted with a random UUID so two files with identical content, created
/// within the same instant, still get different names. The extension of `original_name`
/// is appended when it has one.
pub fn generate_name(checksum: &str, original_name: &str) -> String {
    let salt = Uuid::new_v4();

    let mut hasher = Sha256::new();
    hasher.update(checksum.as_bytes());
    hasher.update(salt.as_bytes());
    let digest = hex::encode(hasher.finalize());

    let stem = &digest[..NAME_DIGEST_CHARS];
    match file_extension(original_name) {
        Some(ext) => format!("{}.{}", stem, ext),
        None => stem.to_string(),
    }
}

/// Text after the last `.` of a file name, if any.
pub fn file_extension(name: &str) -> Option<&str> {
    let (_, ext) = name.rsplit_once('.')?;
    if ext.is_empty() {
        None
    } else {
        Some(ext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn sha256_hex_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn generated_names_keep_extension() {
        let name = generate_name(&sha256_hex(b"x"), "holiday.photo.JPG");
        assert!(name.ends_with(".JPG"));
        assert_eq!(name.len(), NAME_DIGEST_CHARS + 4);
    }

    #[test]
    fn generated_names_without_extension() {
        let name = generate_name(&sha256_hex(b"x"), "README");
        assert_eq!(name.len(), NAME_DIGEST_CHARS);
        assert!(!name.contains('.'));
    }

    #[test]
    fn same_content_back_to_back_yields_distinct_names() {
        let checksum = sha256_hex(b"identical payload");
        let names: HashSet<String> = (0..1000)
            .map(|_| generate_name(&checksum, "a.txt"))
            .collect();
        assert_eq!(names.len(), 1000);
    }

    #[test]
    fn file_extension_cases() {
        assert_eq!(file_extension("a.tar.gz"), Some("gz"));
        assert_eq!(file_extension("noext"), None);
        assert_eq!(file_extension("trailing."), None);
    }
}
