use sha2::{Digest, Sha256};

const BASE32_ALPHABET: &[u8; 32] = b"abcdefghijklmnopqrstuvwxyz234567";
const HASH_CHARS: usize = 24;

/// Deterministic identifier: `prefix` followed by 24 base32 characters of
/// the sha256 of the length-framed `args`.
pub fn generate_identifier(prefix: &str, args: &[&str]) -> String {
    let digest = hash_args(args);
    let mut id = String::with_capacity(prefix.len() + HASH_CHARS);
    id.push_str(prefix);
    id.push_str(&base32(&digest)[..HASH_CHARS]);
    id
}

/// Deterministic `{XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX}` derived from `args`.
pub fn generate_guid(args: &[&str]) -> String {
    let digest = hash_args(args);
    let hex = digest
        .iter()
        .take(16)
        .map(|byte| format!("{:02X}", byte))
        .collect::<String>();
    format!(
        "{{{}-{}-{}-{}-{}}}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}

fn hash_args(args: &[&str]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for arg in args {
        let length = u32::try_from(arg.len()).unwrap_or(u32::MAX);
        hasher.update(length.to_be_bytes());
        hasher.update(arg.as_bytes());
    }
    hasher.finalize().into()
}

fn base32(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 8 / 5 + 1);
    let mut buffer = 0u32;
    let mut bits = 0u32;
    for byte in bytes {
        buffer = (buffer << 8) | u32::from(*byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(BASE32_ALPHABET[((buffer >> bits) & 0x1f) as usize] as char);
        }
    }
    if bits > 0 {
        out.push(BASE32_ALPHABET[((buffer << (5 - bits)) & 0x1f) as usize] as char);
    }
    out
}

#[cfg(test)]
mod ids_tests {
    use super::*;
    use proptest::prelude::*;
    use wx_core::is_legal_identifier;

    #[test]
    fn generated_ids_are_stable_and_prefixed() {
        let first = generate_identifier("dir", &["INSTALLFOLDER", "a\\b"]);
        let second = generate_identifier("dir", &["INSTALLFOLDER", "a\\b"]);
        assert_eq!(first, second);
        assert!(first.starts_with("dir"));
        assert_eq!(first.len(), 3 + 24);
        assert_ne!(first, generate_identifier("dir", &["INSTALLFOLDER", "a"]));
    }

    #[test]
    fn framing_separates_argument_boundaries() {
        assert_ne!(
            generate_identifier("x", &["ab", "c"]),
            generate_identifier("x", &["a", "bc"])
        );
    }

    #[test]
    fn base32_encodes_known_vector() {
        assert_eq!(base32(b"f"), "my");
        assert_eq!(base32(b"foobar"), "mzxw6ytboi");
    }

    #[test]
    fn generated_guid_has_registry_format() {
        let guid = generate_guid(&["Component", "C1"]);
        assert_eq!(guid.len(), 38);
        assert!(guid.starts_with('{') && guid.ends_with('}'));
        assert_eq!(guid, generate_guid(&["Component", "C1"]));
    }

    proptest! {
        #[test]
        fn generated_ids_are_legal(prefix in "[a-z]{1,4}", arg in ".{0,40}") {
            prop_assert!(is_legal_identifier(&generate_identifier(&prefix, &[&arg])));
        }
    }
}
