use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Key algorithms accepted at ingestion
pub const SUPPORTED_KEY_TYPES: &[&str] = &[
    "ssh-rsa",
    "ssh-dss",
    "ssh-ed25519",
    "ecdsa-sha2-nistp256",
    "ecdsa-sha2-nistp384",
    "ecdsa-sha2-nistp521",
    "sk-ssh-ed25519@openssh.com",
    "sk-ecdsa-sha2-nistp256@openssh.com",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyFormatError {
    #[error("Public key is empty")]
    Empty,
    #[error("Public key is missing its base64 blob")]
    MissingBlob,
    #[error("Unsupported key type {0}")]
    UnsupportedType(String),
    #[error("Public key blob is not valid base64")]
    InvalidBase64,
    #[error("Public key blob is truncated")]
    Truncated,
    #[error("Key type {declared} does not match blob type {embedded}")]
    TypeMismatch { declared: String, embedded: String },
    #[error("Fingerprint {supplied} does not match computed {computed}")]
    FingerprintMismatch { supplied: String, computed: String },
}

/// A validated key line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedKey {
    pub comment: Option<String>,
    /// Base64 blob exactly as supplied
    pub data: String,
    pub fingerprint: String,
    pub key_type: String,
}

/// Parse and validate an OpenSSH `type base64 [comment]` line.
pub fn parse_public_key(line: &str) -> Result<ParsedKey, KeyFormatError> {
    let mut parts = line.split_whitespace();
    let key_type = parts.next().ok_or(KeyFormatError::Empty)?;
    let data = parts.next().ok_or(KeyFormatError::MissingBlob)?;
    let comment = parts.collect::<Vec<_>>().join(" ");

    if !SUPPORTED_KEY_TYPES.contains(&key_type) {
        return Err(KeyFormatError::UnsupportedType(key_type.to_string()));
    }

    let blob = STANDARD
        .decode(data)
        .map_err(|_| KeyFormatError::InvalidBase64)?;
    let embedded = blob_key_type(&blob)?;
    if embedded != key_type {
        return Err(KeyFormatError::TypeMismatch {
            declared: key_type.to_string(),
            embedded: embedded.to_string(),
        });
    }

    Ok(ParsedKey {
        comment: (!comment.is_empty()).then_some(comment),
        data: data.to_string(),
        fingerprint: fingerprint(&blob),
        key_type: key_type.to_string(),
    })
}

impl ParsedKey {
    /// Reject a caller-supplied fingerprint that disagrees with the key
    pub fn check_fingerprint(&self, supplied: Option<&str>) -> Result<(), KeyFormatError> {
        match supplied.map(str::trim).filter(|f| !f.is_empty()) {
            Some(f) if f != self.fingerprint => Err(KeyFormatError::FingerprintMismatch {
                supplied: f.to_string(),
                computed: self.fingerprint.clone(),
            }),
            _ => Ok(()),
        }
    }
}

/// OpenSSH SHA256 fingerprint of a decoded key blob
pub fn fingerprint(blob: &[u8]) -> String {
    let digest = Sha256::digest(blob);
    format!("SHA256:{}", STANDARD_NO_PAD.encode(digest))
}

// The blob opens with a length-prefixed algorithm name
fn blob_key_type(blob: &[u8]) -> Result<&str, KeyFormatError> {
    let len_bytes: [u8; 4] = blob
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .ok_or(KeyFormatError::Truncated)?;
    let len = u32::from_be_bytes(len_bytes) as usize;
    let name = blob.get(4..4 + len).ok_or(KeyFormatError::Truncated)?;
    std::str::from_utf8(name).map_err(|_| KeyFormatError::Truncated)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ed25519_line(seed: u8, comment: &str) -> String {
        let mut blob = Vec::new();
        blob.extend_from_slice(&11u32.to_be_bytes());
        blob.extend_from_slice(b"ssh-ed25519");
        blob.extend_from_slice(&32u32.to_be_bytes());
        blob.extend_from_slice(&[seed; 32]);
        format!("ssh-ed25519 {} {}", STANDARD.encode(&blob), comment)
    }

    #[test]
    fn test_parse_computes_fingerprint() {
        let parsed = parse_public_key(&ed25519_line(1, "alice@laptop")).unwrap();
        assert_eq!(parsed.key_type, "ssh-ed25519");
        assert_eq!(parsed.comment.as_deref(), Some("alice@laptop"));
        assert!(parsed.fingerprint.starts_with("SHA256:"));
        assert!(!parsed.fingerprint.ends_with('='));
        // 32 byte digest -> 43 unpadded base64 chars
        assert_eq!(parsed.fingerprint.len(), "SHA256:".len() + 43);

        let other = parse_public_key(&ed25519_line(2, "")).unwrap();
        assert_ne!(parsed.fingerprint, other.fingerprint);
        assert!(other.comment.is_none());
    }

    #[test]
    fn test_known_fingerprint() {
        // sha256("") is well known
        assert_eq!(
            fingerprint(b""),
            "SHA256:47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU"
        );
    }

    #[test]
    fn test_rejects_malformed_lines() {
        assert_eq!(parse_public_key("   ").unwrap_err(), KeyFormatError::Empty);
        assert_eq!(
            parse_public_key("ssh-ed25519").unwrap_err(),
            KeyFormatError::MissingBlob
        );
        assert!(matches!(
            parse_public_key("ssh-foo AAAA").unwrap_err(),
            KeyFormatError::UnsupportedType(_)
        ));
        assert_eq!(
            parse_public_key("ssh-rsa !!!notbase64").unwrap_err(),
            KeyFormatError::InvalidBase64
        );
    }

    #[test]
    fn test_rejects_type_mismatch() {
        let line = ed25519_line(1, "x").replacen("ssh-ed25519", "ssh-rsa", 1);
        assert!(matches!(
            parse_public_key(&line).unwrap_err(),
            KeyFormatError::TypeMismatch { .. }
        ));
    }

    #[test]
    fn test_supplied_fingerprint_checked() {
        let parsed = parse_public_key(&ed25519_line(1, "")).unwrap();
        assert!(parsed.check_fingerprint(None).is_ok());
        assert!(parsed.check_fingerprint(Some(&parsed.fingerprint)).is_ok());
        assert!(parsed.check_fingerprint(Some("SHA256:nope")).is_err());
    }
}
