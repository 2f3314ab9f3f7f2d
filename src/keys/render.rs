use serde::{Deserialize, Serialize};

use crate::storage::models::{Account, PublicKey};

/// One key granted for a (user, host) login, with the options of the
/// permission that granted it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizedKey {
    pub comment: Option<String>,
    pub email: String,
    pub fingerprint: String,
    /// `type base64`
    pub public_key: String,
    pub public_key_sig: Option<String>,
    pub ssh_options: Option<String>,
}

impl AuthorizedKey {
    pub fn new(key: &PublicKey, owner: &Account, ssh_options: Option<&str>) -> Self {
        Self {
            comment: key.comment.clone(),
            email: owner.email.clone(),
            fingerprint: key.fingerprint.clone(),
            public_key: key.material(),
            public_key_sig: key.signature.clone(),
            ssh_options: ssh_options.map(str::to_string),
        }
    }

    pub fn is_signed(&self) -> bool {
        self.public_key_sig.is_some()
    }

    /// A single `authorized_keys` line. The comment falls back to the owner's email.
    pub fn line(&self) -> String {
        let comment = self.comment.as_deref().unwrap_or(&self.email);
        match self.ssh_options.as_deref() {
            Some(options) => format!("{options} {} {comment}", self.public_key),
            None => format!("{} {comment}", self.public_key),
        }
    }
}

/// Newline-joined `authorized_keys` body
pub fn render_plaintext(keys: &[AuthorizedKey]) -> String {
    let mut body = keys
        .iter()
        .map(AuthorizedKey::line)
        .collect::<Vec<_>>()
        .join("\n");
    if !body.is_empty() {
        body.push('\n');
    }
    body
}

/// Structured form served to JSON clients
pub fn render_json(keys: &[AuthorizedKey]) -> serde_json::Value {
    serde_json::Value::Array(
        keys.iter()
            .map(|k| {
                serde_json::json!({
                    "email": k.email,
                    "fingerprint": k.fingerprint,
                    "public_key": k.public_key,
                    "public_key_sig": k.public_key_sig,
                    "ssh_options": k.ssh_options,
                })
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(options: Option<&str>, comment: Option<&str>) -> AuthorizedKey {
        AuthorizedKey {
            comment: comment.map(str::to_string),
            email: "alice@example.com".to_string(),
            fingerprint: "SHA256:abc".to_string(),
            public_key: "ssh-ed25519 AAAAC3".to_string(),
            public_key_sig: None,
            ssh_options: options.map(str::to_string),
        }
    }

    #[test]
    fn test_plaintext_lines() {
        let keys = vec![
            key(None, None),
            key(Some("command=\"uptime\",no-pty"), Some("laptop")),
        ];
        assert_eq!(
            render_plaintext(&keys),
            "ssh-ed25519 AAAAC3 alice@example.com\n\
             command=\"uptime\",no-pty ssh-ed25519 AAAAC3 laptop\n"
        );
        assert_eq!(render_plaintext(&[]), "");
    }

    #[test]
    fn test_json_view() {
        let json = render_json(&[key(Some("no-pty"), None)]);
        assert_eq!(json[0]["email"], "alice@example.com");
        assert_eq!(json[0]["fingerprint"], "SHA256:abc");
        assert_eq!(json[0]["ssh_options"], "no-pty");
        assert!(json[0]["public_key_sig"].is_null());
    }
}
