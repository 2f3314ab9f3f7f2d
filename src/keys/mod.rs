//! OpenSSH public key handling: parsing, fingerprinting and
//! `authorized_keys` rendering.

pub mod fingerprint;
pub mod render;

pub use fingerprint::{fingerprint, parse_public_key, KeyFormatError, ParsedKey};
pub use render::{render_json, render_plaintext, AuthorizedKey};
