//! Parsing for the client-side encryption header.
//!
//! Clients that encrypt in the browser declare it at session start with a
//! header of the form `<iv>.<salt>`: 12 comma-separated byte values, a
//! literal period, then 16 more. The two halves are stored verbatim and
//! handed back on lookup; the server never decodes them.

use regex::Regex;
use std::sync::LazyLock;

static HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^((?:\d{1,3},){11}\d{1,3})\.((?:\d{1,3},){15}\d{1,3})$").expect("header regex")
});

/// The `(iv, salt)` pair declared by an encrypting client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionHeader {
    pub iv: String,
    pub salt: String,
}

impl EncryptionHeader {
    /// Parse a raw header string.
    ///
    /// Returns `None` unless the grammar matches exactly and every digit
    /// group is a valid byte (0-255).
    pub fn parse(header: &str) -> Option<Self> {
        let caps = HEADER_RE.captures(header)?;
        let iv = caps.get(1)?.as_str();
        let salt = caps.get(2)?.as_str();
        if !all_bytes(iv) || !all_bytes(salt) {
            return None;
        }
        Some(Self {
            iv: iv.to_string(),
            salt: salt.to_string(),
        })
    }
}

fn all_bytes(groups: &str) -> bool {
    groups.split(',').all(|group| group.parse::<u8>().is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = "1,2,3,4,5,6,7,8,9,10,11,12.13,14,15,16,17,18,19,20,21,22,23,24,25,26,27,28";

    #[test]
    fn accepts_well_formed_header() {
        let header = EncryptionHeader::parse(VALID).unwrap();
        assert_eq!(header.iv, "1,2,3,4,5,6,7,8,9,10,11,12");
        assert_eq!(
            header.salt,
            "13,14,15,16,17,18,19,20,21,22,23,24,25,26,27,28"
        );
    }

    #[test]
    fn accepts_boundary_byte_values() {
        let iv = ["0"; 12].join(",");
        let salt = ["255"; 16].join(",");
        assert!(EncryptionHeader::parse(&format!("{iv}.{salt}")).is_some());
    }

    #[test]
    fn rejects_wrong_group_counts() {
        // 11-byte IV
        let short_iv = format!("{}.{}", ["1"; 11].join(","), ["2"; 16].join(","));
        assert!(EncryptionHeader::parse(&short_iv).is_none());

        // 17-byte salt
        let long_salt = format!("{}.{}", ["1"; 12].join(","), ["2"; 17].join(","));
        assert!(EncryptionHeader::parse(&long_salt).is_none());
    }

    #[test]
    fn rejects_out_of_range_bytes() {
        let iv = ["256"; 12].join(",");
        let salt = ["1"; 16].join(",");
        assert!(EncryptionHeader::parse(&format!("{iv}.{salt}")).is_none());
    }

    #[test]
    fn rejects_surrounding_garbage() {
        assert!(EncryptionHeader::parse(&format!("x{VALID}")).is_none());
        assert!(EncryptionHeader::parse(&format!("{VALID}x")).is_none());
        assert!(EncryptionHeader::parse("").is_none());
        assert!(EncryptionHeader::parse("not-a-header").is_none());
    }
}
