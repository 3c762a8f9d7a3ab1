use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Longest digest of any supported algorithm, in bytes.
pub const MAX_DIGEST_LEN: usize = 32;

/// Digest algorithm an object store is keyed by.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// BLAKE3, 32-byte output.
    #[default]
    Blake3,
    /// SHA-256, 32-byte output.
    Sha256,
    /// MD5, 16-byte output. Kept for caches created by older tools.
    Md5,
}

impl HashAlgorithm {
    /// Lowercase tag used in the text form of a reference.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Blake3 => "blake3",
            Self::Sha256 => "sha256",
            Self::Md5 => "md5",
        }
    }

    /// Digest length in bytes.
    pub fn digest_len(&self) -> usize {
        match self {
            Self::Blake3 | Self::Sha256 => 32,
            Self::Md5 => 16,
        }
    }

    /// Digest length in hex characters.
    pub fn hex_len(&self) -> usize {
        self.digest_len() * 2
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "blake3" => Ok(Self::Blake3),
            "sha256" | "sha-256" => Ok(Self::Sha256),
            "md5" => Ok(Self::Md5),
            _ => Err(TypeError::UnknownAlgorithm(s.to_string())),
        }
    }
}

/// Content hash addressing an object: algorithm tag plus digest.
///
/// Two references with the same algorithm and digest denote the same content,
/// wherever that content came from. The text form is `"<algorithm>:<hex>"`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectReference {
    algorithm: HashAlgorithm,
    // Zero-padded past `algorithm.digest_len()`.
    digest: [u8; MAX_DIGEST_LEN],
}

impl ObjectReference {
    /// Create a reference from a pre-computed digest.
    ///
    /// Fails with [`TypeError::InvalidHash`] when `digest` is not exactly
    /// `algorithm.digest_len()` bytes.
    pub fn new(algorithm: HashAlgorithm, digest: &[u8]) -> Result<Self, TypeError> {
        if digest.len() != algorithm.digest_len() {
            return Err(TypeError::invalid_hash(
                &hex::encode(digest),
                format!("expected {} digest bytes for {algorithm}, got {}", algorithm.digest_len(), digest.len()),
            ));
        }
        let mut padded = [0u8; MAX_DIGEST_LEN];
        padded[..digest.len()].copy_from_slice(digest);
        Ok(Self {
            algorithm,
            digest: padded,
        })
    }

    /// Parse a bare hex digest for the given algorithm.
    ///
    /// Fails with [`TypeError::InvalidHash`] on wrong length or alphabet.
    pub fn from_hex(algorithm: HashAlgorithm, s: &str) -> Result<Self, TypeError> {
        if s.len() != algorithm.hex_len() {
            return Err(TypeError::invalid_hash(
                s,
                format!("expected {} hex characters for {algorithm}, got {}", algorithm.hex_len(), s.len()),
            ));
        }
        let bytes = hex::decode(s).map_err(|e| TypeError::invalid_hash(s, e.to_string()))?;
        Self::new(algorithm, &bytes)
    }

    /// Parse the text form `"<algorithm>:<hex>"`.
    ///
    /// A bare hex string is read with the default algorithm.
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        match s.split_once(':') {
            Some((tag, digest)) => {
                let algorithm = tag
                    .parse::<HashAlgorithm>()
                    .map_err(|_| TypeError::invalid_hash(s, format!("unknown algorithm tag {tag:?}")))?;
                Self::from_hex(algorithm, digest)
            }
            None => Self::from_hex(HashAlgorithm::default(), s),
        }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// The raw digest bytes.
    pub fn digest(&self) -> &[u8] {
        &self.digest[..self.algorithm.digest_len()]
    }

    /// Lowercase hex digest without the algorithm tag.
    pub fn to_hex(&self) -> String {
        hex::encode(self.digest())
    }

    /// Short hex representation (first 8 characters).
    pub fn short_hex(&self) -> String {
        hex::encode(&self.digest[..4])
    }
}

impl fmt::Debug for ObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectReference({}:{})", self.algorithm, self.short_hex())
    }
}

impl fmt::Display for ObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.to_hex())
    }
}

impl FromStr for ObjectReference {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ObjectReference {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ObjectReference> for String {
    fn from(reference: ObjectReference) -> Self {
        reference.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEX: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    #[test]
    fn parse_tagged() {
        let r = ObjectReference::parse(&format!("sha256:{HEX}")).unwrap();
        assert_eq!(r.algorithm(), HashAlgorithm::Sha256);
        assert_eq!(r.to_hex(), HEX);
    }

    #[test]
    fn parse_bare_uses_default_algorithm() {
        let r = ObjectReference::parse(HEX).unwrap();
        assert_eq!(r.algorithm(), HashAlgorithm::Blake3);
    }

    #[test]
    fn display_parses_back() {
        let r = ObjectReference::new(HashAlgorithm::Sha256, &[7u8; 32]).unwrap();
        assert_eq!(r.to_string().parse::<ObjectReference>().unwrap(), r);
    }

    #[test]
    fn wrong_length_is_invalid_hash() {
        let err = ObjectReference::parse("abcd").unwrap_err();
        assert!(matches!(err, TypeError::InvalidHash { .. }));
    }

    #[test]
    fn wrong_alphabet_is_invalid_hash() {
        let bad = "z".repeat(64);
        let err = ObjectReference::parse(&bad).unwrap_err();
        assert!(matches!(err, TypeError::InvalidHash { .. }));
    }

    #[test]
    fn unknown_tag_is_invalid_hash() {
        let err = ObjectReference::parse(&format!("md4:{HEX}")).unwrap_err();
        assert!(matches!(err, TypeError::InvalidHash { .. }));
    }

    #[test]
    fn algorithm_is_part_of_identity() {
        let a = ObjectReference::new(HashAlgorithm::Blake3, &[1u8; 32]).unwrap();
        let b = ObjectReference::new(HashAlgorithm::Sha256, &[1u8; 32]).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn short_hex_is_8_chars() {
        let r = ObjectReference::new(HashAlgorithm::Blake3, &[0xab; 32]).unwrap();
        assert_eq!(r.short_hex(), "abababab");
    }

    #[test]
    fn serde_uses_text_form() {
        let r = ObjectReference::parse(HEX).unwrap();
        let json = serde_json::to_string(&r).unwrap();
        assert_eq!(json, format!("\"blake3:{HEX}\""));
        let back: ObjectReference = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn md5_is_half_length() {
        let hex = "d41d8cd98f00b204e9800998ecf8427e";
        let r = ObjectReference::parse(&format!("md5:{hex}")).unwrap();
        assert_eq!(r.algorithm(), HashAlgorithm::Md5);
        assert_eq!(r.digest().len(), 16);
        assert_eq!(r.to_hex(), hex);
        assert_eq!(r.to_string(), format!("md5:{hex}"));
        // A 64-character digest is not an md5.
        assert!(ObjectReference::from_hex(HashAlgorithm::Md5, HEX).is_err());
    }

    #[test]
    fn new_checks_digest_length() {
        assert!(ObjectReference::new(HashAlgorithm::Md5, &[0; 32]).is_err());
        assert!(ObjectReference::new(HashAlgorithm::Blake3, &[0; 16]).is_err());
        assert!(ObjectReference::new(HashAlgorithm::Md5, &[0; 16]).is_ok());
    }

    #[test]
    fn algorithm_from_str() {
        assert_eq!("BLAKE3".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Blake3);
        assert_eq!("sha-256".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Sha256);
        assert_eq!("MD5".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Md5);
        assert!("crc32".parse::<HashAlgorithm>().is_err());
    }
}
