//! Versioned header on encrypted content
//!
//! ```text
//! HBEGIN:encryption_module:<module id>:cipher:<algorithm>:version:<n>:HEND
//! ```
//!
//! The header is plain ASCII so it can be detected without any key.

use crate::{CryptoError, Result, symmetric::AeadCipher};

const HEADER_START: &str = "HBEGIN";
const HEADER_END: &str = "HEND";

/// Upper bound on where the end marker may appear
pub const MAX_HEADER_SIZE: usize = 8192;

/// A parsed encryption header
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Header {
    module_id: String,
    cipher: AeadCipher,
    version: u32,
}

impl Header {
    /// Create a header. The module id must be non-empty and free of `:`.
    pub fn new(module_id: impl Into<String>, cipher: AeadCipher, version: u32) -> Result<Self> {
        let module_id = module_id.into();
        if module_id.is_empty() || module_id.contains(':') {
            return Err(CryptoError::InvalidHeader(format!(
                "invalid module id {:?}",
                module_id
            )));
        }
        Ok(Self {
            module_id,
            cipher,
            version,
        })
    }

    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    pub fn cipher(&self) -> AeadCipher {
        self.cipher
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Render the header bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        format!(
            "{}:encryption_module:{}:cipher:{}:version:{}:{}",
            HEADER_START,
            self.module_id,
            self.cipher.algorithm_id(),
            self.version,
            HEADER_END
        )
        .into_bytes()
    }

    /// Parse a header at the start of `data`.
    ///
    /// Returns the header and its length in bytes, or `None` when `data`
    /// does not start with a recognized header.
    pub fn parse(data: &[u8]) -> Option<(Self, usize)> {
        let len = header_len(data)?;
        let text = std::str::from_utf8(&data[..len]).ok()?;
        let fields: Vec<&str> = text.split(':').collect();
        // HBEGIN, then key/value pairs, then HEND
        if fields.len() < 2 || fields.len() % 2 != 0 {
            return None;
        }

        let mut module_id = None;
        let mut cipher = None;
        let mut version = None;
        for pair in fields[1..fields.len() - 1].chunks(2) {
            match pair[0] {
                "encryption_module" => module_id = Some(pair[1]),
                "cipher" => cipher = AeadCipher::from_algorithm_id(pair[1]),
                "version" => version = pair[1].parse().ok(),
                _ => {}
            }
        }

        let header = Self::new(module_id?, cipher?, version?).ok()?;
        Some((header, len))
    }
}

/// Length of the header block at the start of `data`, if any
fn header_len(data: &[u8]) -> Option<usize> {
    let start = HEADER_START.as_bytes();
    if !data.starts_with(start) || data.get(start.len()) != Some(&b':') {
        return None;
    }
    let window = &data[..data.len().min(MAX_HEADER_SIZE)];
    let end = format!(":{}", HEADER_END);
    window
        .windows(end.len())
        .position(|w| w == end.as_bytes())
        .map(|pos| pos + end.len())
}

/// Whether `data` starts with a recognized header
pub fn has_header(data: &[u8]) -> bool {
    Header::parse(data).is_some()
}

/// The content after the header, or all of `data` when there is none
pub fn strip_header(data: &[u8]) -> &[u8] {
    match Header::parse(data) {
        Some((_, len)) => &data[len..],
        None => data,
    }
}

/// Prefix `data` with `header` unless it already carries one
pub fn tag(header: &Header, data: &[u8]) -> Vec<u8> {
    if has_header(data) {
        return data.to_vec();
    }
    let mut out = header.to_bytes();
    out.extend_from_slice(data);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> Header {
        Header::new("OC_DEFAULT_MODULE", AeadCipher::Aes256Gcm, 1).unwrap()
    }

    #[test]
    fn test_render_format() {
        assert_eq!(
            header().to_bytes(),
            b"HBEGIN:encryption_module:OC_DEFAULT_MODULE:cipher:AES-256-GCM:version:1:HEND".to_vec()
        );
    }

    #[test]
    fn test_parse_rendered() {
        let mut data = header().to_bytes();
        data.extend_from_slice(b"payload");
        let (parsed, len) = Header::parse(&data).unwrap();
        assert_eq!(parsed, header());
        assert_eq!(&data[len..], b"payload");
        assert_eq!(strip_header(&data), b"payload");
    }

    #[test]
    fn test_plain_content_has_no_header() {
        assert!(!has_header(b"bar"));
        assert!(!has_header(b"HBEGIN"));
        assert!(!has_header(b"HBEGINNER:encryption_module:x:HEND"));
        assert_eq!(strip_header(b"bar"), b"bar");
    }

    #[test]
    fn test_unknown_cipher_is_not_recognized() {
        assert!(!has_header(b"HBEGIN:encryption_module:M:cipher:ROT13:version:1:HEND"));
    }

    #[test]
    fn test_tag_is_idempotent() {
        let once = tag(&header(), b"data");
        let twice = tag(&header(), &once);
        assert_eq!(once, twice);
        assert_eq!(strip_header(&twice), b"data");
    }

    #[test]
    fn test_invalid_module_id() {
        assert!(Header::new("", AeadCipher::Aes256Gcm, 1).is_err());
        assert!(Header::new("a:b", AeadCipher::Aes256Gcm, 1).is_err());
    }
}
