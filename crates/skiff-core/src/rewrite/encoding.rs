//! Response body decoding.
//!
//! Upstream responses may arrive gzip- or brotli-compressed; the body
//! must be inflated before it can be scanned, and the encoding header
//! dropped afterwards. Compression is not re-applied.

use std::io::Read;

/// Header inspected and removed when a body is decoded.
pub const CONTENT_ENCODING: &str = "content-encoding";

/// Decode a response body for the given content encoding.
///
/// Returns `None` for encodings this pipeline does not handle (the
/// body is then served untouched).
pub fn decode_body(body: &[u8], encoding: &str) -> Option<std::io::Result<Vec<u8>>> {
    match encoding.trim().to_ascii_lowercase().as_str() {
        "gzip" | "x-gzip" => {
            let mut out = Vec::new();
            let result = flate2::read::GzDecoder::new(body).read_to_end(&mut out);
            Some(result.map(|_| out))
        }
        "br" => {
            let mut out = Vec::new();
            let result = brotli::Decompressor::new(body, 4096).read_to_end(&mut out);
            Some(result.map(|_| out))
        }
        _ => None,
    }
}
