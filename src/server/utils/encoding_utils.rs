use std::io::{Read, Write};

use flate2::{
    Compression,
    read::{GzDecoder, ZlibDecoder},
    write::GzEncoder,
};
use tracing::debug;

/// what we ask upstream for, everything here can be undone by `decode_body`
pub const UPSTREAM_ACCEPT_ENCODING: &str = "gzip, deflate, zstd";

/// Supported compression encodings for rewritten manifests
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ContentEncoding {
    Zstd,
    Gzip,
    None,
}

impl ContentEncoding {
    /// determine the best encoding based on Accept-Encoding header
    /// apple HLS player sends "gzip, deflate" or "identity" and that has to be respected
    pub fn from_accept_encoding(accept_encoding: Option<&str>) -> Self {
        match accept_encoding {
            Some(v) => {
                // don't compress if client explicitly requests identity-only
                if v == "identity" || v.starts_with("identity,") {
                    return Self::None;
                }
                if v.contains("zstd") {
                    Self::Zstd
                } else if v.contains("gzip") {
                    Self::Gzip
                } else {
                    Self::None
                }
            }
            None => Self::None,
        }
    }

    pub fn as_header_value(&self) -> Option<&'static str> {
        match self {
            Self::Zstd => Some("zstd"),
            Self::Gzip => Some("gzip"),
            Self::None => None,
        }
    }

    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>, std::io::Error> {
        match self {
            Self::Zstd => zstd::encode_all(data, 3),
            Self::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(data)?;
                encoder.finish()
            }
            Self::None => Ok(data.to_vec()),
        }
    }
}

/// undo whatever upstream compressed the body with, unknown encodings are left alone
pub fn decode_body(content_encoding: Option<&str>, bytes: &[u8]) -> Result<Vec<u8>, std::io::Error> {
    match content_encoding.map(str::trim) {
        Some("zstd") => {
            debug!("Decompressing zstd-encoded response");
            zstd::decode_all(bytes)
        }
        Some("gzip") | Some("x-gzip") => {
            debug!("Decompressing gzip-encoded response");
            let mut decoded = Vec::new();
            GzDecoder::new(bytes).read_to_end(&mut decoded)?;
            Ok(decoded)
        }
        Some("deflate") => {
            debug!("Decompressing deflate-encoded response");
            let mut decoded = Vec::new();
            ZlibDecoder::new(bytes).read_to_end(&mut decoded)?;
            Ok(decoded)
        }
        _ => Ok(bytes.to_vec()),
    }
}
