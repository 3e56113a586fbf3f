use crate::crd::bundle::BundleResource;
use crate::error::{Error, Result};

use base64::prelude::{Engine, BASE64_STANDARD};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::io::{Read, Write};

/// Content keys are object names; Kubernetes caps those at 63 characters.
pub const MAX_KEY_LENGTH: usize = 63;

#[derive(Serialize)]
struct Payload<'a> {
    resources: &'a [BundleResource],
}

/// Canonical serialization of a bundle's resource list: entries in given
/// order, each recorded as name/content/encoding. The digest and the stored
/// payload are both derived from these bytes.
pub fn serialize_resources(resources: &[BundleResource]) -> Result<Vec<u8>> {
    serde_json::to_vec(&Payload { resources }).map_err(Error::SerializationError)
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// `s-` + hex digest, truncated to an object-name-safe length.
pub fn content_key(digest_hex: &str) -> String {
    let mut key = format!("s-{digest_hex}");
    key.truncate(MAX_KEY_LENGTH);
    key
}

pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).map_err(Error::IoError)?;
    encoder.finish().map_err(Error::IoError)
}

pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    GzDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(Error::IoError)?;
    Ok(out)
}

/// Resource content with its declared encoding undone.
pub fn decode_resource(resource: &BundleResource) -> Result<Vec<u8>> {
    match resource.encoding.as_deref() {
        None | Some("") => Ok(resource.content.as_bytes().to_vec()),
        Some("base64") => BASE64_STANDARD
            .decode(&resource.content)
            .map_err(|e| Error::UserInputError(format!("invalid base64 content: {e}"))),
        Some("base64+gz") => {
            let raw = BASE64_STANDARD
                .decode(&resource.content)
                .map_err(|e| Error::UserInputError(format!("invalid base64 content: {e}")))?;
            decompress(&raw)
        }
        Some(other) => Err(Error::UserInputError(format!(
            "unknown resource encoding {other:?}"
        ))),
    }
}
