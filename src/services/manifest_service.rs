use std::fs::File;
use std::path::Path;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::errors::{LauncherError, ManifestError, Result};
use crate::utils::crypto::{compute_range_hex, matches_checksum, sanitize_hash, ChecksumAlgorithm};

const ROOT_ELEMENT: &str = "file";
const CHUNK_ELEMENT: &str = "chunk";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Chunk {
    pub id: u32,
    pub from_byte: u64,
    pub to_byte: u64,
    pub method: String,
    pub checksum: String,
}

impl Chunk {
    pub fn size(&self) -> u64 {
        self.to_byte - self.from_byte + 1
    }

    fn algorithm(&self) -> ChecksumAlgorithm {
        match self.method.to_ascii_lowercase().as_str() {
            "sha256" => ChecksumAlgorithm::Sha256,
            "md5" => ChecksumAlgorithm::Md5,
            _ => ChecksumAlgorithm::from_hex(&self.checksum).unwrap_or(ChecksumAlgorithm::Md5),
        }
    }
}

/// Server supplied description of one file: size, whole-file digest and chunk layout.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DownloadManifest {
    pub name: String,
    pub available: bool,
    pub md5: String,
    pub timestamp: NaiveDateTime,
    pub total_size: u64,
    pub chunks: Vec<Chunk>,
}

impl DownloadManifest {
    pub fn parse(xml: &str) -> std::result::Result<Self, ManifestError> {
        let document =
            roxmltree::Document::parse(xml).map_err(|err| ManifestError::Xml(err.to_string()))?;
        let root = document.root_element();
        if root.tag_name().name() != ROOT_ELEMENT {
            return Err(ManifestError::UnexpectedRoot(
                root.tag_name().name().to_string(),
            ));
        }

        let name = required(&root, ROOT_ELEMENT, "name")?.to_string();
        let available = match required(&root, ROOT_ELEMENT, "available")?.trim() {
            "1" => true,
            "0" => false,
            other => {
                return Err(ManifestError::InvalidNumber {
                    attribute: "available",
                    value: other.to_string(),
                })
            }
        };
        let md5_raw = required(&root, ROOT_ELEMENT, "md5")?;
        let md5 = sanitize_hash(md5_raw)
            .ok_or_else(|| ManifestError::InvalidChecksum(md5_raw.to_string()))?;
        let timestamp_raw = required(&root, ROOT_ELEMENT, "timestamp")?;
        let timestamp = NaiveDateTime::parse_from_str(timestamp_raw.trim(), TIMESTAMP_FORMAT)
            .map_err(|_| ManifestError::InvalidTimestamp(timestamp_raw.to_string()))?;
        let total_size = parse_number(required(&root, ROOT_ELEMENT, "total_size")?, "total_size")?;

        let mut chunks: Vec<Chunk> = Vec::new();
        for node in root
            .children()
            .filter(|node| node.is_element() && node.tag_name().name() == CHUNK_ELEMENT)
        {
            let id_raw = required(&node, CHUNK_ELEMENT, "id")?;
            let id = u32::try_from(parse_number(id_raw, "id")?).map_err(|_| ManifestError::InvalidNumber {
                attribute: "id",
                value: id_raw.to_string(),
            })?;
            let from_byte = parse_number(required(&node, CHUNK_ELEMENT, "from")?, "from")?;
            let to_byte = parse_number(required(&node, CHUNK_ELEMENT, "to")?, "to")?;
            let method = required(&node, CHUNK_ELEMENT, "method")?.trim().to_string();
            let text = node.text().unwrap_or("");
            let checksum =
                sanitize_hash(text).ok_or_else(|| ManifestError::InvalidChecksum(text.to_string()))?;

            let expected_from = chunks.last().map(|prev| prev.to_byte + 1).unwrap_or(0);
            if from_byte != expected_from || to_byte < from_byte {
                return Err(ManifestError::NonContiguousChunks {
                    id,
                    expected_from,
                    found_from: from_byte,
                });
            }
            if let Some(prev) = chunks.last() {
                if id <= prev.id {
                    return Err(ManifestError::NonContiguousChunks {
                        id,
                        expected_from,
                        found_from: from_byte,
                    });
                }
            }

            chunks.push(Chunk {
                id,
                from_byte,
                to_byte,
                method,
                checksum,
            });
        }

        let chunk_total: u64 = chunks.iter().map(Chunk::size).sum();
        if chunk_total != total_size {
            return Err(ManifestError::SizeMismatch {
                declared: total_size,
                chunks: chunk_total,
            });
        }

        Ok(Self {
            name,
            available,
            md5,
            timestamp,
            total_size,
            chunks,
        })
    }

    /// Offset a partial file can safely resume from: the end of the longest
    /// run of leading chunks whose bytes are present and match their checksum.
    pub fn verified_prefix_len(&self, path: &Path) -> Result<u64> {
        let present = match std::fs::metadata(path) {
            Ok(metadata) => metadata.len(),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err.into()),
        };
        let mut file = File::open(path)?;
        let mut verified = 0u64;
        for chunk in &self.chunks {
            if chunk.to_byte >= present {
                break;
            }
            let actual = compute_range_hex(&mut file, chunk.from_byte, chunk.size(), chunk.algorithm())?;
            if !matches_checksum(&actual, &chunk.checksum) {
                tracing::warn!(
                    "chunk checksum mismatch path={} chunk={} from={}",
                    path.display(),
                    chunk.id,
                    chunk.from_byte
                );
                break;
            }
            verified = chunk.to_byte + 1;
        }
        Ok(verified)
    }

    pub fn file_algorithm(&self) -> ChecksumAlgorithm {
        ChecksumAlgorithm::from_hex(&self.md5).unwrap_or(ChecksumAlgorithm::Md5)
    }
}

impl FromStr for DownloadManifest {
    type Err = ManifestError;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(value)
    }
}

fn required<'a>(
    node: &roxmltree::Node<'a, '_>,
    element: &'static str,
    attribute: &'static str,
) -> std::result::Result<&'a str, ManifestError> {
    node.attribute(attribute)
        .ok_or(ManifestError::MissingAttribute { element, attribute })
}

fn parse_number(value: &str, attribute: &'static str) -> std::result::Result<u64, ManifestError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| ManifestError::InvalidNumber {
            attribute,
            value: value.to_string(),
        })
}

/// Fetches and parses a manifest descriptor. Transport failures surface as
/// `NoDownloadLink`; a document that arrives but does not parse is a `Manifest` error.
pub async fn fetch_manifest(client: &reqwest::Client, url: &str) -> Result<DownloadManifest> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|err| LauncherError::NoDownloadLink(format!("{} -> {}", url, err)))?;
    if !response.status().is_success() {
        return Err(LauncherError::NoDownloadLink(format!(
            "{} -> HTTP {}",
            url,
            response.status()
        )));
    }
    let body = response
        .text()
        .await
        .map_err(|err| LauncherError::NoDownloadLink(format!("{} -> {}", url, err)))?;
    Ok(DownloadManifest::parse(&body)?)
}

#[cfg(test)]
pub(crate) fn manifest_xml_for(name: &str, payload: &[u8], chunk_size: usize) -> String {
    use crate::utils::crypto::compute_hex;

    let mut chunks = String::new();
    for (index, part) in payload.chunks(chunk_size.max(1)).enumerate() {
        let from = index * chunk_size;
        let to = from + part.len() - 1;
        chunks.push_str(&format!(
            "  <chunk id=\"{}\" from=\"{}\" to=\"{}\" method=\"md5\">{}</chunk>\n",
            index,
            from,
            to,
            compute_hex(ChecksumAlgorithm::Md5, part)
        ));
    }
    format!(
        "<file name=\"{}\" available=\"1\" notavailablemsg=\"\" md5=\"{}\" chunks=\"{}\" timestamp=\"2021-03-04 10:20:30\" total_size=\"{}\">\n{}</file>\n",
        name,
        compute_hex(ChecksumAlgorithm::Md5, payload),
        payload.chunks(chunk_size.max(1)).count(),
        payload.len(),
        chunks
    )
}
