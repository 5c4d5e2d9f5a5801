//! Archive download and base feed location
//!
//! Monthly archives are zip containers holding the base feed of the month
//! (`licitacionesPerfilesContratanteCompleto3.atom`) next to dated snapshots
//! (`..._20250301_101512.atom`). The base feed is the entry point of the
//! syndication chain. A bare gzip-compressed feed is accepted as a one-file
//! container.

use crate::discovery::ArchiveDescriptor;
use crate::error::{IngestError, Result};
use crate::framework::HttpClient;
use flate2::read::GzDecoder;
use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

const FEED_EXTENSION: &str = ".atom";
const DATED_SUFFIX_DIGITS: usize = 6;

/// Container encoding, detected from the leading magic bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerFormat {
    Zip,
    Gzip,
}

impl ContainerFormat {
    pub fn detect(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [b'P', b'K', 0x03, 0x04, ..] | [b'P', b'K', 0x05, 0x06, ..] => Some(Self::Zip),
            [0x1f, 0x8b, ..] => Some(Self::Gzip),
            _ => None,
        }
    }
}

/// A downloaded container and the feed documents it holds
#[derive(Debug, Clone)]
pub struct FeedArchive {
    name: String,
    format: ContainerFormat,
    bytes: Vec<u8>,
}

impl FeedArchive {
    /// Wrap raw bytes; `name` is the archive file name
    pub fn open(name: impl Into<String>, bytes: Vec<u8>) -> Result<Self> {
        let name = name.into();
        let format = ContainerFormat::detect(&bytes).ok_or_else(|| {
            IngestError::MalformedFeed(format!("{} is neither a zip nor a gzip container", name))
        })?;

        Ok(Self {
            name,
            format,
            bytes,
        })
    }

    /// Read a local archive file
    pub async fn from_path(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self::open(name, bytes)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn format(&self) -> ContainerFormat {
        self.format
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Names of the feed documents inside the container, in archive order
    pub fn feed_names(&self) -> Result<Vec<String>> {
        match self.format {
            ContainerFormat::Zip => {
                let archive = zip::ZipArchive::new(Cursor::new(self.bytes.as_slice()))?;
                Ok(archive
                    .file_names()
                    .filter(|name| !name.ends_with('/') && is_feed_name(name))
                    .map(str::to_string)
                    .collect())
            },
            ContainerFormat::Gzip => Ok(vec![self.gzip_member_name()]),
        }
    }

    /// The base feed, or `None` when the container holds no feed at all
    pub fn base_feed_name(&self) -> Result<Option<String>> {
        Ok(locate_base_feed(&self.feed_names()?, &self.name))
    }

    /// Decompressed content of one feed document
    ///
    /// A gzip container holds exactly one feed, so `feed_name` is only
    /// consulted for zip containers.
    pub fn read_feed(&self, feed_name: &str) -> Result<Vec<u8>> {
        let mut content = Vec::new();
        match self.format {
            ContainerFormat::Zip => {
                let mut archive = zip::ZipArchive::new(Cursor::new(self.bytes.as_slice()))?;
                let mut file = archive.by_name(feed_name)?;
                file.read_to_end(&mut content)?;
            },
            ContainerFormat::Gzip => {
                GzDecoder::new(self.bytes.as_slice()).read_to_end(&mut content)?;
            },
        }

        debug!(
            archive = %self.name,
            feed = %feed_name,
            compressed = self.bytes.len(),
            bytes = content.len(),
            "Decompressed feed"
        );
        Ok(content)
    }

    fn gzip_member_name(&self) -> String {
        let stem = self
            .name
            .strip_suffix(".gz")
            .or_else(|| self.name.strip_suffix(".GZ"))
            .unwrap_or(&self.name);
        if is_feed_name(stem) {
            stem.to_string()
        } else {
            format!("{}{}", stem, FEED_EXTENSION)
        }
    }
}

fn is_feed_name(name: &str) -> bool {
    name.to_lowercase().ends_with(FEED_EXTENSION)
}

fn basename(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

fn has_dated_suffix(name: &str) -> bool {
    let mut run = 0;
    for c in basename(name).chars() {
        if c.is_ascii_digit() {
            run += 1;
            if run >= DATED_SUFFIX_DIGITS {
                return true;
            }
        } else {
            run = 0;
        }
    }
    false
}

/// Pick the undated feed; fall back to the first feed with a warning
pub fn locate_base_feed(feed_names: &[String], archive: &str) -> Option<String> {
    if let Some(base) = feed_names.iter().find(|name| !has_dated_suffix(name)) {
        return Some(base.clone());
    }

    let first = feed_names.first()?;
    warn!(
        archive = %archive,
        feed = %first,
        candidates = feed_names.len(),
        "No undated base feed found, using first feed"
    );
    Some(first.clone())
}

/// An archive downloaded for one descriptor
#[derive(Debug, Clone)]
pub struct FetchedArchive {
    pub descriptor: ArchiveDescriptor,
    pub archive: FeedArchive,
    /// `None` means the container holds no feed and should be skipped
    pub base_feed: Option<String>,
}

/// Downloads archives and locates their base feed
pub struct ArchiveFetcher {
    http: Arc<HttpClient>,
}

impl ArchiveFetcher {
    pub fn new(http: Arc<HttpClient>) -> Self {
        Self { http }
    }

    pub async fn fetch_and_locate_base_feed(
        &self,
        descriptor: &ArchiveDescriptor,
    ) -> Result<FetchedArchive> {
        info!(archive = %descriptor.filename, url = %descriptor.url, "Downloading archive");

        let bytes = self.http.get_bytes(&descriptor.url).await?;
        let archive = FeedArchive::open(descriptor.filename.clone(), bytes)?;
        let base_feed = archive.base_feed_name()?;

        match &base_feed {
            Some(feed) => debug!(archive = %descriptor.filename, feed = %feed, "Located base feed"),
            None => warn!(archive = %descriptor.filename, "Archive contains no feed documents"),
        }

        Ok(FetchedArchive {
            descriptor: descriptor.clone(),
            archive,
            base_feed,
        })
    }
}
