//! Syndication feed model, parser and chain follower

pub mod chain;
pub mod parser;
pub mod xml;

pub use chain::{ChainEnd, ChainFollower, FollowedChain};
pub use parser::{parse_feed, ATOM_NS};
pub use xml::XmlElement;

use crate::framework::ItemId;

/// Payload of an entry; exactly one shape is present per entry
#[derive(Debug, Clone, PartialEq)]
pub enum EntryContent {
    /// Marked-up licitacion document carried as text in `<content>`
    Embedded(String),
    /// Native procurement element tree embedded in the entry
    Structured(XmlElement),
}

/// One disclosure item of a feed
#[derive(Debug, Clone, PartialEq)]
pub struct FeedEntry {
    pub entry_id: String,
    pub title: String,
    pub updated_at: Option<String>,
    /// `alternate` link to the notice page
    pub link: Option<String>,
    pub summary: Option<String>,
    pub content: Option<EntryContent>,
}

impl ItemId for FeedEntry {
    fn item_id(&self) -> String {
        self.entry_id.clone()
    }
}

/// A parsed feed document
#[derive(Debug, Clone, PartialEq)]
pub struct FeedEnvelope {
    pub feed_id: String,
    pub title: String,
    pub updated_at: Option<String>,
    pub entries: Vec<FeedEntry>,
    /// Chronologically previous document of the chain; `None` ends the chain
    pub next_archive_link: Option<String>,
    /// Archive or URL the document was read from
    pub origin_archive: Option<String>,
}
