//! Atom feed parsing

use super::xml::{parse_document, XmlElement};
use super::{EntryContent, FeedEntry, FeedEnvelope};
use crate::error::{IngestError, Result};
use tracing::{debug, warn};

pub const ATOM_NS: &str = "http://www.w3.org/2005/Atom";

const DEFAULT_FEED_TITLE: &str = "Unknown";
const PREVIOUS_ARCHIVE_REL: &str = "previous-archive";

fn is_atom(element: &XmlElement) -> bool {
    element.namespace.as_deref().is_none_or(|ns| ns == ATOM_NS)
}

/// Parse a feed document
///
/// A feed without an identifier is rejected. Entries that cannot be parsed are
/// logged and skipped; the rest of the feed is kept.
pub fn parse_feed(bytes: &[u8], origin: Option<&str>) -> Result<FeedEnvelope> {
    let root = parse_document(bytes)?;
    if !root.is("feed") || !is_atom(&root) {
        return Err(IngestError::MalformedFeed(format!(
            "expected an Atom <feed> root, found <{}>",
            root.name
        )));
    }

    let feed_id = root
        .find_text("id")
        .ok_or_else(|| IngestError::MalformedFeed("feed has no id".to_string()))?
        .to_string();

    let next_archive_link = root
        .children_named("link")
        .find(|link| link.attr("rel") == Some(PREVIOUS_ARCHIVE_REL))
        .and_then(|link| link.attr("href"))
        .map(str::trim)
        .filter(|href| !href.is_empty())
        .map(str::to_string);

    let mut entries = Vec::new();
    let mut skipped = 0usize;
    for element in root.children_named("entry") {
        match parse_entry(element) {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                skipped += 1;
                warn!(feed = %feed_id, error = %e, "Skipping entry");
            },
        }
    }

    debug!(
        feed = %feed_id,
        entries = entries.len(),
        skipped,
        has_previous = next_archive_link.is_some(),
        "Parsed feed"
    );

    Ok(FeedEnvelope {
        title: root
            .find_text("title")
            .unwrap_or(DEFAULT_FEED_TITLE)
            .to_string(),
        updated_at: root.find_text("updated").map(str::to_string),
        feed_id,
        entries,
        next_archive_link,
        origin_archive: origin.map(str::to_string),
    })
}

fn parse_entry(element: &XmlElement) -> Result<FeedEntry> {
    let entry_id = element
        .find_text("id")
        .ok_or_else(|| IngestError::MalformedEntry("entry has no id".to_string()))?;
    let title = element.find_text("title").ok_or_else(|| {
        IngestError::MalformedEntry(format!("entry {} has no title", entry_id))
    })?;

    let link = element
        .children_named("link")
        .find(|l| matches!(l.attr("rel"), None | Some("alternate")))
        .and_then(|l| l.attr("href"))
        .map(str::to_string);

    Ok(FeedEntry {
        entry_id: entry_id.to_string(),
        title: title.to_string(),
        updated_at: element.find_text("updated").map(str::to_string),
        link,
        summary: element.find_text("summary").map(str::to_string),
        content: entry_content(element),
    })
}

/// A native (non-Atom) child wins over `<content>`; element children of
/// `<content>` are serialized back to markup.
fn entry_content(element: &XmlElement) -> Option<EntryContent> {
    if let Some(native) = element
        .children
        .iter()
        .find(|c| !is_atom(c) && !c.children.is_empty())
    {
        return Some(EntryContent::Structured(native.clone()));
    }

    let content = element.child("content")?;
    if let Some(first) = content.children.first() {
        return Some(EntryContent::Embedded(first.to_xml()));
    }
    content
        .text()
        .map(|text| EntryContent::Embedded(text.to_string()))
}
