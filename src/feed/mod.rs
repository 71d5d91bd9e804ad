//! Feed entry model and the Atom/JSON renderings served over HTTP and pushed
//! through the fan-out channel.
//!
//! No XML machinery is involved: the Atom documents this gateway emits are
//! small and fixed-shape, so they are assembled from escaped strings.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

pub const ATOM_NS: &str = "http://www.w3.org/2005/Atom";

/// One item observed on (or published to) a topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedEntry {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub content: String,
    pub updated: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<DateTime<Utc>>,
}

impl FeedEntry {
    pub fn new(id: impl Into<String>, content: impl Into<String>, updated: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            title: None,
            author: None,
            content: content.into(),
            updated,
            published: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn with_published(mut self, published: DateTime<Utc>) -> Self {
        self.published = Some(published);
        self
    }

    /// Render this entry as a standalone Atom `<entry>` document.
    pub fn to_atom(&self) -> String {
        let mut out = String::with_capacity(256);
        out.push_str(&format!("<entry xmlns=\"{ATOM_NS}\">"));
        out.push_str(&format!("<id>{}</id>", xml_escape(&self.id)));
        if let Some(title) = &self.title {
            out.push_str(&format!("<title>{}</title>", xml_escape(title)));
        }
        if let Some(author) = &self.author {
            out.push_str(&format!(
                "<author><name>{}</name></author>",
                xml_escape(author)
            ));
        }
        out.push_str(&format!(
            "<content type=\"text\">{}</content>",
            xml_escape(&self.content)
        ));
        out.push_str(&format!("<updated>{}</updated>", rfc3339(&self.updated)));
        if let Some(published) = &self.published {
            out.push_str(&format!("<published>{}</published>", rfc3339(published)));
        }
        out.push_str("</entry>");
        out
    }
}

/// Render a whole feed document for a topic, entries in the order given.
pub fn feed_to_atom(service: &str, node: &str, entries: &[FeedEntry]) -> String {
    let updated = entries
        .iter()
        .map(|e| e.updated)
        .max()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
    let mut out = String::with_capacity(512);
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>");
    out.push_str(&format!("<feed xmlns=\"{ATOM_NS}\">"));
    out.push_str(&format!(
        "<id>{}</id>",
        xml_escape(&format!("{service}/{node}"))
    ));
    out.push_str(&format!("<title>{}</title>", xml_escape(node)));
    out.push_str(&format!("<updated>{}</updated>", rfc3339(&updated)));
    for entry in entries {
        out.push_str(&entry.to_atom());
    }
    out.push_str("</feed>");
    out
}

/// Render entries as the JSON feed body.
pub fn feed_to_json(entries: &[FeedEntry]) -> String {
    serde_json::to_string(entries).unwrap_or_else(|_| "[]".to_string())
}

fn rfc3339(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Escape the five XML-significant characters.
pub fn xml_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(id: &str, content: &str, secs: i64) -> FeedEntry {
        FeedEntry::new(id, content, Utc.timestamp_opt(secs, 0).unwrap())
    }

    #[test]
    fn escapes_markup_in_content() {
        let atom = entry("e1", "<b>bold</b> & \"quoted\"", 1_700_000_000).to_atom();
        assert!(atom.contains("&lt;b&gt;bold&lt;/b&gt; &amp; &quot;quoted&quot;"));
        assert!(!atom.contains("<b>"));
    }

    #[test]
    fn entry_document_carries_identity_and_timestamp() {
        let atom = entry("urn:entry:1", "hello", 1_700_000_000)
            .with_author("alice@example.org")
            .to_atom();
        assert!(atom.contains("<id>urn:entry:1</id>"));
        assert!(atom.contains("<author><name>alice@example.org</name></author>"));
        assert!(atom.contains("<updated>2023-11-14T22:13:20Z</updated>"));
    }

    #[test]
    fn feed_document_orders_entries_as_given() {
        let feed = feed_to_atom(
            "pubsub.example.org",
            "news",
            &[entry("b", "second", 200), entry("a", "first", 100)],
        );
        let b_at = feed.find("<id>b</id>").unwrap();
        let a_at = feed.find("<id>a</id>").unwrap();
        assert!(b_at < a_at);
        assert!(feed.starts_with("<?xml"));
    }

    #[test]
    fn json_feed_round_trips() {
        let entries = vec![entry("e1", "hello", 100).with_title("t")];
        let json = feed_to_json(&entries);
        let back: Vec<FeedEntry> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entries);
    }
}
