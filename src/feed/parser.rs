//! Tolerant feed parsing.
//!
//! Real-world feeds are routinely malformed: mis-declared encodings, stray
//! control bytes, unescaped ampersands. The parser recovers what it can
//! instead of failing the fetch: bytes are decoded lossily, the markup is
//! scrubbed before the XML parse, and entries without a usable link are
//! skipped individually. Only a document that yields no structure at all
//! comes back as `None`.

use encoding_rs::{Encoding, UTF_8};
use feed_rs::model::Entry;

/// Placeholder for entries without a title.
pub const UNTITLED: &str = "Untitled";

/// Placeholder for feeds without a title.
pub const UNKNOWN_FEED: &str = "Unknown Feed";

/// Feed-level metadata plus entries, in document order. Ephemeral: produced
/// per fetch and discarded after reconciliation.
#[derive(Debug, Clone)]
pub struct ParsedFeed {
    pub title: String,
    pub description: String,
    pub link: String,
    pub entries: Vec<ParsedEntry>,
}

/// One normalized entry.
///
/// `guid` is the identity key used by the reconciler; it falls back to
/// `link` when the document declares no identifier. `published_at` is unix
/// seconds.
#[derive(Debug, Clone)]
pub struct ParsedEntry {
    pub title: String,
    pub link: String,
    pub author: String,
    pub summary: String,
    pub content: String,
    pub published_at: Option<i64>,
    pub guid: String,
}

/// Syntactic dialect of a feed document, sniffed from its prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedKind {
    Rss,
    Atom,
    Rdf,
    Unknown,
}

impl FeedKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FeedKind::Rss => "RSS",
            FeedKind::Atom => "Atom",
            FeedKind::Rdf => "RDF",
            FeedKind::Unknown => "unknown",
        }
    }
}

/// Parse a fetched document into a [`ParsedFeed`].
///
/// Returns `None` when nothing usable could be recovered (empty body,
/// non-XML garbage). Malformed-but-recoverable input is repaired with a
/// warning rather than rejected.
pub fn parse(bytes: &[u8], encoding: &str) -> Option<ParsedFeed> {
    if bytes.is_empty() {
        tracing::warn!("empty feed document");
        return None;
    }
    tracing::debug!(kind = detect_feed_kind(bytes).as_str(), "parsing feed document");

    let text = decode(bytes, encoding);
    // The text is UTF-8 from here on; a declaration still claiming the
    // original charset would mislead the XML parser.
    let text = strip_declared_encoding(&text);
    let (text, repaired) = scrub_markup(&text);
    if repaired {
        tracing::warn!("malformed markup repaired before parse");
    }

    let feed = match feed_rs::parser::parse(text.as_bytes()) {
        Ok(feed) => feed,
        Err(err) => {
            tracing::warn!(error = %err, "feed document could not be parsed");
            return None;
        }
    };

    let mut entries = Vec::with_capacity(feed.entries.len());
    for entry in feed.entries {
        match convert_entry(entry) {
            Some(parsed) => entries.push(parsed),
            None => tracing::warn!("entry without link skipped"),
        }
    }

    Some(ParsedFeed {
        title: feed
            .title
            .map(|t| t.content)
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| UNKNOWN_FEED.to_string()),
        description: feed.description.map(|t| t.content).unwrap_or_default(),
        link: feed
            .links
            .first()
            .map(|l| l.href.clone())
            .unwrap_or_default(),
        entries,
    })
}

/// Sniff the feed dialect from the document prefix.
pub fn detect_feed_kind(bytes: &[u8]) -> FeedKind {
    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(1024)]).to_lowercase();
    if head.contains("<rss") {
        FeedKind::Rss
    } else if head.contains("<feed") || head.contains("<atom:") {
        FeedKind::Atom
    } else if head.contains("<rdf:") {
        FeedKind::Rdf
    } else {
        FeedKind::Unknown
    }
}

fn convert_entry(entry: Entry) -> Option<ParsedEntry> {
    let link = entry.links.first().map(|l| l.href.clone())?;
    if link.trim().is_empty() {
        return None;
    }

    let guid = if entry.id.trim().is_empty() {
        link.clone()
    } else {
        entry.id
    };

    let summary_raw = entry.summary.map(|s| s.content);
    // A structured content element wins over the summary/description text.
    let content_raw = entry
        .content
        .and_then(|c| c.body)
        .or_else(|| summary_raw.clone());

    Some(ParsedEntry {
        title: entry
            .title
            .map(|t| t.content)
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| UNTITLED.to_string()),
        link,
        author: entry
            .authors
            .first()
            .map(|p| p.name.clone())
            .unwrap_or_default(),
        summary: clean_html(summary_raw.as_deref().unwrap_or_default()),
        content: clean_html(content_raw.as_deref().unwrap_or_default()),
        published_at: entry.published.or(entry.updated).map(|dt| dt.timestamp()),
        guid,
    })
}

/// Minimal HTML cleanup. A full sanitizer can slot in here; trimming is
/// all reconciliation needs, since change detection compares these fields
/// verbatim.
fn clean_html(html: &str) -> String {
    html.trim().to_string()
}

/// Decode with the declared encoding, dropping undecodable sequences.
fn decode(bytes: &[u8], label: &str) -> String {
    let encoding = Encoding::for_label(label.as_bytes()).unwrap_or(UTF_8);
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        tracing::warn!(encoding = label, "invalid byte sequences dropped during decode");
        text.chars().filter(|c| *c != '\u{FFFD}').collect()
    } else {
        text.into_owned()
    }
}

/// Drop the `encoding="..."` attribute from an XML declaration, if any.
fn strip_declared_encoding(text: &str) -> String {
    let unchanged = || text.to_string();

    let Some(decl_end) = text.find("?>") else {
        return unchanged();
    };
    let decl = &text[..decl_end];
    if !decl.trim_start().starts_with("<?xml") {
        return unchanged();
    }
    let Some(enc_pos) = decl.find("encoding") else {
        return unchanged();
    };
    let after = &decl[enc_pos..];
    let Some(quote_pos) = after.find(['"', '\'']) else {
        return unchanged();
    };
    let quote = after[quote_pos..].chars().next().unwrap_or('"');
    let Some(close_rel) = after[quote_pos + 1..].find(quote) else {
        return unchanged();
    };
    let remove_end = enc_pos + quote_pos + 1 + close_rel + 1;

    let mut out = String::with_capacity(text.len());
    out.push_str(decl[..enc_pos].trim_end());
    out.push_str(&decl[remove_end..]);
    out.push_str(&text[decl_end..]);
    out
}

/// Repair the most common XML malformations: control characters that no
/// XML parser accepts, and bare ampersands. CDATA sections pass through
/// untouched, since `&` is ordinary text there. Returns the cleaned text
/// and whether anything changed.
fn scrub_markup(input: &str) -> (String, bool) {
    const CDATA_OPEN: &str = "<![CDATA[";
    const CDATA_CLOSE: &str = "]]>";

    let mut out = String::with_capacity(input.len());
    let mut changed = false;
    let mut rest = input;

    loop {
        if let Some(tail) = rest.strip_prefix(CDATA_OPEN) {
            if let Some(end) = tail.find(CDATA_CLOSE) {
                out.push_str(&rest[..CDATA_OPEN.len() + end + CDATA_CLOSE.len()]);
                rest = &tail[end + CDATA_CLOSE.len()..];
                continue;
            }
            // Unterminated section; fall through and scrub it like text.
        }

        let Some(c) = rest.chars().next() else {
            break;
        };
        rest = &rest[c.len_utf8()..];
        match c {
            '&' if !is_entity_start(rest) => {
                out.push_str("&amp;");
                changed = true;
            }
            c if c.is_control() && !matches!(c, '\t' | '\n' | '\r') => {
                changed = true;
            }
            c => out.push(c),
        }
    }

    (out, changed)
}

/// True when `rest` (the text after an `&`) begins with something shaped
/// like an entity reference: a short run of `[A-Za-z0-9#]` ending in `;`.
fn is_entity_start(rest: &str) -> bool {
    for (offset, c) in rest.char_indices().take(10) {
        match c {
            ';' => return offset > 0,
            c if c.is_ascii_alphanumeric() || c == '#' => continue,
            _ => return false,
        }
    }
    false
}
