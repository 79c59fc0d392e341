//! Streaming metric extraction for title XML.
//!
//! [`parse_content`] makes one forward pass over the raw document with a
//! pull reader and never builds a tree. It produces:
//!
//! - **word count**: whitespace-separated words in text that appears while
//!   inside a readable element (`P`, `FP`, `HD`, `HEAD`, `PRTPAGE`, `EDNOTE`,
//!   `NOTE`, `EXTRACT`, `APPRO`);
//! - **section count**: one per `<DIV8 TYPE="SECTION">` element;
//! - **checksum**: [`content_fingerprint`] of the raw bytes.
//!
//! # Best-effort contract
//!
//! Parsing never fails. Historical content is not always well-formed, so a
//! markup error ends the scan and the counts gathered up to that point are
//! returned. The checksum is computed independently of the scan and is
//! always present, which keeps change detection working for documents that
//! cannot be parsed at all.
//!
//! The "inside readable text" state is a single flag rather than a depth
//! counter: it is raised by the start of any readable element and lowered by
//! the end of any readable element.
//!
//! # Example
//!
//! ```rust
//! use cfr_ledger_core::parser::parse_content;
//!
//! let xml = br#"<DIV8 TYPE="SECTION"><HEAD>Sec. 1</HEAD><P>Plain words here.</P></DIV8>"#;
//! let result = parse_content(xml);
//! assert_eq!(result.section_count, 1);
//! assert_eq!(result.word_count, 5);
//! ```

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::fingerprint::content_fingerprint;

/// Elements whose character data counts toward the word total.
const READABLE_ELEMENTS: &[&[u8]] = &[
    b"P", b"FP", b"HD", b"HEAD", b"PRTPAGE", b"EDNOTE", b"NOTE", b"EXTRACT", b"APPRO",
];

const SECTION_ELEMENT: &[u8] = b"DIV8";
const SECTION_TYPE_ATTR: &[u8] = b"TYPE";
const SECTION_TYPE_VALUE: &[u8] = b"SECTION";

/// Metrics extracted from one title document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseResult {
    pub word_count: i64,
    pub section_count: i64,
    pub checksum: String,
}

/// Extract word count, section count, and checksum from raw title XML.
pub fn parse_content(content: &[u8]) -> ParseResult {
    let checksum = content_fingerprint(content);
    let (word_count, section_count) = scan(content);
    ParseResult {
        word_count,
        section_count,
        checksum,
    }
}

fn scan(content: &[u8]) -> (i64, i64) {
    let mut reader = Reader::from_reader(content);
    reader.config_mut().check_end_names = true;

    let mut words: i64 = 0;
    let mut sections: i64 = 0;
    let mut in_text = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                if is_section(&e) {
                    sections += 1;
                }
                if is_readable(e.local_name().as_ref()) {
                    in_text = true;
                }
            }
            // A self-closing element opens and closes in one event.
            Ok(Event::Empty(e)) => {
                if is_section(&e) {
                    sections += 1;
                }
                if is_readable(e.local_name().as_ref()) {
                    in_text = false;
                }
            }
            Ok(Event::End(e)) => {
                if is_readable(e.local_name().as_ref()) {
                    in_text = false;
                }
            }
            Ok(Event::Text(e)) if in_text => match e.unescape() {
                Ok(text) => words += count_words(&text),
                Err(_) => break,
            },
            Ok(Event::CData(e)) if in_text => {
                words += count_words(&String::from_utf8_lossy(&e));
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    (words, sections)
}

fn is_readable(name: &[u8]) -> bool {
    READABLE_ELEMENTS.contains(&name)
}

/// True when the element is a `DIV8` carrying `TYPE="SECTION"`. Repeated or
/// malformed attributes still yield a single match.
fn is_section(e: &BytesStart<'_>) -> bool {
    if e.local_name().as_ref() != SECTION_ELEMENT {
        return false;
    }
    e.attributes().flatten().any(|attr| {
        attr.key.local_name().as_ref() == SECTION_TYPE_ATTR
            && attr.value.as_ref() == SECTION_TYPE_VALUE
    })
}

fn count_words(text: &str) -> i64 {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return 0;
    }
    trimmed.split_whitespace().count() as i64
}
