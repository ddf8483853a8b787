//! Document parsers.
//!
//! Parsers never fail: malformed input yields an empty holding list and a
//! diagnostic in [`ParseMetadata`]. The orchestrator decides what to do next.
//!
//! | Parser | Documents |
//! |--------|-----------|
//! | [`NportXmlParser`] | SEC Form N-PORT XML |
//! | [`PdfTableParser`] | OAM (LU/DE) and BDIF (FR) periodic report PDFs |

pub mod dates;
pub mod nport_xml;
pub mod numbers;
pub mod pdf;
pub mod pdf_table;
pub mod xml_tree;

use time::Date;

use crate::domain::Holding;
use crate::SourceId;

pub use nport_xml::NportXmlParser;
pub use pdf::{LopdfTextExtractor, PdfPage, PdfTextExtractor};
pub use pdf_table::{PdfTableParser, TableProfile};

/// What the caller knows about a document before parsing it.
#[derive(Debug, Clone)]
pub struct ParseContext {
    pub fund_id: String,
    pub source_url: Option<String>,
    pub content_hash: Option<String>,
    /// Stamped on holdings when the document carries no recognisable date.
    pub fallback_as_of: Date,
}

impl ParseContext {
    pub fn new(fund_id: impl Into<String>, fallback_as_of: Date) -> Self {
        Self {
            fund_id: fund_id.into(),
            source_url: None,
            content_hash: None,
            fallback_as_of,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseMetadata {
    /// Report date found in the document itself.
    pub as_of: Option<Date>,
    pub n_holdings: usize,
    /// First 16 hex characters of the document's SHA-256.
    pub parse_hash: String,
    pub series_id: Option<String>,
    pub class_ids: Vec<String>,
    pub pages_scanned: Vec<u32>,
    pub diagnostics: Vec<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseOutcome {
    pub holdings: Vec<Holding>,
    pub metadata: ParseMetadata,
}

impl ParseOutcome {
    pub fn failed(parse_hash: String, error: impl Into<String>) -> Self {
        Self {
            holdings: Vec::new(),
            metadata: ParseMetadata {
                parse_hash,
                error: Some(error.into()),
                ..ParseMetadata::default()
            },
        }
    }
}

/// Turns one downloaded document into raw holdings.
pub trait DocumentParser: Send + Sync {
    fn source(&self) -> SourceId;

    fn parse(&self, document: &[u8], context: &ParseContext) -> ParseOutcome;
}

pub fn parse_hash(document: &[u8]) -> String {
    let mut hex = fundscope_store::raw::sha256_hex(document);
    hex.truncate(16);
    hex
}
