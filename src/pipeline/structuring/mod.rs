//! Turning free text into structure: JSON salvage for model replies,
//! record-date parsing, document classification and prompt assembly.

pub mod classify;
pub mod dates;
pub mod parser;
pub mod prompt;

pub use classify::{
    classify_document, normalize_category_label, resolve_classification, DocumentClassification,
    IMAGE_DOMAINS, UNSUPPORTED_DOCUMENT_TYPES,
};
pub use dates::{is_bare_time, parse_record_date};
pub use parser::{excerpt, salvage_json, ParseFailure, ParseStrategy};
