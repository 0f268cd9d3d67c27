//! Extraction stage: schema introspection and table dumps.

pub mod dump;
pub mod metadata;

pub use dump::{DumpSummary, TableDumper};
pub use metadata::{MetadataExtractor, DEFAULT_ENCODING};
