// Numan Thabit 2025
//! Lenient parsers: unparsable input yields absent fields, never an error.

pub mod summary;
pub mod wrk;

pub use summary::parse_summary;
pub use wrk::parse_load_report;
