//! SQL parsing and analysis
//!
//! This crate handles:
//! - Parsing SQL using datafusion-sqlparser-rs (PostgreSQL dialect)
//! - Telling which result columns are read through the nullable side of an outer join

pub mod parser;
pub mod outer_join;

pub use parser::{SqlParser, ParsedSql, ParseError};
pub use outer_join::OuterJoinAnalysis;
