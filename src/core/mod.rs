//! Core engine: lexing, parsing, plan types, execution and result collection.

pub mod executor;
pub mod lexer;
pub mod parser;
pub mod sink;
pub mod types;
