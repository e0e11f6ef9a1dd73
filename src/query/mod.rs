//! InfluxQL query handling
//!
//! - **lexer**: lossless tokenizer for InfluxQL text
//! - **rewrite**: time-window predicate and sort key injection

mod lexer;
mod rewrite;

pub use lexer::{render, tokenize, Keyword, QueryToken, TokenKind};
pub use rewrite::{inject_order, inject_where, QueryRewriter, TIME_DESC, TIME_WINDOW_PREDICATE};
