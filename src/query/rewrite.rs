//! Clause injection
//!
//! Adds a time-window predicate and a sort key to an arbitrary InfluxQL
//! query without parsing it. Each injection is one forward scan over the
//! lexer's tokens; the first clause keyword found decides the splice point.
//! InfluxQL fixes the clause order (`WHERE`, `GROUP BY`, `ORDER BY`,
//! `LIMIT`/`OFFSET`/`SLIMIT`/`SOFFSET`), so no backtracking is needed.
//!
//! Token lists are never modified in place: every function here returns a
//! new list, with positions renumbered to match the rewritten text.
//!
//! The rewriter does not validate queries. A malformed query stays malformed
//! and is rejected by InfluxDB.

use crate::query::lexer::{render, tokenize, Keyword, QueryToken, TokenKind};

/// Predicate bounding a query to the search window
pub const TIME_WINDOW_PREDICATE: &str = "time >= $tMin AND time <= $tMax";

/// Sort key giving newest-first results
pub const TIME_DESC: &str = "time desc";

/// Rewrites queries with a fixed predicate and optional sort key
#[derive(Debug, Clone)]
pub struct QueryRewriter {
    predicate: String,
    sort_key: Option<String>,
}

impl Default for QueryRewriter {
    fn default() -> Self {
        Self::new(TIME_WINDOW_PREDICATE).sort_by(TIME_DESC)
    }
}

impl QueryRewriter {
    pub fn new(predicate: impl Into<String>) -> Self {
        Self {
            predicate: predicate.into(),
            sort_key: None,
        }
    }

    pub fn sort_by(mut self, key: impl Into<String>) -> Self {
        self.sort_key = Some(key.into());
        self
    }

    pub fn rewrite(&self, query: &str) -> String {
        let tokens = tokenize(query);
        let tokens = inject_where(&tokens, &self.predicate);
        let tokens = match &self.sort_key {
            Some(key) => inject_order(&tokens, key),
            None => tokens,
        };
        render(&tokens)
    }
}

/// Constrain the query with `predicate`.
///
/// 1. `WHERE` found first: `WHERE <predicate> AND <existing>`
/// 2. `GROUP`, `ORDER`, `LIMIT`, `OFFSET`, `SLIMIT` or `SOFFSET` found first:
///    `WHERE <predicate>` goes right before it
/// 3. otherwise `WHERE <predicate>` is appended
///
/// An existing predicate with a top-level `OR` is parenthesized so the new
/// conjunction binds to all of it. A query already containing the predicate
/// is returned unchanged.
pub fn inject_where(tokens: &[QueryToken], predicate: &str) -> Vec<QueryToken> {
    let predicate_tokens = tokenize(predicate);
    if contains_sequence(tokens, &predicate_tokens) {
        tracing::debug!(predicate, "predicate already present, skipping injection");
        return tokens.to_vec();
    }

    for (i, token) in tokens.iter().enumerate() {
        match token.keyword() {
            Some(Keyword::Where) => {
                let end = predicate_end(tokens, i + 1);
                let existing = &tokens[i + 1..end];
                let existing = if has_top_level_or(existing) {
                    parenthesize(existing)
                } else {
                    existing.to_vec()
                };

                let mut out = tokens[..=i].to_vec();
                out.extend(tokenize(&format!(" {} AND", predicate)));
                out.extend(existing);
                out.extend_from_slice(&tokens[end..]);
                return renumber(out);
            }
            Some(
                Keyword::Group
                | Keyword::Order
                | Keyword::Limit
                | Keyword::Offset
                | Keyword::Slimit
                | Keyword::Soffset,
            ) => {
                return splice(tokens, i, tokenize(&format!("WHERE {} ", predicate)));
            }
            _ => {}
        }
    }

    splice(
        tokens,
        append_point(tokens),
        tokenize(&format!(" WHERE {}", predicate)),
    )
}

/// Make `key` the first sort key.
///
/// 1. `ORDER ... BY` found: `ORDER BY <key>, <existing keys>`
/// 2. `LIMIT`, `OFFSET`, `SLIMIT` or `SOFFSET` found first:
///    `ORDER BY <key>` goes right before it
/// 3. otherwise `ORDER BY <key>` is appended
///
/// A query whose sort already starts with `key` is returned unchanged.
pub fn inject_order(tokens: &[QueryToken], key: &str) -> Vec<QueryToken> {
    let key_tokens = tokenize(key);
    let mut order_seen = false;

    for (i, token) in tokens.iter().enumerate() {
        match token.keyword() {
            Some(Keyword::Order) => order_seen = true,
            Some(Keyword::By) if order_seen => {
                if starts_with_sequence(&tokens[i + 1..], &key_tokens) {
                    tracing::debug!(key, "sort key already present, skipping injection");
                    return tokens.to_vec();
                }
                return splice(tokens, i + 1, tokenize(&format!(" {},", key)));
            }
            Some(Keyword::Limit | Keyword::Offset | Keyword::Slimit | Keyword::Soffset) => {
                return splice(tokens, i, tokenize(&format!("ORDER BY {} ", key)));
            }
            _ => {}
        }
    }

    splice(
        tokens,
        append_point(tokens),
        tokenize(&format!(" ORDER BY {}", key)),
    )
}

/// New list with `insert` placed before index `at`
fn splice(tokens: &[QueryToken], at: usize, insert: Vec<QueryToken>) -> Vec<QueryToken> {
    let mut out = Vec::with_capacity(tokens.len() + insert.len());
    out.extend_from_slice(&tokens[..at]);
    out.extend(insert);
    out.extend_from_slice(&tokens[at..]);
    renumber(out)
}

fn renumber(tokens: Vec<QueryToken>) -> Vec<QueryToken> {
    let mut position = 0;
    tokens
        .into_iter()
        .map(|mut token| {
            token.position = position;
            position += token.text.len();
            token
        })
        .collect()
}

/// Index right after the last significant token, or before a trailing `;`
fn append_point(tokens: &[QueryToken]) -> usize {
    let mut significant = tokens.iter().enumerate().rev().filter(|(_, t)| !t.is_trivia());
    match significant.next() {
        Some((i, t)) if t.kind == TokenKind::Semicolon => {
            significant.next().map(|(j, _)| j + 1).unwrap_or(i)
        }
        Some((i, _)) => i + 1,
        None => tokens.len(),
    }
}

/// End (exclusive) of the predicate that starts at `start`
fn predicate_end(tokens: &[QueryToken], start: usize) -> usize {
    let mut depth = 0usize;
    for (i, token) in tokens.iter().enumerate().skip(start) {
        match token.kind {
            TokenKind::LParen => depth += 1,
            TokenKind::RParen if depth == 0 => return i,
            TokenKind::RParen => depth -= 1,
            TokenKind::Semicolon if depth == 0 => return i,
            TokenKind::Keyword(
                Keyword::Group
                | Keyword::Order
                | Keyword::Limit
                | Keyword::Offset
                | Keyword::Slimit
                | Keyword::Soffset,
            ) if depth == 0 => return i,
            TokenKind::Ident if depth == 0 && is_tz_clause(tokens, i) => return i,
            _ => {}
        }
    }
    tokens.len()
}

/// `tz(...)` clause; a field or tag named `tz` is not followed by `(`
fn is_tz_clause(tokens: &[QueryToken], i: usize) -> bool {
    tokens[i].text.eq_ignore_ascii_case("tz")
        && tokens[i + 1..]
            .iter()
            .find(|t| !t.is_trivia())
            .map_or(false, |t| t.kind == TokenKind::LParen)
}

fn has_top_level_or(tokens: &[QueryToken]) -> bool {
    let mut depth = 0i32;
    for token in tokens {
        match token.kind {
            TokenKind::LParen => depth += 1,
            TokenKind::RParen => depth -= 1,
            TokenKind::Keyword(Keyword::Or) if depth == 0 => return true,
            _ => {}
        }
    }
    false
}

/// Wrap the significant span in parentheses, keeping surrounding trivia outside
fn parenthesize(tokens: &[QueryToken]) -> Vec<QueryToken> {
    let first = tokens.iter().position(|t| !t.is_trivia());
    let last = tokens.iter().rposition(|t| !t.is_trivia());
    let (first, last) = match (first, last) {
        (Some(first), Some(last)) => (first, last),
        _ => return tokens.to_vec(),
    };

    let mut out = Vec::with_capacity(tokens.len() + 2);
    out.extend_from_slice(&tokens[..first]);
    out.push(QueryToken::new(TokenKind::LParen, "(", 0));
    out.extend_from_slice(&tokens[first..=last]);
    out.push(QueryToken::new(TokenKind::RParen, ")", 0));
    out.extend_from_slice(&tokens[last + 1..]);
    out
}

fn significant(tokens: &[QueryToken]) -> Vec<&QueryToken> {
    tokens.iter().filter(|t| !t.is_trivia()).collect()
}

fn same_text(a: &QueryToken, b: &QueryToken) -> bool {
    a.kind == b.kind && a.text.eq_ignore_ascii_case(&b.text)
}

fn starts_with_sequence(tokens: &[QueryToken], needle: &[QueryToken]) -> bool {
    let haystack = significant(tokens);
    let needle = significant(needle);
    haystack.len() >= needle.len() && haystack.iter().zip(&needle).all(|(a, b)| same_text(a, b))
}

fn contains_sequence(tokens: &[QueryToken], needle: &[QueryToken]) -> bool {
    let haystack = significant(tokens);
    let needle = significant(needle);
    if needle.is_empty() {
        return false;
    }
    haystack
        .windows(needle.len())
        .any(|window| window.iter().zip(&needle).all(|(a, b)| same_text(a, b)))
}
