//! InfluxQL tokenizer
//!
//! A lossless lexer: every byte of the input belongs to exactly one token,
//! whitespace and comments included, so concatenating the token texts gives
//! back the original query. Only the clause keywords the rewriter cares about
//! are classified; every other word is an identifier.
//!
//! Keywords are never recognized inside string literals, quoted identifiers,
//! regex literals or comments, since those are lexed as single tokens.
//!
//! `/` is ambiguous in InfluxQL: it divides, and it delimits regex literals.
//! A regex is lexed only where one can appear: after `=~` or `!~`, and as a
//! source in the `FROM` list.

use nom::{
    branch::alt,
    bytes::complete::{is_not, tag, take_until, take_while, take_while1},
    character::complete::{anychar, char, digit0, digit1, multispace1, not_line_ending, one_of},
    combinator::{map, not, opt, recognize, rest},
    multi::many0_count,
    sequence::{delimited, pair, tuple},
    IResult,
};

/// Clause keywords recognized by the rewriter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keyword {
    Where,
    Group,
    Order,
    By,
    Limit,
    Offset,
    Slimit,
    Soffset,
    And,
    Or,
}

impl Keyword {
    /// Case-insensitive keyword lookup
    pub fn from_ident(ident: &str) -> Option<Self> {
        let keyword = match ident.to_ascii_uppercase().as_str() {
            "WHERE" => Keyword::Where,
            "GROUP" => Keyword::Group,
            "ORDER" => Keyword::Order,
            "BY" => Keyword::By,
            "LIMIT" => Keyword::Limit,
            "OFFSET" => Keyword::Offset,
            "SLIMIT" => Keyword::Slimit,
            "SOFFSET" => Keyword::Soffset,
            "AND" => Keyword::And,
            "OR" => Keyword::Or,
            _ => return None,
        };
        Some(keyword)
    }
}

/// Token classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Whitespace,
    Comment,
    Keyword(Keyword),
    Ident,
    QuotedIdent,
    String,
    /// `/.../` regex literal
    Regex,
    /// Unterminated string or quoted identifier, runs to end of input
    BadString,
    Number,
    BoundParam,
    Operator,
    LParen,
    RParen,
    Comma,
    Semicolon,
    Dot,
    Other,
}

/// A token and its byte offset in the source query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryToken {
    pub kind: TokenKind,
    pub text: String,
    pub position: usize,
}

impl QueryToken {
    pub fn new(kind: TokenKind, text: impl Into<String>, position: usize) -> Self {
        Self {
            kind,
            text: text.into(),
            position,
        }
    }

    /// Whitespace or comment
    pub fn is_trivia(&self) -> bool {
        matches!(self.kind, TokenKind::Whitespace | TokenKind::Comment)
    }

    pub fn keyword(&self) -> Option<Keyword> {
        match self.kind {
            TokenKind::Keyword(k) => Some(k),
            _ => None,
        }
    }
}

/// Split a query into tokens. Never fails; unknown characters become
/// [`TokenKind::Other`] tokens.
pub fn tokenize(query: &str) -> Vec<QueryToken> {
    let mut tokens = Vec::new();
    let mut remaining = query;
    let mut in_from = false;
    let mut regex_allowed = false;

    while !remaining.is_empty() {
        let position = query.len() - remaining.len();
        let parsed = match regex_allowed.then(|| regex(remaining)) {
            Some(Ok((next, text))) => Ok((next, (TokenKind::Regex, text))),
            _ => token(remaining),
        };
        let (next, (kind, text)) = match parsed {
            Ok(parsed) => parsed,
            Err(_) => {
                // any char is a token of its own
                let width = remaining.chars().next().map(char::len_utf8).unwrap_or(1);
                (&remaining[width..], (TokenKind::Other, &remaining[..width]))
            }
        };
        if !matches!(kind, TokenKind::Whitespace | TokenKind::Comment) {
            let is_from = kind == TokenKind::Ident && text.eq_ignore_ascii_case("from");
            match kind {
                _ if is_from => in_from = true,
                TokenKind::Ident if text.eq_ignore_ascii_case("select") => in_from = false,
                TokenKind::Keyword(_)
                | TokenKind::LParen
                | TokenKind::RParen
                | TokenKind::Semicolon => in_from = false,
                _ => {}
            }
            regex_allowed = (kind == TokenKind::Operator && (text == "=~" || text == "!~"))
                || (in_from && (is_from || kind == TokenKind::Comma));
        }

        tokens.push(QueryToken::new(kind, text, position));
        remaining = next;
    }

    tokens
}

/// Concatenate token texts back into a query string
pub fn render(tokens: &[QueryToken]) -> String {
    tokens.iter().map(|t| t.text.as_str()).collect()
}

fn token(input: &str) -> IResult<&str, (TokenKind, &str)> {
    alt((
        map(multispace1, |s| (TokenKind::Whitespace, s)),
        map(line_comment, |s| (TokenKind::Comment, s)),
        map(block_comment, |s| (TokenKind::Comment, s)),
        map(double_quoted, |s| (TokenKind::QuotedIdent, s)),
        map(single_quoted, |s| (TokenKind::String, s)),
        map(unterminated_quote, |s| (TokenKind::BadString, s)),
        map(bound_param, |s| (TokenKind::BoundParam, s)),
        map(number, |s| (TokenKind::Number, s)),
        map(identifier, |s| match Keyword::from_ident(s) {
            Some(k) => (TokenKind::Keyword(k), s),
            None => (TokenKind::Ident, s),
        }),
        map(operator, |s| (TokenKind::Operator, s)),
        map(tag("("), |s| (TokenKind::LParen, s)),
        map(tag(")"), |s| (TokenKind::RParen, s)),
        map(tag(","), |s| (TokenKind::Comma, s)),
        map(tag(";"), |s| (TokenKind::Semicolon, s)),
        map(tag("."), |s| (TokenKind::Dot, s)),
    ))(input)
}

/// `-- comment` up to (not including) the line ending
fn line_comment(input: &str) -> IResult<&str, &str> {
    recognize(pair(tag("--"), not_line_ending))(input)
}

/// `/* comment */`; an unterminated one runs to end of input
fn block_comment(input: &str) -> IResult<&str, &str> {
    alt((
        recognize(tuple((tag("/*"), take_until("*/"), tag("*/")))),
        recognize(pair(tag("/*"), rest)),
    ))(input)
}

/// A quoted run with backslash escapes, quotes included
fn quoted_with(input: &str, quote: char) -> IResult<&str, &str> {
    let stop = if quote == '"' { "\\\"" } else { "\\'" };
    recognize(delimited(
        char(quote),
        many0_count(alt((is_not(stop), recognize(pair(char('\\'), anychar))))),
        char(quote),
    ))(input)
}

fn double_quoted(input: &str) -> IResult<&str, &str> {
    quoted_with(input, '"')
}

fn single_quoted(input: &str) -> IResult<&str, &str> {
    quoted_with(input, '\'')
}

fn unterminated_quote(input: &str) -> IResult<&str, &str> {
    recognize(pair(one_of("'\""), rest))(input)
}

/// `/regex/` with backslash escapes; never the start of a block comment
fn regex(input: &str) -> IResult<&str, &str> {
    recognize(tuple((
        not(tag("/*")),
        char('/'),
        many0_count(alt((is_not("\\/"), recognize(pair(char('\\'), anychar))))),
        char('/'),
    )))(input)
}

/// `$name`
fn bound_param(input: &str) -> IResult<&str, &str> {
    recognize(pair(char('$'), take_while1(is_ident_char)))(input)
}

/// Integers, decimals and duration literals (`10`, `1.5`, `30m`, `1h`)
fn number(input: &str) -> IResult<&str, &str> {
    recognize(tuple((
        digit1,
        opt(pair(char('.'), digit0)),
        take_while(is_ident_char),
    )))(input)
}

fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_alphabetic() || c == '_'),
        take_while(is_ident_char),
    ))(input)
}

fn operator(input: &str) -> IResult<&str, &str> {
    alt((
        tag(">="),
        tag("<="),
        tag("!="),
        tag("<>"),
        tag("=~"),
        tag("!~"),
        tag("::"),
        recognize(one_of("=<>+-*/%&|^!:")),
    ))(input)
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(query: &str) -> Vec<TokenKind> {
        tokenize(query)
            .into_iter()
            .filter(|t| !t.is_trivia())
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_lossless() {
        let queries = [
            "SELECT * FROM m",
            "select mean(\"value\") from \"cpu\" where host =~ /web.*/ group by time(1m) fill(none)",
            "SELECT a FROM b -- trailing comment\nWHERE x = 'it\\'s'",
            "SELECT /* where */ a FROM \"db\".\"rp\".m LIMIT 10;",
            "SELECT 'unterminated",
            "SELECT ünïcödé FROM m WHERE v >= 1.5e3 AND t < now() - 10m",
        ];
        for q in queries {
            assert_eq!(render(&tokenize(q)), q);
        }
    }

    #[test]
    fn test_positions_are_byte_offsets() {
        let q = "SELECT é FROM m";
        for token in tokenize(q) {
            assert_eq!(&q[token.position..token.position + token.text.len()], token.text);
        }
    }

    #[test]
    fn test_keywords_case_insensitive() {
        assert_eq!(
            kinds("select x from m where y group by z"),
            vec![
                TokenKind::Ident,
                TokenKind::Ident,
                TokenKind::Ident,
                TokenKind::Ident,
                TokenKind::Keyword(Keyword::Where),
                TokenKind::Ident,
                TokenKind::Keyword(Keyword::Group),
                TokenKind::Keyword(Keyword::By),
                TokenKind::Ident,
            ]
        );
    }

    #[test]
    fn test_keywords_inside_literals_are_not_keywords() {
        let tokens = tokenize("SELECT \"where\" FROM m WHERE msg = 'group by' -- order by\n");
        let keywords: Vec<Keyword> = tokens.iter().filter_map(|t| t.keyword()).collect();
        assert_eq!(keywords, vec![Keyword::Where]);

        let quoted = tokens.iter().find(|t| t.kind == TokenKind::QuotedIdent).unwrap();
        assert_eq!(quoted.text, "\"where\"");
        let string = tokens.iter().find(|t| t.kind == TokenKind::String).unwrap();
        assert_eq!(string.text, "'group by'");
    }

    #[test]
    fn test_operators_params_and_durations() {
        let tokens: Vec<QueryToken> = tokenize("time >= $tMin AND v != 10m")
            .into_iter()
            .filter(|t| !t.is_trivia())
            .collect();
        let texts: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["time", ">=", "$tMin", "AND", "v", "!=", "10m"]);
        assert_eq!(tokens[2].kind, TokenKind::BoundParam);
        assert_eq!(tokens[6].kind, TokenKind::Number);
    }

    #[test]
    fn test_regex_literals() {
        let query = "SELECT * FROM /order.*/, /cpu\\/x/ WHERE host =~ /limit/ AND v = a / b";
        let tokens = tokenize(query);
        let regexes: Vec<&str> = tokens
            .iter()
            .filter(|t| t.kind == TokenKind::Regex)
            .map(|t| t.text.as_str())
            .collect();
        assert_eq!(regexes, vec!["/order.*/", "/cpu\\/x/", "/limit/"]);

        let keywords: Vec<Keyword> = tokens.iter().filter_map(|t| t.keyword()).collect();
        assert_eq!(keywords, vec![Keyword::Where, Keyword::And]);
        assert!(tokens.iter().any(|t| t.kind == TokenKind::Operator && t.text == "/"));
    }

    #[test]
    fn test_comment_after_from_is_not_regex() {
        let tokens = tokenize("SELECT * FROM /* where */ m");
        assert_eq!(tokens.iter().filter(|t| t.kind == TokenKind::Comment).count(), 1);
        assert!(tokens.iter().all(|t| t.kind != TokenKind::Regex));
    }

    #[test]
    fn test_unterminated_string_is_bad_string() {
        let tokens = tokenize("SELECT 'oops WHERE");
        let last = tokens.last().unwrap();
        assert_eq!(last.kind, TokenKind::BadString);
        assert_eq!(last.text, "'oops WHERE");
    }
}
