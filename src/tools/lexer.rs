//! Tokenizer-lite pass over candidate SQL.
//!
//! Wraps the [sqlparser](https://docs.rs/sqlparser/) tokenizer and reduces its
//! output to a small fixed set of [`TokenTag`]s, each carrying its byte span in
//! the original text and its parenthesis and bracket depths. Comments and whitespace are
//! dropped, and string literals and quoted identifiers are opaque, so nothing
//! inside them can look like a keyword or a statement separator.

use crate::models::DatabaseType;
use sqlparser::dialect::{Dialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::tokenizer::{Location, Token, Tokenizer};
use std::ops::Range;
use thiserror::Error;

/// Classification tag for a significant token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenTag {
    /// Keyword or bare identifier
    Word,
    /// "quoted", `quoted` or [quoted] identifier
    QuotedIdent,
    /// String literal of any flavour
    Literal,
    Number,
    /// `$1`, `?`, `?1` and similar
    Placeholder,
    /// `;`
    Separator,
    OpenParen,
    CloseParen,
    /// `[` outside a quoted identifier
    OpenBracket,
    CloseBracket,
    Comma,
    Colon,
    /// Any other operator or punctuation
    Symbol,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlToken {
    pub tag: TokenTag,
    /// Source text of the token
    pub text: String,
    /// Byte range in the source
    pub span: Range<usize>,
    /// Parenthesis nesting depth; parentheses carry the depth they open from
    pub depth: usize,
    /// Square-bracket nesting depth (array subscripts and slices), counted
    /// the same way
    pub bracket_depth: usize,
}

impl SqlToken {
    /// Case-insensitive keyword match on bare words.
    pub fn is_keyword(&self, keyword: &str) -> bool {
        self.tag == TokenTag::Word && self.text.eq_ignore_ascii_case(keyword)
    }

    pub fn is_top_level(&self) -> bool {
        self.depth == 0
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("could not tokenize SQL: {0}")]
pub struct LexError(pub String);

/// Tokenized statement plus the text it came from.
#[derive(Debug, Clone)]
pub struct TokenStream<'a> {
    source: &'a str,
    tokens: Vec<SqlToken>,
}

impl<'a> TokenStream<'a> {
    pub fn source(&self) -> &'a str {
        self.source
    }

    pub fn tokens(&self) -> &[SqlToken] {
        &self.tokens
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// First significant token, after leading comments and whitespace.
    pub fn first(&self) -> Option<&SqlToken> {
        self.tokens.first()
    }

    /// Byte offset just past the last significant token that is not a
    /// trailing separator. Everything after it is comments, whitespace or a
    /// single statement terminator.
    pub fn body_end(&self) -> usize {
        let mut tokens = self.tokens.iter().rev();
        match tokens.next() {
            Some(last) if last.tag == TokenTag::Separator => {
                tokens.next().map(|t| t.span.end).unwrap_or(0)
            }
            Some(last) => last.span.end,
            None => 0,
        }
    }

    /// Excerpt of the source starting at `token`, for error messages.
    pub fn fragment_from(&self, token: &SqlToken, max_chars: usize) -> String {
        let rest = self.source[token.span.start..].trim_end();
        let mut fragment: String = rest.chars().take(max_chars).collect();
        if rest.chars().count() > max_chars {
            fragment.push_str("...");
        }
        fragment
    }
}

fn dialect_for(db_type: DatabaseType) -> Box<dyn Dialect> {
    match db_type {
        DatabaseType::PostgreSQL => Box::new(PostgreSqlDialect {}),
        DatabaseType::SQLite => Box::new(SQLiteDialect {}),
    }
}

/// Tokenize `sql` using the dialect of `db_type`.
pub fn tokenize(sql: &str, db_type: DatabaseType) -> Result<TokenStream<'_>, LexError> {
    let dialect = dialect_for(db_type);
    let raw = Tokenizer::new(dialect.as_ref(), sql)
        .with_unescape(false)
        .tokenize_with_location()
        .map_err(|e| LexError(e.to_string()))?;

    let mut offsets = OffsetCursor::new(sql);
    let mut depth = 0usize;
    let mut brackets = 0usize;
    let mut tokens = Vec::with_capacity(raw.len());

    for item in raw {
        let Some(tag) = classify(&item.token) else {
            continue;
        };
        let start = offsets.offset_of(item.span.start);
        let end = offsets.offset_of(item.span.end).max(start);

        let token_depth = match tag {
            TokenTag::OpenParen => {
                depth += 1;
                depth - 1
            }
            TokenTag::CloseParen => {
                depth = depth.saturating_sub(1);
                depth
            }
            _ => depth,
        };
        let bracket_depth = match tag {
            TokenTag::OpenBracket => {
                brackets += 1;
                brackets - 1
            }
            TokenTag::CloseBracket => {
                brackets = brackets.saturating_sub(1);
                brackets
            }
            _ => brackets,
        };

        tokens.push(SqlToken {
            tag,
            text: sql[start..end].to_string(),
            span: start..end,
            depth: token_depth,
            bracket_depth,
        });
    }

    Ok(TokenStream {
        source: sql,
        tokens,
    })
}

fn classify(token: &Token) -> Option<TokenTag> {
    let tag = match token {
        Token::EOF | Token::Whitespace(_) => return None,
        Token::Word(word) if word.quote_style.is_some() => TokenTag::QuotedIdent,
        Token::Word(_) => TokenTag::Word,
        Token::Number(_, _) => TokenTag::Number,
        Token::SingleQuotedString(_)
        | Token::DoubleQuotedString(_)
        | Token::DollarQuotedString(_)
        | Token::NationalStringLiteral(_)
        | Token::EscapedStringLiteral(_)
        | Token::UnicodeStringLiteral(_)
        | Token::HexStringLiteral(_)
        | Token::SingleQuotedByteStringLiteral(_)
        | Token::DoubleQuotedByteStringLiteral(_) => TokenTag::Literal,
        Token::Placeholder(_) => TokenTag::Placeholder,
        Token::SemiColon => TokenTag::Separator,
        Token::LParen => TokenTag::OpenParen,
        Token::RParen => TokenTag::CloseParen,
        Token::LBracket => TokenTag::OpenBracket,
        Token::RBracket => TokenTag::CloseBracket,
        Token::Comma => TokenTag::Comma,
        Token::Colon => TokenTag::Colon,
        _ => TokenTag::Symbol,
    };
    Some(tag)
}

/// Converts tokenizer locations (1-based line, 1-based char column) into byte
/// offsets. Locations must be requested in non-decreasing order.
struct OffsetCursor<'a> {
    source: &'a str,
    line: u64,
    column: u64,
    byte: usize,
}

impl<'a> OffsetCursor<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            line: 1,
            column: 1,
            byte: 0,
        }
    }

    fn offset_of(&mut self, target: Location) -> usize {
        if target.line == 0 {
            return self.byte;
        }
        while (self.line, self.column) < (target.line, target.column) {
            let Some(ch) = self.source[self.byte..].chars().next() else {
                break;
            };
            self.byte += ch.len_utf8();
            if ch == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        self.byte
    }
}
