//! Statement guard for the run_query tool.
//!
//! Static, pre-execution checks that keep agent-generated SQL read-only,
//! single-statement and bounded. The policy is an ordered list of
//! [`GuardRule`]s evaluated over the [lexer](crate::tools::lexer) output; the
//! first rule that fails decides the rejection kind. A statement that passes
//! every rule gets a row limit: an explicit top-level `LIMIT`/`FETCH FIRST`
//! is preserved, otherwise `LIMIT <default>` is appended.

use crate::error::{ErrorKind, GateError, GateResult};
use crate::models::{
    AppliedLimit, DEFAULT_ROW_LIMIT, DatabaseType, GuardedStatement, MAX_ROW_LIMIT, QueryLimit,
    SqlParams, SqlStatement, StatementKind,
};
use crate::tools::lexer::{self, SqlToken, TokenStream, TokenTag};
use tracing::{debug, info};

/// Keywords that mark a statement as mutating or schema-changing. Matched as
/// bare words at any nesting depth, so data-modifying CTEs and `SELECT ...
/// INTO` are caught too.
pub const FORBIDDEN_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "TRUNCATE", "GRANT", "REVOKE", "CREATE", "INTO",
];

/// Keywords a permitted statement may start with.
pub const LEADING_KEYWORDS: &[&str] = &["SELECT", "WITH"];

const FRAGMENT_CHARS: usize = 60;

/// Row-limit policy enforced by the guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardPolicy {
    /// Limit appended when the statement has none
    pub default_limit: u32,
    /// Largest LIMIT accepted, explicit or requested
    pub max_limit: u32,
}

impl Default for GuardPolicy {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_ROW_LIMIT,
            max_limit: MAX_ROW_LIMIT,
        }
    }
}

impl GuardPolicy {
    pub fn default_query_limit(&self) -> QueryLimit {
        QueryLimit::new(self.default_limit.min(self.max_limit), self.max_limit)
            .unwrap_or_default()
    }
}

/// A failed rule check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub message: String,
    pub fragment: Option<String>,
}

impl Violation {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fragment: None,
        }
    }

    fn at(mut self, stream: &TokenStream<'_>, token: &SqlToken) -> Self {
        self.fragment = Some(stream.fragment_from(token, FRAGMENT_CHARS));
        self
    }
}

/// Everything a rule may look at.
pub struct Inspection<'a> {
    pub stream: &'a TokenStream<'a>,
    pub kind: StatementKind,
    pub policy: &'a GuardPolicy,
}

/// One entry of the guard policy: a named predicate and the rejection kind
/// it produces.
pub struct GuardRule {
    pub name: &'static str,
    pub kind: ErrorKind,
    pub check: fn(&Inspection<'_>) -> Option<Violation>,
}

/// The guard policy, in evaluation order.
pub const RULES: &[GuardRule] = &[
    GuardRule {
        name: "non_empty",
        kind: ErrorKind::DisallowedStatementKind,
        check: rule_non_empty,
    },
    GuardRule {
        name: "select_only",
        kind: ErrorKind::DisallowedStatementKind,
        check: rule_select_only,
    },
    GuardRule {
        name: "single_statement",
        kind: ErrorKind::MultiStatementRejected,
        check: rule_single_statement,
    },
    GuardRule {
        name: "no_mutating_keywords",
        kind: ErrorKind::DisallowedStatementKind,
        check: rule_no_mutating_keywords,
    },
    GuardRule {
        name: "bounded_limit",
        kind: ErrorKind::LimitExceeded,
        check: rule_bounded_limit,
    },
];

fn rule_non_empty(ins: &Inspection<'_>) -> Option<Violation> {
    ins.stream
        .is_empty()
        .then(|| Violation::new("SQL statement is empty"))
}

fn rule_select_only(ins: &Inspection<'_>) -> Option<Violation> {
    if ins.kind == StatementKind::Select {
        return None;
    }
    let first = ins.stream.first()?;
    Some(
        Violation::new(format!(
            "only SELECT statements are permitted, found '{}'",
            first.text.to_uppercase()
        ))
        .at(ins.stream, first),
    )
}

fn rule_single_statement(ins: &Inspection<'_>) -> Option<Violation> {
    let tokens = ins.stream.tokens();
    tokens
        .iter()
        .enumerate()
        .find(|(idx, t)| t.tag == TokenTag::Separator && *idx + 1 < tokens.len())
        .map(|(_, sep)| {
            Violation::new("multiple statements are not permitted").at(ins.stream, sep)
        })
}

fn rule_no_mutating_keywords(ins: &Inspection<'_>) -> Option<Violation> {
    ins.stream
        .tokens()
        .iter()
        .find(|t| FORBIDDEN_KEYWORDS.iter().any(|kw| t.is_keyword(kw)))
        .map(|t| {
            Violation::new(format!(
                "statement contains the mutating keyword '{}'",
                t.text.to_uppercase()
            ))
            .at(ins.stream, t)
        })
}

fn rule_bounded_limit(ins: &Inspection<'_>) -> Option<Violation> {
    match explicit_limit(ins.stream) {
        Ok(Some(rows)) if rows > u64::from(ins.policy.max_limit) => {
            let token = last_limit_clause(ins.stream)?;
            Some(
                Violation::new(format!(
                    "LIMIT {} exceeds the configured maximum of {}",
                    rows, ins.policy.max_limit
                ))
                .at(ins.stream, token),
            )
        }
        Ok(_) => None,
        Err(violation) => Some(violation),
    }
}

/// Derive the statement kind from its first significant token.
pub fn classify(stream: &TokenStream<'_>) -> StatementKind {
    match stream.first() {
        Some(first) if LEADING_KEYWORDS.iter().any(|kw| first.is_keyword(kw)) => {
            StatementKind::Select
        }
        _ => StatementKind::Other,
    }
}

fn is_limit_clause(token: &SqlToken) -> bool {
    token.is_top_level() && (token.is_keyword("LIMIT") || token.is_keyword("FETCH"))
}

fn last_limit_clause<'s>(stream: &'s TokenStream<'_>) -> Option<&'s SqlToken> {
    stream.tokens().iter().rev().find(|t| is_limit_clause(t))
}

/// Row count of the last top-level `LIMIT n`, `LIMIT offset, n` or
/// `FETCH {FIRST|NEXT} [n] {ROW|ROWS}` clause, if any. Counts too large for
/// u64 saturate. Clauses that are not integer literals are violations.
pub fn explicit_limit(stream: &TokenStream<'_>) -> Result<Option<u64>, Violation> {
    let tokens = stream.tokens();
    let mut found = None;

    for (idx, token) in tokens.iter().enumerate() {
        if !is_limit_clause(token) {
            continue;
        }
        let rows = if token.is_keyword("LIMIT") {
            match numeric_literal(tokens, idx + 1) {
                Some((first, after)) => {
                    match (tokens.get(after), numeric_literal(tokens, after + 1)) {
                        (Some(comma), Some((count, _))) if comma.tag == TokenTag::Comma => {
                            parse_count(stream, &tokens[after + 1], &count)?
                        }
                        _ => parse_count(stream, &tokens[idx + 1], &first)?,
                    }
                }
                None if tokens.get(idx + 1).is_some_and(|n| n.is_keyword("ALL")) => {
                    return Err(Violation::new(
                        "LIMIT ALL is unbounded; use an integer LIMIT",
                    )
                    .at(stream, token));
                }
                None => {
                    return Err(Violation::new("LIMIT must be an integer literal")
                        .at(stream, token));
                }
            }
        } else {
            let first = tokens
                .get(idx + 1)
                .filter(|t| t.is_keyword("FIRST") || t.is_keyword("NEXT"));
            match (first, numeric_literal(tokens, idx + 2), tokens.get(idx + 2)) {
                (Some(_), Some((count, _)), _) => parse_count(stream, &tokens[idx + 2], &count)?,
                (Some(_), None, Some(unit))
                    if unit.is_keyword("ROW") || unit.is_keyword("ROWS") =>
                {
                    1
                }
                _ => {
                    return Err(Violation::new("FETCH FIRST must use an integer literal")
                        .at(stream, token));
                }
            }
        };
        found = Some(rows);
    }

    Ok(found)
}

/// Text of the number starting at `idx`, joined with any word or number
/// tokens written flush against it, plus the index just past them. The
/// SQLite tokenizer splits `2_000` in two; the backend reads one literal.
fn numeric_literal(tokens: &[SqlToken], idx: usize) -> Option<(String, usize)> {
    let head = tokens.get(idx).filter(|t| t.tag == TokenTag::Number)?;
    let mut text = head.text.clone();
    let mut end = head.span.end;
    let mut next = idx + 1;
    while let Some(t) = tokens.get(next) {
        if t.span.start != end || !matches!(t.tag, TokenTag::Number | TokenTag::Word) {
            break;
        }
        text.push_str(&t.text);
        end = t.span.end;
        next += 1;
    }
    Some((text, next))
}

fn parse_count(stream: &TokenStream<'_>, token: &SqlToken, text: &str) -> Result<u64, Violation> {
    let digits = text.replace('_', "");
    if !digits.chars().all(|c| c.is_ascii_digit()) || digits.is_empty() {
        return Err(Violation::new("LIMIT must be a non-negative integer").at(stream, token));
    }
    Ok(digits.parse::<u64>().unwrap_or(u64::MAX))
}

/// Produce the executable text and the limit it carries.
///
/// Trailing comments and a single trailing terminator are cut so the
/// statement can be appended to and wrapped. An explicit limit is kept as
/// written; otherwise `LIMIT <default>` is appended.
pub fn apply_limit(
    stream: &TokenStream<'_>,
    default: QueryLimit,
) -> Result<(String, AppliedLimit), Violation> {
    let body = &stream.source()[..stream.body_end()];
    match explicit_limit(stream)? {
        Some(rows) => Ok((
            body.to_string(),
            AppliedLimit {
                rows: u32::try_from(rows).unwrap_or(u32::MAX),
                injected: false,
            },
        )),
        None => Ok((
            format!("{} LIMIT {}", body, default.get()),
            AppliedLimit {
                rows: default.get(),
                injected: true,
            },
        )),
    }
}

/// Statement guard bound to a backend dialect and a limit policy.
#[derive(Debug, Clone)]
pub struct StatementGuard {
    db_type: DatabaseType,
    policy: GuardPolicy,
}

impl StatementGuard {
    pub fn new(db_type: DatabaseType, policy: GuardPolicy) -> Self {
        Self { db_type, policy }
    }

    pub fn policy(&self) -> &GuardPolicy {
        &self.policy
    }

    /// Validate a caller-requested row cap against the policy maximum.
    pub fn query_limit(&self, requested: Option<u32>) -> GateResult<QueryLimit> {
        match requested {
            Some(rows) => QueryLimit::new(rows, self.policy.max_limit),
            None => Ok(self.policy.default_query_limit()),
        }
    }

    /// Guard with the policy's default limit.
    pub fn guard(&self, sql: &str, params: SqlParams) -> GateResult<GuardedStatement> {
        self.guard_with_limit(sql, params, self.policy.default_query_limit())
    }

    /// Run every rule over `sql`; on success return the executable statement
    /// with `default` appended as LIMIT when the text carries none.
    pub fn guard_with_limit(
        &self,
        sql: &str,
        params: SqlParams,
        default: QueryLimit,
    ) -> GateResult<GuardedStatement> {
        let stream = lexer::tokenize(sql, self.db_type)
            .map_err(|e| GateError::disallowed(e.to_string()))?;
        let kind = classify(&stream);

        let inspection = Inspection {
            stream: &stream,
            kind,
            policy: &self.policy,
        };
        for rule in RULES {
            if let Some(violation) = (rule.check)(&inspection) {
                info!(rule = rule.name, kind = %rule.kind, "Statement rejected by guard");
                return Err(into_error(rule.kind, violation));
            }
        }

        let (executable, applied) = apply_limit(&stream, default)
            .map_err(|v| into_error(ErrorKind::LimitExceeded, v))?;
        debug!(
            limit = applied.rows,
            injected = applied.injected,
            "Statement passed guard"
        );

        Ok(GuardedStatement::new(
            SqlStatement::new(sql, params, kind),
            executable,
            applied,
        ))
    }
}

fn into_error(kind: ErrorKind, violation: Violation) -> GateError {
    let err = GateError::new(kind, violation.message);
    match violation.fragment {
        Some(fragment) => err.with_fragment(fragment),
        None => err,
    }
}
