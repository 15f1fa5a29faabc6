/*!
 * Structural safety classification of SQL statements.
 *
 * The classifier looks at statement shape only: the leading keyword, whether
 * a top-level `WHERE` or `LIMIT` is present, the projection list, and the
 * number of statements. It never executes anything and never consults the
 * translator, so the same verdict is produced for typed and generated SQL.
 */

use serde::{Deserialize, Serialize};

use super::lexer::{self, DepthToken, Token};

pub const REASON_UNRESTRICTED_MUTATION: &str = "unrestricted mutating statement";
pub const REASON_DESTRUCTIVE_SCHEMA: &str = "destructive schema operation";
pub const REASON_STAR_PROJECTION: &str = "unbounded column projection";
pub const REASON_MISSING_LIMIT: &str = "missing bound on result size";
pub const REASON_MULTIPLE_STATEMENTS: &str = "multiple statements in a single request";
pub const REASON_EMPTY_STATEMENT: &str = "empty statement";

/// Statement category derived from the leading keyword
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
    Ddl,
    Unknown,
}

impl StatementKind {
    /// Whether executing this kind of statement can change the database
    pub fn is_mutating(&self) -> bool {
        matches!(self, Self::Insert | Self::Update | Self::Delete | Self::Ddl)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Select => "select",
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Ddl => "ddl",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for StatementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Risk level, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Safe,
    Warn,
    Block,
}

/// Outcome of classifying one submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyVerdict {
    pub statement_kind: StatementKind,
    pub risk_level: RiskLevel,
    pub reasons: Vec<String>,
}

impl SafetyVerdict {
    fn new(statement_kind: StatementKind) -> Self {
        Self {
            statement_kind,
            risk_level: RiskLevel::Safe,
            reasons: Vec::new(),
        }
    }

    fn flag(&mut self, level: RiskLevel, reason: &str) {
        self.risk_level = self.risk_level.max(level);
        self.reasons.push(reason.to_string());
    }

    pub fn is_safe(&self) -> bool {
        self.risk_level == RiskLevel::Safe
    }

    pub fn is_blocked(&self) -> bool {
        self.risk_level == RiskLevel::Block
    }
}

/// Keywords that may precede a projection `*` at the top level
const PROJECTION_LEADERS: &[&str] = &["SELECT", "DISTINCT", "ALL"];

/// Classify a SQL submission
pub fn classify(sql: &str) -> SafetyVerdict {
    let statements = lexer::split_statements(lexer::tokenize(sql));

    let Some(first) = statements.first() else {
        let mut verdict = SafetyVerdict::new(StatementKind::Unknown);
        verdict.flag(RiskLevel::Block, REASON_EMPTY_STATEMENT);
        return verdict;
    };

    let tokens = lexer::with_depth(first.clone());
    let (kind, leading) = statement_kind(&tokens);
    let mut verdict = SafetyVerdict::new(kind);

    if matches!(kind, StatementKind::Delete | StatementKind::Update)
        && !has_top_level(&tokens, "WHERE")
    {
        verdict.flag(RiskLevel::Block, REASON_UNRESTRICTED_MUTATION);
    }

    if kind == StatementKind::Ddl && matches!(leading.as_str(), "DROP" | "ALTER" | "TRUNCATE") {
        verdict.flag(RiskLevel::Block, REASON_DESTRUCTIVE_SCHEMA);
    }

    if kind == StatementKind::Select && leading == "SELECT" {
        if has_star_projection(&tokens) {
            verdict.flag(RiskLevel::Warn, REASON_STAR_PROJECTION);
        }
        if !has_top_level(&tokens, "LIMIT") {
            verdict.flag(RiskLevel::Warn, REASON_MISSING_LIMIT);
        }
    }

    if statements.len() > 1 {
        verdict.flag(RiskLevel::Block, REASON_MULTIPLE_STATEMENTS);
    }

    verdict
}

/// Determine the statement kind and the keyword it was derived from
fn statement_kind(tokens: &[DepthToken]) -> (StatementKind, String) {
    let mut words = tokens.iter().filter(|t| t.depth == 0).filter_map(|t| match &t.token {
        Token::Word(w) => Some(w.as_str()),
        _ => None,
    });

    let mut leading = words.next().unwrap_or_default();

    // EXPLAIN [QUERY PLAN] <stmt> inspects the wrapped statement
    if leading == "EXPLAIN" {
        leading = words.next().unwrap_or_default();
        if leading == "QUERY" {
            words.next();
            leading = words.next().unwrap_or_default();
        }
    }

    // WITH ... AS (...) <stmt>: CTE bodies sit at depth 1, so the first
    // top-level DML keyword is the real statement
    if leading == "WITH" {
        leading = words
            .find(|w| matches!(*w, "SELECT" | "INSERT" | "REPLACE" | "UPDATE" | "DELETE" | "VALUES"))
            .unwrap_or_default();
    }

    let kind = match leading {
        "SELECT" | "VALUES" => StatementKind::Select,
        "INSERT" | "REPLACE" => StatementKind::Insert,
        "UPDATE" => StatementKind::Update,
        "DELETE" => StatementKind::Delete,
        "CREATE" | "DROP" | "ALTER" | "TRUNCATE" => StatementKind::Ddl,
        _ => StatementKind::Unknown,
    };

    (kind, leading.to_string())
}

fn has_top_level(tokens: &[DepthToken], keyword: &str) -> bool {
    tokens
        .iter()
        .any(|t| t.depth == 0 && t.token.is_keyword(keyword))
}

/// A `*` directly after SELECT/DISTINCT/ALL, a comma, or `table.` in the
/// top-level projection list, before FROM
fn has_star_projection(tokens: &[DepthToken]) -> bool {
    let mut in_projection = false;
    let mut previous: Option<&Token> = None;

    for t in tokens {
        if t.depth == 0 {
            if t.token.is_keyword("SELECT") {
                in_projection = true;
            } else if t.token.is_keyword("FROM") {
                in_projection = false;
            } else if in_projection && t.token.is_punct('*') {
                let leads_projection = match previous {
                    Some(Token::Word(w)) => PROJECTION_LEADERS.contains(&w.as_str()),
                    Some(Token::Punct(',')) | Some(Token::Punct('.')) => true,
                    _ => false,
                };
                if leads_projection {
                    return true;
                }
            }
        }
        previous = Some(&t.token);
    }

    false
}
