/*!
 * Property-style tests for the safety classifier
 */

use sqlwai::{classify, RiskLevel, StatementKind};

const TABLES: &[&str] = &["customers", "\"order items\"", "[tracks]", "`albums`", "main.invoices"];

#[test]
fn test_classify_anyUnrestrictedMutation_shouldBlock() {
    for table in TABLES {
        for sql in [
            format!("DELETE FROM {}", table),
            format!("delete from {} -- WHERE id = 1", table),
            format!("UPDATE {} SET name = 'WHERE x'", table),
            format!("UPDATE {} SET total = (SELECT MAX(total) FROM other WHERE id = 1)", table),
        ] {
            let verdict = classify(&sql);
            assert_eq!(verdict.risk_level, RiskLevel::Block, "{} should block", sql);
            assert!(verdict.statement_kind.is_mutating());
            assert!(
                verdict.reasons.iter().any(|r| r == "unrestricted mutating statement"),
                "{} reasons: {:?}",
                sql,
                verdict.reasons
            );
        }
    }
}

#[test]
fn test_classify_separatorOutsideLiteral_shouldBlockWhateverFollows() {
    let followers = ["SELECT 1", "DROP TABLE customers", "  insert into t values (1)", "/* c */ PRAGMA x"];
    for follower in followers {
        let sql = format!("SELECT name FROM customers LIMIT 1; {}", follower);
        let verdict = classify(&sql);
        assert_eq!(verdict.risk_level, RiskLevel::Block, "{}", sql);
        assert!(verdict
            .reasons
            .contains(&"multiple statements in a single request".to_string()));
    }
}

#[test]
fn test_classify_separatorInsideQuotedText_shouldNotSplit() {
    for sql in [
        "SELECT name FROM customers WHERE name = 'a; DROP TABLE x' LIMIT 1",
        "SELECT name FROM customers WHERE name = 'it''s; fine' LIMIT 1",
        "SELECT \"weird;column\" FROM customers LIMIT 1",
        "SELECT name FROM customers LIMIT 1 /* ; DROP TABLE x */",
        "SELECT name FROM customers LIMIT 1 -- ; DROP TABLE x",
        "SELECT name FROM customers LIMIT 1;;  \n -- done",
    ] {
        let verdict = classify(sql);
        assert_eq!(verdict.risk_level, RiskLevel::Safe, "{} -> {:?}", sql, verdict.reasons);
        assert_eq!(verdict.statement_kind, StatementKind::Select);
    }
}

#[test]
fn test_classify_reasonsShouldAccumulate() {
    let verdict = classify("SELECT * FROM tracks; DELETE FROM tracks");
    assert_eq!(verdict.risk_level, RiskLevel::Block);
    assert_eq!(
        verdict.reasons,
        vec![
            "unbounded column projection".to_string(),
            "missing bound on result size".to_string(),
            "multiple statements in a single request".to_string(),
        ]
    );
}

#[test]
fn test_classify_shouldBeDeterministic() {
    let sql = "WITH recent AS (SELECT id FROM invoices LIMIT 5) SELECT * FROM recent";
    let first = classify(sql);
    for _ in 0..10 {
        assert_eq!(classify(sql), first);
    }
    assert_eq!(first.statement_kind, StatementKind::Select);
    assert_eq!(first.risk_level, RiskLevel::Warn);
}

#[test]
fn test_classify_unicodeSpaceBeforeKeyword_shouldNotCountAsKeyword() {
    for space in ["\u{00A0}", "\u{2028}", "\u{3000}"] {
        for sql in [
            format!("DELETE FROM customers AS c{}WHERE", space),
            format!("UPDATE customers AS x{}WHERE SET name = 'x'", space),
        ] {
            let verdict = classify(&sql);
            assert_eq!(verdict.risk_level, RiskLevel::Block, "{:?}", sql);
            assert!(verdict.reasons.contains(&"unrestricted mutating statement".to_string()));
        }

        let sql = format!("SELECT name FROM customers AS c{}LIMIT 5", space);
        let verdict = classify(&sql);
        assert_eq!(verdict.risk_level, RiskLevel::Warn, "{:?}", sql);
        assert!(verdict.reasons.contains(&"missing bound on result size".to_string()));
    }
}

#[test]
fn test_classify_asciiWhitespaceBeforeKeyword_shouldStillCount() {
    for space in [" ", "\t", "\n", "\x0C", "\r"] {
        let sql = format!("DELETE FROM customers AS c{}WHERE id = 1", space);
        assert_eq!(classify(&sql).risk_level, RiskLevel::Safe, "{:?}", sql);
    }
}
