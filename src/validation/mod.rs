/*!
 * Statement safety validation.
 *
 * This module decides, before anything reaches the engine, how risky a SQL
 * submission is:
 * - `lexer`: literal- and comment-aware tokenizer
 * - `safety`: structural rules producing a [`SafetyVerdict`]
 *
 * The validator is pure and is applied to every statement regardless of
 * whether a user typed it or the translator produced it.
 */

pub mod lexer;
pub mod safety;

// Re-export main types
pub use safety::{classify, RiskLevel, SafetyVerdict, StatementKind};
