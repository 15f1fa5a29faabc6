/*!
 * Related-query suggestions.
 *
 * Suggestions are natural-language prompts derived from the most recent
 * successful statement of the session and the bound database's schema. When
 * the session has no usable history, the largest table of the schema is
 * used as the focus instead.
 */

use crate::database::{SchemaSnapshot, TableSchema};
use crate::validation::lexer::{self, Token};

pub const MAX_SUGGESTIONS: usize = 5;

/// Columns offered for value exploration
const EXPLORED_COLUMNS: usize = 3;

/// What a previous statement was about
#[derive(Debug, Clone, PartialEq)]
struct QueryFocus<'a> {
    table: &'a TableSchema,
    has_filter: bool,
    is_count: bool,
}

/// Locate the first schema table referenced by `sql`
fn analyze<'a>(sql: &str, schema: &'a SchemaSnapshot) -> Option<QueryFocus<'a>> {
    let tokens = lexer::tokenize(sql);
    let mut table = None;

    for pair in tokens.windows(2) {
        let introduces_table = ["FROM", "JOIN", "INTO", "UPDATE"]
            .iter()
            .any(|k| pair[0].is_keyword(k));
        if !introduces_table {
            continue;
        }
        if let Token::Word(name) = &pair[1] {
            table = schema
                .tables
                .iter()
                .find(|t| t.name.eq_ignore_ascii_case(name));
            if table.is_some() {
                break;
            }
        }
    }

    let has_filter = tokens.iter().any(|t| t.is_keyword("WHERE"));
    let is_count = tokens.windows(2).any(|w| w[0].is_keyword("COUNT") && w[1].is_punct('('));

    table.map(|table| QueryFocus {
        table,
        has_filter,
        is_count,
    })
}

/// Build up to [`MAX_SUGGESTIONS`] prompts. `recent_sql` is newest first.
pub fn suggest(schema: &SchemaSnapshot, recent_sql: &[String]) -> Vec<String> {
    let focus = recent_sql
        .iter()
        .find_map(|sql| analyze(sql, schema))
        .or_else(|| {
            schema
                .tables
                .iter()
                .max_by_key(|t| t.row_count)
                .map(|table| QueryFocus {
                    table,
                    has_filter: false,
                    is_count: false,
                })
        });

    let Some(focus) = focus else {
        return Vec::new();
    };
    let name = &focus.table.name;

    let mut suggestions = vec![format!("How many records are in {}?", name)];
    for column in focus.table.columns.iter().take(EXPLORED_COLUMNS) {
        suggestions.push(format!("Show unique values in {} from {}", column.name, name));
    }
    if !focus.has_filter {
        suggestions.push(format!("Show {} with specific conditions", name));
    }
    if !focus.is_count {
        suggestions.push(format!("Get statistics for {}", name));
    }

    suggestions.truncate(MAX_SUGGESTIONS);
    suggestions
}
