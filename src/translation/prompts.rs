/*!
 * Prompt construction for natural-language to SQL translation.
 *
 * The system prompt embeds the schema snapshot of the bound database so the
 * model only ever sees the tables and columns that exist at submission time.
 */

use crate::database::SchemaSnapshot;

/// Fixed instructions that follow the schema listing
pub const SQL_GENERATOR_RULES: &str = r#"Rules:
1. Generate only valid SQLite syntax
2. Use proper table and column names from the schema
3. Include appropriate WHERE clauses for filtering
4. Use LIMIT for large result sets
5. Produce exactly one statement
6. If the request is unclear, generate the most reasonable interpretation

Answer with the SQL query in a ```sql fenced block. You may add a single line
starting with "Explanation:" after the block."#;

/// Builds the system prompt for a translation request
#[derive(Debug, Clone, Default)]
pub struct SqlPromptBuilder {
    /// Additional instructions appended after the rules
    extra_instructions: String,
}

impl SqlPromptBuilder {
    pub fn new(extra_instructions: impl Into<String>) -> Self {
        Self {
            extra_instructions: extra_instructions.into(),
        }
    }

    /// Render the schema as an indented listing, one block per table
    pub fn format_schema(schema: &SchemaSnapshot) -> String {
        let mut lines = Vec::new();

        for table in &schema.tables {
            lines.push(format!("Table: {}", table.name));
            for column in &table.columns {
                let data_type = if column.data_type.is_empty() { "ANY" } else { &column.data_type };
                let mut column_def = format!("  - {} ({})", column.name, data_type);
                if column.primary_key {
                    column_def.push_str(" [PRIMARY KEY]");
                }
                if column.not_null {
                    column_def.push_str(" [NOT NULL]");
                }
                lines.push(column_def);
            }
            lines.push(format!("  Rows: {}", table.row_count));
            lines.push(String::new());
        }

        lines.join("\n")
    }

    /// Build the full system prompt
    pub fn system_prompt(&self, schema: &SchemaSnapshot) -> String {
        let mut prompt = format!(
            "You are an expert SQL query generator. Convert natural language requests to SQLite queries.\n\n\
             Database Schema:\n{}\n{}",
            Self::format_schema(schema),
            SQL_GENERATOR_RULES
        );

        let extra = self.extra_instructions.trim();
        if !extra.is_empty() {
            prompt.push_str("\n\n");
            prompt.push_str(extra);
        }

        prompt
    }
}
