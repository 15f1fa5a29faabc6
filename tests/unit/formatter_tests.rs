/*!
 * Tests for result shaping: row limits, cell truncation and NULL rendering
 */

use anyhow::Result;
use sqlwai::database::CellValue;
use sqlwai::query::{QueryMode, ResultFormatter};

use crate::common::{self, mock_providers, CHINOOK};

#[tokio::test]
async fn test_rowLimit_truncationFlag_shouldMatchRowCount() -> Result<()> {
    // The fixture has 25 tracks
    for row_limit in [1, 5, 24, 25, 26, 100] {
        let mut config = common::test_config();
        config.query.row_limit = row_limit;
        let (_dir, controller) = common::loaded_controller(mock_providers::chinook_provider(), config)?;

        let result = controller
            .run_query(CHINOOK, QueryMode::RawSql, "SELECT name FROM tracks ORDER BY id LIMIT 1000", false)
            .await?;

        assert!(result.row_count <= row_limit, "limit {}", row_limit);
        assert_eq!(result.row_count, result.rows.len());
        assert_eq!(result.truncated, row_limit < 25, "limit {}", row_limit);
        if !result.truncated {
            assert_eq!(result.row_count, 25);
        }
    }
    Ok(())
}

#[test]
fn test_cells_shouldTruncateAndKeepNullDistinct() -> Result<()> {
    let mut config = common::test_config();
    config.query.max_cell_chars = 6;
    let (_dir, controller) = common::loaded_controller(mock_providers::chinook_provider(), config)?;

    let result = tokio_test::block_on(controller.run_query(
        CHINOOK,
        QueryMode::RawSql,
        "SELECT email, name FROM customers WHERE id IN (2, 5, 6) ORDER BY id LIMIT 3",
        false,
    ))?;

    assert_eq!(result.columns, vec!["email".to_string(), "name".to_string()]);
    // Niklas has no email, Bjørn has an empty one
    assert_eq!(result.rows[0][0], None);
    assert_eq!(result.rows[1][0], Some(String::new()));
    assert_eq!(result.rows[2][0], Some("luisg@…".to_string()));
    // Six characters, not six bytes
    assert_eq!(result.rows[1][1], Some("Bjørn …".to_string()));
    Ok(())
}

#[test]
fn test_formatCell_shouldRenderEachStorageClass() {
    let formatter = ResultFormatter::new(10);
    assert_eq!(formatter.format_cell(&CellValue::Null), None);
    assert_eq!(formatter.format_cell(&CellValue::Integer(-7)), Some("-7".to_string()));
    assert_eq!(formatter.format_cell(&CellValue::Real(0.1)), Some("0.1".to_string()));
    assert_eq!(formatter.format_cell(&CellValue::Blob(vec![0; 3])), Some("<blob 3 bytes>"[..10].to_string() + "…"));
    assert_eq!(formatter.format_cell(&CellValue::Text("short".to_string())), Some("short".to_string()));
}
