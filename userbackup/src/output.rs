//! Terminal and file output for command results.
//!
//! Reports are rendered to strings first so the layout can be tested
//! without capturing stdout.

use serde_json::Value;
use std::fmt::Write as _;
use std::path::Path;
use userbackup_core::backup::FetchReport;
use userbackup_core::{BackupSummary, DeletionReport, Result, SkippedTable, UserBackupError};

fn render_skipped(out: &mut String, skipped: &[SkippedTable]) {
    if skipped.is_empty() {
        return;
    }
    let _ = writeln!(out, "Skipped tables: {}", skipped.len());
    for skip in skipped {
        let _ = writeln!(out, "  {}.{}: {}", skip.connection, skip.table, skip.reason);
    }
}

/// Human-readable result of a backup.
pub fn render_backup_summary(summary: &BackupSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Backup completed successfully");
    let _ = writeln!(out, "Output: {}", summary.path.display());
    let _ = writeln!(out, "Tables: {}", summary.tables);
    let _ = writeln!(out, "Rows: {}", summary.rows);
    let _ = writeln!(out, "Bytes: {}", summary.bytes);
    if let Some(chunks) = summary.chunks {
        let _ = writeln!(out, "Encrypted chunks: {}", chunks);
    }
    render_skipped(&mut out, &summary.skipped);
    out
}

/// Human-readable result of a deletion.
pub fn render_deletion_report(report: &DeletionReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Deletion completed successfully");
    let _ = writeln!(
        out,
        "Rows deleted: {} in {} batches",
        report.total_rows_deleted(),
        report.total_batches()
    );
    for table in &report.tables {
        let _ = writeln!(
            out,
            "  {}.{} by {}: {} rows",
            table.connection, table.table, table.column, table.rows_deleted
        );
    }
    render_skipped(&mut out, &report.skipped);
    out
}

/// Lists what a deletion would touch, without values.
pub fn render_deletion_plan(report: &FetchReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Dry run: {} tables would be affected", report.sources.len());
    for source in &report.sources {
        let _ = writeln!(
            out,
            "  {}.{} where {} in {} values",
            source.connection,
            source.table,
            source.column,
            source.values.len()
        );
    }
    render_skipped(&mut out, &report.skipped);
    out
}

/// Writes a decoded backup as pretty JSON to `path`, or stdout when `None`.
pub async fn write_document(document: &Value, path: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(document).map_err(|e| UserBackupError::Format {
        context: "Failed to render backup".to_string(),
        source: e,
    })?;

    match path {
        Some(path) => {
            tokio::fs::write(path, json)
                .await
                .map_err(|e| UserBackupError::io(format!("Failed to write to {}", path.display()), e))?;
            tracing::info!("Wrote backup to {}", path.display());
        }
        None => println!("{}", json),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;
    use userbackup_core::FilterValue;
    use userbackup_core::backup::TableSource;
    use userbackup_core::deletion::TableDeletion;

    fn skipped() -> Vec<SkippedTable> {
        vec![SkippedTable {
            connection: "main".to_string(),
            table: "settings".to_string(),
            reason: "no identity column".to_string(),
        }]
    }

    #[test]
    fn test_backup_summary_lists_chunks_and_skips() {
        let summary = BackupSummary {
            path: PathBuf::from("backups/1/2026-01-02/03-04-05.json.enc"),
            tables: 2,
            rows: 7,
            bytes: 512,
            chunks: Some(3),
            skipped: skipped(),
        };

        let text = render_backup_summary(&summary);
        assert!(text.contains("Output: backups/1/2026-01-02/03-04-05.json.enc"));
        assert!(text.contains("Rows: 7"));
        assert!(text.contains("Encrypted chunks: 3"));
        assert!(text.contains("  main.settings: no identity column"));
    }

    #[test]
    fn test_plain_summary_has_no_chunk_line() {
        let summary = BackupSummary {
            path: PathBuf::from("out.json"),
            tables: 0,
            rows: 0,
            bytes: 2,
            chunks: None,
            skipped: Vec::new(),
        };

        let text = render_backup_summary(&summary);
        assert!(!text.contains("Encrypted chunks"));
        assert!(!text.contains("Skipped"));
    }

    #[test]
    fn test_deletion_report_totals() {
        let report = DeletionReport {
            tables: vec![
                TableDeletion {
                    connection: "main".to_string(),
                    table: "users".to_string(),
                    column: "id".to_string(),
                    batches: 1,
                    rows_deleted: 1,
                },
                TableDeletion {
                    connection: "main".to_string(),
                    table: "ledger".to_string(),
                    column: "account_id".to_string(),
                    batches: 3,
                    rows_deleted: 1200,
                },
            ],
            skipped: skipped(),
        };

        let text = render_deletion_report(&report);
        assert!(text.contains("Rows deleted: 1201 in 4 batches"));
        assert!(text.contains("  main.ledger by account_id: 1200 rows"));
    }

    #[test]
    fn test_deletion_plan_omits_values() {
        let report = FetchReport {
            sources: vec![TableSource {
                connection: "main".to_string(),
                table: "sessions".to_string(),
                column: "user_id".to_string(),
                values: vec![FilterValue::Text("prod-1".to_string())],
            }],
            skipped: Vec::new(),
        };

        let text = render_deletion_plan(&report);
        assert!(text.contains("main.sessions where user_id in 1 values"));
        assert!(!text.contains("prod-1"));
    }

    #[tokio::test]
    async fn test_write_document_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("restored.json");
        let document = json!({"users": [{"id": 1, "name": "Alice"}]});

        write_document(&document, Some(&path)).await.unwrap();

        let written: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written, document);
    }
}
