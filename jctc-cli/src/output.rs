//! Output Formatting
//!
//! Utilities for formatting CLI output in various formats.

use serde::Serialize;

use jctc_core::ArchivedRecord;
use jctc_storage::{PassReport, RetentionConfig, SearchPage, StagedRestoration};

use crate::commands::OutputFormat;

/// Print as JSON
pub fn print_json<T: Serialize>(data: &T) {
    match serde_json::to_string_pretty(data) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error formatting JSON: {}", e),
    }
}

/// Print a pass report
pub fn print_report(report: &PassReport, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(report),
        OutputFormat::Table => {
            let title = if report.dry_run {
                "Retention Pass (dry run)"
            } else {
                "Retention Pass"
            };
            println!("{}", title);
            println!("{}", "=".repeat(title.len()));
            print_row("Pass ID:", &report.pass_id);
            print_row("Entity types:", &report.entity_types.join(", "));
            print_row("Duration:", &format!("{}ms", report.duration_ms));
            if report.cancelled {
                print_row("Cancelled:", "yes");
            }
            println!();

            let c = &report.counts;
            print_row("Evaluated", &c.evaluated.to_string());
            print_row("Archived", &c.archived.to_string());
            print_row("Deleted", &c.deleted.to_string());
            print_row("Notified", &c.notified.to_string());
            print_row("Already notified", &c.already_notified.to_string());
            print_row("Hold conflicts", &c.legal_hold_conflicts.to_string());
            print_row("Manual action", &c.manual.to_string());
            print_row("Policy conflicts", &c.policy_conflicts.to_string());
            print_row("Already archived", &c.already_archived.to_string());
            print_row("Failed", &c.failed.to_string());
            print_row("Requeued", &c.requeued.to_string());

            if !report.decisions.is_empty() {
                println!();
                println!("{:<32} {:<8} {:<24} {}", "ENTITY", "ACTION", "REASON", "POLICY");
                print_separator();
                for d in &report.decisions {
                    println!(
                        "{:<32} {:<8} {:<24} {}",
                        d.entity_ref.to_string(),
                        format!("{:?}", d.action).to_uppercase(),
                        d.reason.code(),
                        d.policy_id.as_deref().unwrap_or("-")
                    );
                }
            }

            if !report.failures.is_empty() {
                println!();
                println!("Failures:");
                for f in &report.failures {
                    let requeued = if f.requeued { " (requeued)" } else { "" };
                    println!("  - {} {:?}: {}{}", f.entity_ref, f.kind, f.message, requeued);
                }
            }
            for e in &report.source_errors {
                eprintln!("Warning: {}", e);
            }
        }
    }
}

/// Print one page of search results
pub fn print_search(page: &SearchPage, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(page),
        OutputFormat::Table => {
            println!(
                "{:<36} {:<28} {:<12} {:<20} {:>10}",
                "ARCHIVE ID", "ENTITY", "STATUS", "ARCHIVED AT", "BYTES"
            );
            print_separator();
            for r in &page.records {
                println!(
                    "{:<36} {:<28} {:<12} {:<20} {:>10}",
                    r.id,
                    r.entity_ref().to_string(),
                    r.status.as_str(),
                    r.archived_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                    r.compressed_size
                );
            }
            println!();
            println!("{} record(s)", page.records.len());
            if let Some(cursor) = &page.next_cursor {
                println!("Next page: --cursor {}", cursor);
            }
        }
    }
}

#[derive(Serialize)]
struct VerifyOutput<'a> {
    archive_id: &'a str,
    valid: bool,
    record: &'a ArchivedRecord,
}

/// Print an integrity verification result
pub fn print_verify(record: &ArchivedRecord, valid: bool, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&VerifyOutput {
            archive_id: &record.id,
            valid,
            record,
        }),
        OutputFormat::Table => {
            println!("Verification Result");
            println!("===================");
            print_row("Status:", if valid { "VALID" } else { "CORRUPT" });
            print_row("Archive ID:", &record.id);
            print_row("Entity:", &record.entity_ref().to_string());
            print_row("Storage checksum:", &record.storage_checksum);
            print_row("Content checksum:", &record.sha256_checksum);
        }
    }
}

/// Print a staged restoration
pub fn print_staged(staged: &StagedRestoration, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(staged),
        OutputFormat::Table => {
            println!("Archive Restored");
            println!("================");
            print_row("Staging ID:", &staged.staging_id);
            print_row("Archive ID:", &staged.archive_id);
            print_row("Entity:", &staged.entity_ref.to_string());
            print_row("Dependents:", &staged.dependent_count.to_string());
            print_row("Requested by:", &staged.requested_by);
            print_row("Expires at:", &staged.expires_at.to_rfc3339());
        }
    }
}

/// Print the effective configuration
pub fn print_config(config: &RetentionConfig, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(config),
        OutputFormat::Table => {
            println!("Effective Configuration");
            println!("=======================");
            print_row("Data dir:", &config.storage.data_dir.display().to_string());
            print_row("Interval:", &format!("{}s", config.scheduler.interval_secs));
            print_row("Max concurrency:", &config.scheduler.max_concurrency.to_string());
            print_row("Queue capacity:", &config.scheduler.queue_capacity.to_string());
            print_row("Batch size:", &config.scheduler.batch_size.to_string());
            print_row("Max retries:", &config.scheduler.max_retries.to_string());
            print_row("Key retry limit:", &config.scheduler.key_retry_limit.to_string());
            print_row("Hold cache TTL:", &format!("{}s", config.scheduler.hold_cache_ttl_secs));
            print_row("Max restore:", &format!("{}h", config.restoration.max_duration_hours));
            print_row("Log filter:", &config.logging.directive());
        }
    }
}

/// Print a table row
pub fn print_row(key: &str, value: &str) {
    println!("{:<20} {}", key, value);
}

/// Print a separator line
pub fn print_separator() {
    println!("{}", "-".repeat(72));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_print_config_both_formats() {
        let config = RetentionConfig::default();
        print_config(&config, OutputFormat::Table);
        print_config(&config, OutputFormat::Json);
    }
}
