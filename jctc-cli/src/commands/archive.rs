//! Archive Commands
//!
//! Arguments for searching and restoring archives.

use chrono::{DateTime, NaiveDate, Utc};
use clap::Args;
use jctc_core::EntityType;
use jctc_storage::archive::DEFAULT_PAGE_SIZE;

/// Arguments for `jctc search`
#[derive(Args, Debug)]
pub struct SearchArgs {
    /// Source entity type (case, evidence, party, task, user, audit_log, access_log)
    #[arg(short = 't', long)]
    pub entity_type: Option<EntityType>,

    /// Source entity id
    #[arg(short = 'i', long)]
    pub entity_id: Option<String>,

    /// Owning case id
    #[arg(long)]
    pub case_id: Option<String>,

    /// Archived at or after (RFC 3339 or YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    pub from: Option<DateTime<Utc>>,

    /// Archived before (RFC 3339 or YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    pub to: Option<DateTime<Utc>>,

    /// Page size
    #[arg(short, long, default_value_t = DEFAULT_PAGE_SIZE)]
    pub limit: usize,

    /// Continue after this cursor
    #[arg(long)]
    pub cursor: Option<String>,
}

/// Arguments for `jctc restore`
#[derive(Args, Debug)]
pub struct RestoreArgs {
    /// Archive identifier
    pub archive_id: String,

    /// Staging duration in hours
    #[arg(long)]
    pub hours: u32,

    /// Business justification
    #[arg(long)]
    pub reason: String,

    /// Requesting user (env: JCTC_USER)
    #[arg(long, env = "JCTC_USER", default_value = "cli")]
    pub user: String,

    /// Requester roles (repeatable, at least one)
    #[arg(long = "role", required = true)]
    pub roles: Vec<String>,
}

/// Parse an RFC 3339 timestamp or a calendar date (midnight UTC)
pub fn parse_date(s: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| format!("expected RFC 3339 or YYYY-MM-DD, got '{}'", s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use clap::Parser;

    #[derive(Parser)]
    struct SearchCli {
        #[command(flatten)]
        args: SearchArgs,
    }

    #[derive(Parser)]
    struct RestoreCli {
        #[command(flatten)]
        args: RestoreArgs,
    }

    #[test]
    fn test_parse_date() {
        assert_eq!(
            parse_date("2024-03-01").unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(
            parse_date("2024-03-01T12:30:00+02:00").unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 1, 10, 30, 0).unwrap()
        );
        assert!(parse_date("March 1st").is_err());
    }

    #[test]
    fn test_search_args() {
        let cli = SearchCli::try_parse_from([
            "test", "--entity-type", "evidence", "--from", "2024-01-01", "--limit", "25",
        ])
        .unwrap();
        assert_eq!(cli.args.entity_type, Some(EntityType::Evidence));
        assert_eq!(cli.args.limit, 25);
        assert!(cli.args.to.is_none());

        assert!(SearchCli::try_parse_from(["test", "--entity-type", "invoice"]).is_err());
    }

    #[test]
    fn test_restore_args() {
        let cli = RestoreCli::try_parse_from([
            "test", "arc-1", "--hours", "24", "--reason", "Appeal review", "--user", "officer-1",
            "--role", "clerk", "--role", "records_officer",
        ])
        .unwrap();
        assert_eq!(cli.args.hours, 24);
        assert_eq!(cli.args.roles, vec!["clerk".to_string(), "records_officer".to_string()]);
        assert!(RestoreCli::try_parse_from(["test", "arc-1", "--hours", "24"]).is_err());

        // No implicit role
        assert!(RestoreCli::try_parse_from([
            "test", "arc-1", "--hours", "24", "--reason", "Appeal review",
        ])
        .is_err());
    }
}
