//! Command Handlers
//!
//! Handler functions for CLI commands. Every command except `config` opens
//! the local engine on the configured data directory.

use std::sync::Arc;
use tracing::warn;

use jctc_core::{RetentionError, SystemClock};
use jctc_storage::{
    ArchiveFilter, EntitySource, InMemoryEntitySource, PassOptions, RequesterContext,
    RetentionConfig, RetentionEngine, RoleAuthorizer,
};

use crate::commands::{
    archive::{RestoreArgs, SearchArgs},
    run::RunArgs,
    Cli, Commands, OutputFormat,
};
use crate::error::{CliError, CliResult};
use crate::fixture::Fixture;
use crate::{holds, output};

/// Run the CLI with parsed arguments
pub async fn run(cli: Cli, mut config: RetentionConfig) -> CliResult<()> {
    if let Some(dir) = &cli.data_dir {
        config.storage.data_dir = dir.clone();
    }

    if let Commands::Config = cli.command {
        return handle_config(&config, cli.format);
    }
    ensure_valid(&config)?;

    match cli.command {
        Commands::Run(args) => handle_run(config, args, cli.format).await,
        Commands::Search(args) => handle_search(config, args, cli.format).await,
        Commands::Verify { archive_id } => handle_verify(config, &archive_id, cli.format).await,
        Commands::Restore(args) => handle_restore(config, args, cli.format).await,
        Commands::Config => handle_config(&config, cli.format),
    }
}

fn ensure_valid(config: &RetentionConfig) -> CliResult<()> {
    let issues = config.validate();
    if issues.is_empty() {
        return Ok(());
    }
    let message = issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ");
    Err(CliError::config(message))
}

async fn open_engine(config: RetentionConfig, source: Arc<dyn EntitySource>) -> CliResult<RetentionEngine> {
    let (engine, replay) = RetentionEngine::open_local(
        config,
        source,
        Arc::new(RoleAuthorizer::default()),
        Arc::new(SystemClock),
    )
    .await?;
    if replay.skipped_lines > 0 {
        warn!(skipped = replay.skipped_lines, "Archive journal had unreadable lines");
    }
    Ok(engine)
}

/// Open the engine for archive-only commands; no live entities are needed
async fn open_archive(config: RetentionConfig) -> CliResult<RetentionEngine> {
    open_engine(config, Arc::new(InMemoryEntitySource::new())).await
}

/// Handle `jctc run`
async fn handle_run(config: RetentionConfig, args: RunArgs, format: OutputFormat) -> CliResult<()> {
    let fixture = Fixture::load(&args.fixture).await?;
    let hold_file = holds::snapshot_path(&config.storage);
    let engine = open_engine(config, Arc::new(fixture.source())).await?;
    holds::load(&engine, &hold_file).await?;
    fixture.install(&engine).await?;
    holds::save(&engine, &hold_file).await?;

    let options = PassOptions {
        policy_ids: args.policy_selection(),
        dry_run: args.dry_run,
    };
    let report = engine.scheduler.run_pass(options).await?;
    output::print_report(&report, format);

    if report.counts.failed > 0 {
        return Err(CliError::PassFailed {
            failed: report.counts.failed,
        });
    }
    Ok(())
}

/// Handle `jctc search`
async fn handle_search(config: RetentionConfig, args: SearchArgs, format: OutputFormat) -> CliResult<()> {
    if let (Some(from), Some(to)) = (args.from, args.to) {
        if from >= to {
            return Err(CliError::invalid_arg("--from must be before --to"));
        }
    }

    let mut filter = ArchiveFilter::default().archived_between(args.from, args.to);
    if let Some(entity_type) = args.entity_type {
        filter = filter.entity_type(entity_type);
    }
    if let Some(entity_id) = &args.entity_id {
        filter = filter.entity_id(entity_id);
    }
    if let Some(case_id) = &args.case_id {
        filter = filter.case_id(case_id);
    }

    let engine = open_archive(config).await?;
    let page = engine
        .store
        .search(&filter, args.cursor.as_deref(), args.limit)
        .await
        .map_err(|e| match e {
            RetentionError::Validation(msg) => CliError::invalid_arg(msg),
            other => other.into(),
        })?;
    output::print_search(&page, format);
    Ok(())
}

/// Handle `jctc verify`
async fn handle_verify(config: RetentionConfig, archive_id: &str, format: OutputFormat) -> CliResult<()> {
    let engine = open_archive(config).await?;
    let valid = match engine.store.verify_integrity(archive_id).await {
        Ok(valid) => valid,
        Err(RetentionError::NotFound(_)) => return Err(CliError::not_found(archive_id)),
        Err(e) => return Err(e.into()),
    };
    let record = engine.store.record(archive_id).await?;
    output::print_verify(&record, valid, format);

    if !valid {
        return Err(CliError::IntegrityFailed {
            id: archive_id.to_string(),
        });
    }
    Ok(())
}

/// Handle `jctc restore`
///
/// Stages the bundle and reports the staging metadata. The plaintext stays
/// behind the restoration service, which enforces the staging expiry; a
/// one-shot process discards it on exit.
async fn handle_restore(config: RetentionConfig, args: RestoreArgs, format: OutputFormat) -> CliResult<()> {
    let hold_file = holds::snapshot_path(&config.storage);
    let engine = open_archive(config).await?;
    holds::load(&engine, &hold_file).await?;

    let requester = args
        .roles
        .iter()
        .fold(RequesterContext::new(&args.user, &args.reason), |ctx, role| ctx.with_role(role));
    let staged = engine
        .restoration
        .request_restore(&args.archive_id, args.hours, &requester)
        .await?;

    output::print_staged(&staged, format);
    Ok(())
}

/// Handle `jctc config`
fn handle_config(config: &RetentionConfig, format: OutputFormat) -> CliResult<()> {
    output::print_config(config, format);
    for issue in config.validate() {
        eprintln!("Warning: {}", issue);
    }
    Ok(())
}
