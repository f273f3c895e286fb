use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use log::{error, info, warn};

use orcid_sync::config::load_or_default;
use orcid_sync::db::{institution_repo, run_repo};
use orcid_sync::{
    init_logging, CancelToken, Database, ProfileSyncOptions, RebuildOptions, RecordKind,
    ReqwestTransport, Scheduler, SyncConfig, SyncError, SystemClock,
};

#[derive(Parser)]
#[command(name = "orcid-sync", version, about = "Institutional ORCID works and funding cache")]
struct Cli {
    /// Config file (defaults to $ORCID_SYNC_CONFIG or ~/.orcid-sync/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Rebuild works and/or funding caches
    Rebuild {
        /// ROR id to rebuild; repeatable. Defaults to every active institution.
        #[arg(long = "ror")]
        rors: Vec<String>,
        #[arg(long, value_enum, default_value_t = Target::Both)]
        target: Target,
        /// Worker count (defaults to scheduler.concurrency)
        #[arg(long)]
        concurrency: Option<usize>,
        /// Resolve researchers only; nothing is fetched or written
        #[arg(long)]
        dry_run: bool,
    },
    /// Refresh researcher names and affiliation-manager status for cached researchers
    SyncResearcherNames {
        /// ROR id to sync; repeatable. Defaults to every active institution.
        #[arg(long = "ror")]
        rors: Vec<String>,
        /// Worker count (defaults to scheduler.concurrency)
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Manage the institutions that are kept in sync
    Institutions {
        #[command(subcommand)]
        cmd: InstitutionsCmd,
    },
    /// Show recent cache runs
    Runs {
        #[arg(long)]
        ror: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
}

#[derive(Subcommand)]
enum InstitutionsCmd {
    Add {
        ror: String,
        #[arg(long, default_value = "")]
        name: String,
        /// API client id of the institution's affiliation manager
        #[arg(long)]
        am_client_id: Option<String>,
    },
    List,
    /// Stop syncing an institution; its cache is kept
    Disable { ror: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum Target {
    Works,
    Fundings,
    Both,
}

impl Target {
    fn kinds(self) -> Vec<RecordKind> {
        match self {
            Target::Works => vec![RecordKind::Work],
            Target::Fundings => vec![RecordKind::Funding],
            Target::Both => RecordKind::all().to_vec(),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.json_logs, "info") {
        eprintln!("{}", e);
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{}", e);
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode, SyncError> {
    let config = load_or_default(cli.config.as_deref())?;
    let db = open_database(&config)?;

    match cli.cmd {
        Command::Rebuild {
            rors,
            target,
            concurrency,
            dry_run,
        } => {
            let options = RebuildOptions {
                targets: rors,
                kinds: target.kinds(),
                concurrency: concurrency.unwrap_or(config.scheduler.concurrency),
                dry_run,
                cancel: interrupt_token(),
            };
            rebuild(&config, db, options).await
        }
        Command::SyncResearcherNames { rors, concurrency } => {
            let options = ProfileSyncOptions {
                targets: rors,
                concurrency: concurrency.unwrap_or(config.scheduler.concurrency),
                cancel: interrupt_token(),
            };
            sync_researcher_names(&config, db, options).await
        }
        Command::Institutions { cmd } => {
            match cmd {
                InstitutionsCmd::Add {
                    ror,
                    name,
                    am_client_id,
                } => {
                    let institution = institution_repo::upsert(&db, &ror, &name)?;
                    if let Some(am_client_id) = am_client_id {
                        institution_repo::set_am_client_id(&db, &institution.ror_id, Some(&am_client_id))?;
                    }
                    println!("{}\t{}", institution.ror_id, institution.name);
                }
                InstitutionsCmd::List => {
                    for institution in institution_repo::list_all(&db)? {
                        println!(
                            "{}\t{}\t{}\t{}\t{}",
                            institution.ror_id,
                            institution.name,
                            if institution.active { "active" } else { "disabled" },
                            institution.grid_id.as_deref().unwrap_or("-"),
                            institution.am_client_id.as_deref().unwrap_or("-")
                        );
                    }
                }
                InstitutionsCmd::Disable { ror } => {
                    let ror_id = orcid_sync::model::normalize_ror(&ror);
                    if !institution_repo::set_active(&db, &ror_id, false)? {
                        return Err(SyncError::UnknownInstitution(ror_id));
                    }
                    println!("{}\tdisabled", ror_id);
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Runs { ror, limit } => {
            let ror = ror.map(|r| orcid_sync::model::normalize_ror(&r));
            for run in run_repo::list_recent(&db, ror.as_deref(), limit)? {
                let c = run.counts;
                println!(
                    "{}\t{}\t{}\t{}\t{}\tfetched={} created={} updated={} deleted={} errors={}",
                    run.id,
                    run.ror_id,
                    run.kind,
                    run.status,
                    run.started_at.format("%Y-%m-%d %H:%M:%S"),
                    c.fetched,
                    c.created,
                    c.updated,
                    c.deleted,
                    c.errors
                );
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn open_database(config: &SyncConfig) -> Result<Database, SyncError> {
    let path = config.database.resolved_path().ok_or_else(|| {
        SyncError::Config(orcid_sync::ConfigError::NoHomeDirectory)
    })?;
    Ok(Database::open(&path)?)
}

/// A token cancelled by Ctrl-C, for the one long-running command of this process.
fn interrupt_token() -> CancelToken {
    let cancel = CancelToken::new();
    let handle = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!("Interrupt received, finishing current researchers...");
        handle.cancel();
    }) {
        warn!("Could not install Ctrl-C handler: {}", e);
    }
    cancel
}

fn scheduler(config: &SyncConfig, db: Database) -> Result<Scheduler, SyncError> {
    let transport = Arc::new(ReqwestTransport::new(
        config.http.connect_timeout(),
        config.http.request_timeout(),
    )?);
    Scheduler::from_config(config, Arc::new(db), transport, Arc::new(SystemClock))
}

async fn rebuild(config: &SyncConfig, db: Database, options: RebuildOptions) -> Result<ExitCode, SyncError> {
    let scheduler = scheduler(config, db)?;
    let report = scheduler.rebuild_caches(options).await?;
    print!("{}", report);

    let totals = report.totals();
    info!(
        "Rebuild finished: fetched {}, created {}, updated {}, deleted {}, errors {}",
        totals.fetched, totals.created, totals.updated, totals.deleted, totals.errors
    );

    Ok(if report.has_failures() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

async fn sync_researcher_names(
    config: &SyncConfig,
    db: Database,
    options: ProfileSyncOptions,
) -> Result<ExitCode, SyncError> {
    let scheduler = scheduler(config, db)?;
    let report = scheduler.sync_researcher_profiles(options).await?;
    print!("{}", report);

    Ok(if report.has_failures() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
