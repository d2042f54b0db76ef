use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use intel_platform_api::{
    CsvFileReport, CsvFileStatus, PlatformConfig, PlatformSession, SetupReport, API_CONTRACT_VERSION,
    DEFAULT_DATA_DIR,
};
use intel_platform_core::{
    AuthOutcome, NewIncident, Severity, StatusCount, TypeCount, BCRYPT_COST, DEFAULT_MIN_CASES,
    DEFAULT_ROLE,
};
use serde_json::Value;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const CLI_CONTRACT_VERSION: &str = "cli.v1";
const BANNER_WIDTH: usize = 60;

const DEMO_USERNAME: &str = "alice";
const DEMO_PASSWORD: &str = "SecurePass123!";
const DEMO_ROLE: &str = "analyst";

#[derive(Debug, Parser)]
#[command(name = "intel")]
#[command(about = "Intelligence platform database seeder")]
struct Cli {
    /// Directory holding the database, the legacy users file and CSV datasets.
    #[arg(long, env = "INTEL_DATA_DIR", default_value = DEFAULT_DATA_DIR, global = true)]
    data_dir: PathBuf,

    /// Database file. Defaults to `<data-dir>/intelligence_platform.db`.
    #[arg(long, env = "INTEL_DB_PATH", global = true)]
    db: Option<PathBuf>,

    /// Legacy credential file. Defaults to `<data-dir>/users.txt`.
    #[arg(long, global = true)]
    users_file: Option<PathBuf>,

    #[arg(
        long,
        env = "INTEL_BCRYPT_COST",
        default_value_t = BCRYPT_COST,
        value_parser = clap::value_parser!(u32).range(4..=31),
        global = true
    )]
    bcrypt_cost: u32,

    #[command(subcommand)]
    command: Option<Command>,
}

impl Cli {
    fn platform_config(&self) -> PlatformConfig {
        let mut config = PlatformConfig::new(&self.data_dir).with_bcrypt_cost(self.bcrypt_cost);
        if let Some(db) = &self.db {
            config = config.with_db_path(db);
        }
        if let Some(users_file) = &self.users_file {
            config = config.with_users_file(users_file);
        }
        config
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the end-to-end demo (default).
    Demo,
    /// Create tables, migrate users, load CSV datasets and print a summary.
    Setup,
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
    User {
        #[command(subcommand)]
        command: UserCommand,
    },
    Incident {
        #[command(subcommand)]
        command: IncidentCommand,
    },
    Analytics {
        #[command(subcommand)]
        command: AnalyticsCommand,
    },
    Data {
        #[command(subcommand)]
        command: DataCommand,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    SchemaVersion,
    Migrate(DbMigrateArgs),
}

#[derive(Debug, Args)]
struct DbMigrateArgs {
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, Subcommand)]
enum UserCommand {
    Register(RegisterArgs),
    Login(LoginArgs),
    /// Import pre-hashed users from the legacy credential file.
    Migrate(MigrateArgs),
    List,
}

#[derive(Debug, Args)]
struct RegisterArgs {
    #[arg(long)]
    username: String,
    #[arg(long)]
    password: String,
    #[arg(long, default_value = DEFAULT_ROLE)]
    role: String,
}

#[derive(Debug, Args)]
struct LoginArgs {
    #[arg(long)]
    username: String,
    #[arg(long)]
    password: String,
}

#[derive(Debug, Args)]
struct MigrateArgs {
    /// Overrides `--users-file` for this run.
    #[arg(long)]
    file: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum IncidentCommand {
    Add(IncidentAddArgs),
    List,
}

#[derive(Debug, Args)]
struct IncidentAddArgs {
    /// Incident date as `YYYY-MM-DD`.
    #[arg(long)]
    date: String,
    #[arg(long = "type")]
    incident_type: String,
    #[arg(long, value_enum, ignore_case = true)]
    severity: SeverityArg,
    #[arg(long)]
    status: String,
    #[arg(long, default_value = "")]
    description: String,
    #[arg(long)]
    reported_by: Option<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SeverityArg {
    Low,
    Medium,
    High,
    Critical,
}

impl SeverityArg {
    fn into_severity(self) -> Severity {
        match self {
            Self::Low => Severity::Low,
            Self::Medium => Severity::Medium,
            Self::High => Severity::High,
            Self::Critical => Severity::Critical,
        }
    }
}

#[derive(Debug, Subcommand)]
enum AnalyticsCommand {
    ByType,
    HighSeverity,
    ManyCases {
        /// Types must have strictly more incidents than this.
        #[arg(long, default_value_t = DEFAULT_MIN_CASES)]
        min_count: i64,
    },
}

#[derive(Debug, Subcommand)]
enum DataCommand {
    /// Append one CSV file to a table, creating the table if needed.
    Load {
        #[arg(long)]
        csv: PathBuf,
        #[arg(long)]
        table: String,
    },
    /// Load every known CSV dataset from the data directory.
    LoadAll,
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            object.insert(
                "api_contract_version".to_string(),
                Value::String(API_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "api_contract_version": API_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = cli.platform_config();
    debug!(?config, "resolved platform config");

    match cli.command.unwrap_or(Command::Demo) {
        Command::Demo => run_demo(&config),
        Command::Setup => run_setup(&config),
        Command::Db { command } => {
            with_session(&config, false, |session| run_db(&command, session))
        }
        Command::User { command } => {
            with_session(&config, true, |session| run_user(command, session, &config))
        }
        Command::Incident { command } => {
            with_session(&config, true, |session| run_incident(command, session))
        }
        Command::Analytics { command } => {
            with_session(&config, true, |session| run_analytics(&command, session))
        }
        Command::Data { command } => {
            with_session(&config, true, |session| run_data(&command, session, &config))
        }
    }
}

/// Open a session, run `run` against it and close it again.
fn with_session<F>(config: &PlatformConfig, initialize: bool, run: F) -> Result<()>
where
    F: FnOnce(&mut PlatformSession) -> Result<()>,
{
    let mut session = PlatformSession::open(config)
        .with_context(|| format!("failed to open database {}", config.db_path.display()))?;
    if initialize {
        session.initialize_schema()?;
    }
    run(&mut session)?;
    session.close()?;
    Ok(())
}

fn run_db(command: &DbCommand, session: &mut PlatformSession) -> Result<()> {
    match command {
        DbCommand::SchemaVersion => {
            let status = session.schema_status()?;
            emit_json(serde_json::json!({
                "current_version": status.current_version,
                "target_version": status.target_version,
                "pending_versions": status.pending_versions,
                "up_to_date": status.pending_versions.is_empty(),
                "inferred_from_legacy": status.inferred_from_legacy
            }))
        }
        DbCommand::Migrate(args) => {
            let before = session.schema_status()?;
            if args.dry_run {
                return emit_json(serde_json::json!({
                    "dry_run": true,
                    "current_version": before.current_version,
                    "target_version": before.target_version,
                    "would_apply_versions": before.pending_versions,
                    "inferred_from_legacy": before.inferred_from_legacy
                }));
            }

            session.initialize_schema()?;
            let after = session.schema_status()?;
            emit_json(serde_json::json!({
                "dry_run": false,
                "before_version": before.current_version,
                "applied_versions": before.pending_versions,
                "after_version": after.current_version,
                "target_version": after.target_version,
                "up_to_date": after.pending_versions.is_empty()
            }))
        }
    }
}

fn run_user(
    command: UserCommand,
    session: &mut PlatformSession,
    config: &PlatformConfig,
) -> Result<()> {
    match command {
        UserCommand::Register(args) => {
            let user = session
                .register(&args.username, &args.password, &args.role)
                .context("registration failed")?;
            emit_json(serde_json::json!({
                "message": AuthOutcome::registered(&Ok(user.clone())).message,
                "user": user
            }))
        }
        UserCommand::Login(args) => {
            let user = session.login(&args.username, &args.password).context("login failed")?;
            emit_json(serde_json::json!({
                "message": AuthOutcome::logged_in(&Ok(user.clone())).message,
                "user": user
            }))
        }
        UserCommand::Migrate(args) => {
            let path = args.file.unwrap_or_else(|| config.users_file.clone());
            let report = session.migrate_users_from_file(&path)?;
            emit_json(serde_json::to_value(report)?)
        }
        UserCommand::List => {
            let users = session.list_users()?;
            emit_json(serde_json::json!({ "count": users.len(), "users": users }))
        }
    }
}

fn run_incident(command: IncidentCommand, session: &mut PlatformSession) -> Result<()> {
    match command {
        IncidentCommand::Add(args) => {
            let incident = NewIncident {
                date: args.date,
                incident_type: args.incident_type,
                severity: args.severity.into_severity(),
                status: args.status,
                description: args.description,
                reported_by: args.reported_by,
            };
            let incident_id = session.insert_incident(&incident)?;
            emit_json(serde_json::json!({ "incident_id": incident_id, "incident": incident }))
        }
        IncidentCommand::List => {
            let incidents = session.list_incidents()?;
            emit_json(serde_json::json!({ "count": incidents.len(), "incidents": incidents }))
        }
    }
}

fn run_analytics(command: &AnalyticsCommand, session: &mut PlatformSession) -> Result<()> {
    match command {
        AnalyticsCommand::ByType => {
            emit_json(serde_json::json!({ "rows": session.incidents_by_type_count()? }))
        }
        AnalyticsCommand::HighSeverity => {
            emit_json(serde_json::json!({ "rows": session.high_severity_by_status()? }))
        }
        AnalyticsCommand::ManyCases { min_count } => emit_json(serde_json::json!({
            "min_count": min_count,
            "rows": session.types_with_many_cases(*min_count)?
        })),
    }
}

fn run_data(
    command: &DataCommand,
    session: &mut PlatformSession,
    config: &PlatformConfig,
) -> Result<()> {
    match command {
        DataCommand::Load { csv, table } => {
            let report = session.load_csv(csv, table)?;
            emit_json(serde_json::to_value(report)?)
        }
        DataCommand::LoadAll => {
            let files = session.load_all_csv_data(config);
            let rows_loaded = files.iter().map(CsvFileReport::rows_loaded).sum::<usize>();
            emit_json(serde_json::json!({ "rows_loaded": rows_loaded, "files": files }))
        }
    }
}

fn print_banner(title: &str) {
    println!("{}", "=".repeat(BANNER_WIDTH));
    println!("{title}");
    println!("{}", "=".repeat(BANNER_WIDTH));
}

fn print_type_counts(rows: &[TypeCount]) {
    if rows.is_empty() {
        println!("  (no rows)");
    }
    for row in rows {
        println!("  {:<30} {:>6}", row.incident_type, row.count);
    }
}

fn print_status_counts(rows: &[StatusCount]) {
    if rows.is_empty() {
        println!("  (no rows)");
    }
    for row in rows {
        println!("  {:<30} {:>6}", row.status, row.count);
    }
}

fn run_demo(config: &PlatformConfig) -> Result<()> {
    print_banner("Intelligence Platform: Database Demo");

    let mut session = PlatformSession::open(config)
        .with_context(|| format!("failed to open database {}", config.db_path.display()))?;
    session.initialize_schema()?;

    let migration = session.migrate_users_from_file(&config.users_file)?;
    if migration.missing_file {
        println!("No user file at {}; nothing to migrate.", config.users_file.display());
    } else {
        println!("Migrated {} users from {}", migration.migrated, config.users_file.display());
    }

    let registered = session.register(DEMO_USERNAME, DEMO_PASSWORD, DEMO_ROLE);
    println!("{}", AuthOutcome::registered(&registered).message);

    let logged_in = session.login(DEMO_USERNAME, DEMO_PASSWORD);
    println!("{}", AuthOutcome::logged_in(&logged_in).message);

    let incident_id = session.insert_incident(&NewIncident {
        date: "2024-11-05".to_string(),
        incident_type: "Phishing".to_string(),
        severity: Severity::High,
        status: "Open".to_string(),
        description: "Suspicious email detected".to_string(),
        reported_by: Some(DEMO_USERNAME.to_string()),
    })?;
    println!("Created incident #{incident_id}");

    println!("Total incidents: {}", session.count_incidents()?);

    println!("\nIncidents by Type:");
    print_type_counts(&session.incidents_by_type_count()?);

    println!("\nHigh Severity Incidents by Status:");
    print_status_counts(&session.high_severity_by_status()?);

    println!("\nIncident Types with Many Cases (>{DEFAULT_MIN_CASES}):");
    print_type_counts(&session.types_with_many_cases(DEFAULT_MIN_CASES)?);

    session.close()?;
    Ok(())
}

fn run_setup(config: &PlatformConfig) -> Result<()> {
    print_banner("Intelligence Platform: Complete Setup");
    let report = PlatformSession::setup_complete(config)?;
    print_setup_report(config, &report);
    Ok(())
}

fn print_setup_report(config: &PlatformConfig, report: &SetupReport) {
    println!("[1/5] Data directory ready: {}", config.data_dir.display());
    println!("[2/5] Tables created");

    let users = &report.users;
    if users.missing_file {
        println!("[3/5] No user file at {}; skipped", users.source.display());
    } else {
        println!(
            "[3/5] Users migrated: {} (already present: {}, malformed lines: {}, failed: {})",
            users.migrated,
            users.duplicates,
            users.skipped.len(),
            users.failed.len()
        );
    }

    println!("[4/5] CSV datasets:");
    for file in &report.csv_files {
        let name = file.path.file_name().map_or_else(
            || file.path.display().to_string(),
            |name| name.to_string_lossy().into_owned(),
        );
        match &file.status {
            CsvFileStatus::Loaded { rows } => {
                println!("      {name} -> {}: {rows} rows", file.table);
            }
            CsvFileStatus::MissingFile => println!("      {name} -> {}: file not found", file.table),
            CsvFileStatus::Failed { error } => {
                println!("      {name} -> {}: failed ({error})", file.table);
            }
        }
    }

    println!("[5/5] Table summary:");
    println!("      {:<24} {:>8}", "table", "rows");
    for count in &report.table_counts {
        println!("      {:<24} {:>8}", count.table, count.rows);
    }

    println!("\nDatabase ready at {}", report.db_path.display());
}
