use std::path::PathBuf;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use sqlx::postgres::PgPoolOptions;
use tracing::debug;
use uuid::Uuid;

mod attachment;
mod auth;
mod commands;
mod config;
mod db;
mod error;
mod export;
mod filters;
mod incident;
mod models;
mod permissions;
mod priority;
mod report;
mod roster;

use crate::auth::{PgAuthGateway, SessionStore};
use crate::config::Config;
use crate::models::{IncidentStatus, Role, SanctionKind, Severity};
use crate::permissions::Permission;

#[derive(Parser)]
#[command(name = "incident-tracker")]
#[command(about = "Disciplinary incident tracker for school staff", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load sample students and incidents
    Seed,
    /// Create an account and its staff profile
    SignUp {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
        #[arg(long, default_value = "teacher")]
        role: Role,
        /// Function label, kept only with --role other
        #[arg(long)]
        custom_role: Option<String>,
    },
    SignIn {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    SignOut,
    /// Show the signed-in user and their permissions
    Whoami,
    #[command(subcommand)]
    Student(StudentCommand),
    #[command(subcommand)]
    User(UserCommand),
    #[command(subcommand)]
    Incident(IncidentCommand),
    /// Headline counts and the prioritized queue of open incidents
    Dashboard,
    #[command(subcommand)]
    Report(ReportCommand),
    /// Saved reports
    #[command(subcommand)]
    Reports(SavedReportCommand),
    #[command(subcommand)]
    Settings(SettingsCommand),
}

#[derive(Subcommand)]
pub enum StudentCommand {
    Add {
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
        #[arg(long)]
        class: String,
        #[arg(long)]
        level: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        birth_date: Option<String>,
        #[arg(long)]
        parent_contact: Option<String>,
    },
    List {
        #[arg(long)]
        class: Option<String>,
    },
    Update {
        id: Uuid,
        #[arg(long)]
        first_name: Option<String>,
        #[arg(long)]
        last_name: Option<String>,
        #[arg(long)]
        class: Option<String>,
        #[arg(long)]
        level: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        birth_date: Option<String>,
        #[arg(long)]
        parent_contact: Option<String>,
    },
    /// Bulk-create students from a CSV or JSON roster export
    Import {
        #[arg(long)]
        file: PathBuf,
    },
    Delete {
        id: Uuid,
    },
}

/// `--allow`/`--deny` set a manual override, `--reset` goes back to the role default.
#[derive(clap::Args)]
pub struct OverrideArgs {
    #[arg(long = "allow")]
    pub allow: Vec<Permission>,
    #[arg(long = "deny")]
    pub deny: Vec<Permission>,
    #[arg(long = "reset")]
    pub reset: Vec<Permission>,
}

#[derive(Subcommand)]
pub enum UserCommand {
    /// Add a staff profile without an account
    Add {
        #[arg(long)]
        email: String,
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
        #[arg(long, default_value = "educator")]
        role: Role,
        #[arg(long)]
        custom_role: Option<String>,
        #[command(flatten)]
        overrides: OverrideArgs,
    },
    List,
    Update {
        id: Uuid,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        first_name: Option<String>,
        #[arg(long)]
        last_name: Option<String>,
        #[arg(long)]
        role: Option<Role>,
        #[arg(long)]
        custom_role: Option<String>,
        #[command(flatten)]
        overrides: OverrideArgs,
    },
    Delete {
        id: Uuid,
    },
    /// Print a prefilled invitation email link
    Invite {
        id: Uuid,
    },
}

#[derive(Subcommand)]
pub enum IncidentCommand {
    Add {
        #[arg(long)]
        title: String,
        #[arg(long)]
        description: String,
        /// Involved student id, repeat for several students
        #[arg(long = "student", required = true)]
        students: Vec<Uuid>,
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long, default_value = "medium")]
        severity: Severity,
        #[arg(long)]
        location: String,
        #[arg(long = "witness")]
        witnesses: Vec<String>,
        #[arg(long, default_value = "")]
        notes: String,
        /// PNG of the handwritten note
        #[arg(long)]
        handwritten: Option<PathBuf>,
        #[arg(long = "attach")]
        attachments: Vec<PathBuf>,
    },
    List {
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        status: Option<IncidentStatus>,
        #[arg(long)]
        severity: Option<Severity>,
        #[arg(long)]
        class: Option<String>,
        #[arg(long)]
        from: Option<NaiveDate>,
        #[arg(long)]
        to: Option<NaiveDate>,
    },
    Show {
        id: Uuid,
    },
    Update {
        id: Uuid,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long = "student")]
        students: Vec<Uuid>,
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        severity: Option<Severity>,
        #[arg(long)]
        status: Option<IncidentStatus>,
        #[arg(long)]
        location: Option<String>,
        #[arg(long = "witness")]
        witnesses: Vec<String>,
        #[arg(long)]
        notes: Option<String>,
        /// Replace the handwritten note image
        #[arg(long)]
        handwritten: Option<PathBuf>,
    },
    Resolve {
        id: Uuid,
    },
    Delete {
        id: Uuid,
    },
    /// Attach evidence files (10 MB max each)
    Attach {
        id: Uuid,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    Sanction {
        id: Uuid,
        #[arg(long)]
        kind: SanctionKind,
        #[arg(long)]
        description: String,
        #[arg(long)]
        custom_label: Option<String>,
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Hours for a detention, days for a temporary exclusion
        #[arg(long)]
        duration: Option<u32>,
        #[arg(long)]
        applied: bool,
    },
    /// Append a voice transcript to the incident notes
    Dictate {
        id: Uuid,
        #[arg(long)]
        text: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum ExportFormat {
    Txt,
    Pdf,
    Email,
}

#[derive(clap::Args)]
pub struct ExportArgs {
    #[arg(long, value_enum, default_value_t = ExportFormat::Txt)]
    pub format: ExportFormat,
    #[arg(long, default_value = ".")]
    pub out: PathBuf,
    /// Also keep the report text in the saved reports
    #[arg(long)]
    pub save: bool,
}

#[derive(Subcommand)]
pub enum ReportCommand {
    Single {
        #[arg(long)]
        incident: Uuid,
        #[command(flatten)]
        export: ExportArgs,
    },
    Summary {
        #[arg(long)]
        from: Option<NaiveDate>,
        #[arg(long)]
        to: Option<NaiveDate>,
        #[command(flatten)]
        export: ExportArgs,
    },
}

#[derive(Subcommand)]
pub enum SavedReportCommand {
    List,
    Show {
        id: Uuid,
    },
    Rename {
        id: Uuid,
        #[arg(long)]
        title: String,
    },
    Delete {
        id: Uuid,
    },
}

#[derive(Subcommand)]
pub enum SettingsCommand {
    Show,
    Set {
        #[arg(long)]
        school_name: Option<String>,
        #[arg(long)]
        logo: Option<PathBuf>,
        #[arg(long)]
        remove_logo: bool,
        #[arg(long)]
        principal_name: Option<String>,
        #[arg(long)]
        principal_title: Option<String>,
        #[arg(long)]
        address: Option<String>,
        /// Email domain allowed to sign up, repeat for several
        #[arg(long = "allowed-domain")]
        allowed_domains: Vec<String>,
        #[arg(long)]
        clear_domains: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    config::init_logging();
    let config = Config::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
        .context("failed to connect to Postgres")?;

    let sessions = SessionStore::new(
        PgAuthGateway::new(pool.clone()),
        Some(config.session_file.clone()),
    );
    // The session tables only exist once the schema is in place.
    if !matches!(cli.command, Commands::InitDb) {
        let state = sessions.init().await?;
        debug!(signed_in = state.user().is_some(), "session restored");
    }

    let changes = sessions.subscribe();
    let result = run(cli.command, &pool, &sessions).await;
    if changes.has_changed().unwrap_or(false) {
        debug!(signed_in = changes.borrow().user().is_some(), "auth state changed");
    }
    sessions.teardown();
    result
}

async fn run(
    command: Commands,
    pool: &sqlx::PgPool,
    sessions: &SessionStore<PgAuthGateway>,
) -> anyhow::Result<()> {
    match command {
        Commands::InitDb => {
            db::init_db(pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(pool).await?;
            println!("Seed data inserted.");
        }
        Commands::SignUp {
            email,
            password,
            first_name,
            last_name,
            role,
            custom_role,
        } => {
            let profile = models::NewUser {
                first_name,
                last_name,
                email,
                role,
                custom_role,
                overrides: Default::default(),
            };
            let user = sessions.sign_up(&password, &profile).await?;
            println!("Welcome {} ({}).", user.full_name(), user.function_label());
        }
        Commands::SignIn { email, password } => {
            let user = sessions.sign_in(&email, &password).await?;
            println!("Signed in as {} ({}).", user.full_name(), user.function_label());
        }
        Commands::SignOut => {
            sessions.sign_out().await?;
            println!("Signed out.");
        }
        Commands::Whoami => commands::whoami(sessions)?,
        Commands::Student(command) => commands::student(pool, sessions, command).await?,
        Commands::User(command) => commands::user(pool, sessions, command).await?,
        Commands::Incident(command) => commands::incident(pool, sessions, command).await?,
        Commands::Dashboard => commands::dashboard(pool, sessions).await?,
        Commands::Report(command) => commands::report(pool, sessions, command).await?,
        Commands::Reports(command) => commands::saved_reports(pool, sessions, command).await?,
        Commands::Settings(command) => commands::settings(pool, sessions, command).await?,
    }

    Ok(())
}
