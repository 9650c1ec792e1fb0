//! Command definitions and execution.

use std::path::PathBuf;

use chrono::Utc;
use clap::{Args, Parser, Subcommand};

use airlock_core::store::{self, Store};
use airlock_core::upload::UploadConfig;
use airlock_core::{AirlockError, Result};
use airlock_model::{AuditEntry, AuditKind, RequestId, RequestStatus};

fn default_job_deadline_secs() -> u64 {
    UploadConfig::default().job_deadline.as_secs()
}

/// Airlock administrative CLI.
#[derive(Parser, Debug)]
#[command(name = "airlockctl", version, about)]
pub struct Cli {
    /// Store location; defaults to `sqlite://<work-dir>/airlock.db`.
    #[arg(long, env = "DATABASE_URL", global = true)]
    pub database_url: Option<String>,

    /// Service work directory.
    #[arg(long, env = "WORK_DIR", default_value = "./airlock", global = true)]
    pub work_dir: PathBuf,

    /// Per-job deadline (seconds) applied to re-queued uploads; must match
    /// the service's `UPLOAD_JOB_DEADLINE`.
    #[arg(
        long,
        env = "UPLOAD_JOB_DEADLINE",
        default_value_t = default_job_deadline_secs(),
        global = true
    )]
    pub upload_job_deadline: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Inspect release requests.
    #[command(subcommand)]
    Requests(RequestsCommand),
    /// Inspect and re-drive upload jobs.
    #[command(subcommand)]
    Uploads(UploadsCommand),
}

#[derive(Subcommand, Debug)]
pub enum RequestsCommand {
    /// List requests, newest first.
    List(ListArgs),
    /// Show one request with its audit trail.
    Show(ShowArgs),
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Restrict to one workspace.
    #[arg(long)]
    pub workspace: Option<String>,
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Request id.
    pub id: String,
}

#[derive(Subcommand, Debug)]
pub enum UploadsCommand {
    /// List upload jobs for a request.
    List(ShowArgs),
    /// Re-queue FAILED upload jobs for an APPROVED request.
    ReRelease(ShowArgs),
}

impl Cli {
    fn database_url(&self) -> String {
        self.database_url.clone().unwrap_or_else(|| {
            format!("sqlite://{}", self.work_dir.join("airlock.db").display())
        })
    }

    fn job_deadline(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.upload_job_deadline as i64)
    }
}

fn parse_request_id(raw: &str) -> Result<RequestId> {
    raw.parse()
        .map_err(|_| AirlockError::Invariant(format!("not a request id: {raw}")))
}

pub async fn run(cli: Cli) -> Result<()> {
    let store = Store::connect(&cli.database_url()).await?;
    match &cli.command {
        Command::Requests(RequestsCommand::List(args)) => list_requests(&store, args).await,
        Command::Requests(RequestsCommand::Show(args)) => show_request(&store, args).await,
        Command::Uploads(UploadsCommand::List(args)) => list_uploads(&store, args).await,
        Command::Uploads(UploadsCommand::ReRelease(args)) => {
            re_release(&store, args, cli.job_deadline()).await
        }
    }
}

async fn list_requests(store: &Store, args: &ListArgs) -> Result<()> {
    let mut conn = store.pool().acquire().await.map_err(AirlockError::Database)?;
    let requests = match &args.workspace {
        Some(workspace) => store::requests::list_for_workspace(&mut *conn, workspace).await?,
        None => store::requests::list_all(&mut *conn).await?,
    };

    println!(
        "{:<38} {:<20} {:<14} {:<20} {:>4}",
        "ID", "WORKSPACE", "AUTHOR", "STATUS", "TURN"
    );
    for request in requests {
        println!(
            "{:<38} {:<20} {:<14} {:<20} {:>4}",
            request.id,
            request.workspace,
            request.author,
            request.status.as_str(),
            request.review_turn
        );
    }
    Ok(())
}

async fn show_request(store: &Store, args: &ShowArgs) -> Result<()> {
    let id = parse_request_id(&args.id)?;
    let mut conn = store.pool().acquire().await.map_err(AirlockError::Database)?;
    let request = store::requests::get(&mut *conn, id).await?;

    println!("request   {}", request.id);
    println!("workspace {}", request.workspace);
    println!("author    {}", request.author);
    println!("status    {}", request.status);
    println!("turn      {}", request.review_turn);
    if let Some(url) = &request.jobs_release_url {
        println!("release   {url}");
    }

    let files = store::files::files_for_request(&mut *conn, id).await?;
    println!("\nfiles:");
    for file in files {
        let mark = if file.is_withdrawn() {
            "withdrawn"
        } else if file.uploaded_at.is_some() {
            "uploaded"
        } else {
            file.filetype.as_str()
        };
        println!("  {:<50} {:<10} {}", file.relpath, mark, file.content_hash);
    }

    let entries = store::audit::list_for_request(&mut *conn, id).await?;
    println!("\naudit:");
    for entry in entries {
        print_audit_entry(&entry);
    }
    Ok(())
}

fn print_audit_entry(entry: &AuditEntry) {
    let path = entry.path.as_deref().unwrap_or("-");
    println!(
        "  {} {:<24} {:<14} {}",
        entry.created_at.format("%Y-%m-%d %H:%M:%S"),
        entry.kind.as_str(),
        entry.actor,
        path
    );
}

async fn list_uploads(store: &Store, args: &ShowArgs) -> Result<()> {
    let id = parse_request_id(&args.id)?;
    let mut conn = store.pool().acquire().await.map_err(AirlockError::Database)?;
    // Surface NotFound for a bad id before printing an empty table.
    store::requests::get(&mut *conn, id).await?;
    let jobs = store::uploads::list_for_request(&mut *conn, id).await?;

    println!(
        "{:<50} {:<10} {:>8} {:<24} {}",
        "RELPATH", "STATE", "ATTEMPTS", "NEXT ATTEMPT", "LAST ERROR"
    );
    for job in jobs {
        println!(
            "{:<50} {:<10} {:>8} {:<24} {}",
            job.relpath,
            job.state.as_str(),
            job.attempts,
            job.next_attempt_at.format("%Y-%m-%d %H:%M:%S"),
            job.last_error.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

async fn re_release(store: &Store, args: &ShowArgs, job_deadline: chrono::Duration) -> Result<()> {
    let id = parse_request_id(&args.id)?;
    let mut tx = store.begin().await?;
    let request = store::requests::get(&mut *tx, id).await?;
    if request.status != RequestStatus::Approved {
        return Err(AirlockError::InvalidTransition(format!(
            "cannot re-release a request in status {}",
            request.status
        )));
    }

    let deadline = Utc::now() + job_deadline;
    let revived = store::uploads::requeue_failed(&mut *tx, id, deadline, Utc::now()).await?;
    store::audit::append(
        &mut *tx,
        &AuditEntry::new(id, "airlockctl", AuditKind::UploadsRequeued)
            .with_extra("jobs", revived as i64),
    )
    .await?;
    tx.commit().await.map_err(AirlockError::Database)?;

    println!("requeued {revived} failed upload job(s) for {id}");
    Ok(())
}
