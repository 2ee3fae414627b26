//! janus-sim: push a file of jobs through the admission pipeline, in-process or against a
//! running server.

use clap::{Parser, Subcommand};
use janus_admission::AdmissionController;
use janus_store::InMemoryStateStore;
use janus_types::{Job, JobBatchRequest, JobSource, Policy, SubmittedJob};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "janus-sim")]
#[command(version)]
#[command(about = "Replay jobs through Janus admission control")]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run jobs through an in-process controller
    Local {
        /// Policy JSON file
        #[arg(long)]
        policy: PathBuf,

        /// JSON array of jobs
        #[arg(long)]
        jobs: PathBuf,

        /// Owner the jobs are submitted as
        #[arg(long, default_value = "local")]
        user: String,
    },

    /// Post jobs to a running server
    Remote {
        /// Base URL, e.g. http://127.0.0.1:8080
        #[arg(long)]
        url: String,

        /// Sent as X-User-ID
        #[arg(long)]
        user: String,

        /// JSON array of jobs
        #[arg(long)]
        jobs: PathBuf,

        /// Submit as one batch with this name instead of job by job
        #[arg(long)]
        batch_name: Option<String>,

        /// All-or-nothing batch (requires --batch-name)
        #[arg(long, requires = "batch_name")]
        atomic: bool,
    },
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

fn read_jobs(path: &Path) -> Result<Vec<Job>, BoxError> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

async fn run_local(policy: &Path, jobs: &Path, user: &str) -> Result<(), BoxError> {
    let policy = Policy::load(policy)?;
    let jobs = read_jobs(jobs)?;
    let controller = AdmissionController::new(Arc::new(InMemoryStateStore::new()));

    for job in jobs {
        if let Err(e) = job.validate() {
            println!("{:<24} invalid: {}", job.job_id, e);
            continue;
        }
        let submitted = SubmittedJob::new(job, JobSource::System, user);
        let d = controller.check(&submitted, &policy).await?;
        println!("{:<24} {:<9} {}", d.job_id, d.status.as_str(), d.reason);
    }

    let stats = controller.stats().await;
    println!(
        "total={} admitted={} rejected={} acceptance={}%",
        stats.total_requests,
        stats.admitted_requests,
        stats.rejected_requests,
        stats.acceptance_rate()
    );
    Ok(())
}

async fn run_remote(
    url: &str,
    user: &str,
    jobs: &Path,
    batch_name: Option<String>,
    atomic: bool,
) -> Result<(), BoxError> {
    let jobs = read_jobs(jobs)?;
    let client = reqwest::Client::new();
    let base = url.trim_end_matches('/');

    match batch_name {
        Some(batch_name) => {
            let path = if atomic {
                "/system/jobs/batch/atomic"
            } else {
                "/system/jobs/batch"
            };
            let res = client
                .post(format!("{}{}", base, path))
                .header("X-User-ID", user)
                .json(&JobBatchRequest { batch_name, jobs })
                .send()
                .await?;
            let status = res.status();
            let body: serde_json::Value = res.json().await?;
            println!("{}", status);
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        None => {
            for job in jobs {
                let res = client
                    .post(format!("{}/system/jobs", base))
                    .header("X-User-ID", user)
                    .json(&job)
                    .send()
                    .await?;
                let status = res.status();
                let body: serde_json::Value = res.json().await?;
                let outcome = body
                    .get("reason")
                    .or_else(|| body.get("error"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("-");
                println!("{:<24} {} {}", job.job_id, status.as_u16(), outcome);
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();
    match args.command {
        Commands::Local { policy, jobs, user } => run_local(&policy, &jobs, &user).await,
        Commands::Remote {
            url,
            user,
            jobs,
            batch_name,
            atomic,
        } => run_remote(&url, &user, &jobs, batch_name, atomic).await,
    }
}
