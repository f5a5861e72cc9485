use reviewflow::db;
use reviewflow::jobs::{cutoff_days, Job, JobsRepo, MaintenanceRepo};
use reviewflow::stores::StoresRepo;
use std::env;
use uuid::Uuid;

const USAGE: &str = "rfctl <command>\n\
Commands:\n\
- migrate\n\
- reap [stale_secs]          fail processing jobs idle longer than stale_secs (default 1800)\n\
- archive [days]             archive reviews older than days (default 180)\n\
- jobs <store_id> [limit]    list a store's most recent jobs\n\
- job <job_id>               show one job\n\
- add-store <user_id> <name> create a store owned by user_id\n\
\n\
Uses DATABASE_URL or TEST_DATABASE_URL.\n";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!("{USAGE}");
        std::process::exit(2);
    }

    let url = env::var("DATABASE_URL")
        .or_else(|_| env::var("TEST_DATABASE_URL"))
        .map_err(|_| anyhow::anyhow!("DATABASE_URL or TEST_DATABASE_URL must be set"))?;

    let pool = db::make_pool(&url).await?;
    let jobs = JobsRepo::new(pool.clone());

    match args[1].as_str() {
        "migrate" => {
            db::run_migrations(&pool).await?;
            println!("migrations applied");
        }
        "reap" => {
            let secs: i64 = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(1800);
            let n = jobs.reap_stale_processing(secs).await?;
            println!("reaped {n} stale processing jobs");
        }
        "archive" => {
            let days: i64 = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(180);
            let n = MaintenanceRepo::new(pool.clone())
                .archive_all_reviews_older_than(cutoff_days(days), 500)
                .await?;
            println!("archived {n} reviews older than {days} days");
        }
        "jobs" => {
            let store_id: Uuid = arg(&args, 2, "usage: rfctl jobs <store_id> [limit]")?.parse()?;
            let limit: i64 = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(20);
            let rows = jobs.list_for_store(store_id, limit).await?;
            if rows.is_empty() {
                println!("no jobs for store {store_id}");
            }
            for job in &rows {
                print_job_line(job);
            }
        }
        "job" => {
            let job_id: Uuid = arg(&args, 2, "usage: rfctl job <job_id>")?.parse()?;
            match jobs.get_by_id(job_id).await? {
                Some(job) => print_job(&job)?,
                None => {
                    eprintln!("job {job_id} not found");
                    std::process::exit(1);
                }
            }
        }
        "add-store" => {
            let user_id: Uuid =
                arg(&args, 2, "usage: rfctl add-store <user_id> <name>")?.parse()?;
            let name = arg(&args, 3, "usage: rfctl add-store <user_id> <name>")?;
            let id = StoresRepo::new(pool.clone()).create(user_id, name).await?;
            println!("store {id}");
        }
        other => {
            eprintln!("Unknown command: {other}\n\n{USAGE}");
            std::process::exit(2);
        }
    }

    Ok(())
}

fn arg<'a>(args: &'a [String], i: usize, usage: &str) -> anyhow::Result<&'a str> {
    args.get(i)
        .map(String::as_str)
        .ok_or_else(|| anyhow::anyhow!("{usage}"))
}

fn print_job_line(job: &Job) {
    println!(
        "{}  {:<28} {:<10} worker={} created={}",
        job.id,
        job.kind.to_string(),
        job.status.as_str(),
        job.worker_id.as_deref().unwrap_or("-"),
        job.created_at.format("%Y-%m-%d %H:%M:%S"),
    );
}

fn print_job(job: &Job) -> anyhow::Result<()> {
    println!("id:         {}", job.id);
    println!("type:       {}", job.kind);
    println!("store_id:   {}", job.store_id);
    println!("user_id:    {}", job.user_id);
    println!("status:     {}", job.status);
    println!("worker_id:  {}", job.worker_id.as_deref().unwrap_or("-"));
    println!("created_at: {}", job.created_at);
    println!("updated_at: {}", job.updated_at);
    println!("payload:    {}", serde_json::to_string_pretty(&job.payload)?);
    if let Some(result) = &job.result {
        println!("result:     {}", serde_json::to_string_pretty(result)?);
    }
    if let Some(err) = &job.error_message {
        println!("error:      {err}");
    }
    Ok(())
}
