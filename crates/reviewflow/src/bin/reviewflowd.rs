use reviewflow::api;
use reviewflow::config::Config;
use reviewflow::crypto::SessionCipher;
use reviewflow::db;
use reviewflow::jobs::{cutoff_days, JobsRepo, MaintenanceRepo};
use reviewflow::reconcile::Reconciler;
use reviewflow::sessions::SessionsRepo;
use reviewflow::stores::StoresRepo;

use std::time::Duration;
use tracing_subscriber::EnvFilter;

const ARCHIVE_BATCH: i64 = 500;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = Config::from_env()?;

    tracing::info!(
        addr = %cfg.listen_addr,
        worker_auth = if cfg.worker_secret.is_some() { "enabled" } else { "unset (all worker calls rejected)" },
        migrate_on_startup = cfg.migrate_on_startup,
        maintenance_interval_secs = cfg.maintenance_interval_secs,
        stale_processing_secs = cfg.stale_processing_secs,
        review_retention_days = cfg.review_retention_days,
        "reviewflowd starting"
    );

    let cipher = SessionCipher::from_key_material(cfg.session_key.as_deref())?;
    if cipher.is_insecure() {
        tracing::warn!(
            "SESSION_ENCRYPTION_KEY is missing or shorter than 32 bytes; using the built-in development key. Do not run this in production."
        );
    }

    let pool = db::make_pool(&cfg.database_url).await?;
    if cfg.migrate_on_startup {
        db::run_migrations(&pool).await?;
        tracing::info!("migrations applied");
    }

    let jobs_repo = JobsRepo::new(pool.clone());
    let sessions_repo = SessionsRepo::new(pool.clone(), cipher);
    let maintenance_repo = MaintenanceRepo::new(pool.clone());

    // ---- API task ----
    let api_state = api::ApiState {
        jobs: jobs_repo.clone(),
        stores: StoresRepo::new(pool.clone()),
        sessions: sessions_repo.clone(),
        reconciler: Reconciler::new(pool.clone(), jobs_repo.clone(), sessions_repo),
        worker_secret: cfg.worker_secret.clone(),
    };
    let app = api::router(api_state);
    let addr = cfg.listen_addr.clone();

    let api_handle = tokio::spawn(async move {
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        tracing::info!("api listening on http://{addr}");
        axum::serve(listener, app).await?;
        Ok::<(), anyhow::Error>(())
    });

    // ---- Maintenance task ----
    let maintenance_handle = {
        let jobs = jobs_repo.clone();
        let maintenance = maintenance_repo.clone();
        let interval = Duration::from_secs(cfg.maintenance_interval_secs);
        let stale_secs = cfg.stale_processing_secs;
        let retention_days = cfg.review_retention_days;

        tokio::spawn(async move {
            loop {
                // 1) fail jobs whose worker went silent
                match jobs.reap_stale_processing(stale_secs).await {
                    Ok(n) if n > 0 => tracing::warn!(reaped = n, "failed stale processing jobs"),
                    Ok(_) => {}
                    Err(e) => tracing::error!(error = %e, "stale job reap failed"),
                }

                // 2) move reviews past retention into the archive
                match maintenance
                    .archive_all_reviews_older_than(cutoff_days(retention_days), ARCHIVE_BATCH)
                    .await
                {
                    Ok(n) if n > 0 => tracing::info!(archived = n, "archived old reviews"),
                    Ok(_) => {}
                    Err(e) => tracing::error!(error = %e, "review archive failed"),
                }

                tokio::time::sleep(interval).await;
            }
            #[allow(unreachable_code)]
            Ok::<(), anyhow::Error>(())
        })
    };

    tokio::select! {
        res = api_handle => res??,
        res = maintenance_handle => res??,
    }

    Ok(())
}
