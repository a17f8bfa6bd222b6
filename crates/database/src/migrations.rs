use crate::pool::DbPool;

mod embedded {
    refinery::embed_migrations!("migrations");
}

/// Apply pending SQL migrations from `crates/database/migrations`
pub async fn run(pool: &DbPool) -> anyhow::Result<()> {
    let mut client = pool.get().await?;

    let report = embedded::migrations::runner()
        .run_async(&mut **client)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to run migrations: {e}"))?;

    for migration in report.applied_migrations() {
        tracing::info!(
            "Applied migration V{}__{}",
            migration.version(),
            migration.name()
        );
    }
    tracing::info!(
        "Database migrations complete ({} applied)",
        report.applied_migrations().len()
    );

    Ok(())
}
