use anyhow::Context;
use sqlx::pool::PoolConnection;
use sqlx::Postgres;

// Advisory locks are scoped to the Postgres session, so the guard keeps the connection it locked on.
// Used as a best-effort guard against the same job running in two worker processes.
const LOCK_NAMESPACE: i64 = 0x4E45_5753_464C; // "NEWSFL"

/// FNV-1a over the job name, folded into the namespace.
pub fn lock_key_for_job(job: &str) -> i64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in job.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    LOCK_NAMESPACE ^ (hash >> 16) as i64
}

pub struct JobLock {
    conn: PoolConnection<Postgres>,
    key: i64,
}

pub async fn try_acquire_job_lock(
    pool: &sqlx::PgPool,
    job: &str,
) -> anyhow::Result<Option<JobLock>> {
    let key = lock_key_for_job(job);
    let mut conn = pool
        .acquire()
        .await
        .context("failed to acquire connection for advisory lock")?;
    let acquired: (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
        .persistent(false)
        .bind(key)
        .fetch_one(&mut *conn)
        .await
        .with_context(|| format!("failed to acquire advisory lock (job={job}, key={key})"))?;

    Ok(acquired.0.then_some(JobLock { conn, key }))
}

impl JobLock {
    pub async fn release(mut self) -> anyhow::Result<()> {
        let key = self.key;
        sqlx::query("SELECT pg_advisory_unlock($1)")
            .persistent(false)
            .bind(key)
            .execute(&mut *self.conn)
            .await
            .with_context(|| format!("failed to release advisory lock (key={key})"))?;
        Ok(())
    }
}
