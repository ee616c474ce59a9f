use crate::config::AppConfig;
use crate::errors::ServiceError;
use metrics::{counter, gauge, histogram};
use rand::Rng;
use sea_orm::{ConnectOptions, Database, DatabaseConnection, DatabaseTransaction};
use sea_orm_migration::MigratorTrait;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Type alias for a database connection pool
pub type DbPool = DatabaseConnection;

/// Configuration for database connection
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Database connection URL
    pub url: String,
    /// Maximum number of connections
    pub max_connections: u32,
    /// Minimum number of connections
    pub min_connections: u32,
    /// Connection timeout duration
    pub connect_timeout: Duration,
    /// Idle timeout duration
    pub idle_timeout: Duration,
    /// Acquire connection timeout
    pub acquire_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            acquire_timeout: Duration::from_secs(8),
        }
    }
}

impl From<&AppConfig> for DbConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            url: cfg.database_url.clone(),
            max_connections: cfg.db_max_connections,
            min_connections: cfg.db_min_connections,
            connect_timeout: Duration::from_secs(cfg.db_connect_timeout_secs),
            idle_timeout: Duration::from_secs(cfg.db_idle_timeout_secs),
            acquire_timeout: Duration::from_secs(cfg.db_acquire_timeout_secs),
        }
    }
}

/// Establishes a connection pool to the database with custom configuration
///
/// # Errors
/// Returns a `ServiceError` if the connection cannot be established
pub async fn establish_connection_with_config(config: &DbConfig) -> Result<DbPool, ServiceError> {
    debug!("Configuring database connection with: {:?}", config);

    let mut opt = ConnectOptions::new(config.url.clone());
    opt.max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(config.connect_timeout)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .sqlx_logging(false);

    gauge!("storefront_db.max_connections", config.max_connections as f64);

    info!(
        "Connecting to database with max_connections={}",
        config.max_connections
    );

    let db_pool = Database::connect(opt).await.map_err(|e| {
        error!("Database connection establishment failed: {}", e);
        ServiceError::from(e)
    })?;

    info!("Database connection pool established successfully");
    Ok(db_pool)
}

/// Establish DB pool using AppConfig tuning
pub async fn establish_connection_from_app_config(cfg: &AppConfig) -> Result<DbPool, ServiceError> {
    let db_cfg: DbConfig = cfg.into();
    establish_connection_with_config(&db_cfg).await
}

/// Backoff between attempts of a unit of transactional work.
#[derive(Debug, Clone)]
pub struct TransactionRetry {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for TransactionRetry {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(250),
            backoff_factor: 2.0,
        }
    }
}

impl TransactionRetry {
    fn next_delay(&self, delay: Duration) -> Duration {
        Duration::from_secs_f64(
            (delay.as_secs_f64() * self.backoff_factor).min(self.max_delay.as_secs_f64()),
        )
    }
}

/// Runs a unit of transactional work under a deadline.
///
/// `work` is called once per attempt and must open, use and commit its own
/// transaction. An attempt that fails with a retriable error (lock
/// contention, serialization failure, a dropped connection) is rolled back
/// and run again from scratch with jittered exponential backoff, so a losing
/// writer re-reads committed state instead of surfacing the conflict. Once
/// the deadline passes the in-flight attempt is dropped, which rolls its
/// transaction back, and the caller sees a retriable `TransientStoreFailure`.
pub async fn within_deadline<F, Fut, T>(
    operation: &'static str,
    limit: Duration,
    work: F,
) -> Result<T, ServiceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
{
    within_deadline_with_retry(operation, limit, &TransactionRetry::default(), work).await
}

pub async fn within_deadline_with_retry<F, Fut, T>(
    operation: &'static str,
    limit: Duration,
    retry: &TransactionRetry,
    mut work: F,
) -> Result<T, ServiceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
{
    let start = Instant::now();
    let deadline = tokio::time::Instant::now() + limit;
    let mut delay = retry.initial_delay;
    let mut attempts: u32 = 0;
    counter!("storefront_db.transaction.started", 1, "operation" => operation);

    let result = loop {
        attempts += 1;
        let outcome = match tokio::time::timeout_at(deadline, work()).await {
            Ok(outcome) => outcome,
            Err(_) => {
                counter!("storefront_db.transaction.timeout", 1, "operation" => operation);
                break Err(ServiceError::TransientStoreFailure(format!(
                    "{} did not complete within {:?}",
                    operation, limit
                )));
            }
        };

        match outcome {
            Err(e) if e.is_retriable() => {
                let jitter = rand::thread_rng().gen_range(0..=delay.as_micros() as u64);
                let pause = delay + Duration::from_micros(jitter);
                if tokio::time::Instant::now() + pause >= deadline {
                    break Err(e);
                }
                counter!("storefront_db.transaction.retried", 1, "operation" => operation);
                debug!(operation, attempts, error = %e, "Retrying transaction in {:?}", pause);
                tokio::time::sleep(pause).await;
                delay = retry.next_delay(delay);
            }
            other => break other,
        }
    };

    let elapsed = start.elapsed();
    histogram!("storefront_db.transaction.duration", elapsed, "operation" => operation);

    match &result {
        Ok(_) => {
            counter!("storefront_db.transaction.committed", 1, "operation" => operation);
            debug!(operation, attempts, "Transaction committed in {:?}", elapsed);
        }
        Err(e) => {
            counter!("storefront_db.transaction.rolled_back", 1, "operation" => operation);
            warn!(operation, attempts, error = %e, "Transaction rolled back after {:?}", elapsed);
        }
    }

    result
}

/// Commits `txn` when `result` is Ok. Otherwise rolls it back right away,
/// so a contended write lock is released before the next attempt, and
/// returns the original error.
pub async fn finish_transaction<T>(
    txn: DatabaseTransaction,
    result: Result<T, ServiceError>,
) -> Result<T, ServiceError> {
    match result {
        Ok(value) => {
            txn.commit().await.map_err(|e| {
                error!("Failed to commit transaction: {}", e);
                ServiceError::from(e)
            })?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = txn.rollback().await {
                warn!(error = %rollback, "Rollback failed");
            }
            Err(e)
        }
    }
}

/// Runs database migrations
///
/// # Errors
/// Returns a `ServiceError` if migrations fail to execute
pub async fn run_migrations(pool: &DbPool) -> Result<(), ServiceError> {
    info!("Running database migrations");
    let start = Instant::now();

    let result = crate::migrator::Migrator::up(pool, None)
        .await
        .map_err(ServiceError::from);

    let elapsed = start.elapsed();
    match &result {
        Ok(_) => info!(
            "Database migrations completed successfully in {:?}",
            elapsed
        ),
        Err(e) => error!("Database migrations failed after {:?}: {}", elapsed, e),
    }

    result
}

/// Checks if the database connection is active
pub async fn check_connection(pool: &DbPool) -> Result<(), ServiceError> {
    debug!("Checking database connection");
    let start = Instant::now();

    let result = pool.ping().await.map_err(ServiceError::from);

    let elapsed = start.elapsed();
    match &result {
        Ok(_) => {
            debug!("Database connection check successful in {:?}", elapsed);
            gauge!("storefront_db.connection_latency", elapsed.as_millis() as f64);
        }
        Err(e) => {
            error!(
                "Database connection check failed after {:?}: {}",
                elapsed, e
            );
            counter!("storefront_db.connection_failures", 1);
        }
    }

    result
}
