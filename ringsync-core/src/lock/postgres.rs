use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{Connection, Executor};

use super::{LockBackend, LockLease};
use crate::config::schema::LockConfig;
use crate::error::{Error, Result};

/// Transaction-scoped Postgres advisory lock.
///
/// Each attempt opens its own connection, bounds how long the transaction
/// may sit idle, and takes `pg_try_advisory_xact_lock`. Committing (or the
/// server aborting an idle transaction) releases the lock.
#[derive(Debug, Clone)]
pub struct PgAdvisoryLock {
    options: PgConnectOptions,
    lock_id: i64,
    idle_timeout: Duration,
    connect_timeout: Duration,
}

impl PgAdvisoryLock {
    pub fn new(config: &LockConfig) -> Result<Self> {
        let options = match &config.connection_url {
            Some(url) => url.parse::<PgConnectOptions>().map_err(|err| {
                Error::Config(format!("invalid lock connection url: {err}"))
            })?,
            None => {
                let mut options = PgConnectOptions::new().port(config.port);
                if let Some(host) = &config.host {
                    options = options.host(host);
                }
                if let Some(user) = &config.user {
                    options = options.username(user);
                }
                if let Some(password) = &config.password {
                    options = options.password(password);
                }
                if let Some(database) = &config.database {
                    options = options.database(database);
                }
                options
            }
        };

        Ok(Self {
            options,
            lock_id: config.lock_id,
            idle_timeout: Duration::from_millis(config.idle_timeout_ms),
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
        })
    }

    async fn connect(&self) -> Result<PgConnection> {
        tokio::time::timeout(self.connect_timeout, PgConnection::connect_with(&self.options))
            .await
            .map_err(|_| Error::LockUnavailable("timed out connecting to lock database".to_owned()))?
            .map_err(Error::from)
    }

    async fn begin_and_try(&self, connection: &mut PgConnection) -> Result<bool> {
        let set_timeout = format!(
            "SET idle_in_transaction_session_timeout = {}",
            self.idle_timeout.as_millis()
        );
        (&mut *connection).execute(sqlx::raw_sql(&set_timeout)).await?;
        (&mut *connection).execute(sqlx::raw_sql("BEGIN")).await?;
        let acquired = sqlx::query_scalar::<_, bool>("SELECT pg_try_advisory_xact_lock($1)")
            .bind(self.lock_id)
            .fetch_one(&mut *connection)
            .await?;
        Ok(acquired)
    }
}

#[async_trait]
impl LockBackend for PgAdvisoryLock {
    async fn try_acquire(&self) -> Result<Option<Box<dyn LockLease>>> {
        let mut connection = self.connect().await?;

        match self.begin_and_try(&mut connection).await {
            Ok(true) => {
                tracing::debug!(lock_id = self.lock_id, "acquired advisory lock");
                Ok(Some(Box::new(PgLease { connection })))
            }
            Ok(false) => {
                finish(connection).await?;
                Ok(None)
            }
            Err(err) => {
                if let Err(close_err) = connection.close().await {
                    tracing::debug!(%close_err, "failed to close lock connection");
                }
                Err(err)
            }
        }
    }
}

struct PgLease {
    connection: PgConnection,
}

#[async_trait]
impl LockLease for PgLease {
    async fn release(self: Box<Self>) -> Result<()> {
        finish(self.connection).await
    }
}

async fn finish(mut connection: PgConnection) -> Result<()> {
    let committed = (&mut connection).execute(sqlx::raw_sql("COMMIT")).await;
    connection.close().await?;
    committed?;
    Ok(())
}
