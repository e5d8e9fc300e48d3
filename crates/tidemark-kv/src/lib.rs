//! KV backend for the tidemark engine, on top of [`redb`].
//!
//! [`KvStreamDb`] owns the two record families (`objects`, `activities`)
//! plus their index tables (see [`tables`]) and implements the full
//! backend contract: dehydrated storage, the map/reduce query path, the
//! hydration pass that reassembles nested activities, and the sub-activity
//! lifecycle.
//!
//! All store access goes through [`KvStreamDb::read_with`] /
//! [`KvStreamDb::write_with`], which run the blocking redb transaction on
//! the current tokio worker.

mod backend_impl;
mod hydrate;
mod paginate;
mod query;
mod sub_activity_ops;
mod table_ops;
mod tables;
mod tx_ops;


use std::path::PathBuf;

use redb_bincode::{ReadTransaction, ReadableTable as _, WriteTransaction};
use snafu::{Location, ResultExt as _, Snafu};
use tidemark_backend::BackendError;
use tokio::task::JoinError;
use tracing::debug;

pub use self::tables::*;

pub(crate) const LOG_TARGET: &str = "tidemark::db";

#[derive(Debug, Snafu)]
pub enum DbError {
    Database {
        source: redb::DatabaseError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(transparent)]
    Table {
        source: redb::TableError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(transparent)]
    Storage {
        source: redb::StorageError,
        #[snafu(implicit)]
        location: Location,
    },
    Transaction {
        #[snafu(source(from(redb::TransactionError, Box::new)))]
        source: Box<redb::TransactionError>,
        #[snafu(implicit)]
        location: Location,
    },
    Commit {
        source: redb::CommitError,
        #[snafu(implicit)]
        location: Location,
    },
    DbVersionTooHigh {
        db_ver: u64,
        code_ver: u64,
        #[snafu(implicit)]
        location: Location,
    },
    Join {
        source: JoinError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("stored record `{id}` is not valid JSON"))]
    CorruptRecord {
        id: String,
        source: serde_json::Error,
        #[snafu(implicit)]
        location: Location,
    },
}

pub type DbResult<T> = std::result::Result<T, DbError>;

impl From<DbError> for BackendError {
    fn from(err: DbError) -> Self {
        BackendError::store(err)
    }
}

/// The KV store behind the backend contract.
#[derive(Debug)]
pub struct KvStreamDb {
    inner: redb_bincode::Database,
}

impl KvStreamDb {
    const DB_VER: u64 = 0;

    pub async fn open(path: impl Into<PathBuf>) -> DbResult<Self> {
        let path = path.into();
        debug!(target: LOG_TARGET, path = %path.display(), "Opening database");

        let inner = tokio::task::spawn_blocking(move || redb::Database::create(path))
            .await
            .context(JoinSnafu)?
            .context(DatabaseSnafu)?;

        Self::open_inner(inner).await
    }

    pub async fn new_in_memory() -> DbResult<Self> {
        debug!(target: LOG_TARGET, "Opening in-memory database");
        let inner = redb::Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .context(DatabaseSnafu)?;
        Self::open_inner(inner).await
    }

    async fn open_inner(inner: redb::Database) -> DbResult<Self> {
        let db = Self {
            inner: redb_bincode::Database::from(inner),
        };

        db.write_with(|tx| {
            Self::init_tables_tx(tx)?;
            Self::handle_db_ver_tx(tx)
        })
        .await?;

        Ok(db)
    }

    pub async fn write_with<T>(
        &self,
        f: impl FnOnce(&'_ WriteTransaction) -> DbResult<T>,
    ) -> DbResult<T> {
        tokio::task::block_in_place(|| {
            let dbtx = self.inner.begin_write().context(TransactionSnafu)?;
            let res = f(&dbtx)?;

            dbtx.commit().context(CommitSnafu)?;

            Ok(res)
        })
    }

    pub async fn read_with<T>(
        &self,
        f: impl FnOnce(&'_ ReadTransaction) -> DbResult<T>,
    ) -> DbResult<T> {
        tokio::task::block_in_place(|| {
            let dbtx = self.inner.begin_read().context(TransactionSnafu)?;
            f(&dbtx)
        })
    }

    fn handle_db_ver_tx(tx: &WriteTransaction) -> DbResult<()> {
        let mut table = tx.open_table(&db_version::TABLE)?;
        let db_ver = table.get(&())?.map(|g| g.value());
        match db_ver {
            None => {
                table.insert(&(), &Self::DB_VER)?;
                Ok(())
            }
            Some(db_ver) if Self::DB_VER < db_ver => DbVersionTooHighSnafu {
                db_ver,
                code_ver: Self::DB_VER,
            }
            .fail(),
            Some(_) => Ok(()),
        }
    }
}
