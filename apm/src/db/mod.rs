// SPDX-FileCopyrightText: Copyright © 2025 APM Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Persistence. One SQLite file carries both the package mirror and the
//! image history; the stores share a pool and a single migration set.

use std::path::Path;

use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Pool, Sqlite};
use thiserror::Error;

pub mod history;
pub mod mirror;

/// Open (creating if missing) the apm database and run migrations
pub async fn connect(path: impl AsRef<Path>) -> Result<Pool<Sqlite>, ConnectError> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .foreign_keys(true);

    connect_with(options).await
}

async fn connect_with(options: SqliteConnectOptions) -> Result<Pool<Sqlite>, ConnectError> {
    let pool = sqlx::SqlitePool::connect_with(options).await?;

    sqlx::migrate!("src/db/migrations").run(&pool).await?;

    Ok(pool)
}

/// Throwaway in-memory pool for tests
#[cfg(test)]
pub async fn memory_pool() -> Pool<Sqlite> {
    use std::str::FromStr as _;

    connect_with(SqliteConnectOptions::from_str("sqlite::memory:").expect("memory dsn"))
        .await
        .expect("in-memory database")
}

/// Failure to open the store is fatal at startup
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("sqlx")]
    Sqlx(#[from] sqlx::Error),
    #[error("sqlx migration")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Result ordering for paged queries. Anything unrecognised coerces to
/// ascending rather than failing the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    #[default]
    Asc,
    Desc,
}

impl Order {
    pub fn parse(value: &str) -> Self {
        match value.to_uppercase().as_str() {
            "DESC" => Self::Desc,
            _ => Self::Asc,
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

#[cfg(test)]
mod test {
    use super::Order;

    #[test]
    fn order_coercion() {
        assert_eq!(Order::parse("desc"), Order::Desc);
        assert_eq!(Order::parse("DESC"), Order::Desc);
        assert_eq!(Order::parse("sideways"), Order::Asc);
        assert_eq!(Order::parse(""), Order::Asc);
    }
}
