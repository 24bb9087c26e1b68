// SPDX-FileCopyrightText: Copyright © 2025 APM Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Append-only log of materialised image configurations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use thiserror::Error;

use crate::image::ImageConfig;

/// One materialised configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub image_name: String,
    pub config: ImageConfig,
    pub date: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Most recent entry, if any
    pub async fn latest(&self) -> Result<Option<Entry>, Error> {
        let row = sqlx::query_as::<_, encoding::Row>(
            "
            SELECT imagename, config, imagedate
            FROM host_image_history
            ORDER BY imagedate DESC
            LIMIT 1;
            ",
        )
        .fetch_optional(&self.pool)
        .await?;

        row.map(Entry::try_from).transpose()
    }

    /// Deep equality of the incoming config against the latest entry.
    /// Serialisation order does not matter.
    pub async fn is_latest_config_same(&self, config: &ImageConfig) -> Result<bool, Error> {
        Ok(match self.latest().await? {
            Some(entry) => &entry.config == config,
            None => false,
        })
    }

    /// Record a materialised config with the current timestamp
    pub async fn save_image(&self, image_name: &str, config: &ImageConfig) -> Result<(), Error> {
        sqlx::query(
            "
            INSERT OR REPLACE INTO host_image_history (imagename, config, imagedate)
            VALUES (?, ?, ?);
            ",
        )
        .bind(image_name)
        .bind(serde_json::to_string(config)?)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Newest-first page of entries, optionally narrowed by an image-name
    /// substring. Returns the page plus the unbounded match count.
    pub async fn histories_filtered(
        &self,
        name: Option<&str>,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> Result<(Vec<Entry>, u64), Error> {
        let pattern = format!("%{}%", name.unwrap_or_default());

        let rows = sqlx::query_as::<_, encoding::Row>(
            "
            SELECT imagename, config, imagedate
            FROM host_image_history
            WHERE imagename LIKE ?
            ORDER BY imagedate DESC
            LIMIT ? OFFSET ?;
            ",
        )
        .bind(&pattern)
        .bind(limit.unwrap_or(u32::MAX))
        .bind(offset.unwrap_or(0))
        .fetch_all(&self.pool)
        .await?;

        let (total,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM host_image_history WHERE imagename LIKE ?;")
                .bind(&pattern)
                .fetch_one(&self.pool)
                .await?;

        let entries = rows
            .into_iter()
            .map(Entry::try_from)
            .collect::<Result<_, _>>()?;

        Ok((entries, total as u64))
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("sqlx")]
    Sqlx(#[from] sqlx::Error),
    #[error("sqlx migration")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("config encoding")]
    Encoding(#[from] serde_json::Error),
}

mod encoding {
    use chrono::{DateTime, Utc};
    use sqlx::FromRow;

    use super::{Entry, Error};

    #[derive(FromRow)]
    pub struct Row {
        pub imagename: String,
        pub config: String,
        pub imagedate: DateTime<Utc>,
    }

    impl TryFrom<Row> for Entry {
        type Error = Error;

        fn try_from(row: Row) -> Result<Self, Self::Error> {
            Ok(Entry {
                image_name: row.imagename,
                config: serde_json::from_str(&row.config)?,
                date: row.imagedate,
            })
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::image::ImageConfig;

    async fn memory_db() -> Database {
        Database::new(crate::db::memory_pool().await)
    }

    #[tokio::test]
    async fn latest_config_dedup() {
        let db = memory_db().await;

        let mut config = ImageConfig::default_for("base:latest");
        assert!(!db.is_latest_config_same(&config).await.unwrap());

        db.save_image("os", &config).await.unwrap();
        assert!(db.is_latest_config_same(&config).await.unwrap());

        config.add_install_package("curl");
        assert!(!db.is_latest_config_same(&config).await.unwrap());
    }

    #[tokio::test]
    async fn filtered_pagination_newest_first() {
        let db = memory_db().await;

        for i in 0..5 {
            let config = ImageConfig::default_for(format!("base:{i}"));
            db.save_image(&format!("os-{i}"), &config).await.unwrap();
            // ensure distinct timestamps at second resolution
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        let (page, total) = db.histories_filtered(None, Some(2), Some(0)).await.unwrap();
        assert_eq!(total, 5);
        assert_eq!(page.len(), 2);
        assert!(page[0].date >= page[1].date);

        let (hits, total) = db.histories_filtered(Some("os-3"), None, None).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(hits[0].image_name, "os-3");
        assert_eq!(hits[0].config.image, "base:3");
    }
}
