// SPDX-FileCopyrightText: Copyright © 2025 APM Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::collections::HashMap;
use std::sync::Arc;

use sqlx::{Acquire, Pool, QueryBuilder, Sqlite};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::db::Order;
use crate::environment;
use crate::package::Package;

/// Filter keys accepted by [`Database::query_packages`]. External callers
/// see these names, not column names.
pub const ALLOWED_FILTER_FIELDS: &[&str] = &[
    "name",
    "section",
    "installed",
    "maintainer",
    "architecture",
    "typePackage",
    "isApp",
    "provides",
];

/// Sort keys accepted by [`Database::query_packages`]
pub const ALLOWED_SORT_FIELDS: &[&str] = &[
    "name",
    "version",
    "section",
    "installed",
    "installedSize",
    "downloadSize",
];

fn sort_column(field: &str) -> Option<&'static str> {
    Some(match field {
        "name" => "name",
        "version" => "version",
        "section" => "section",
        "installed" => "installed",
        "installedSize" => "installed_size",
        "downloadSize" => "download_size",
        _ => return None,
    })
}

/// The package mirror: a locally persisted searchable copy of the native
/// package catalogue.
#[derive(Debug, Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
    /// Serialises full catalogue replacement
    replace_lock: Arc<Mutex<()>>,
}

impl Database {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self {
            pool,
            replace_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Non-empty check: the mirror "exists" once a sync has populated it
    pub async fn exists(&self) -> Result<bool, Error> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM host_image_packages;")
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    /// Atomically replace the whole catalogue, inserting in batches
    pub async fn save_packages(&self, packages: &[Package]) -> Result<(), Error> {
        let _guard = self.replace_lock.lock().await;

        let mut transaction = self.pool.begin().await?;

        sqlx::query("DELETE FROM host_image_packages;")
            .execute(transaction.acquire().await?)
            .await?;

        for chunk in packages.chunks(environment::DB_BATCH_SIZE) {
            QueryBuilder::new(
                "
                INSERT INTO host_image_packages (
                    name,
                    version,
                    section,
                    maintainer,
                    architecture,
                    installed,
                    installed_version,
                    installed_size,
                    download_size,
                    filename,
                    description,
                    depends,
                    provides,
                    aliases,
                    changelog,
                    app_component,
                    package_type
                )
                ",
            )
            .push_values(chunk, |mut b, package| {
                b.push_bind(&package.name)
                    .push_bind(&package.version)
                    .push_bind(&package.section)
                    .push_bind(&package.maintainer)
                    .push_bind(&package.architecture)
                    .push_bind(package.installed)
                    .push_bind(&package.installed_version)
                    .push_bind(package.installed_size as i64)
                    .push_bind(package.download_size as i64)
                    .push_bind(&package.filename)
                    .push_bind(&package.description)
                    .push_bind(package.depends.join(","))
                    .push_bind(package.provides.join(","))
                    .push_bind(package.aliases.join(","))
                    .push_bind(&package.changelog)
                    .push_bind(&package.app_component)
                    .push_bind(package.package_type.to_string());
            })
            .build()
            .execute(transaction.acquire().await?)
            .await?;
        }

        transaction.commit().await?;

        Ok(())
    }

    /// All records carrying the given name, newest version first
    pub async fn packages_by_name(&self, name: &str) -> Result<Vec<Package>, Error> {
        let sql =
            format!("SELECT {COLUMNS} FROM host_image_packages WHERE name = ? ORDER BY version DESC;");
        let rows = sqlx::query_as::<_, encoding::Row>(&sql)
            .bind(name)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Package::from).collect())
    }

    /// Records whose provides list carries the given name as a whole token
    pub async fn packages_by_provider(&self, name: &str) -> Result<Vec<Package>, Error> {
        let sql = format!(
            "
            SELECT {COLUMNS} FROM host_image_packages
            WHERE (',' || provides || ',') LIKE '%,' || ? || ',%'
            ORDER BY name ASC;
            "
        );
        let rows = sqlx::query_as::<_, encoding::Row>(&sql)
            .bind(name)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Package::from).collect())
    }

    /// Substring search over names, used for wildcard expansion
    pub async fn search_like(&self, pattern: &str) -> Result<Vec<Package>, Error> {
        // glob-style `*` from the CLI becomes sql LIKE `%`
        let like = pattern.replace('*', "%");

        let sql =
            format!("SELECT {COLUMNS} FROM host_image_packages WHERE name LIKE ? ORDER BY name ASC;");
        let rows = sqlx::query_as::<_, encoding::Row>(&sql)
            .bind(like)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Package::from).collect())
    }

    /// Shell completion lookup: prefix match against the name and whole
    /// token match against provides, bounded.
    pub async fn search_multi_limit(&self, input: &str, limit: u32) -> Result<Vec<String>, Error> {
        let limit = limit.min(200);

        let rows: Vec<(String,)> = sqlx::query_as(
            "
            SELECT DISTINCT name FROM host_image_packages
            WHERE name LIKE ? || '%'
               OR (',' || provides || ',') LIKE '%,' || ? || ',%'
            ORDER BY name ASC
            LIMIT ?;
            ",
        )
        .bind(input)
        .bind(input)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    /// Filtered, sorted, paged listing
    pub async fn query_packages(
        &self,
        filters: &HashMap<String, String>,
        sort: Option<&str>,
        order: Order,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> Result<Vec<Package>, Error> {
        validate_filters(filters)?;

        let column = match sort {
            Some(field) => sort_column(field).ok_or_else(|| Error::UnknownSortField {
                field: field.to_owned(),
                allowed: ALLOWED_SORT_FIELDS.join(", "),
            })?,
            None => "name",
        };

        let mut query = QueryBuilder::new(format!("SELECT {COLUMNS} FROM host_image_packages"));
        append_filters(&mut query, filters);

        query.push(format!(" ORDER BY {column} {}", order.as_sql()));

        if let Some(limit) = limit {
            query.push(" LIMIT ").push_bind(limit);
            if let Some(offset) = offset {
                query.push(" OFFSET ").push_bind(offset);
            }
        }

        let rows = query
            .build_query_as::<encoding::Row>()
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Package::from).collect())
    }

    /// Unbounded count under the same filters as [`Self::query_packages`]
    pub async fn count_packages(&self, filters: &HashMap<String, String>) -> Result<u64, Error> {
        validate_filters(filters)?;

        let mut query = QueryBuilder::new("SELECT COUNT(*) FROM host_image_packages");
        append_filters(&mut query, filters);

        let (count,): (i64,) = query.build_query_as().fetch_one(&self.pool).await?;

        Ok(count as u64)
    }

    /// Bulk refresh of presence fields from a name → version map taken from
    /// the live system, via a temporary table join.
    pub async fn sync_installed(&self, installed: &HashMap<String, String>) -> Result<(), Error> {
        let mut transaction = self.pool.begin().await?;

        sqlx::query(
            "CREATE TEMPORARY TABLE IF NOT EXISTS installed_now (name TEXT PRIMARY KEY, version TEXT);",
        )
        .execute(transaction.acquire().await?)
        .await?;
        sqlx::query("DELETE FROM installed_now;")
            .execute(transaction.acquire().await?)
            .await?;

        let pairs: Vec<_> = installed.iter().collect();
        for chunk in pairs.chunks(environment::DB_BATCH_SIZE) {
            QueryBuilder::new("INSERT INTO installed_now (name, version) ")
                .push_values(chunk, |mut b, (name, version)| {
                    b.push_bind(*name).push_bind(*version);
                })
                .build()
                .execute(transaction.acquire().await?)
                .await?;
        }

        sqlx::query(
            "
            UPDATE host_image_packages SET
                installed = EXISTS (
                    SELECT 1 FROM installed_now i WHERE i.name = host_image_packages.name
                ),
                installed_version = (
                    SELECT i.version FROM installed_now i WHERE i.name = host_image_packages.name
                );
            ",
        )
        .execute(transaction.acquire().await?)
        .await?;

        sqlx::query("DROP TABLE installed_now;")
            .execute(transaction.acquire().await?)
            .await?;

        transaction.commit().await?;

        Ok(())
    }
}

const COLUMNS: &str = "
    name,
    version,
    section,
    maintainer,
    architecture,
    installed,
    installed_version,
    installed_size,
    download_size,
    filename,
    description,
    depends,
    provides,
    aliases,
    changelog,
    app_component,
    package_type
";

fn validate_filters(filters: &HashMap<String, String>) -> Result<(), Error> {
    for field in filters.keys() {
        if !ALLOWED_FILTER_FIELDS.contains(&field.as_str()) {
            return Err(Error::UnknownFilterField {
                field: field.clone(),
                allowed: ALLOWED_FILTER_FIELDS.join(", "),
            });
        }
    }
    Ok(())
}

fn append_filters(query: &mut QueryBuilder<'_, Sqlite>, filters: &HashMap<String, String>) {
    for (index, (field, value)) in filters.iter().enumerate() {
        query.push(if index == 0 { " WHERE " } else { " AND " });

        match field.as_str() {
            "name" => {
                query.push("name LIKE '%' || ").push_bind(value.clone()).push(" || '%'");
            }
            "section" => {
                query.push("section = ").push_bind(value.clone());
            }
            "maintainer" => {
                query.push("maintainer = ").push_bind(value.clone());
            }
            "architecture" => {
                query.push("architecture = ").push_bind(value.clone());
            }
            "installed" => {
                query.push("installed = ").push_bind(parse_bool(value));
            }
            "typePackage" => {
                query.push("package_type = ").push_bind(value.clone());
            }
            "isApp" => {
                if parse_bool(value) {
                    query.push("app_component IS NOT NULL AND app_component != ''");
                } else {
                    query.push("(app_component IS NULL OR app_component = '')");
                }
            }
            "provides" => {
                query
                    .push("(',' || provides || ',') LIKE '%,' || ")
                    .push_bind(value.clone())
                    .push(" || ',%'");
            }
            // unreachable past validate_filters
            _ => {
                query.push("1 = 1");
            }
        }
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "true" | "1" | "yes")
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Row not found")]
    RowNotFound,
    #[error("unknown filter field `{field}`, allowed fields: {allowed}")]
    UnknownFilterField { field: String, allowed: String },
    #[error("unknown sort field `{field}`, allowed fields: {allowed}")]
    UnknownSortField { field: String, allowed: String },
    #[error("sqlx")]
    Sqlx(#[source] sqlx::Error),
    #[error("sqlx migration")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

impl From<sqlx::Error> for Error {
    fn from(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::RowNotFound => Error::RowNotFound,
            error => Error::Sqlx(error),
        }
    }
}

mod encoding {
    use sqlx::FromRow;
    use std::str::FromStr;

    use crate::package::{Package, PackageType};

    #[derive(FromRow)]
    pub struct Row {
        pub name: String,
        pub version: String,
        pub section: String,
        pub maintainer: String,
        pub architecture: String,
        pub installed: bool,
        pub installed_version: Option<String>,
        pub installed_size: i64,
        pub download_size: i64,
        pub filename: String,
        pub description: String,
        pub depends: String,
        pub provides: String,
        pub aliases: String,
        pub changelog: String,
        pub app_component: Option<String>,
        pub package_type: String,
    }

    fn split_list(joined: String) -> Vec<String> {
        if joined.is_empty() {
            vec![]
        } else {
            joined.split(',').map(str::to_owned).collect()
        }
    }

    impl From<Row> for Package {
        fn from(row: Row) -> Self {
            Package {
                name: row.name,
                version: row.version,
                section: row.section,
                maintainer: row.maintainer,
                architecture: row.architecture,
                installed: row.installed,
                installed_version: row.installed_version,
                installed_size: row.installed_size as u64,
                download_size: row.download_size as u64,
                filename: row.filename,
                description: row.description,
                depends: split_list(row.depends),
                provides: split_list(row.provides),
                aliases: split_list(row.aliases),
                changelog: row.changelog,
                app_component: row.app_component,
                package_type: PackageType::from_str(&row.package_type).unwrap_or_default(),
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    async fn memory_db() -> Database {
        Database::new(crate::db::memory_pool().await)
    }

    fn sample(name: &str, section: &str, provides: &[&str]) -> Package {
        Package {
            name: name.to_owned(),
            version: "1.0-alt1".to_owned(),
            section: section.to_owned(),
            provides: provides.iter().map(|p| (*p).to_owned()).collect(),
            description: format!("{name} package"),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn replace_and_query() {
        let db = memory_db().await;
        assert!(!db.exists().await.unwrap());

        db.save_packages(&[
            sample("hello", "devel", &[]),
            sample("vim-console", "editors", &["vim"]),
            sample("vim-gtk", "editors", &["vim", "gvim"]),
        ])
        .await
        .unwrap();

        assert!(db.exists().await.unwrap());

        let editors = db
            .query_packages(
                &HashMap::from([("section".to_owned(), "editors".to_owned())]),
                Some("name"),
                Order::Asc,
                None,
                None,
            )
            .await
            .unwrap();
        assert_eq!(editors.len(), 2);
        assert_eq!(editors[0].name, "vim-console");

        // Replacing drops what is gone
        db.save_packages(&[sample("hello", "devel", &[])]).await.unwrap();
        assert_eq!(db.count_packages(&HashMap::new()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn unknown_filter_lists_allowed() {
        let db = memory_db().await;
        let err = db
            .query_packages(
                &HashMap::from([("unknown".to_owned(), "x".to_owned())]),
                None,
                Order::Asc,
                None,
                None,
            )
            .await
            .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("unknown"));
        assert!(message.contains("name"));
        assert!(message.contains("section"));
        assert!(message.contains("installed"));
    }

    #[tokio::test]
    async fn provides_matches_whole_tokens() {
        let db = memory_db().await;
        db.save_packages(&[
            sample("vim-console", "editors", &["vim"]),
            sample("neovim", "editors", &["vim-like"]),
        ])
        .await
        .unwrap();

        let hits = db.packages_by_provider("vim").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "vim-console");
    }

    #[tokio::test]
    async fn count_agrees_with_unbounded_query() {
        let db = memory_db().await;
        let packages: Vec<_> = (0..25)
            .map(|i| sample(&format!("pkg{i:02}"), "misc", &[]))
            .collect();
        db.save_packages(&packages).await.unwrap();

        let filters = HashMap::from([("section".to_owned(), "misc".to_owned())]);
        let page = db
            .query_packages(&filters, Some("name"), Order::Asc, Some(10), Some(20))
            .await
            .unwrap();
        let total = db.count_packages(&filters).await.unwrap();

        assert_eq!(page.len(), 5);
        assert_eq!(total, 25);
    }

    #[tokio::test]
    async fn sync_installed_invariant() {
        let db = memory_db().await;
        db.save_packages(&[sample("hello", "devel", &[]), sample("vim-console", "editors", &[])])
            .await
            .unwrap();

        let installed = HashMap::from([("hello".to_owned(), "1.0-alt2".to_owned())]);
        db.sync_installed(&installed).await.unwrap();

        let all = db
            .query_packages(&HashMap::new(), None, Order::Asc, None, None)
            .await
            .unwrap();
        for package in all {
            assert_eq!(package.installed, installed.contains_key(&package.name));
            if package.installed {
                assert_eq!(package.installed_version.as_deref(), Some("1.0-alt2"));
            } else {
                assert_eq!(package.installed_version, None);
            }
        }

        // A second sync with an empty map clears everything
        db.sync_installed(&HashMap::new()).await.unwrap();
        let none_installed = db
            .count_packages(&HashMap::from([(
                "installed".to_owned(),
                "true".to_owned(),
            )]))
            .await
            .unwrap();
        assert_eq!(none_installed, 0);
    }

    #[tokio::test]
    async fn completion_lookup_bounded() {
        let db = memory_db().await;
        db.save_packages(&[
            sample("vim-console", "editors", &[]),
            sample("vim-gtk", "editors", &[]),
            sample("emacs", "editors", &["editor"]),
            sample("kate", "editors", &["editors"]),
        ])
        .await
        .unwrap();

        let names = db.search_multi_limit("vim", 10).await.unwrap();
        assert_eq!(names, vec!["vim-console", "vim-gtk"]);

        let names = db.search_multi_limit("vim", 1).await.unwrap();
        assert_eq!(names.len(), 1);

        // provides participates as whole tokens only: `editor` must match
        // the `editor` token but not the `editors` one
        let names = db.search_multi_limit("editor", 10).await.unwrap();
        assert_eq!(names, vec!["emacs"]);
    }

    #[tokio::test]
    async fn wildcard_expansion() {
        let db = memory_db().await;
        db.save_packages(&[
            sample("vim-console", "editors", &[]),
            sample("vim-gtk", "editors", &[]),
            sample("emacs", "editors", &[]),
        ])
        .await
        .unwrap();

        let hits = db.search_like("vim*").await.unwrap();
        assert_eq!(hits.len(), 2);
    }
}
