//! Named buckets and generation naming.

use serde::{Deserialize, Serialize};
use tokio_rusqlite::params;

use super::connection::CacheDb;
use crate::Error;
use crate::types::Category;

/// The three buckets of a worker generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum BucketKind {
    /// Pages, offline pages and install-time routes.
    Core,
    Assets,
    Api,
}

impl BucketKind {
    /// Bucket a category's responses are written to. Mutating requests are never cached.
    pub fn for_category(category: Category) -> Option<Self> {
        match category {
            Category::Asset => Some(BucketKind::Assets),
            Category::Api => Some(BucketKind::Api),
            Category::Page => Some(BucketKind::Core),
            Category::Mutating => None,
        }
    }
}

/// Bucket names derived from `{app_name, cache_version}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketNames {
    core: String,
    assets: String,
    api: String,
    suffix: String,
}

impl BucketNames {
    pub fn new(app_name: &str, cache_version: &str) -> Self {
        Self {
            core: format!("{app_name}-{cache_version}"),
            assets: format!("{app_name}-assets-{cache_version}"),
            api: format!("{app_name}-api-{cache_version}"),
            suffix: format!("-{cache_version}"),
        }
    }

    pub fn get(&self, kind: BucketKind) -> &str {
        match kind {
            BucketKind::Core => &self.core,
            BucketKind::Assets => &self.assets,
            BucketKind::Api => &self.api,
        }
    }

    pub fn core(&self) -> &str {
        &self.core
    }

    pub fn assets(&self) -> &str {
        &self.assets
    }

    pub fn api(&self) -> &str {
        &self.api
    }

    pub fn all(&self) -> [&str; 3] {
        [&self.core, &self.assets, &self.api]
    }

    /// True when `name` ends with this generation's `-{cache_version}` tag.
    /// The version may itself contain `-`.
    pub fn is_current_generation(&self, name: &str) -> bool {
        name.ends_with(&self.suffix)
    }
}

impl CacheDb {
    /// Create a bucket if it does not exist. Opening twice is a no-op.
    pub async fn open_bucket(&self, name: &str) -> Result<(), Error> {
        let name = name.to_string();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT OR IGNORE INTO buckets (name, created_at) VALUES (?1, ?2)",
                    params![name, chrono::Utc::now().to_rfc3339()],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    pub async fn has_bucket(&self, name: &str) -> Result<bool, Error> {
        let name = name.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let exists = conn.query_row(
                    "SELECT EXISTS(SELECT 1 FROM buckets WHERE name = ?1)",
                    params![name],
                    |row| row.get(0),
                )?;
                Ok(exists)
            })
            .await
            .map_err(Error::from)
    }

    /// Bucket names in creation order.
    pub async fn bucket_names(&self) -> Result<Vec<String>, Error> {
        self.conn
            .call(|conn| -> Result<Vec<String>, Error> {
                let mut stmt = conn.prepare("SELECT name FROM buckets ORDER BY created_at, rowid")?;
                let names = stmt.query_map([], |row| row.get(0))?.collect::<Result<Vec<String>, _>>()?;
                Ok(names)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete a bucket and its entries. Returns whether the bucket existed.
    pub async fn delete_bucket(&self, name: &str) -> Result<bool, Error> {
        let name = name.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM entries WHERE bucket = ?1", params![name])?;
                let deleted = tx.execute("DELETE FROM buckets WHERE name = ?1", params![name])?;
                tx.commit()?;
                Ok(deleted > 0)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete every bucket. Returns the number of buckets removed; 0 on an empty store.
    pub async fn clear_all(&self) -> Result<usize, Error> {
        self.conn
            .call(|conn| -> Result<usize, Error> {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM entries", [])?;
                let deleted = tx.execute("DELETE FROM buckets", [])?;
                tx.commit()?;
                Ok(deleted)
            })
            .await
            .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_names() {
        let names = BucketNames::new("shop", "v2");
        assert_eq!(names.core(), "shop-v2");
        assert_eq!(names.assets(), "shop-assets-v2");
        assert_eq!(names.api(), "shop-api-v2");
        assert_eq!(names.get(BucketKind::Assets), "shop-assets-v2");
    }

    #[test]
    fn test_current_generation_is_suffix_match() {
        let names = BucketNames::new("shop", "v2");
        assert!(names.is_current_generation("shop-v2"));
        assert!(names.is_current_generation("shop-api-v2"));
        assert!(!names.is_current_generation("shop-v1"));
        assert!(!names.is_current_generation("shop-v22"));
        assert!(!names.is_current_generation("shop-v2-old"));
    }

    #[test]
    fn test_current_generation_with_dashed_version() {
        let names = BucketNames::new("app", "1.0-beta");
        assert_eq!(names.assets(), "app-assets-1.0-beta");
        for name in names.all() {
            assert!(names.is_current_generation(name));
        }
        assert!(!names.is_current_generation("app-v1"));
        assert!(!names.is_current_generation("app-api-1.0"));
        assert!(!names.is_current_generation("app-1.0-beta2"));
    }

    #[test]
    fn test_bucket_for_category() {
        assert_eq!(BucketKind::for_category(Category::Page), Some(BucketKind::Core));
        assert_eq!(BucketKind::for_category(Category::Asset), Some(BucketKind::Assets));
        assert_eq!(BucketKind::for_category(Category::Api), Some(BucketKind::Api));
        assert_eq!(BucketKind::for_category(Category::Mutating), None);
    }

    #[tokio::test]
    async fn test_open_bucket_idempotent() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.open_bucket("app-v1").await.unwrap();
        db.open_bucket("app-v1").await.unwrap();
        assert_eq!(db.bucket_names().await.unwrap(), vec!["app-v1"]);
    }

    #[tokio::test]
    async fn test_delete_bucket() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.open_bucket("app-v1").await.unwrap();
        assert!(db.delete_bucket("app-v1").await.unwrap());
        assert!(!db.delete_bucket("app-v1").await.unwrap());
        assert!(!db.has_bucket("app-v1").await.unwrap());
    }

    #[tokio::test]
    async fn test_clear_all_idempotent() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.open_bucket("app-v1").await.unwrap();
        db.open_bucket("app-assets-v1").await.unwrap();
        assert_eq!(db.clear_all().await.unwrap(), 2);
        assert_eq!(db.clear_all().await.unwrap(), 0);
        assert!(db.bucket_names().await.unwrap().is_empty());
    }
}
