//! Cached response storage and lookup.

use serde::{Deserialize, Serialize};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite;

use super::connection::CacheDb;
use super::hash::compute_cache_key;
use crate::Error;

/// A stored response. Bodies round-trip byte-for-byte.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub method: String,
    pub url: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub stored_at: String,
}

impl CachedResponse {
    /// Build an entry stamped with the current time.
    pub fn new(method: &str, url: &str, status: u16, headers: Vec<(String, String)>, body: Vec<u8>) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            url: url.to_string(),
            status,
            headers,
            body,
            stored_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
    }
}

/// Per-bucket totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct BucketStats {
    pub name: String,
    pub entries: i64,
    pub bytes: i64,
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, String, u16, String, Vec<u8>, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?))
}

fn decode(
    (method, url, status, headers_json, body, stored_at): (String, String, u16, String, Vec<u8>, String),
) -> Result<CachedResponse, Error> {
    let headers = serde_json::from_str(&headers_json).map_err(|e| Error::CorruptEntry(format!("{url}: {e}")))?;
    Ok(CachedResponse { method, url, status, headers, body, stored_at })
}

impl CacheDb {
    /// Store a response under `(bucket, method, url)`, replacing any existing entry.
    ///
    /// The bucket is opened on demand.
    pub async fn put(&self, bucket: &str, response: &CachedResponse) -> Result<(), Error> {
        let bucket = bucket.to_string();
        let key = compute_cache_key(&response.method, &response.url);
        let headers_json =
            serde_json::to_string(&response.headers).map_err(|e| Error::CorruptEntry(e.to_string()))?;
        let response = response.clone();

        self.conn
            .call(move |conn| -> Result<(), Error> {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT OR IGNORE INTO buckets (name, created_at) VALUES (?1, ?2)",
                    params![bucket, chrono::Utc::now().to_rfc3339()],
                )?;
                tx.execute(
                    "INSERT INTO entries (bucket, key, method, url, status, headers_json, body, stored_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                     ON CONFLICT(bucket, key) DO UPDATE SET
                        status = excluded.status,
                        headers_json = excluded.headers_json,
                        body = excluded.body,
                        stored_at = excluded.stored_at",
                    params![
                        bucket,
                        key,
                        response.method,
                        response.url,
                        response.status,
                        headers_json,
                        response.body,
                        response.stored_at,
                    ],
                )?;
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Look up a request in one bucket.
    pub async fn match_entry(&self, bucket: &str, method: &str, url: &str) -> Result<Option<CachedResponse>, Error> {
        let bucket = bucket.to_string();
        let key = compute_cache_key(method, url);
        let row = self
            .conn
            .call(move |conn| -> Result<Option<_>, Error> {
                let result = conn.query_row(
                    "SELECT method, url, status, headers_json, body, stored_at
                     FROM entries WHERE bucket = ?1 AND key = ?2",
                    params![bucket, key],
                    row_to_entry,
                );
                match result {
                    Ok(row) => Ok(Some(row)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)?;

        row.map(decode).transpose()
    }

    /// Look up a request across every bucket, oldest bucket first.
    pub async fn match_any(&self, method: &str, url: &str) -> Result<Option<CachedResponse>, Error> {
        let key = compute_cache_key(method, url);
        let row = self
            .conn
            .call(move |conn| -> Result<Option<_>, Error> {
                let result = conn.query_row(
                    "SELECT e.method, e.url, e.status, e.headers_json, e.body, e.stored_at
                     FROM entries e JOIN buckets b ON b.name = e.bucket
                     WHERE e.key = ?1
                     ORDER BY b.created_at, b.rowid
                     LIMIT 1",
                    params![key],
                    row_to_entry,
                );
                match result {
                    Ok(row) => Ok(Some(row)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)?;

        row.map(decode).transpose()
    }

    pub async fn entry_count(&self, bucket: &str) -> Result<i64, Error> {
        let bucket = bucket.to_string();
        self.conn
            .call(move |conn| -> Result<i64, Error> {
                let count = conn.query_row("SELECT COUNT(*) FROM entries WHERE bucket = ?1", params![bucket], |row| {
                    row.get(0)
                })?;
                Ok(count)
            })
            .await
            .map_err(Error::from)
    }

    /// URLs stored in a bucket, sorted.
    pub async fn entry_urls(&self, bucket: &str) -> Result<Vec<String>, Error> {
        let bucket = bucket.to_string();
        self.conn
            .call(move |conn| -> Result<Vec<String>, Error> {
                let mut stmt = conn.prepare("SELECT url FROM entries WHERE bucket = ?1 ORDER BY url")?;
                let urls = stmt.query_map(params![bucket], |row| row.get(0))?.collect::<Result<Vec<String>, _>>()?;
                Ok(urls)
            })
            .await
            .map_err(Error::from)
    }

    /// Entry count and body bytes for every bucket, in creation order.
    pub async fn bucket_stats(&self) -> Result<Vec<BucketStats>, Error> {
        self.conn
            .call(|conn| -> Result<Vec<BucketStats>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT b.name, COUNT(e.key), COALESCE(SUM(LENGTH(e.body)), 0)
                     FROM buckets b LEFT JOIN entries e ON e.bucket = b.name
                     GROUP BY b.name
                     ORDER BY b.created_at, b.rowid",
                )?;
                let stats = stmt
                    .query_map([], |row| Ok(BucketStats { name: row.get(0)?, entries: row.get(1)?, bytes: row.get(2)? }))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(stats)
            })
            .await
            .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(url: &str, body: &[u8]) -> CachedResponse {
        CachedResponse::new("GET", url, 200, vec![("Content-Type".into(), "text/css".into())], body.to_vec())
    }

    #[tokio::test]
    async fn test_put_and_match_round_trip() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let body: Vec<u8> = (0u8..=255).collect();
        let stored = entry("https://app.test/a.bin", &body);
        db.put("app-assets-v1", &stored).await.unwrap();

        let found = db.match_entry("app-assets-v1", "GET", "https://app.test/a.bin").await.unwrap().unwrap();
        assert_eq!(found, stored);
        assert_eq!(found.body, body);
        assert_eq!(found.header("content-type"), Some("text/css"));
    }

    #[tokio::test]
    async fn test_put_opens_bucket() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.put("app-v1", &entry("https://app.test/", b"home")).await.unwrap();
        assert!(db.has_bucket("app-v1").await.unwrap());
    }

    #[tokio::test]
    async fn test_put_replaces() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.put("app-v1", &entry("https://app.test/", b"old")).await.unwrap();
        db.put("app-v1", &entry("https://app.test/", b"new")).await.unwrap();

        let found = db.match_entry("app-v1", "GET", "https://app.test/").await.unwrap().unwrap();
        assert_eq!(found.body, b"new");
        assert_eq!(db.entry_count("app-v1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_match_is_method_and_bucket_scoped() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.put("app-v1", &entry("https://app.test/", b"home")).await.unwrap();

        assert!(db.match_entry("app-v1", "POST", "https://app.test/").await.unwrap().is_none());
        assert!(db.match_entry("app-api-v1", "GET", "https://app.test/").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_match_any_searches_all_buckets() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.open_bucket("app-v1").await.unwrap();
        db.put("app-assets-v1", &entry("https://app.test/offline.html", b"offline")).await.unwrap();

        let found = db.match_any("GET", "https://app.test/offline.html").await.unwrap().unwrap();
        assert_eq!(found.body, b"offline");
        assert!(db.match_any("GET", "https://app.test/missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_bucket_removes_entries() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.put("app-v1", &entry("https://app.test/", b"home")).await.unwrap();
        db.delete_bucket("app-v1").await.unwrap();
        assert!(db.match_any("GET", "https://app.test/").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_bucket_stats() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.open_bucket("app-api-v1").await.unwrap();
        db.put("app-v1", &entry("https://app.test/", b"home")).await.unwrap();
        db.put("app-v1", &entry("https://app.test/about", b"about")).await.unwrap();

        let stats = db.bucket_stats().await.unwrap();
        let core = stats.iter().find(|s| s.name == "app-v1").unwrap();
        assert_eq!(core.entries, 2);
        assert_eq!(core.bytes, 9);
        let api = stats.iter().find(|s| s.name == "app-api-v1").unwrap();
        assert_eq!(api.entries, 0);
        assert_eq!(api.bytes, 0);

        let urls = db.entry_urls("app-v1").await.unwrap();
        assert_eq!(urls, vec!["https://app.test/", "https://app.test/about"]);
    }
}
