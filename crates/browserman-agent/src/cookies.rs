//! Per-hostname cookie storage.
//!
//! Cookies arrive from a browser extension in its own export format and are
//! replayed into a fresh browsing context before navigating to the same
//! host. The same-site attribute is dropped before injection.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::Result;

/// One stored cookie.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CookieRecord {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
    /// Remaining export fields (secure, httpOnly, expirationDate, ...).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl CookieRecord {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: None,
            path: None,
            same_site: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Copy of this cookie without the same-site attribute.
    pub fn without_same_site(&self) -> Self {
        Self {
            same_site: None,
            ..self.clone()
        }
    }
}

/// Strip the same-site attribute from every cookie in a list.
pub fn prepare_for_injection(cookies: &[CookieRecord]) -> Vec<CookieRecord> {
    cookies.iter().map(CookieRecord::without_same_site).collect()
}

/// Hostname of a URL, if it has one.
pub fn hostname(url: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
}

/// Shared, read-mostly cookie store keyed by hostname.
#[async_trait]
pub trait CookieStore: Send + Sync {
    async fn get(&self, hostname: &str) -> Result<Option<Vec<CookieRecord>>>;
    async fn put(&self, hostname: &str, cookies: Vec<CookieRecord>) -> Result<()>;
}

/// Concurrent in-memory store, optionally mirrored to a JSON file.
pub struct CookieJar {
    entries: DashMap<String, Vec<CookieRecord>>,
    path: Option<PathBuf>,
    write_lock: tokio::sync::Mutex<()>,
}

impl CookieJar {
    pub fn in_memory() -> Self {
        Self {
            entries: DashMap::new(),
            path: None,
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Open a file-backed jar, loading existing entries if the file exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = DashMap::new();
        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            match serde_json::from_str::<HashMap<String, Vec<CookieRecord>>>(&content) {
                Ok(map) => {
                    debug!("loaded cookies for {} hosts from {}", map.len(), path.display());
                    for (host, cookies) in map {
                        entries.insert(host, cookies);
                    }
                }
                Err(e) => warn!("ignoring unreadable cookie file {}: {}", path.display(), e),
            }
        }
        Ok(Self {
            entries,
            path: Some(path),
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Number of hosts with stored cookies.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    async fn persist(&self) -> Result<()> {
        let Some(ref path) = self.path else {
            return Ok(());
        };
        let _guard = self.write_lock.lock().await;
        let snapshot: HashMap<String, Vec<CookieRecord>> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        let json = serde_json::to_vec_pretty(&snapshot).map_err(std::io::Error::other)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, json).await?;
        Ok(())
    }
}

#[async_trait]
impl CookieStore for CookieJar {
    async fn get(&self, hostname: &str) -> Result<Option<Vec<CookieRecord>>> {
        Ok(self.entries.get(hostname).map(|e| e.value().clone()))
    }

    async fn put(&self, hostname: &str, cookies: Vec<CookieRecord>) -> Result<()> {
        debug!("storing {} cookies for {}", cookies.len(), hostname);
        self.entries.insert(hostname.to_string(), cookies);
        self.persist().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXPORT: &str = r#"[
        {"domain": ".example.com", "expirationDate": 1767225600.5, "hostOnly": false,
         "httpOnly": true, "name": "sid", "path": "/", "sameSite": "no_restriction",
         "secure": true, "session": false, "storeId": "0", "value": "abc"},
        {"domain": "www.example.com", "name": "theme", "path": "/", "value": "dark"}
    ]"#;

    #[test]
    fn test_decode_extension_export() {
        let cookies: Vec<CookieRecord> = serde_json::from_str(EXPORT).unwrap();
        assert_eq!(cookies.len(), 2);
        assert_eq!(cookies[0].name, "sid");
        assert_eq!(cookies[0].same_site.as_deref(), Some("no_restriction"));
        assert_eq!(cookies[0].extra.get("httpOnly"), Some(&serde_json::json!(true)));
        assert!(cookies[1].same_site.is_none());
    }

    #[test]
    fn test_same_site_stripped() {
        let cookies: Vec<CookieRecord> = serde_json::from_str(EXPORT).unwrap();
        let prepared = prepare_for_injection(&cookies);
        assert!(prepared.iter().all(|c| c.same_site.is_none()));
        assert_eq!(prepared[0].value, "abc");
        assert_eq!(prepared[0].domain.as_deref(), Some(".example.com"));
        let json = serde_json::to_string(&prepared[0]).unwrap();
        assert!(!json.contains("sameSite"));
    }

    #[test]
    fn test_hostname() {
        assert_eq!(
            hostname("https://www.doordash.com/store/1?x=y").as_deref(),
            Some("www.doordash.com")
        );
        assert_eq!(hostname("not a url"), None);
        assert_eq!(hostname("data:text/html,hi"), None);
    }

    #[tokio::test]
    async fn test_in_memory_round_trip() {
        let jar = CookieJar::in_memory();
        assert!(jar.get("example.com").await.unwrap().is_none());
        jar.put("example.com", vec![CookieRecord::new("a", "1")])
            .await
            .unwrap();
        let got = jar.get("example.com").await.unwrap().unwrap();
        assert_eq!(got, vec![CookieRecord::new("a", "1")]);
        assert!(jar.get("other.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_backed_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("cookies.json");

        let jar = CookieJar::open(&path).unwrap();
        let cookies: Vec<CookieRecord> = serde_json::from_str(EXPORT).unwrap();
        jar.put("www.example.com", cookies.clone()).await.unwrap();
        drop(jar);

        let reopened = CookieJar::open(&path).unwrap();
        assert_eq!(reopened.len(), 1);
        let got = reopened.get("www.example.com").await.unwrap().unwrap();
        assert_eq!(got, cookies);
    }
}
