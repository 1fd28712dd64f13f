//! In-memory `blob:` URL store for sibling scripts.

use dashmap::DashMap;
use url::Url;
use uuid::Uuid;

/// Looks up the script behind a `blob:` URL.
pub trait ScriptResolver: Send + Sync {
    fn resolve(&self, url: &Url) -> Option<String>;
}

/// Script sources keyed by object URL. Lookups are synchronous, so a URL
/// revoked right after a sibling is constructed has already been read.
#[derive(Debug)]
pub struct BlobStore {
    origin: String,
    entries: DashMap<String, String>,
}

impl BlobStore {
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            entries: DashMap::new(),
        }
    }

    pub fn create_object_url(&self, source: impl Into<String>) -> String {
        let url = format!("blob:{}/{}", self.origin, Uuid::new_v4());
        self.entries.insert(url.clone(), source.into());
        url
    }

    /// Returns true if the URL was registered.
    pub fn revoke_object_url(&self, url: &str) -> bool {
        self.entries.remove(url).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for BlobStore {
    fn default() -> Self {
        Self::new("null")
    }
}

impl ScriptResolver for BlobStore {
    fn resolve(&self, url: &Url) -> Option<String> {
        self.entries.get(url.as_str()).map(|entry| entry.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_resolve_revoke() {
        let store = BlobStore::new("https://example.com");
        let url = store.create_object_url("export default {}");
        assert!(url.starts_with("blob:https://example.com/"));

        let parsed = Url::parse(&url).unwrap();
        assert_eq!(parsed.scheme(), "blob");
        assert_eq!(store.resolve(&parsed).as_deref(), Some("export default {}"));

        assert!(store.revoke_object_url(&url));
        assert!(!store.revoke_object_url(&url));
        assert_eq!(store.resolve(&parsed), None);
        assert!(store.is_empty());
    }
}
