//! Offline page resolution for failed page requests.

use crate::config::OfflinePageRule;

/// Ordered prefix → offline page map with a total default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfflinePageMap {
    entries: Vec<(String, String)>,
    default_page: String,
}

impl OfflinePageMap {
    /// Build from configured rules. Patterns are prefixes; a `*` ends the prefix.
    pub fn new(rules: &[OfflinePageRule], default_page: impl Into<String>) -> Self {
        let entries = rules
            .iter()
            .map(|rule| {
                let prefix = rule.pattern.split_once('*').map_or(rule.pattern.as_str(), |(p, _)| p);
                (prefix.to_string(), rule.page.clone())
            })
            .collect();
        Self { entries, default_page: default_page.into() }
    }

    /// First prefix match in configuration order, else the default page.
    ///
    /// Order is the only tie-break: an earlier `/a*` beats a later, longer `/a/b*`.
    pub fn resolve(&self, path: &str) -> &str {
        self.entries
            .iter()
            .find(|(prefix, _)| path.starts_with(prefix.as_str()))
            .map_or(self.default_page.as_str(), |(_, page)| page.as_str())
    }

    pub fn default_page(&self) -> &str {
        &self.default_page
    }

    /// Every page this map can resolve to, default last, without duplicates.
    pub fn pages(&self) -> Vec<&str> {
        let mut pages: Vec<&str> = Vec::with_capacity(self.entries.len() + 1);
        for page in self.entries.iter().map(|(_, page)| page.as_str()).chain([self.default_page.as_str()]) {
            if !pages.contains(&page) {
                pages.push(page);
            }
        }
        pages
    }
}
