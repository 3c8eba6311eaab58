use crate::domain_utils::DomainUtils;
use crate::email::ParsedEmail;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FeedKind {
    Url,
    Domain,
    Ip,
    Hash,
}

impl std::fmt::Display for FeedKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            FeedKind::Url => "URL",
            FeedKind::Domain => "DOMAIN",
            FeedKind::Ip => "IP",
            FeedKind::Hash => "HASH",
        };
        f.pad(label)
    }
}

fn default_active() -> bool {
    true
}

/// An already-ingested indicator list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreatFeed {
    pub name: String,
    pub kind: FeedKind,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub entries: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FeedMatch {
    pub feed: String,
    pub kind: FeedKind,
    pub indicator: String,
}

/// Read-only lookup table built from the active feeds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedIndex {
    /// (kind, normalized indicator) -> names of the feeds listing it.
    entries: BTreeMap<(FeedKind, String), BTreeSet<String>>,
}

impl FeedIndex {
    pub fn new(feeds: &[ThreatFeed]) -> Self {
        let mut entries: BTreeMap<(FeedKind, String), BTreeSet<String>> = BTreeMap::new();
        for feed in feeds.iter().filter(|f| f.active) {
            for entry in &feed.entries {
                let indicator = normalize(feed.kind, entry);
                if indicator.is_empty() {
                    continue;
                }
                entries
                    .entry((feed.kind, indicator))
                    .or_default()
                    .insert(feed.name.clone());
            }
        }
        Self { entries }
    }

    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read feed file: {path}"))?;
        let feeds: Vec<ThreatFeed> = serde_yaml::from_str(&content)
            .with_context(|| format!("Invalid feed file: {path}"))?;
        let index = Self::new(&feeds);
        log::info!(
            "Loaded {} indicators from {} feeds ({} active)",
            index.len(),
            feeds.len(),
            feeds.iter().filter(|f| f.active).count()
        );
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Indicators from the email that appear in a feed, sorted and deduplicated.
    pub fn matches(&self, email: &ParsedEmail) -> Vec<FeedMatch> {
        if self.entries.is_empty() {
            return Vec::new();
        }

        let mut found = BTreeSet::new();
        let mut hosts = Vec::new();

        for url in &email.urls {
            self.lookup(FeedKind::Url, url, &mut found);
            if let Some(host) = DomainUtils::url_host(url) {
                hosts.push(host);
            }
        }
        for host in &hosts {
            if host.parse::<IpAddr>().is_ok() {
                self.lookup(FeedKind::Ip, host, &mut found);
            } else {
                self.lookup_domain(host, &mut found);
            }
        }
        if let Some(domain) = email.sender_domain() {
            self.lookup_domain(&domain, &mut found);
        }
        for hash in email.attachments.iter().filter_map(|a| a.sha256.as_deref()) {
            self.lookup(FeedKind::Hash, hash, &mut found);
        }

        found.into_iter().collect()
    }

    fn lookup(&self, kind: FeedKind, raw: &str, found: &mut BTreeSet<FeedMatch>) {
        let indicator = normalize(kind, raw);
        if let Some(feeds) = self.entries.get(&(kind, indicator.clone())) {
            for feed in feeds {
                found.insert(FeedMatch {
                    feed: feed.clone(),
                    kind,
                    indicator: indicator.clone(),
                });
            }
        }
    }

    /// A listed domain also covers its subdomains.
    fn lookup_domain(&self, domain: &str, found: &mut BTreeSet<FeedMatch>) {
        let canonical = DomainUtils::canonicalize_domain(domain);
        let mut candidate = canonical.as_str();
        loop {
            self.lookup(FeedKind::Domain, candidate, found);
            match candidate.split_once('.') {
                Some((_, parent)) if parent.contains('.') => candidate = parent,
                _ => break,
            }
        }
    }
}

fn normalize(kind: FeedKind, raw: &str) -> String {
    let trimmed = raw.trim();
    match kind {
        FeedKind::Url => trimmed.trim_end_matches('/').to_lowercase(),
        FeedKind::Domain => DomainUtils::canonicalize_domain(trimmed),
        FeedKind::Ip | FeedKind::Hash => trimmed.to_lowercase(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::email::Attachment;

    fn feed(name: &str, kind: FeedKind, entries: &[&str]) -> ThreatFeed {
        ThreatFeed {
            name: name.to_string(),
            kind,
            active: true,
            entries: entries.iter().map(|e| e.to_string()).collect(),
        }
    }

    #[test]
    fn test_matches_each_indicator_kind() {
        let index = FeedIndex::new(&[
            feed("phishtank", FeedKind::Url, &["http://evil.example/login/"]),
            feed("domains", FeedKind::Domain, &["bad-bank.com"]),
            feed("ips", FeedKind::Ip, &["203.0.113.7"]),
            feed("malware", FeedKind::Hash, &["ABCDEF"]),
        ]);
        let email = ParsedEmail {
            sender: Some("alerts@secure.bad-bank.com".to_string()),
            urls: vec![
                "http://evil.example/login".to_string(),
                "http://203.0.113.7/x".to_string(),
            ],
            attachments: vec![Attachment {
                name: "a.exe".to_string(),
                sha256: Some("abcdef".to_string()),
                ..Default::default()
            }],
            ..Default::default()
        };

        let matches = index.matches(&email);
        let found: Vec<(&str, FeedKind)> =
            matches.iter().map(|m| (m.feed.as_str(), m.kind)).collect();
        assert_eq!(
            found,
            vec![
                ("domains", FeedKind::Domain),
                ("ips", FeedKind::Ip),
                ("malware", FeedKind::Hash),
                ("phishtank", FeedKind::Url),
            ]
        );
        assert_eq!(matches.len(), 4);
        assert!(matches
            .iter()
            .any(|m| m.kind == FeedKind::Domain && m.indicator == "bad-bank.com"));
    }

    #[test]
    fn test_inactive_feed_ignored() {
        let mut inactive = feed("old", FeedKind::Domain, &["example.com"]);
        inactive.active = false;
        let index = FeedIndex::new(&[inactive]);
        assert!(index.is_empty());
    }

    #[test]
    fn test_no_match_on_parent_tld_only() {
        let index = FeedIndex::new(&[feed("d", FeedKind::Domain, &["com"])]);
        let email = ParsedEmail {
            sender: Some("a@example.com".to_string()),
            ..Default::default()
        };
        assert!(index.matches(&email).is_empty());
    }

    #[test]
    fn test_duplicate_indicators_reported_once_per_feed() {
        let index = FeedIndex::new(&[feed("d", FeedKind::Domain, &["spam.test"])]);
        let email = ParsedEmail {
            sender: Some("x@spam.test".to_string()),
            urls: vec![
                "https://spam.test/a".to_string(),
                "https://www.spam.test/b".to_string(),
            ],
            ..Default::default()
        };
        assert_eq!(index.matches(&email).len(), 1);
    }

    #[test]
    fn test_yaml_feed_list() {
        let yaml = r#"
- name: urlhaus
  kind: URL
  entries: ["http://a.test/x"]
- name: retired
  kind: DOMAIN
  active: false
  entries: ["b.test"]
"#;
        let feeds: Vec<ThreatFeed> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(FeedIndex::new(&feeds).len(), 1);
    }
}
