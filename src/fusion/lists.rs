use crate::config::ListsConfig;
use crate::domain_utils::DomainUtils;
use crate::email::ParsedEmail;

/// Allow/deny hits for one email. Each side carries a readable reason.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListCheck {
    pub deny: Option<String>,
    pub allow: Option<String>,
}

impl ListCheck {
    pub fn is_deny_listed(&self) -> bool {
        self.deny.is_some()
    }

    pub fn is_allow_listed(&self) -> bool {
        self.allow.is_some()
    }
}

/// Sender and domain lists, normalized once at load.
#[derive(Debug, Clone, Default)]
pub struct SenderLists {
    allow_senders: Vec<String>,
    allow_domains: Vec<String>,
    deny_senders: Vec<String>,
    deny_domains: Vec<String>,
}

impl SenderLists {
    pub fn new(config: &ListsConfig) -> Self {
        let addresses = |list: &[String]| -> Vec<String> {
            list.iter()
                .filter_map(|s| DomainUtils::extract_email_from_header(s))
                .collect()
        };
        let domains = |list: &[String]| -> Vec<String> {
            list.iter()
                .map(|d| DomainUtils::canonicalize_domain(d))
                .filter(|d| !d.is_empty())
                .collect()
        };

        Self {
            allow_senders: addresses(&config.allow_senders),
            allow_domains: domains(&config.allow_domains),
            deny_senders: addresses(&config.deny_senders),
            deny_domains: domains(&config.deny_domains),
        }
    }

    pub fn check(&self, email: &ParsedEmail) -> ListCheck {
        let address = email.sender_address();
        let domain = email.sender_domain();

        let lookup = |senders: &[String], domains: &[String], label: &str| -> Option<String> {
            if let Some(addr) = address.as_deref() {
                if senders.iter().any(|s| s == addr) {
                    return Some(format!("sender {addr} is {label}-listed"));
                }
            }
            let domain = domain.as_deref()?;
            DomainUtils::find_in_domain_list(domain, domains)
                .map(|entry| format!("sender domain {domain} matches {label}-listed domain {entry}"))
        };

        let check = ListCheck {
            deny: lookup(&self.deny_senders, &self.deny_domains, "deny"),
            allow: lookup(&self.allow_senders, &self.allow_domains, "allow"),
        };
        if check.deny.is_some() && check.allow.is_some() {
            log::debug!("Sender is on both lists; deny-list wins");
        }
        check
    }
}
