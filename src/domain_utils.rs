use url::{Host, Url};

/// Address and domain helpers shared by the analyzers, feeds and sender lists.
pub struct DomainUtils;

impl DomainUtils {
    /// Extract domain from email address
    pub fn extract_domain(email: &str) -> Option<String> {
        email
            .rsplit_once('@')
            .map(|(_, domain)| domain.trim().trim_end_matches('>').to_lowercase())
            .filter(|d| !d.is_empty())
    }

    /// Pull the bare address out of a header value such as
    /// `"Support" <support@example.com>`.
    pub fn extract_email_from_header(value: &str) -> Option<String> {
        let candidate = match (value.rfind('<'), value.rfind('>')) {
            (Some(start), Some(end)) if start < end => &value[start + 1..end],
            _ => value,
        };
        let candidate = candidate.trim().trim_matches('"');
        let (local, domain) = candidate.rsplit_once('@')?;
        if local.is_empty() || domain.is_empty() || candidate.contains(char::is_whitespace) {
            return None;
        }
        Some(candidate.to_lowercase())
    }

    /// Check if domain matches any in list (with hierarchy support)
    pub fn matches_domain_list(domain: &str, domain_list: &[String]) -> bool {
        Self::find_in_domain_list(domain, domain_list).is_some()
    }

    /// Like `matches_domain_list` but returns the list entry that matched.
    pub fn find_in_domain_list<'a>(domain: &str, domain_list: &'a [String]) -> Option<&'a str> {
        let domain_lower = Self::canonicalize_domain(domain);

        domain_list
            .iter()
            .find(|pattern| {
                let pattern_lower = Self::canonicalize_domain(pattern);
                domain_lower == pattern_lower
                    || domain_lower.ends_with(&format!(".{}", pattern_lower))
            })
            .map(|p| p.as_str())
    }

    /// Canonicalize domain (remove www prefix and trailing dot)
    pub fn canonicalize_domain(domain: &str) -> String {
        let domain_lower = domain.trim().trim_end_matches('.').to_lowercase();
        match domain_lower.strip_prefix("www.") {
            Some(stripped) => stripped.to_string(),
            None => domain_lower,
        }
    }

    /// Host part of a URL, lowercased. IP hosts are returned in dotted form.
    pub fn url_host(url: &str) -> Option<String> {
        let parsed = Url::parse(url.trim()).ok()?;
        match parsed.host()? {
            Host::Domain(d) => Some(d.to_lowercase()),
            Host::Ipv4(ip) => Some(ip.to_string()),
            Host::Ipv6(ip) => Some(ip.to_string()),
        }
    }

    /// True when the URL's host is a literal IP address.
    pub fn url_has_ip_host(url: &str) -> bool {
        Url::parse(url.trim())
            .ok()
            .and_then(|u| u.host().map(|h| !matches!(h, Host::Domain(_))))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_domain() {
        assert_eq!(
            DomainUtils::extract_domain("user@Example.com"),
            Some("example.com".to_string())
        );
        assert_eq!(DomainUtils::extract_domain("invalid"), None);
    }

    #[test]
    fn test_extract_email_from_header() {
        assert_eq!(
            DomainUtils::extract_email_from_header("\"PayPal\" <Service@PayPal.com>"),
            Some("service@paypal.com".to_string())
        );
        assert_eq!(
            DomainUtils::extract_email_from_header("plain@example.org"),
            Some("plain@example.org".to_string())
        );
        assert_eq!(DomainUtils::extract_email_from_header("Just A Name"), None);
    }

    #[test]
    fn test_matches_domain_list() {
        let domains = vec!["example.com".to_string(), "test.org".to_string()];

        assert!(DomainUtils::matches_domain_list("example.com", &domains));
        assert!(DomainUtils::matches_domain_list(
            "mail.example.com",
            &domains
        ));
        assert!(!DomainUtils::matches_domain_list("notexample.com", &domains));
        assert!(!DomainUtils::matches_domain_list("other.com", &domains));
        assert_eq!(
            DomainUtils::find_in_domain_list("www.test.org", &domains),
            Some("test.org")
        );
    }

    #[test]
    fn test_canonicalize_domain() {
        assert_eq!(
            DomainUtils::canonicalize_domain("www.example.com"),
            "example.com"
        );
        assert_eq!(DomainUtils::canonicalize_domain("Example.com."), "example.com");
    }

    #[test]
    fn test_url_host() {
        assert_eq!(
            DomainUtils::url_host("https://Login.Example.xyz/path"),
            Some("login.example.xyz".to_string())
        );
        assert_eq!(
            DomainUtils::url_host("http://192.168.1.5/login"),
            Some("192.168.1.5".to_string())
        );
        assert!(DomainUtils::url_has_ip_host("http://192.168.1.5/login"));
        assert!(!DomainUtils::url_has_ip_host("http://example.com/"));
        assert_eq!(DomainUtils::url_host("not a url"), None);
    }
}
