use super::{FeatureExtractor, FeatureSet};
use crate::config::AnalyzerConfig;
use crate::email::{Attachment, ParsedEmail};

pub struct AttachmentAnalyzer {
    suspicious_extensions: Vec<String>,
    executable_extensions: Vec<String>,
    encrypted_markers: Vec<String>,
}

impl Default for AttachmentAnalyzer {
    fn default() -> Self {
        Self::from_config(&AnalyzerConfig::default())
    }
}

impl AttachmentAnalyzer {
    pub fn from_config(config: &AnalyzerConfig) -> Self {
        let lower = |list: &[String]| list.iter().map(|s| s.to_lowercase()).collect();
        Self {
            suspicious_extensions: lower(&config.suspicious_extensions),
            executable_extensions: lower(&config.executable_extensions),
            encrypted_markers: lower(&config.encrypted_markers),
        }
    }

    /// Final extension including the dot, lowercased; empty when there is none.
    pub fn extension(name: &str) -> String {
        match name.rsplit_once('.') {
            Some((_, ext)) => format!(".{}", ext.to_lowercase()),
            None => String::new(),
        }
    }

    pub fn is_suspicious(&self, attachment: &Attachment) -> bool {
        let ext = Self::extension(&attachment.name);
        self.suspicious_extensions.iter().any(|s| *s == ext)
    }

    /// Executables only count when they are also on the suspicious list.
    pub fn is_executable(&self, attachment: &Attachment) -> bool {
        let ext = Self::extension(&attachment.name);
        self.is_suspicious(attachment) && self.executable_extensions.iter().any(|s| *s == ext)
    }

    pub fn looks_encrypted(&self, attachment: &Attachment) -> bool {
        let name = attachment.name.to_lowercase();
        self.encrypted_markers.iter().any(|m| name.contains(m.as_str()))
    }
}

impl FeatureExtractor for AttachmentAnalyzer {
    fn extract(&self, email: &ParsedEmail, features: &mut FeatureSet) {
        let attachments = &email.attachments;

        features.set_number("attachment_count", attachments.len() as f64);
        features.set_number(
            "suspicious_attachment_count",
            attachments.iter().filter(|a| self.is_suspicious(a)).count() as f64,
        );
        features.set_number(
            "executable_attachment_count",
            attachments.iter().filter(|a| self.is_executable(a)).count() as f64,
        );
        features.set_number(
            "max_attachment_size",
            attachments.iter().map(|a| a.size).max().unwrap_or(0) as f64,
        );
        features.set_flag(
            "has_encrypted_attachment",
            attachments.iter().any(|a| self.looks_encrypted(a)),
        );
    }

    fn name(&self) -> &str {
        "attachments"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attachment(name: &str, size: u64) -> Attachment {
        Attachment {
            name: name.to_string(),
            size,
            ..Default::default()
        }
    }

    fn analyze(attachments: Vec<Attachment>) -> FeatureSet {
        let email = ParsedEmail {
            attachments,
            ..Default::default()
        };
        let mut features = FeatureSet::new(0);
        AttachmentAnalyzer::default().extract(&email, &mut features);
        features
    }

    #[test]
    fn test_extension_classification() {
        let features = analyze(vec![
            attachment("invoice.PDF.exe", 2048),
            attachment("macro.docm", 512),
            attachment("report.pdf", 100_000),
            attachment("README", 10),
        ]);
        assert_eq!(features.number("attachment_count"), 4.0);
        assert_eq!(features.number("suspicious_attachment_count"), 2.0);
        assert_eq!(features.number("executable_attachment_count"), 1.0);
        assert_eq!(features.number("max_attachment_size"), 100_000.0);
        assert!(!features.flag("has_encrypted_attachment"));
    }

    #[test]
    fn test_encrypted_marker_is_substring_match() {
        let features = analyze(vec![attachment("payload.pgp.zip", 1)]);
        assert!(features.flag("has_encrypted_attachment"));
    }

    #[test]
    fn test_extension_helper() {
        assert_eq!(AttachmentAnalyzer::extension("a.B.JS"), ".js");
        assert_eq!(AttachmentAnalyzer::extension("noext"), "");
    }
}
