#![allow(clippy::uninlined_format_args)]

use phish_fusion::config::Config;
use phish_fusion::email::{Attachment, ParsedEmail};
use phish_fusion::error::ScoringError;
use phish_fusion::pipeline::ScoringPipeline;
use phish_fusion::threat_intel::ThreatIntelReport;
use std::collections::HashMap;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    println!("Scoring a typical credential-phishing message...");

    let config_yaml = r#"
lists:
  deny_domains:
    - "known-bad.example"
  allow_domains:
    - "payroll.corp.example"
fusion:
  suspicious_threshold: 30
  phishing_threshold: 70
threat_intel:
  timeout_ms: 500
"#;

    let config: Config = serde_yaml::from_str(config_yaml)?;
    let pipeline = ScoringPipeline::from_config(&config)?;

    let mut headers = HashMap::new();
    headers.insert(
        "From".to_string(),
        "\"Account Security\" <security@paypa1-support.xyz>".to_string(),
    );
    headers.insert("Reply-To".to_string(), "collect@mailbox.example".to_string());
    headers.insert(
        "Authentication-Results".to_string(),
        "mx.example; spf=fail smtp.mailfrom=paypa1-support.xyz; dkim=none".to_string(),
    );

    let email = ParsedEmail {
        sender: None,
        body: "Your account has been suspended. Verify your password and credit card \
               immediately to restore access: http://192.168.1.5/login"
            .to_string(),
        headers,
        urls: vec![
            "http://192.168.1.5/login".to_string(),
            "https://bit.ly/3xYz9Qp".to_string(),
        ],
        attachments: vec![Attachment {
            name: "statement.pdf.exe".to_string(),
            size: 48_213,
            mime_type: Some("application/octet-stream".to_string()),
            sha256: None,
        }],
        has_html: true,
        has_forms: true,
        has_scripts: false,
        has_iframes: false,
    };

    let report: ThreatIntelReport = serde_json::from_str(
        r#"{
            "urls": [{"url": "http://192.168.1.5/login", "verdict": "MALICIOUS"}],
            "domain": {"domain": "paypa1-support.xyz", "age_days": 4, "registrar": "NameCheap"},
            "providers": {"virustotal": {"malicious": 7, "suspicious": 2, "harmless": 60}}
        }"#,
    )?;

    let features = pipeline.analyze(&email);
    println!("\nFeatures:");
    for (name, value) in features.iter() {
        println!("  {:<30} {}", name, value);
    }

    let bundle = pipeline
        .score_with_intel(&email, async move { Ok::<_, ScoringError>(report) })
        .await?;

    println!("\nClassification: {} ({:.1})", bundle.classification, bundle.final_score);
    println!("Confidence: {:.2}", bundle.confidence);
    println!("Requires review: {}", bundle.requires_review);
    println!("\nExplanation:");
    for line in &bundle.explanation {
        println!("  - {}", line);
    }

    Ok(())
}
