pub mod config;
pub mod domain_utils;
pub mod email;
pub mod error;
pub mod features;
pub mod fusion;
pub mod machine_learning;
pub mod pipeline;
pub mod rules;
pub mod snapshot;
pub mod threat_intel;
pub mod vectorizer;

pub use config::Config;
pub use email::{Attachment, ParsedEmail};
pub use error::ScoringError;
pub use fusion::{Classification, ScoreBundle};
pub use pipeline::{ScoringPipeline, Submission, SubmissionStatus};
pub use threat_intel::{ThreatIntelOutcome, ThreatIntelReport};
