use clap::{Arg, Command};
use log::LevelFilter;
use phish_fusion::config::Config;
use phish_fusion::email::ParsedEmail;
use phish_fusion::error::ScoringError;
use phish_fusion::pipeline::ScoringPipeline;
use phish_fusion::rules::RuleSet;
use phish_fusion::threat_intel::ThreatIntelReport;
use std::process;

#[tokio::main]
async fn main() {
    let matches = Command::new("phish-fusion")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Scores parsed emails by fusing rule, ML and threat-intel signals")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path (built-in defaults when omitted)"),
        )
        .arg(
            Arg::new("email")
                .short('e')
                .long("email")
                .value_name("FILE")
                .help("Parsed email record (JSON) to score")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("intel")
                .long("intel")
                .value_name("FILE")
                .help("Already-fetched threat intel report (JSON)")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("rules")
                .long("rules")
                .value_name("FILE")
                .help("Rule set (YAML), overrides rules_path")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("model")
                .long("model")
                .value_name("FILE")
                .help("Logistic model (JSON), overrides model_path")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("text-model")
                .long("text-model")
                .value_name("FILE")
                .help("Fitted TF-IDF table (JSON), overrides text_model_path")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .value_name("FILE")
                .help("Generate a default configuration file")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("test-config")
                .long("test-config")
                .help("Load configuration, rules and models, report problems and exit")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("list-rules")
                .long("list-rules")
                .help("List the active rule set")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable debug logging")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    let log_level = if matches.get_flag("verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    if let Some(generate_path) = matches.get_one::<String>("generate-config") {
        generate_default_config(generate_path);
        return;
    }

    let mut config = match matches.get_one::<String>("config") {
        Some(path) => match Config::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error loading configuration: {e:#}");
                process::exit(1);
            }
        },
        None => Config::default(),
    };
    if let Some(path) = matches.get_one::<String>("rules") {
        config.rules_path = Some(path.clone());
    }
    if let Some(path) = matches.get_one::<String>("model") {
        config.model_path = Some(path.clone());
    }
    if let Some(path) = matches.get_one::<String>("text-model") {
        config.text_model_path = Some(path.clone());
    }

    if matches.get_flag("test-config") {
        test_config(&config);
        return;
    }

    let pipeline = match ScoringPipeline::from_config(&config) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            eprintln!("Error initializing scoring pipeline: {e:#}");
            process::exit(1);
        }
    };

    if matches.get_flag("list-rules") {
        list_rules(&pipeline.rule_set());
        return;
    }

    let Some(email_path) = matches.get_one::<String>("email") else {
        eprintln!("Nothing to do: pass --email FILE, --test-config or --list-rules");
        process::exit(2);
    };

    let email = match load_email(email_path) {
        Ok(email) => email,
        Err(e) => {
            eprintln!("Cannot score {email_path}: {e}");
            process::exit(1);
        }
    };

    let intel_path = matches.get_one::<String>("intel").cloned();
    let fetch = async move {
        match intel_path {
            Some(path) => {
                let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
                    ScoringError::ThreatIntelUnavailable(format!("cannot read {path}: {e}"))
                })?;
                serde_json::from_str::<ThreatIntelReport>(&content).map_err(|e| {
                    ScoringError::ThreatIntelUnavailable(format!("invalid report {path}: {e}"))
                })
            }
            None => Err(ScoringError::ThreatIntelUnavailable(
                "no threat intel report supplied".to_string(),
            )),
        }
    };

    match pipeline.score_with_intel(&email, fetch).await {
        Ok(bundle) => match serde_json::to_string_pretty(&bundle) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("Failed to serialize result: {e}");
                process::exit(1);
            }
        },
        Err(e) => {
            eprintln!("Scoring failed: {e}");
            process::exit(1);
        }
    }
}

fn load_email(path: &str) -> Result<ParsedEmail, ScoringError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ScoringError::MalformedInput(format!("cannot read {path}: {e}")))?;
    ParsedEmail::from_json(&content)
}

fn generate_default_config(path: &str) {
    match Config::default().to_file(path) {
        Ok(()) => println!("Default configuration written to: {path}"),
        Err(e) => {
            eprintln!("Error generating configuration: {e:#}");
            process::exit(1);
        }
    }
}

fn test_config(config: &Config) {
    println!("🔍 Testing configuration...");
    println!();

    if let Err(e) = config.fusion.validate() {
        println!("❌ {e}");
        process::exit(1);
    }
    println!(
        "Fusion weights: rule {} / ml {} / threat intel {}",
        config.fusion.rule_weight, config.fusion.ml_weight, config.fusion.threat_intel_weight
    );
    println!(
        "Thresholds: SUSPICIOUS >= {}, PHISHING >= {}",
        config.fusion.suspicious_threshold, config.fusion.phishing_threshold
    );

    let pipeline = match ScoringPipeline::from_config(config) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            println!("❌ Configuration validation failed:");
            println!("Error: {e:#}");
            process::exit(1);
        }
    };

    let rules = pipeline.rule_set();
    let problems = rules.validate();
    println!(
        "Rule set {}: {} rules ({} active)",
        rules.version(),
        rules.len(),
        rules.active_count()
    );
    for problem in &problems {
        println!("  ⚠️  {problem}");
    }

    let models = pipeline.models();
    println!(
        "Model: {} v{} ({} inputs, text embedding {} dims)",
        models.classifier.name(),
        models.classifier.version(),
        models.classifier.input_dim(),
        models.text_model.dimensions()
    );

    if problems.is_empty() {
        println!("✅ Configuration is valid");
    } else {
        println!("❌ {} rule problem(s) found", problems.len());
        process::exit(1);
    }
}

fn list_rules(rules: &RuleSet) {
    println!("Rule set {} ({} rules)", rules.version(), rules.len());
    for rule in rules.rules() {
        println!(
            "  {:>4}  {:<8} {:>6}  {}{}",
            rule.id,
            rule.severity,
            rule.weight,
            rule.name,
            if rule.active { "" } else { " (inactive)" }
        );
    }
}
