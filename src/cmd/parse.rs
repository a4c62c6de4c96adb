//! Intent inspection command: `chatops parse`.

use anyhow::Result;
use chatops::config::ChatopsConfig;
use chatops::nlu::{IntentParser, ParseOptions, Validation, validate};
use chatops_common::{ParsedIntent, Slot};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct ParseReport {
    summary: String,
    intent: ParsedIntent,
    missing: Vec<Slot>,
}

pub async fn cmd_parse(
    config: &ChatopsConfig,
    command: &str,
    no_nlu: bool,
    threshold: Option<f32>,
) -> Result<()> {
    let mut options = ParseOptions::from(&config.nlu);
    if no_nlu {
        options.use_classifier = false;
    }
    if let Some(threshold) = threshold {
        if !(0.0..=1.0).contains(&threshold) {
            anyhow::bail!("--threshold must be between 0.0 and 1.0, got {}", threshold);
        }
        options.confidence_threshold = threshold;
    }

    let parser = IntentParser::from_config(&config.nlu, config.executor.command_timeout())?;
    let intent = parser.parse(command, &options).await;
    let missing = match validate(&intent) {
        Validation::Missing(missing) => missing,
        Validation::Valid => Vec::new(),
    };

    let report = ParseReport {
        summary: intent.summary(),
        intent,
        missing,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
