//! Provider connectivity check.

use std::time::Instant;

use anyhow::Result;
use console::style;

use parley_infra::llm::test_provider_connection;
use parley_types::config::GlobalConfig;

use crate::state::build_provider;

/// Send a one-shot completion to the configured provider and report latency.
pub async fn check_provider(config: &GlobalConfig, json: bool) -> Result<()> {
    let provider = build_provider(config)?;

    if !json {
        print!(
            "  Testing connection to {} ({})... ",
            style(provider.name()).cyan(),
            config.provider.model
        );
        let _ = std::io::Write::flush(&mut std::io::stdout());
    }

    let started = Instant::now();
    let result = test_provider_connection(&provider).await;
    let latency_ms = started.elapsed().as_millis() as u64;

    match result {
        Ok(()) => {
            if json {
                let report = serde_json::json!({
                    "provider": provider.name(),
                    "model": config.provider.model,
                    "ok": true,
                    "latency_ms": latency_ms,
                });
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "{} {}",
                    style("connected").green().bold(),
                    style(format!("({latency_ms} ms)")).dim()
                );
            }
            Ok(())
        }
        Err(e) => {
            if json {
                let report = serde_json::json!({
                    "provider": provider.name(),
                    "model": config.provider.model,
                    "ok": false,
                    "error": e.to_string(),
                });
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", style("FAILED").red().bold());
            }
            Err(anyhow::anyhow!("Connection test failed: {e}"))
        }
    }
}
