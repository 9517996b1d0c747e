//! `docqa ask "<question>"`.

use anyhow::{bail, Result};

use crate::app::App;
use crate::config::Config;

pub async fn run_ask(config: &Config, question: &str, top_n: Option<usize>, json: bool) -> Result<()> {
    if top_n == Some(0) {
        bail!("--top-n must be at least 1");
    }
    if !config.embedding.is_enabled() {
        bail!("Embeddings are disabled. Set [embedding] provider in the config before asking.");
    }

    let app = App::open(config).await?;
    app.restore_active_model().await?;
    let embedder = crate::embedding::create_provider(&config.embedding)?;
    let orchestrator = app.orchestrator(embedder)?;

    let answer = orchestrator.submit(question, top_n).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&orchestrator.snapshot())?);
        return Ok(());
    }

    println!("{}", answer.text.trim());
    if !answer.contexts.is_empty() {
        println!();
        println!("Sources:");
        for (i, scored) in answer.contexts.iter().enumerate() {
            println!(
                "  {}. [{:.2}] {}",
                i + 1,
                scored.score,
                scored.context.file_name
            );
        }
    }
    Ok(())
}
