//! `docqa models ...`: catalog listing, download, activation.

use anyhow::{bail, Result};
use serde::Serialize;

use docqa_core::catalog::CatalogEntry;

use crate::app::App;
use crate::config::Config;
use crate::lifecycle::DownloadOutcome;
use crate::progress::ProgressMode;

/// One catalog line as both list views print it.
///
/// `is_loaded` only reflects this process, which has loaded nothing yet, so
/// both views mark the model remembered from an earlier `models use` as
/// `selected`.
#[derive(Debug, Serialize)]
pub struct ModelRow {
    #[serde(flatten)]
    pub entry: CatalogEntry,
    pub selected: bool,
}

pub fn model_rows(catalog: Vec<CatalogEntry>, remembered: Option<&str>) -> Vec<ModelRow> {
    catalog
        .into_iter()
        .map(|entry| {
            let selected = entry.is_downloaded
                && remembered
                    .map(|n| n.eq_ignore_ascii_case(&entry.descriptor.name))
                    .unwrap_or(false);
            ModelRow { entry, selected }
        })
        .collect()
}

pub async fn run_models_list(config: &Config, json: bool) -> Result<()> {
    let app = App::open(config).await?;
    let remembered = app.store.meta(crate::app::ACTIVE_MODEL_KEY).await?;
    let rows = model_rows(app.models.catalog().await, remembered.as_deref());

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    println!("Models in {}", app.models.models_dir().display());
    println!();
    for row in &rows {
        let status = match (row.selected, row.entry.is_downloaded) {
            (true, _) => "active",
            (_, true) => "downloaded",
            _ => "-",
        };
        let descriptor = &row.entry.descriptor;
        println!(
            "  {:<34} {:<11} {}{}",
            descriptor.name,
            status,
            descriptor.description,
            if descriptor.gated { " (token required)" } else { "" }
        );
    }
    Ok(())
}

pub async fn run_models_download(config: &Config, name: &str, progress: ProgressMode) -> Result<()> {
    let app = App::open(config).await?;
    let token = app.hf_token().await;

    let reporter = progress.reporter();
    let mut dialog = app.models.subscribe_dialog();
    let download = app.models.download(name, token.as_deref());
    tokio::pin!(download);

    let mut shown = false;
    let outcome = loop {
        tokio::select! {
            outcome = &mut download => break outcome,
            changed = dialog.changed() => {
                if changed.is_err() {
                    break (&mut download).await;
                }
                let snapshot = dialog.borrow_and_update().clone();
                reporter.report(name, &snapshot);
                shown = true;
            }
        }
    };
    if shown {
        reporter.finish();
    }

    match outcome? {
        DownloadOutcome::AlreadyPresent(path) => {
            println!("Already downloaded: {}", path.display());
        }
        DownloadOutcome::Activated(path) => {
            app.remember_active_model(Some(name)).await?;
            println!("Downloaded and loaded {}", path.display());
        }
        DownloadOutcome::LoadFailed { path, reason } => {
            println!("Downloaded {}", path.display());
            bail!("Model downloaded but could not be loaded: {}", reason);
        }
        DownloadOutcome::Failed(reason) => bail!("Download failed: {}", reason),
    }
    Ok(())
}

pub async fn run_models_use(config: &Config, name: &str) -> Result<()> {
    let app = App::open(config).await?;
    let path = app.models.activate(name).await?;
    app.remember_active_model(Some(name)).await?;
    println!("Using {}", path.display());
    Ok(())
}

pub async fn run_models_unload(config: &Config) -> Result<()> {
    let app = App::open(config).await?;
    app.models.unload().await;
    app.remember_active_model(None).await?;
    println!("No local model selected; questions use the remote API.");
    Ok(())
}
