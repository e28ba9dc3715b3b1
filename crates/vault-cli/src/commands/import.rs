use std::str::FromStr;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;
use vault_core::ingest::{adapter_for, ImportPipeline, PROVIDERS};
use vault_core::storage::Sensitivity;
use vault_core::ImportOptions;

use crate::app::AppContext;
use crate::cli::ImportArgs;
use crate::errors::CliError;
use crate::helpers::is_interactive;
use crate::output::{badge, color_enabled, table, Badge};

pub fn handle_import(ctx: &AppContext, args: &ImportArgs) -> anyhow::Result<()> {
    let adapter = adapter_for(&args.provider).ok_or_else(|| {
        CliError::invalid_input(format!(
            "Unknown provider '{}' (supported: {})",
            args.provider,
            PROVIDERS.join(", ")
        ))
    })?;
    let sensitivity = match args.sensitivity.as_deref() {
        Some(value) => Sensitivity::from_str(&value.to_ascii_lowercase())
            .map_err(|e| CliError::invalid_input(e.to_string()))?,
        None => Sensitivity::default(),
    };

    ctx.require_vault()?;
    if !args.file.is_file() {
        return Err(CliError::not_found(
            format!("Export file not found: {}", args.file.display()),
            "Hint: Pass the path to the provider's conversations.json.",
        )
        .into());
    }
    if !adapter.validate_format(&args.file) {
        return Err(CliError::invalid_input(format!(
            "{} does not look like a {} export",
            args.file.display(),
            adapter.provider_name()
        ))
        .into());
    }

    let vault = ctx.unlock()?;

    let progress = if ctx.quiet() || !is_interactive() {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::new(0);
        if let Ok(style) =
            ProgressStyle::with_template("{spinner} Importing [{bar:30}] {pos}/{len} {msg}")
        {
            bar.set_style(style.progress_chars("=> "));
        }
        bar
    };

    let options = ImportOptions::new()
        .with_sensitivity(sensitivity)
        .with_progress(|done, total| {
            progress.set_length(total as u64);
            progress.set_position(done as u64);
        });
    let result = ImportPipeline::new(&vault.store, &vault.blobs, &vault.keys).run(
        adapter.as_ref(),
        &args.file,
        &vault.master_key,
        options,
    );
    progress.finish_and_clear();
    info!(
        imported = result.imported,
        skipped = result.skipped,
        failed = result.failed,
        "import finished"
    );

    if !ctx.quiet() {
        let color = color_enabled();
        let mut summary = table(&["Imported", "Skipped", "Failed"]);
        summary.add_row(vec![
            result.imported.to_string(),
            result.skipped.to_string(),
            result.failed.to_string(),
        ]);
        println!("{}", summary);
        if result.failed == 0 && result.imported == 0 && result.skipped > 0 {
            println!(
                "{}",
                badge(
                    color,
                    Badge::Info,
                    &format!("All {} conversation(s) already in the vault", result.skipped)
                )
            );
        } else if result.failed == 0 {
            println!(
                "{}",
                badge(
                    color,
                    Badge::Ok,
                    &format!("Imported {} conversation(s)", result.imported)
                )
            );
        }
    }
    for error in &result.errors {
        eprintln!("{}", badge(false, Badge::Err, error));
    }

    if result.failed > 0 {
        return Err(CliError::import_failed(format!(
            "{} conversation(s) failed to import",
            result.failed
        ))
        .into());
    }
    Ok(())
}
