//! ISO command - preseed template handling and the unattended ISO build.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::iso::{self, preseed, IsoBuildRequest, PreseedSource};
use crate::preflight;
use crate::term;

/// Default name for `iso init-preseed`.
pub const TEMPLATE_FILE_NAME: &str = "preseed.cfg.tmpl";

pub enum IsoCommand {
    InitPreseed {
        output: Option<PathBuf>,
        force: bool,
    },
    Preseed {
        template: Option<PathBuf>,
    },
    Build {
        source: PathBuf,
        preseed: Option<PathBuf>,
        output: Option<PathBuf>,
        timeout: u32,
        label: Option<String>,
    },
}

/// Execute an iso subcommand.
pub fn cmd_iso(base_dir: &Path, command: IsoCommand, config: &Config) -> Result<()> {
    match command {
        IsoCommand::InitPreseed { output, force } => {
            let path = output.unwrap_or_else(|| base_dir.join(TEMPLATE_FILE_NAME));
            if path.exists() && !force {
                bail!("{} already exists. Use --force to overwrite.", path.display());
            }
            fs::write(&path, preseed::BUNDLED_TEMPLATE)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            term::ok(format!("Wrote {}", path.display()));
            let keys: Vec<String> = preseed::placeholders(preseed::BUNDLED_TEMPLATE)
                .into_iter()
                .collect();
            println!("Placeholders: {}", keys.join(", "));
        }

        IsoCommand::Preseed { template } => {
            let text = render(template.as_deref(), config)?;
            print!("{}", text);
        }

        IsoCommand::Build {
            source,
            preseed: preseed_path,
            output,
            timeout,
            label,
        } => {
            preflight::require_tools(&[("xorriso", "xorriso"), ("md5sum", "coreutils")])?;
            let preseed = match preseed_path {
                // A template is rendered; anything else is a finished preseed
                Some(path) if is_template(&path) => {
                    PreseedSource::Rendered(render(Some(&path), config)?)
                }
                Some(path) => PreseedSource::File(path),
                None => PreseedSource::Rendered(render(None, config)?),
            };
            let request = IsoBuildRequest {
                source_iso: source,
                preseed,
                output_iso: output.unwrap_or_else(|| config.output_dir.join(iso::DEFAULT_ISO_NAME)),
                timeout_secs: timeout,
                volume_label: label,
            };
            fs::create_dir_all(&config.output_dir)?;
            iso::build_iso(&request, &config.output_dir)?;
        }
    }
    Ok(())
}

fn is_template(path: &Path) -> bool {
    path.extension().is_some_and(|e| e == "tmpl")
}

/// Render `template` (or the bundled one) from the secrets.
fn render(template: Option<&Path>, config: &Config) -> Result<String> {
    let text = match template {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("Failed to read template {}", path.display()))?,
        None => preseed::BUNDLED_TEMPLATE.to_string(),
    };
    let rendered = preseed::render_from_secrets(&text, &config.secrets)?;
    let problems = preseed::validate(&rendered);
    if !problems.is_empty() {
        bail!("Rendered preseed is invalid:\n  - {}", problems.join("\n  - "));
    }
    Ok(rendered)
}
