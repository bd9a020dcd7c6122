//! Write a default sshbox configuration and the sandbox image sources.
//!
//! Pure logic takes closures for filesystem operations so it can be
//! tested without touching disk.

use anyhow::{Context, Result};
use colored::Colorize;
use std::fmt::Write;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::templates;

// -----------------------------------------------------------------------------
// Public API
// -----------------------------------------------------------------------------

/// Runs the init command in the current directory.
pub(crate) fn run(force: bool) -> Result<()> {
    let cwd = std::env::current_dir().context("Failed to get current directory")?;

    info!("Initializing sshbox in {}", cwd.display());

    let files = init_files();

    let results = init_project(
        &files,
        force,
        |path| cwd.join(path).exists(),
        |path| {
            fs::create_dir_all(cwd.join(path))
                .with_context(|| format!("Failed to create directory: {}", path.display()))
        },
        |path, content| {
            fs::write(cwd.join(path), content)
                .with_context(|| format!("Failed to write {}", path.display()))
        },
    )?;

    print!("{}", format_results(&results, &files));

    Ok(())
}

// -----------------------------------------------------------------------------
// Internal types
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
struct InitFile {
    path: PathBuf,
    content: &'static str,
    description: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteResult {
    Created,
    Overwritten,
    Skipped,
}

// -----------------------------------------------------------------------------
// Helper functions
// -----------------------------------------------------------------------------

fn init_files() -> Vec<InitFile> {
    vec![
        InitFile {
            path: PathBuf::from("sshbox.toml"),
            content: templates::SSHBOX_TOML,
            description: "Service configuration",
        },
        InitFile {
            path: PathBuf::from("sandbox-image/Dockerfile"),
            content: templates::DOCKERFILE,
            description: "Sandbox image definition",
        },
        InitFile {
            path: PathBuf::from("sandbox-image/entrypoint.sh"),
            content: templates::ENTRYPOINT_SH,
            description: "Sandbox bootstrap (user, sshd, idle watcher)",
        },
    ]
}

/// Writes every file that is missing, or all of them with `force`.
fn init_project<E, D, W>(
    files: &[InitFile],
    force: bool,
    exists: E,
    create_dir: D,
    mut write_file: W,
) -> Result<Vec<(PathBuf, WriteResult)>>
where
    E: Fn(&Path) -> bool,
    D: Fn(&Path) -> Result<()>,
    W: FnMut(&Path, &str) -> Result<()>,
{
    let dirs = files
        .iter()
        .filter_map(|f| f.path.parent())
        .filter(|p| !p.as_os_str().is_empty());
    for dir in dirs {
        create_dir(dir)?;
    }

    let mut results = Vec::new();
    for file in files {
        let existed = exists(&file.path);
        let result = match (existed, force) {
            (true, false) => WriteResult::Skipped,
            (true, true) => WriteResult::Overwritten,
            (false, _) => WriteResult::Created,
        };
        if result != WriteResult::Skipped {
            write_file(&file.path, file.content)?;
        }
        results.push((file.path.clone(), result));
    }

    Ok(results)
}

fn format_results(results: &[(PathBuf, WriteResult)], files: &[InitFile]) -> String {
    let mut out = String::new();

    let _ = writeln!(
        &mut out,
        "\n{} sshbox initialized successfully!\n",
        "✓".green().bold()
    );

    for (path, result) in results {
        let desc = files
            .iter()
            .find(|f| &f.path == path)
            .map_or("", |f| f.description);

        let _ = match result {
            WriteResult::Created => writeln!(
                &mut out,
                "  {} - {}",
                path.display().to_string().cyan(),
                desc
            ),
            WriteResult::Overwritten => {
                writeln!(&mut out, "  {} {} (overwritten)", "↻".blue(), path.display())
            }
            WriteResult::Skipped => writeln!(
                &mut out,
                "  {} {} (already exists, use --force to overwrite)",
                "⊘".yellow(),
                path.display()
            ),
        };
    }

    let _ = writeln!(&mut out, "\n{}", "Next steps:".yellow().bold());
    let _ = writeln!(
        &mut out,
        "  1. Edit {} (ports, credentials, callback URL)",
        "sshbox.toml".cyan()
    );
    let _ = writeln!(
        &mut out,
        "  2. Run {} to build the sandbox image",
        "sshbox image build".green()
    );
    let _ = writeln!(
        &mut out,
        "  3. Run {} to start the API",
        "sshbox serve".green()
    );

    out
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------
