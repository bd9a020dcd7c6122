//! Sandbox image management.

use anyhow::{Context, Result};
use bollard::image::{BuildImageOptions, ListImagesOptions};
use bollard::service::ImageSummary;
use bytes::Bytes;
use clap::Subcommand;
use colored::Colorize;
use futures_util::StreamExt;
use std::path::{Path, PathBuf};
use tar::{Builder, Header};
use tracing::info;

use crate::config::{Config, CONFIG_FILE};
use crate::sandbox::{ContainerRuntime, DockerRuntime};
use crate::templates;

/// Image management actions.
#[derive(Subcommand, Debug)]
pub enum ImageAction {
    /// Build the sandbox image, bundling an sshbox binary as the idle watcher
    Build {
        /// Image tag (default: from sshbox.toml)
        #[arg(long)]
        tag: Option<String>,

        /// Linux sshbox binary to bundle, e.g. a static musl build
        /// (default: this executable, Linux hosts only)
        #[arg(long)]
        binary: Option<PathBuf>,
    },

    /// Pull the sandbox image from a registry
    Pull {
        /// Image name to pull (default: from sshbox.toml)
        #[arg(long)]
        image: Option<String>,

        /// Pull even if the image exists locally
        #[arg(long, default_value = "false")]
        force: bool,
    },

    /// Show whether the sandbox image is present locally
    Status {
        /// Image name to check (default: from sshbox.toml)
        #[arg(long)]
        image: Option<String>,
    },
}

/// Run image management command.
pub async fn run(action: ImageAction, config_path: Option<PathBuf>) -> Result<()> {
    let config_path = config_path.unwrap_or_else(|| PathBuf::from(CONFIG_FILE));
    let config = Config::load(&config_path)?;
    let runtime = DockerRuntime::connect().await?;

    match action {
        ImageAction::Build { tag, binary } => {
            let tag = tag.unwrap_or_else(|| config.sandbox.image.clone());
            build_image(&runtime, &tag, binary.as_deref()).await?;
        }
        ImageAction::Pull { image, force } => {
            let image = image.unwrap_or_else(|| config.sandbox.image.clone());
            pull_image(&runtime, &image, force).await?;
        }
        ImageAction::Status { image } => {
            let image = image.unwrap_or_else(|| config.sandbox.image.clone());
            show_image_status(&runtime, &image).await?;
        }
    }

    Ok(())
}

/// Build the sandbox image from the embedded Dockerfile and entrypoint.
///
/// The Dockerfile runs the bundled binary once, so a binary that cannot
/// execute in the image fails the build rather than the sandbox.
async fn build_image(runtime: &DockerRuntime, tag: &str, binary: Option<&Path>) -> Result<()> {
    let (exe, platform) = match binary {
        Some(path) => (path.to_path_buf(), String::new()),
        None => {
            let platform = bundle_platform(std::env::consts::OS, std::env::consts::ARCH)?;
            let exe =
                std::env::current_exe().context("Failed to locate the sshbox executable")?;
            (exe, platform.to_string())
        }
    };
    let binary = std::fs::read(&exe)
        .with_context(|| format!("Failed to read {}", exe.display()))?;

    let context = build_context(&binary)?;
    info!(
        "Building sandbox image {} from {} ({} byte context)",
        tag,
        exe.display(),
        context.len()
    );

    let build_options = BuildImageOptions {
        dockerfile: "Dockerfile".to_string(),
        t: tag.to_string(),
        rm: true,
        platform,
        ..Default::default()
    };

    let mut stream = runtime
        .docker()
        .build_image(build_options, None, Some(Bytes::from(context)));

    while let Some(chunk) = stream.next().await {
        let output = chunk.context("Error building image")?;
        if let Some(text) = &output.stream {
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                println!("{trimmed}");
            }
        } else if let Some(error) = &output.error {
            anyhow::bail!("Docker build error: {error}");
        }
    }

    println!("{} Image built: {}", "✓".green(), tag.cyan());
    Ok(())
}

/// Image platform matching the running executable, which only a Linux
/// build can satisfy.
fn bundle_platform(os: &str, arch: &str) -> Result<&'static str> {
    let platform = match (os, arch) {
        ("linux", "x86_64") => Some("linux/amd64"),
        ("linux", "aarch64") => Some("linux/arm64"),
        ("linux", "arm") => Some("linux/arm/v7"),
        _ => None,
    };

    platform.with_context(|| {
        format!(
            "This sshbox is a {os}/{arch} binary and cannot run inside the Linux sandbox image.\n\
             Build a static Linux binary (e.g. --target x86_64-unknown-linux-musl) and pass it with --binary"
        )
    })
}

/// Tar archive holding the Dockerfile, the entrypoint and the binary.
fn build_context(binary: &[u8]) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    {
        let mut tar = Builder::new(&mut buf);
        append_file(&mut tar, "Dockerfile", templates::DOCKERFILE.as_bytes(), 0o644)?;
        append_file(&mut tar, "entrypoint.sh", templates::ENTRYPOINT_SH.as_bytes(), 0o755)?;
        append_file(&mut tar, "sshbox", binary, 0o755)?;
        tar.finish().context("Failed to finalize tarball")?;
    }
    Ok(buf)
}

fn append_file(tar: &mut Builder<&mut Vec<u8>>, path: &str, data: &[u8], mode: u32) -> Result<()> {
    let mut header = Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(mode);
    header.set_cksum();
    tar.append_data(&mut header, path, data)
        .with_context(|| format!("Failed to add {path} to build context"))
}

/// Pull unless present locally (or forced).
async fn pull_image(runtime: &DockerRuntime, image: &str, force: bool) -> Result<()> {
    if !force && runtime.image_exists(image).await? {
        println!("Image '{image}' already exists locally.");
        println!("Use --force to pull anyway.");
        return Ok(());
    }

    runtime.pull_image(image).await?;
    println!("{} Image pulled: {}", "✓".green(), image.cyan());
    Ok(())
}

async fn show_image_status(runtime: &DockerRuntime, image: &str) -> Result<()> {
    let images = runtime
        .docker()
        .list_images(Some(ListImagesOptions::<String> {
            all: true,
            ..Default::default()
        }))
        .await
        .context("Failed to list images")?;

    let matching: Vec<&ImageSummary> = images
        .iter()
        .filter(|img| img.repo_tags.iter().any(|t| tag_matches(t, image)))
        .collect();

    if matching.is_empty() {
        println!("Image not found: {image}");
        println!("\nTo build the image, run:");
        println!("  sshbox image build");
        println!("\nTo pull the image, run:");
        println!("  sshbox image pull");
        return Ok(());
    }

    println!("Image: {}", image.cyan());
    println!("Status: {}", "Found".green());

    for img in matching {
        #[allow(clippy::cast_precision_loss)]
        let size_megabytes = img.size.unsigned_abs() as f64 / 1_048_576.0;
        println!("Size: {size_megabytes:.2} MB");
        println!("Tags: {}", img.repo_tags.join(", "));
        println!("ID: {}", img.id);
    }

    Ok(())
}

/// Compare a repo tag with an image reference, defaulting the tag to `latest`.
fn tag_matches(repo_tag: &str, image: &str) -> bool {
    parse_image_tag(repo_tag) == parse_image_tag(image)
}

/// Parse image name and tag from a string.
fn parse_image_tag(image: &str) -> (&str, &str) {
    match image.rfind(':') {
        Some(colon) if !image[colon..].contains('/') => (&image[..colon], &image[colon + 1..]),
        _ => (image, "latest"),
    }
}
