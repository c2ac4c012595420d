use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use ignore::Walk;
use tokio::task::LocalSet;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use placeholder_uploader::config::{FileUploadConfig, UploadHooks};
use placeholder_uploader::document::{DocumentHandle, MemoryDocument, Position};
use placeholder_uploader::upload::{SelectedFile, SessionServices, UploadSession};
use placeholder_uploader::view::document_data_html;

const IGNORED_DIRS: [&str; 6] = ["node_modules", ".cache", "dist", "logs", ".idea", ".git"];
const IGNORED_FILES: [&str; 3] = [".DS_Store", ".env", "package-lock.json"];

#[derive(Parser, Debug)]
#[command(version, about = "Upload files as document placeholders")]
struct UploadArgs {
    /// JSON upload configuration
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Files or folders to upload
    #[arg(required = true, value_name = "PATH")]
    inputs: Vec<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = UploadArgs::parse();
    let config = FileUploadConfig::from_file(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    let files = collect_files(&args.inputs)?;
    info!("Found {} files to upload", files.len());

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    LocalSet::new().block_on(&runtime, run(config, files))
}

async fn run(config: FileUploadConfig, files: Vec<SelectedFile>) -> Result<()> {
    let document = DocumentHandle::new(MemoryDocument::new());
    let session = UploadSession::from_config(
        document.clone(),
        config,
        UploadHooks::default(),
        SessionServices::default(),
    )?;
    session.start();
    let _log = session.on_upload_complete(|complete| {
        info!("{} -> {}", complete.id, complete.response.url);
    });

    let ids = session.select_files(files, Position::end_of_main())?;
    if ids.is_empty() {
        warn!("Nothing was uploaded");
    }
    session.wait_idle().await;
    session.stop();

    println!("{}", session.summary().status_text());
    println!("{}", document_data_html(&*document.read()));
    Ok(())
}

/// Expand folders, skipping the usual build and editor clutter.
fn collect_files(inputs: &[PathBuf]) -> Result<Vec<SelectedFile>> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_file() {
            files.push(selected_file(input)?);
            continue;
        }
        for entry in Walk::new(input) {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() || is_ignored(path) {
                continue;
            }
            files.push(selected_file(path)?);
        }
    }
    Ok(files)
}

fn is_ignored(path: &Path) -> bool {
    let in_ignored_dir = path.components().any(|c| {
        IGNORED_DIRS
            .iter()
            .any(|dir| c.as_os_str() == std::ffi::OsStr::new(dir))
    });
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    in_ignored_dir || IGNORED_FILES.contains(&name)
}

fn selected_file(path: &Path) -> Result<SelectedFile> {
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    SelectedFile::from_path(path, mime.to_string())
        .with_context(|| format!("failed to read {}", path.display()))
}
