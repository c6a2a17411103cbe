use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};
use tsgrab_engine::destination::{
    looks_like_expiring_url, prepare_directory, suggest_directory_name, unique_directory,
};
use tsgrab_engine::hls::segment::DEFAULT_SEGMENT_EXTENSION;
use tsgrab_engine::hls::{EventCallback, MANIFEST_FILENAME, PreparedRun, resolve_order};
use tsgrab_engine::remux::{ConcatList, Remuxer, segment_files};
use tsgrab_engine::{CancellationToken, DownloadEvent, HlsDownloader, HttpClient};
use url::Url;

use crate::cli::Args;
use crate::config::AppConfig;
use crate::error::{AppError, Result};

const BAR_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} segments {msg}";

pub async fn execute(args: &Args, config: &AppConfig, token: &CancellationToken) -> Result<()> {
    let client = HttpClient::new(&config.client_config()?)?;
    let bar = progress_bar(args.quiet);
    let hls = HlsDownloader::new(client, config.download.clone()).with_events(event_sink(bar.clone()));

    let reference = hls.locate(&args.url).await?;
    info!(manifest = %reference, "Resolved manifest URL");
    if looks_like_expiring_url(reference.url()) {
        warn!("This URL carries a time-limited token; if it expires, rerun with a fresh link to resume");
    }

    let dest = choose_destination(config, reference.url(), args.new_dir)?;
    prepare_directory(&dest).await?;
    info!(dest = %dest.display(), "Download folder ready");

    let prepared = hls.prepare(reference, &dest, token).await?;
    bar.set_length(prepared.segments.len() as u64);
    let outcome = hls.run(&prepared, &dest, token).await?;
    bar.finish_and_clear();

    let summary = outcome.summary();
    println!("{summary}");
    if outcome.was_interrupted() {
        return Err(AppError::Interrupted);
    }
    if outcome.is_partial_failure() {
        return Err(AppError::Incomplete(summary));
    }
    println!("Segments saved to {}", dest.display());

    if args.merge {
        let output = merge(args, config, &dest, &prepared, token).await?;
        println!("Merged into {}", output.display());
    }
    Ok(())
}

/// `<base>/<name derived from the URL>`. An existing folder is resumed unless a new one is
/// requested.
fn choose_destination(config: &AppConfig, url: &Url, new_dir: bool) -> Result<PathBuf> {
    let base = match &config.output_dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir()?,
    };
    let dest = base.join(suggest_directory_name(url));
    if new_dir && dest.exists() {
        return Ok(unique_directory(&dest));
    }
    if dest.join(MANIFEST_FILENAME).is_file() {
        info!(dest = %dest.display(), "Resuming previous download");
    }
    Ok(dest)
}

async fn merge(
    args: &Args,
    config: &AppConfig,
    dest: &Path,
    prepared: &PreparedRun,
    token: &CancellationToken,
) -> Result<PathBuf> {
    let remuxer = Remuxer::new(&config.ffmpeg_path);
    if !remuxer.is_available().await {
        return Err(AppError::RemuxerUnavailable(config.ffmpeg_path.clone()));
    }

    let extension = prepared
        .segments
        .first()
        .map(|segment| segment.extension())
        .unwrap_or(DEFAULT_SEGMENT_EXTENSION);
    let ordered = resolve_order(segment_files(dest, extension).await?);
    if ordered.is_empty() {
        return Err(AppError::InvalidInput(format!(
            "no .{extension} files to merge in {}",
            dest.display()
        )));
    }

    let list = ConcatList::write(dest, &ordered).await?;
    let output = dest.join(&args.output_file);
    let spinner = spinner(args.quiet, "Merging segments");
    let result = remuxer
        .remux(list, &output, token, |line| {
            debug!(target: "tsgrab::ffmpeg", "{line}");
            spinner.set_message(line.trim().to_string());
        })
        .await;
    spinner.finish_and_clear();
    result?;
    Ok(output)
}

fn event_sink(bar: ProgressBar) -> EventCallback {
    Arc::new(move |event| match event {
        DownloadEvent::Progress { completed, total } => {
            bar.set_length(total as u64);
            bar.set_position(completed as u64);
        }
        DownloadEvent::Status(message) => bar.set_message(message),
    })
}

fn progress_bar(hidden: bool) -> ProgressBar {
    if hidden {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(0);
    let style = ProgressStyle::with_template(BAR_TEMPLATE)
        .map(|style| style.progress_chars("=> "))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    bar.set_style(style);
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

fn spinner(hidden: bool, message: &'static str) -> ProgressBar {
    if hidden {
        return ProgressBar::hidden();
    }
    let spinner = ProgressBar::new_spinner().with_message(message);
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner
}
