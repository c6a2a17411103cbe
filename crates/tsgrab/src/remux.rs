//! Hand-off to an external remuxer (ffmpeg's concat demuxer) once every segment is on disk.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::hls::segment::STAGING_SUFFIX;
use crate::DownloadError;

pub const CONCAT_LIST_FILENAME: &str = "filelist.txt";
pub const DEFAULT_REMUXER: &str = "ffmpeg";
pub const DEFAULT_OUTPUT_FILENAME: &str = "output.mp4";

/// Stderr lines kept for the error message of a failed remux.
const STDERR_TAIL: usize = 5;

/// Names of the files in `dir` with the given extension, unordered.
pub async fn segment_files(dir: &Path, extension: &str) -> Result<Vec<String>, DownloadError> {
    let mut names = Vec::new();
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| DownloadError::directory_io(dir, e))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| DownloadError::directory_io(dir, e))?
    {
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            continue;
        };
        if name.ends_with(STAGING_SUFFIX) {
            continue;
        }
        let matches = Path::new(&name)
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(extension));
        if matches && entry.file_type().await.is_ok_and(|t| t.is_file()) {
            names.push(name);
        }
    }
    Ok(names)
}

/// Input list for the concat demuxer.
#[derive(Debug)]
pub struct ConcatList {
    path: PathBuf,
    entries: usize,
}

impl ConcatList {
    /// Writes `filelist.txt` into `dir`, one line per file in the given order.
    pub async fn write(dir: &Path, ordered: &[String]) -> Result<Self, DownloadError> {
        let path = dir.join(CONCAT_LIST_FILENAME);
        tokio::fs::write(&path, render(ordered))
            .await
            .map_err(|e| DownloadError::directory_io(&path, e))?;
        Ok(Self {
            path,
            entries: ordered.len(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    pub async fn remove(self) {
        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            debug!(path = %self.path.display(), error = %e, "Could not remove concat list");
        }
    }
}

fn render(ordered: &[String]) -> String {
    ordered
        .iter()
        .map(|name| format!("file '{}'\n", name.replace('\'', r"'\''")))
        .collect()
}

#[derive(Debug, Clone)]
pub struct Remuxer {
    program: PathBuf,
}

impl Default for Remuxer {
    fn default() -> Self {
        Self::new(DEFAULT_REMUXER)
    }
}

impl Remuxer {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Whether `<program> -version` runs successfully.
    pub async fn is_available(&self) -> bool {
        Command::new(&self.program)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .is_ok_and(|status| status.success())
    }

    /// Concatenates the listed files into `output` without re-encoding.
    ///
    /// Every stderr line is passed to `on_line`. The list file is removed afterwards,
    /// whatever the result.
    pub async fn remux<F>(
        &self,
        list: ConcatList,
        output: &Path,
        token: &CancellationToken,
        mut on_line: F,
    ) -> Result<(), DownloadError>
    where
        F: FnMut(&str),
    {
        let result = self.run(&list, output, token, &mut on_line).await;
        list.remove().await;
        result
    }

    async fn run<F>(
        &self,
        list: &ConcatList,
        output: &Path,
        token: &CancellationToken,
        on_line: &mut F,
    ) -> Result<(), DownloadError>
    where
        F: FnMut(&str),
    {
        info!(
            program = %self.program.display(),
            files = list.len(),
            output = %output.display(),
            "Starting remux"
        );
        let mut child = Command::new(&self.program)
            .args(["-hide_banner", "-f", "concat", "-safe", "0", "-i"])
            .arg(list.path())
            .args(["-c", "copy", "-y"])
            .arg(output)
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                DownloadError::remux(format!("failed to start {}: {e}", self.program.display()))
            })?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| DownloadError::remux("failed to capture remuxer stderr"))?;
        let mut lines = BufReader::new(stderr).lines();
        let mut tail = VecDeque::with_capacity(STDERR_TAIL);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    if let Err(e) = child.kill().await {
                        warn!(error = %e, "Failed to stop remuxer");
                    }
                    return Err(DownloadError::Cancelled);
                }
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        on_line(&line);
                        if tail.len() == STDERR_TAIL {
                            tail.pop_front();
                        }
                        tail.push_back(line);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "Error reading remuxer output");
                        break;
                    }
                },
            }
        }

        let status = child.wait().await?;
        if status.success() {
            info!(output = %output.display(), "Remux finished");
            Ok(())
        } else {
            let detail = tail.into_iter().collect::<Vec<_>>().join("\n");
            Err(DownloadError::remux(format!(
                "{} exited with {status}: {detail}",
                self.program.display()
            )))
        }
    }
}
