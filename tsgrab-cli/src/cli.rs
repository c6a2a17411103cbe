use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "tsgrab",
    version,
    about = "Download an HLS stream segment by segment and optionally merge it",
    long_about = "Accepts a manifest URL, the URL of any segment, or the directory that holds them.\n\
                  Re-running the same command resumes an interrupted download."
)]
pub struct Args {
    /// Manifest, segment or directory URL
    pub url: String,

    /// Directory the download folder is created in (default: current directory)
    #[arg(short, long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Maximum concurrent segment downloads (1-20)
    #[arg(short, long, value_name = "N")]
    pub threads: Option<usize>,

    /// Write buffer per segment in KB (256-4096)
    #[arg(long, value_name = "KB")]
    pub chunk_size: Option<usize>,

    /// Request timeout in seconds (5-30)
    #[arg(long, value_name = "SECONDS")]
    pub timeout: Option<u64>,

    /// Keep the file names used in the manifest instead of 0000.ts, 0001.ts, ...
    #[arg(long)]
    pub original_filenames: bool,

    /// Do not report download speed
    #[arg(long)]
    pub no_speed: bool,

    /// Download into a fresh folder even if a previous run can be resumed
    #[arg(long)]
    pub new_dir: bool,

    /// Merge the segments into a single file with ffmpeg when the download completes
    #[arg(short, long)]
    pub merge: bool,

    /// Name of the merged file, created inside the download folder
    #[arg(long, value_name = "FILE", default_value = tsgrab_engine::remux::DEFAULT_OUTPUT_FILENAME)]
    pub output_file: String,

    /// Path to the ffmpeg executable
    #[arg(long, value_name = "PATH")]
    pub ffmpeg: Option<PathBuf>,

    /// Proxy URL for all requests (http, https or socks5)
    #[arg(long, value_name = "URL")]
    pub proxy: Option<String>,

    /// Extra request header, e.g. -H "Cookie: a=b" (repeatable)
    #[arg(short = 'H', long = "header", value_name = "HEADER")]
    pub headers: Vec<String>,

    /// Path to a TOML config file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log errors and hide the progress bar
    #[arg(short, long)]
    pub quiet: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn parses_flags() {
        let args = Args::try_parse_from([
            "tsgrab",
            "https://h/a/index.m3u8",
            "-t",
            "8",
            "--original-filenames",
            "-H",
            "Cookie: a=b",
            "-m",
        ])
        .unwrap();
        assert_eq!(args.threads, Some(8));
        assert!(args.original_filenames);
        assert!(args.merge);
        assert_eq!(args.headers, vec!["Cookie: a=b"]);
        assert_eq!(args.output_file, "output.mp4");
    }

    #[test]
    fn verbose_and_quiet_conflict() {
        assert!(Args::try_parse_from(["tsgrab", "https://h/a/index.m3u8", "-v", "-q"]).is_err());
    }
}
