use bookmarks_imageutil::cache::ImageCache;
use bookmarks_imageutil::config::{self, ToolConfig};
use bookmarks_imageutil::diagnostics::{
    ChannelDiagnostics, Diagnostics, Reporter, Severity, format_event,
};
use bookmarks_imageutil::imaging::{RustBackend, TargetSize};
use bookmarks_imageutil::locks::{LockCoordinator, LockError};
use bookmarks_imageutil::pattern::SequencePattern;
use bookmarks_imageutil::sequence::{self, OutputNaming};
use bookmarks_imageutil::staleness::{self, Freshness};
use bookmarks_imageutil::thumbnail::{ConvertRequest, Converter};
use clap::Parser;
use clap::error::ErrorKind;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::mpsc;

#[derive(Parser)]
#[command(name = "bookmarks-imageutil")]
#[command(about = "Convert images and image sequences to thumbnails and proxies")]
#[command(long_about = "\
Convert images and image sequences to thumbnails and proxies

A single input is converted to a single output. An input whose file name
carries a frame token is treated as a sequence:

  shot.%04d.exr   shot.####.exr   ->  every sibling frame of that width

Sequence outputs are written next to --output as <name>.<n>.<ext>.

Every output is 8-bit and stamped with the source size, path and time.
--check compares that stamp against the source and exits 0 only when the
output is up to date.

Sizes: 0 keeps the source's long edge, -1 keeps its exact dimensions,
any positive value fits the long edge to that many pixels.

Run 'bookmarks-imageutil --gen-config' to print a documented config file.")]
#[command(version)]
struct Cli {
    /// Source image, or a sequence pattern like shot.%04d.exr
    #[arg(short, long, required_unless_present = "gen_config")]
    input: Option<PathBuf>,

    /// Output image
    #[arg(short, long, required_unless_present = "gen_config")]
    output: Option<PathBuf>,

    /// Source color space (default: from the file, else sRGB). Also -scs
    #[arg(long = "source_color_space", default_value = "")]
    source_color_space: String,

    /// Target color space (default: sRGB). Also -tcs
    #[arg(long = "target_color_space", default_value = "")]
    target_color_space: String,

    /// Long edge in pixels; 0 = source size, -1 = exact source dimensions
    #[arg(
        short,
        long,
        default_value = "0",
        allow_negative_numbers = true,
        value_parser = parse_size
    )]
    size: TargetSize,

    /// Worker threads; 0 = one per core
    #[arg(short, long, default_value_t = 0)]
    threads: usize,

    /// Print progress
    #[arg(short, long)]
    verbose: bool,

    /// TOML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Only report whether the output is up to date
    #[arg(long)]
    check: bool,

    /// Name sequence outputs by source frame number instead of position
    #[arg(long)]
    keep_frame_numbers: bool,

    /// Print a stock config file with all options documented
    #[arg(long)]
    gen_config: bool,
}

fn parse_size(raw: &str) -> Result<TargetSize, String> {
    let value: i64 = raw.trim().parse().map_err(|e| format!("{e}"))?;
    TargetSize::try_from(value)
}

/// Rewrite the multi-letter short flags older callers pass (`-scs`, `-tcs`)
/// to their long forms; clap only knows single-letter shorts.
fn normalize_legacy_flags(args: impl IntoIterator<Item = OsString>) -> Vec<OsString> {
    args.into_iter()
        .map(|arg| match arg.to_str() {
            Some("-scs") => OsString::from("--source_color_space"),
            Some("-tcs") => OsString::from("--target_color_space"),
            _ => arg,
        })
        .collect()
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse_from(normalize_legacy_flags(std::env::args_os())) {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            };
        }
    };
    init_tracing(cli.verbose);

    if cli.gen_config {
        print!("{}", config::stock_config_toml());
        return ExitCode::SUCCESS;
    }

    let tool_config = match config::load_config(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("[Error] Could not load config\n    {e}");
            return ExitCode::FAILURE;
        }
    };
    let (Some(input), Some(output)) = (cli.input.clone(), cli.output.clone()) else {
        eprintln!("[Error] --input and --output are required");
        return ExitCode::FAILURE;
    };

    let (tx, rx) = mpsc::channel();
    let printer = std::thread::spawn(move || {
        for event in rx {
            for line in format_event(&event) {
                match event.severity {
                    Severity::Progress => println!("{}", line),
                    Severity::Warning | Severity::Error => eprintln!("{}", line),
                }
            }
        }
    });
    let sink = ChannelDiagnostics::new(tx);

    let outcome = if cli.check {
        let freshness = check(&input, &output, cli.verbose, &sink);
        Some(freshness)
    } else {
        None
    };
    let success = match outcome {
        Some(freshness) => freshness.is_up_to_date(),
        None => run(&cli, &tool_config, input, output, &sink),
    };

    drop(sink);
    let _ = printer.join();
    if let Some(freshness) = outcome {
        println!("{freshness}");
    }
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn init_tracing(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .with_target(false)
        .init();
}

fn check(input: &Path, output: &Path, verbose: bool, sink: &dyn Diagnostics) -> Freshness {
    let backend = RustBackend::new();
    staleness::is_up_to_date(&backend, input, output, &Reporter::new(sink, verbose))
}

/// Convert a single file or a whole sequence. `false` means a reported
/// failure.
fn run(
    cli: &Cli,
    tool_config: &ToolConfig,
    input: PathBuf,
    output: PathBuf,
    sink: &dyn Diagnostics,
) -> bool {
    let backend = RustBackend::new();
    let cache = ImageCache::new(tool_config.cache.max_memory_mb);
    let converter = Converter::new(&backend, &cache, sink);
    let locks = LockCoordinator::new(tool_config.locks.stale_after());

    let request = ConvertRequest {
        source_color_space: Some(cli.source_color_space.clone()),
        target_color_space: Some(cli.target_color_space.clone()),
        size: cli.size,
        threads: config::effective_threads(cli.threads, &tool_config.processing),
        verbose: cli.verbose,
        ..ConvertRequest::new(input, output)
    };

    let is_sequence = request
        .input
        .file_name()
        .and_then(|name| SequencePattern::from_file_name(&name.to_string_lossy()))
        .is_some();

    let success = if is_sequence {
        let naming = if cli.keep_frame_numbers {
            OutputNaming::FrameNumber
        } else {
            tool_config.sequence.naming
        };
        match sequence::convert_sequence(&converter, &locks, &request, naming) {
            Ok(report) => {
                tracing::info!(
                    converted = report.converted,
                    failed = report.failed,
                    "sequence finished"
                );
                true
            }
            Err(_) => false,
        }
    } else {
        convert_single(&converter, &locks, &request, sink)
    };

    tracing::debug!("cache: {}", cache.stats());
    success
}

fn convert_single(
    converter: &Converter<'_, RustBackend>,
    locks: &LockCoordinator,
    request: &ConvertRequest,
    sink: &dyn Diagnostics,
) -> bool {
    let reporter = Reporter::new(sink, request.verbose);
    let guard = match locks.acquire(&request.input) {
        Ok(guard) => guard,
        Err(LockError::Busy(path)) => {
            reporter.error(
                "Another process is already working on this file.",
                &path,
                None,
            );
            return false;
        }
        Err(e) => {
            reporter.error("Could not lock file", &request.input, Some(&e.to_string()));
            return false;
        }
    };
    let result = converter.convert(request);
    guard.release();
    result.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<OsString> {
        list.iter().map(OsString::from).collect()
    }

    #[test]
    fn legacy_flags_are_rewritten() {
        let out = normalize_legacy_flags(args(&["bin", "-scs", "linear", "-tcs", "sRGB", "-s", "-1"]));
        assert_eq!(
            out,
            args(&[
                "bin",
                "--source_color_space",
                "linear",
                "--target_color_space",
                "sRGB",
                "-s",
                "-1"
            ])
        );
    }

    #[test]
    fn cli_parses_negative_size() {
        let cli = Cli::try_parse_from(args(&["bin", "-i", "a.exr", "-o", "b.png", "-s", "-1"])).unwrap();
        assert_eq!(cli.size, TargetSize::Preserve);
        assert_eq!(cli.threads, 0);
        assert!(!cli.verbose);
    }

    #[test]
    fn cli_rejects_bad_size() {
        assert!(Cli::try_parse_from(args(&["bin", "-i", "a", "-o", "b", "-s", "-5"])).is_err());
        assert!(Cli::try_parse_from(args(&["bin", "-i", "a", "-o", "b", "-s", "big"])).is_err());
    }

    #[test]
    fn cli_requires_paths_unless_generating_config() {
        assert!(Cli::try_parse_from(args(&["bin", "-i", "a.exr"])).is_err());
        assert!(Cli::try_parse_from(args(&["bin", "--gen-config"])).is_ok());
    }

    #[test]
    fn color_space_flags_accept_legacy_spelling() {
        let cli = Cli::try_parse_from(normalize_legacy_flags(args(&[
            "bin", "-i", "a.exr", "-o", "b.png", "-scs", "linear",
        ])))
        .unwrap();
        assert_eq!(cli.source_color_space, "linear");
        assert_eq!(cli.target_color_space, "");
    }
}
