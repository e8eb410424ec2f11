//! Whole-sequence conversion.
//!
//! A sequence request names its input with a frame token
//! (`shot.%04d.exr`, `shot.####.exr`, see [`pattern`](crate::pattern)) and
//! its output with a plain file name (`proxy.png`). Conversion runs in two
//! steps:
//!
//! 1. **Plan** ([`plan_sequence`]): validate paths, list the input directory
//!    once, keep every regular file the pattern matches (in the order the
//!    filesystem returns them) and name an output for each.
//! 2. **Run** ([`convert_sequence`]): split the plan into contiguous chunks,
//!    one per worker, and convert each chunk on its own thread of a pool
//!    built for this call alone.
//!
//! ## Output names
//!
//! The output stem loses any trailing separators (`proxy_.png` → `proxy`);
//! each item is then written as `<base>.<n>.<ext>` where `n` is either the
//! item's position in the plan ([`OutputNaming::Positional`], the default) or
//! its source frame number zero-padded to the pattern's width
//! ([`OutputNaming::FrameNumber`]).
//!
//! ## Failure isolation
//!
//! Each item is locked (on its *input* path), converted with one thread,
//! and unlocked, whatever happened. A busy lock, a failed conversion or a
//! panic inside the decoder is reported to the sink and the worker moves on
//! to its next item. [`convert_sequence`] itself only fails when planning
//! fails.

use crate::diagnostics::Reporter;
use crate::imaging::ImageBackend;
use crate::locks::{LockCoordinator, LockError};
use crate::pattern::SequencePattern;
use crate::thumbnail::{ConvertRequest, Converter};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::ops::Range;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum SequenceError {
    #[error("Output file extension is empty: {}", .0.display())]
    EmptyExtension(PathBuf),
    #[error("Parent directory does not exist: {}", .0.display())]
    MissingParent(PathBuf),
    #[error("Does not seem like a file sequence: {}", .0.display())]
    NotASequence(PathBuf),
    #[error("Could not find file sequence items: {}", .0.display())]
    NoMatches(PathBuf),
    #[error("Could not list directory: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("Could not start worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

impl SequenceError {
    fn parts(&self) -> (&'static str, Option<&Path>) {
        match self {
            SequenceError::EmptyExtension(p) => ("Output file extension is empty", Some(p)),
            SequenceError::MissingParent(p) => ("Parent directory does not exist", Some(p)),
            SequenceError::NotASequence(p) => (
                "Does not seem like a file sequence. Try converting a single image instead.",
                Some(p),
            ),
            SequenceError::NoMatches(p) => ("Could not find file sequence items", Some(p)),
            SequenceError::Walk(e) => ("Could not list directory", e.path()),
            SequenceError::Pool(_) => ("Could not start worker pool", None),
        }
    }
}

/// How sequence outputs are numbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputNaming {
    /// `0, 1, 2, ...` in plan order.
    #[default]
    Positional,
    /// The source frame number, padded to the pattern width.
    FrameNumber,
}

/// One input/output pair of a planned sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceItem {
    pub input: PathBuf,
    pub output: PathBuf,
}

/// Every item a sequence conversion will attempt, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequencePlan {
    pub pattern: String,
    pub items: Vec<SequenceItem>,
}

/// Outcome of a sequence run. Item failures are counted, never returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceReport {
    pub plan: SequencePlan,
    pub converted: usize,
    pub failed: usize,
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Output stem with trailing `-`, `_`, `.` and whitespace removed.
pub fn output_base_name(output: &Path) -> String {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    stem.trim_end_matches(|c: char| matches!(c, '-' | '_' | '.') || c.is_whitespace())
        .to_string()
}

/// Resolve a sequence request to a concrete list of items.
pub fn plan_sequence(
    input: &Path,
    output: &Path,
    naming: OutputNaming,
) -> Result<SequencePlan, SequenceError> {
    let extension = output
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .filter(|e| !e.is_empty())
        .ok_or_else(|| SequenceError::EmptyExtension(output.to_path_buf()))?;

    let input_dir = parent_dir(input);
    let output_dir = parent_dir(output);
    for dir in [&input_dir, &output_dir] {
        if !dir.is_dir() {
            return Err(SequenceError::MissingParent(dir.clone()));
        }
    }

    let file_name = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let pattern = SequencePattern::from_file_name(&file_name)
        .ok_or_else(|| SequenceError::NotASequence(input.to_path_buf()))?;

    let base = output_base_name(output);
    let mut items = Vec::new();
    for entry in WalkDir::new(&input_dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
    {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if !pattern.is_match(&name) {
            continue;
        }
        let number = match naming {
            OutputNaming::Positional => items.len().to_string(),
            OutputNaming::FrameNumber => match pattern.frame_number(&name) {
                Some(frame) => format!("{:0width$}", frame, width = pattern.padding()),
                None => items.len().to_string(),
            },
        };
        items.push(SequenceItem {
            input: entry.into_path(),
            output: output_dir.join(format!("{base}.{number}.{extension}")),
        });
    }

    if items.is_empty() {
        return Err(SequenceError::NoMatches(input.to_path_buf()));
    }
    Ok(SequencePlan {
        pattern: pattern.as_str().to_string(),
        items,
    })
}

/// Number of workers for `items` given a thread hint (0 = one per core).
pub fn worker_count(hint: usize, items: usize) -> usize {
    let wanted = if hint == 0 {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    } else {
        hint
    };
    wanted.min(items).max(1)
}

/// Split `0..len` into `workers` contiguous ranges whose lengths differ by
/// at most one; the longer ranges come first.
pub fn partition(len: usize, workers: usize) -> Vec<Range<usize>> {
    let workers = workers.max(1);
    let per_worker = len / workers;
    let remainder = len % workers;
    let mut start = 0;
    (0..workers)
        .map(|w| {
            let end = start + per_worker + usize::from(w < remainder);
            let range = start..end;
            start = end;
            range
        })
        .filter(|r| !r.is_empty())
        .collect()
}

/// Convert every item of the sequence named by `request.input`.
///
/// `request.threads` is the worker count hint; each conversion itself runs
/// single-threaded and quiet. Returns `Err` only when planning fails.
pub fn convert_sequence<B: ImageBackend + ?Sized>(
    converter: &Converter<'_, B>,
    locks: &LockCoordinator,
    request: &ConvertRequest,
    naming: OutputNaming,
) -> Result<SequenceReport, SequenceError> {
    let reporter = Reporter::new(converter.sink(), request.verbose);
    let result = run_sequence(converter, locks, request, naming, &reporter);
    if let Err(e) = &result {
        let (headline, path) = e.parts();
        let detail = e.to_string();
        reporter.error(headline, path.unwrap_or(request.input.as_path()), Some(&detail));
    }
    result
}

fn run_sequence<B: ImageBackend + ?Sized>(
    converter: &Converter<'_, B>,
    locks: &LockCoordinator,
    request: &ConvertRequest,
    naming: OutputNaming,
    reporter: &Reporter<'_>,
) -> Result<SequenceReport, SequenceError> {
    reporter.progress("Searching for matching files...");
    let plan = plan_sequence(&request.input, &request.output, naming)?;
    let total = plan.items.len();
    reporter.progress(format!("    Found {total} items"));

    let workers = worker_count(request.threads, total);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("sequence-{i}"))
        .build()?;
    tracing::debug!(items = total, workers, "starting sequence");

    let converted = AtomicUsize::new(0);
    pool.scope(|scope| {
        for range in partition(total, workers) {
            let chunk = &plan.items[range.clone()];
            let converted = &converted;
            scope.spawn(move |_| {
                for (offset, item) in chunk.iter().enumerate() {
                    let index = range.start + offset;
                    reporter.progress(format!("Processing image {} of {}", index + 1, total));
                    if convert_item(converter, locks, request, item, reporter) {
                        converted.fetch_add(1, Ordering::Relaxed);
                    }
                }
            });
        }
    });

    let converted = converted.into_inner();
    reporter.progress(format!("Finished processing {total} items."));
    Ok(SequenceReport {
        plan,
        converted,
        failed: total - converted,
    })
}

/// Lock, convert, unlock. Never panics, never returns an error.
fn convert_item<B: ImageBackend + ?Sized>(
    converter: &Converter<'_, B>,
    locks: &LockCoordinator,
    request: &ConvertRequest,
    item: &SequenceItem,
    reporter: &Reporter<'_>,
) -> bool {
    let guard = match locks.acquire(&item.input) {
        Ok(guard) => guard,
        Err(LockError::Busy(_)) => {
            reporter.error(
                "Another process is already working on this file. Skipping...",
                &item.input,
                None,
            );
            return false;
        }
        Err(e) => {
            reporter.error("Could not lock file", &item.input, Some(&e.to_string()));
            return false;
        }
    };

    let item_request = ConvertRequest {
        input: item.input.clone(),
        output: item.output.clone(),
        threads: 1,
        verbose: false,
        ..request.clone()
    };
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| converter.convert(&item_request)));
    guard.release();

    match outcome {
        Ok(Ok(_)) => {
            reporter.progress(format!("Output: {}", item.output.display()));
            true
        }
        Ok(Err(_)) => {
            // The converter already reported the cause.
            reporter.error("Error converting image", &item.input, None);
            false
        }
        Err(payload) => {
            reporter.error(
                "Error converting image",
                &item.input,
                Some(&panic_message(payload.as_ref())),
            );
            false
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "conversion panicked".to_string()
    }
}
