//! Is an existing output still current?
//!
//! Every output carries the byte size of the file it was made from
//! (`bookmarks:SourceSize`, see [`params`](crate::imaging::params)). The
//! output is up to date when that stamp equals the input's current size.
//! This is a size comparison, not a content hash: an edit that keeps the
//! byte count goes unnoticed.

use crate::diagnostics::Reporter;
use crate::imaging::{ImageBackend, SOURCE_SIZE_ATTR};
use std::fmt;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    UpToDate,
    Stale,
    /// Input size unknown, output unreadable, or no stamp.
    Indeterminate,
}

impl Freshness {
    pub fn is_up_to_date(self) -> bool {
        self == Freshness::UpToDate
    }
}

impl fmt::Display for Freshness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Freshness::UpToDate => "up-to-date",
            Freshness::Stale => "stale",
            Freshness::Indeterminate => "indeterminate",
        })
    }
}

/// Compare the stamp in `output` against the size of `input`.
pub fn is_up_to_date<B: ImageBackend + ?Sized>(
    backend: &B,
    input: &Path,
    output: &Path,
    reporter: &Reporter<'_>,
) -> Freshness {
    let input_size = match fs::metadata(input) {
        Ok(meta) => meta.len(),
        Err(e) => {
            tracing::debug!(path = %input.display(), error = %e, "input not readable");
            reporter.progress("Could not get input image size");
            return Freshness::Indeterminate;
        }
    };

    let spec = match backend.spec(output, 0, 0) {
        Ok(Some(spec)) => spec,
        Ok(None) => {
            reporter.progress("Output has no image");
            return Freshness::Indeterminate;
        }
        Err(e) => {
            reporter.error("Could not open output", output, Some(&e.to_string()));
            return Freshness::Indeterminate;
        }
    };

    let Some(stamp) = spec
        .string_attribute(SOURCE_SIZE_ATTR)
        .filter(|s| !s.is_empty())
    else {
        reporter.progress("Could not get source size attribute");
        return Freshness::Indeterminate;
    };

    if stamp.trim() == input_size.to_string() {
        reporter.progress("Output image is up to date");
        Freshness::UpToDate
    } else {
        Freshness::Stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Severity;
    use crate::imaging::backend::tests::solid;
    use crate::imaging::{RustBackend, WriteParams};
    use crate::test_helpers::RecordingDiagnostics;
    use std::time::UNIX_EPOCH;
    use tempfile::TempDir;

    fn stamped_output(tmp: &TempDir, source_size: u64) -> std::path::PathBuf {
        let output = tmp.path().join("thumb.png");
        let params = WriteParams::stamped(Path::new("/src/a.exr"), source_size, UNIX_EPOCH);
        RustBackend::new()
            .write(&output, &solid(4, 4, &["R", "G", "B"], 0.5), &params)
            .unwrap();
        output
    }

    #[test]
    fn equal_sizes_are_up_to_date() {
        let tmp = TempDir::new().unwrap();
        let input = tmp.path().join("a.exr");
        fs::write(&input, vec![0u8; 1234]).unwrap();
        let output = stamped_output(&tmp, 1234);

        let sink = RecordingDiagnostics::default();
        let fresh = is_up_to_date(&RustBackend::new(), &input, &output, &Reporter::new(&sink, true));
        assert_eq!(fresh, Freshness::UpToDate);
        assert_eq!(sink.messages(), vec!["Output image is up to date"]);
    }

    #[test]
    fn different_sizes_are_stale() {
        let tmp = TempDir::new().unwrap();
        let input = tmp.path().join("a.exr");
        fs::write(&input, vec![0u8; 1235]).unwrap();
        let output = stamped_output(&tmp, 1234);

        let sink = RecordingDiagnostics::default();
        let fresh = is_up_to_date(&RustBackend::new(), &input, &output, &Reporter::new(&sink, false));
        assert_eq!(fresh, Freshness::Stale);
        assert!(sink.events().is_empty());
    }

    #[test]
    fn missing_input_is_indeterminate() {
        let tmp = TempDir::new().unwrap();
        let output = stamped_output(&tmp, 10);
        let sink = RecordingDiagnostics::default();
        let fresh = is_up_to_date(
            &RustBackend::new(),
            &tmp.path().join("gone.exr"),
            &output,
            &Reporter::new(&sink, false),
        );
        assert_eq!(fresh, Freshness::Indeterminate);
    }

    #[test]
    fn missing_output_is_indeterminate_and_reported() {
        let tmp = TempDir::new().unwrap();
        let input = tmp.path().join("a.exr");
        fs::write(&input, b"abc").unwrap();
        let sink = RecordingDiagnostics::default();
        let fresh = is_up_to_date(
            &RustBackend::new(),
            &input,
            &tmp.path().join("none.png"),
            &Reporter::new(&sink, false),
        );
        assert_eq!(fresh, Freshness::Indeterminate);
        assert_eq!(sink.with_severity(Severity::Error).len(), 1);
    }

    #[test]
    fn unstamped_output_is_indeterminate() {
        let tmp = TempDir::new().unwrap();
        let input = tmp.path().join("a.png");
        crate::test_helpers::write_test_png(&input, 8, 8);
        let sink = RecordingDiagnostics::default();
        // A plain PNG written by someone else carries no stamp.
        let fresh = is_up_to_date(&RustBackend::new(), &input, &input, &Reporter::new(&sink, true));
        assert_eq!(fresh, Freshness::Indeterminate);
        assert_eq!(sink.messages(), vec!["Could not get source size attribute"]);
    }

    #[test]
    fn display_names() {
        assert_eq!(Freshness::UpToDate.to_string(), "up-to-date");
        assert_eq!(Freshness::Stale.to_string(), "stale");
        assert_eq!(Freshness::Indeterminate.to_string(), "indeterminate");
        assert!(!Freshness::Stale.is_up_to_date());
    }
}
