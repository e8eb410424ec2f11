//! Sequence file-name patterns.
//!
//! A sequence is named by one of its members with the frame number replaced
//! by a token:
//!
//! | Token | Example | Matches |
//! |---|---|---|
//! | printf `%0Nd` | `shot.%04d.exr` | `shot.0001.exr`, `shot.0245.exr` |
//! | hash run | `shot.####.exr` | same, width = number of `#` |
//!
//! The printf form is looked for first; a name carrying both uses the printf
//! token and keeps the hashes literal. Only the first token is replaced.
//! Everything around the token is matched literally, and the whole file name
//! must match.

use regex::Regex;

/// A compiled sibling-matching pattern.
#[derive(Debug, Clone)]
pub struct SequencePattern {
    source: String,
    regex: Regex,
    padding: usize,
}

impl SequencePattern {
    /// Derive a pattern from a file name. `None` means the name has no frame
    /// token and is not a sequence.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let printf = Regex::new(r"%0([0-9]+)d").ok()?;
        let hashes = Regex::new(r"#+").ok()?;

        let (range, padding) = if let Some(caps) = printf.captures(name) {
            let token = caps.get(0)?;
            let width: usize = caps[1].parse().ok()?;
            (token.range(), width.max(1))
        } else if let Some(token) = hashes.find(name) {
            (token.range(), token.len())
        } else {
            return None;
        };

        let pattern = format!(
            "^{}([0-9]{{{}}}){}$",
            regex::escape(&name[..range.start]),
            padding,
            regex::escape(&name[range.end..])
        );
        let regex = Regex::new(&pattern).ok()?;
        Some(Self {
            source: name.to_string(),
            regex,
            padding,
        })
    }

    pub fn is_match(&self, file_name: &str) -> bool {
        self.regex.is_match(file_name)
    }

    /// The frame number carried by a matching file name.
    pub fn frame_number(&self, file_name: &str) -> Option<u64> {
        self.regex.captures(file_name)?.get(1)?.as_str().parse().ok()
    }

    /// Number of digits a frame number must have.
    pub fn padding(&self) -> usize {
        self.padding
    }

    /// The name the pattern was derived from.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn printf_token() {
        let p = SequencePattern::from_file_name("shot.%04d.exr").unwrap();
        assert_eq!(p.padding(), 4);
        assert!(p.is_match("shot.0001.exr"));
        assert!(p.is_match("shot.9999.exr"));
        assert!(!p.is_match("shot.001.exr"));
        assert!(!p.is_match("shot.00001.exr"));
        assert!(!p.is_match("shot.0001.exr.lock"));
        assert!(!p.is_match("xshot.0001.exr"));
    }

    #[test]
    fn hash_token() {
        let p = SequencePattern::from_file_name("plate_###.png").unwrap();
        assert_eq!(p.padding(), 3);
        assert!(p.is_match("plate_042.png"));
        assert!(!p.is_match("plate_42.png"));
        assert!(!p.is_match("plate_abc.png"));
    }

    #[test]
    fn single_hash_matches_one_digit() {
        let p = SequencePattern::from_file_name("f#.tif").unwrap();
        assert_eq!(p.padding(), 1);
        assert!(p.is_match("f7.tif"));
        assert!(!p.is_match("f17.tif"));
    }

    #[test]
    fn zero_width_printf_still_matches_a_digit() {
        let p = SequencePattern::from_file_name("f.%00d.tif").unwrap();
        assert_eq!(p.padding(), 1);
        assert!(p.is_match("f.3.tif"));
    }

    #[test]
    fn printf_wins_over_hashes() {
        let p = SequencePattern::from_file_name("v##.%02d.png").unwrap();
        assert_eq!(p.padding(), 2);
        assert!(p.is_match("v##.07.png"));
        assert!(!p.is_match("v12.07.png"));
    }

    #[test]
    fn metacharacters_are_literal() {
        let p = SequencePattern::from_file_name("a+b (v1) [x].%03d.png").unwrap();
        assert!(p.is_match("a+b (v1) [x].010.png"));
        assert!(!p.is_match("aab (v1) [x].010.png"));
        let dot = SequencePattern::from_file_name("a.%02d.png").unwrap();
        assert!(!dot.is_match("a.01xpng"));
    }

    #[test]
    fn plain_names_are_not_sequences() {
        assert!(SequencePattern::from_file_name("shot.0001.exr").is_none());
        assert!(SequencePattern::from_file_name("shot.%d.exr").is_none());
        assert!(SequencePattern::from_file_name("").is_none());
    }

    #[test]
    fn frame_number_from_capture() {
        let p = SequencePattern::from_file_name("shot.%04d.exr").unwrap();
        assert_eq!(p.frame_number("shot.0120.exr"), Some(120));
        assert_eq!(p.frame_number("other.0120.exr"), None);
        assert_eq!(p.source(), "shot.%04d.exr");
    }
}
