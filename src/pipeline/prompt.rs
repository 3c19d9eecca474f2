//! Prompt loading

use std::path::Path;

use anyhow::{Context, Result};

/// Marker appended to every prompt before encoding; the model was tuned to
/// start its continuation after it.
pub const RESPONSE_MARKER: &str = " [RESPONSE]";

/// A prompt and its line position in the input file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    text: String,
    original_index: usize,
}

impl Prompt {
    pub fn new(text: impl Into<String>, original_index: usize) -> Self {
        Self {
            text: text.into(),
            original_index,
        }
    }

    /// Text as submitted to the model, marker included
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Zero-based position in the input list
    pub fn original_index(&self) -> usize {
        self.original_index
    }
}

/// Build prompts from raw lines: trim each line and append `marker`.
///
/// Blank lines are kept so indices stay equal to line numbers.
pub fn prompts_from_lines<I, S>(lines: I, marker: &str) -> Vec<Prompt>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    lines
        .into_iter()
        .enumerate()
        .map(|(i, line)| Prompt::new(format!("{}{}", line.as_ref().trim(), marker), i))
        .collect()
}

/// Read a newline-delimited prompt file
pub fn load_prompts<P: AsRef<Path>>(path: P, marker: &str) -> Result<Vec<Prompt>> {
    let path = path.as_ref();
    tracing::info!("Loading prompts from {}", path.display());

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read prompts from {}", path.display()))?;

    Ok(prompts_from_lines(content.lines(), marker))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_marker_appended_after_trim() {
        let prompts = prompts_from_lines(["  Tell a story about a fox.  "], RESPONSE_MARKER);
        assert_eq!(prompts[0].text(), "Tell a story about a fox. [RESPONSE]");
        assert_eq!(prompts[0].original_index(), 0);
    }

    #[test]
    fn test_blank_lines_keep_numbering() {
        let prompts = prompts_from_lines(["a", "", "c"], RESPONSE_MARKER);
        assert_eq!(prompts.len(), 3);
        assert_eq!(prompts[1].text(), " [RESPONSE]");
        assert_eq!(prompts[2].original_index(), 2);
    }

    #[test]
    fn test_load_prompts_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[WP] A dragon opens a bakery.").unwrap();
        writeln!(file, "[WP] The moon files a complaint.").unwrap();

        let prompts = load_prompts(file.path(), RESPONSE_MARKER).unwrap();
        assert_eq!(prompts.len(), 2);
        assert_eq!(
            prompts[1].text(),
            "[WP] The moon files a complaint. [RESPONSE]"
        );
        assert_eq!(prompts[1].original_index(), 1);
    }

    #[test]
    fn test_load_prompts_missing_file() {
        assert!(load_prompts("/nonexistent/prompts.txt", RESPONSE_MARKER).is_err());
    }
}
