use tracing::debug;

use crate::error::ExtractError;

pub const TITLE_MARKER: &str = "TITLE:";

/// One interlanguage link together with the title it appeared under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub source_word: String,
    pub target_language: String,
    pub target_word: String,
}

/// Turns filtered dump lines into links, remembering the most recent title.
///
/// Expects two kinds of line: `TITLE:<title>` and `<lang>:<word>`. A link
/// seen before any title is a malformed stream and ends iteration with an
/// error. Links under a title that sanitizes to nothing are skipped.
pub struct LineExtractor<I> {
    lines: I,
    current_title: Option<String>,
    line_no: usize,
    titles: usize,
    skipped: usize,
}

impl<I> LineExtractor<I>
where
    I: Iterator<Item = String>,
{
    pub fn new(lines: I) -> Self {
        LineExtractor {
            lines,
            current_title: None,
            line_no: 0,
            titles: 0,
            skipped: 0,
        }
    }

    /// Lines consumed so far, blank ones included.
    pub fn lines_read(&self) -> usize {
        self.line_no
    }

    pub fn titles(&self) -> usize {
        self.titles
    }

    /// Lines that were neither a title nor a usable link.
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

impl<I> Iterator for LineExtractor<I>
where
    I: Iterator<Item = String>,
{
    type Item = Result<Link, ExtractError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = self.lines.next()?;
            self.line_no += 1;

            if line.trim().is_empty() {
                continue;
            }

            if let Some(title) = line.strip_prefix(TITLE_MARKER) {
                let title = sanitize(title);
                self.titles += 1;
                self.current_title = Some(title);
                continue;
            }

            let Some((lang, word)) = line.split_once(':') else {
                debug!("Skipping line {}: {:?}", self.line_no, line);
                self.skipped += 1;
                continue;
            };

            let Some(title) = &self.current_title else {
                return Some(Err(ExtractError::LinkBeforeTitle {
                    line: self.line_no,
                    text: sanitize(&line),
                }));
            };
            if title.is_empty() {
                debug!("Skipping line {} under an empty title: {:?}", self.line_no, line);
                self.skipped += 1;
                continue;
            }

            return Some(Ok(Link {
                source_word: title.clone(),
                target_language: lang.trim().to_string(),
                target_word: sanitize(word),
            }));
        }
    }
}

/// Drop newlines and apostrophes.
pub fn sanitize(s: &str) -> String {
    s.chars()
        .filter(|c| !matches!(c, '\n' | '\r' | '\''))
        .collect()
}
