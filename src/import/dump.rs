//! In-process filter for uncompressed pages-articles XML.

use std::io::BufRead;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use quick_xml::events::Event;
use regex::Regex;

use super::extract::TITLE_MARKER;

/// `[[xx:Word]]` at the start of a wikitext line.
static INTERLANG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[\[([a-z]{2,3}):([^\]]*)\]\]").unwrap());

/// Stream `TITLE:<title>` and `<lang>:<word>` lines out of a dump.
///
/// `emit` returns false to stop early. Returns the number of lines emitted.
pub fn filter_xml<R: BufRead>(input: R, mut emit: impl FnMut(String) -> bool) -> Result<u64> {
    let mut reader = quick_xml::Reader::from_reader(input);
    let mut buf = Vec::new();
    let mut in_title = false;
    let mut in_text = false;
    let mut emitted = 0u64;

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .with_context(|| format!("Malformed dump XML at byte {}", reader.buffer_position()))?;
        match event {
            Event::Start(e) => match e.name().as_ref() {
                b"title" => in_title = true,
                b"text" => in_text = true,
                _ => {}
            },
            Event::Text(e) if in_title => {
                let title = e.unescape()?;
                emitted += 1;
                if !emit(format!("{}{}", TITLE_MARKER, title.trim())) {
                    break;
                }
            }
            Event::Text(e) if in_text => {
                let text = e.unescape()?;
                for line in text.lines() {
                    let Some(caps) = INTERLANG_RE.captures(line.trim_start()) else {
                        continue;
                    };
                    emitted += 1;
                    if !emit(format!("{}:{}", &caps[1], &caps[2])) {
                        return Ok(emitted);
                    }
                }
            }
            Event::End(e) => match e.name().as_ref() {
                b"title" => in_title = false,
                b"text" => in_text = false,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(emitted)
}
