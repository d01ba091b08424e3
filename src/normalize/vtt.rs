use super::{clean_text, parse_cue_timing};
use crate::transcript::CanonicalLine;

fn is_timing_line(line: &str) -> bool {
    line.contains("-->")
}

fn is_metadata_block(line: &str) -> bool {
    line.starts_with("NOTE") || line.starts_with("STYLE") || line.starts_with("REGION")
}

/// Skip a NOTE/STYLE/REGION block up to the next blank line
fn skip_block(lines: &[&str], mut index: usize) -> usize {
    index += 1;
    while index < lines.len() && !lines[index].trim().is_empty() {
        index += 1;
    }
    index
}

// Parses WebVTT cues:
// - the header, cue identifiers and `Kind:`/`Language:` lines are ignored
// - NOTE, STYLE and REGION blocks are skipped
// - cue text runs until a blank line or the next timing line
// - inline markup (<c>, <v Speaker>, <00:00:01.000>) is removed
pub(super) fn parse(payload: &str) -> Vec<CanonicalLine> {
    let lines: Vec<&str> = payload.lines().collect();
    let mut entries = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i].trim();

        if is_metadata_block(line) {
            i = skip_block(&lines, i);
            continue;
        }

        if !is_timing_line(line) {
            i += 1;
            continue;
        }

        let timing = parse_cue_timing(line);
        i += 1;

        let mut text_lines = Vec::new();
        while i < lines.len() {
            let text_line = lines[i].trim();
            if text_line.is_empty() || is_timing_line(text_line) {
                break;
            }
            text_lines.push(text_line);
            i += 1;
        }

        match timing {
            Some((start, end)) => {
                if let Some(entry) = CanonicalLine::new(start, clean_text(&text_lines.join(" "), 1)) {
                    entries.push(entry.with_end(end));
                }
            }
            None => tracing::debug!("Skipping VTT cue with unreadable timing: {}", line),
        }
    }

    entries
}
