use super::{clean_text, parse_cue_timing};
use crate::transcript::CanonicalLine;

/// Parse SRT blocks: optional index line, timing line, then text lines.
/// Blocks without a readable timing line in their first two lines are skipped.
pub(super) fn parse(payload: &str) -> Vec<CanonicalLine> {
    let normalized = payload.replace("\r\n", "\n").replace('\r', "\n");
    let mut entries = Vec::new();

    for block in split_blocks(&normalized) {
        let Some(timing_index) = block.iter().take(2).position(|line| line.contains("-->")) else {
            tracing::debug!("Skipping SRT block without timing line");
            continue;
        };

        let Some((start, end)) = parse_cue_timing(block[timing_index]) else {
            tracing::debug!("Skipping SRT block with unreadable timing: {}", block[timing_index]);
            continue;
        };

        let text = block[timing_index + 1..].join(" ");
        if let Some(entry) = CanonicalLine::new(start, clean_text(&text, 1)) {
            entries.push(entry.with_end(end));
        }
    }

    entries
}

fn split_blocks(payload: &str) -> Vec<Vec<&str>> {
    let mut blocks = Vec::new();
    let mut current = Vec::new();

    for line in payload.lines() {
        let line = line.trim();
        if line.is_empty() {
            if !current.is_empty() {
                blocks.push(std::mem::take(&mut current));
            }
        } else {
            current.push(line);
        }
    }

    if !current.is_empty() {
        blocks.push(current);
    }

    blocks
}
