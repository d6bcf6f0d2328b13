//! Score sheet parsing.
//!
//! A sheet is CSV text whose header is exactly `player_name,score`, followed by
//! one `<name>,<integer>` record per player. Fields may be quoted. Any malformed
//! record rejects the whole sheet.

use csv::{ReaderBuilder, StringRecord, Trim};
use rankport_core::error::{RankportError, Result};
use rankport_core::types::ScoreRow;

pub const SHEET_HEADER: [&str; 2] = ["player_name", "score"];

pub fn parse_score_sheet(text: &str) -> Result<Vec<ScoreRow>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(Trim::All)
        .flexible(true)
        .from_reader(text.as_bytes());

    let header = reader.headers()
        .map_err(|e| RankportError::validation(format!("unreadable score sheet header: {e}")))?;
    if header.is_empty() {
        return Err(RankportError::validation("score sheet is empty"));
    }
    if header.iter().ne(SHEET_HEADER) {
        return Err(RankportError::validation(format!(
            "invalid score sheet header {:?}, expected {}", header.iter().collect::<Vec<_>>(), SHEET_HEADER.join(",")
        )));
    }

    reader.records()
        .map(|record| {
            let record = record.map_err(|e| RankportError::validation(format!("malformed score sheet: {e}")))?;
            score_row(&record)
        })
        .collect()
}

fn score_row(record: &StringRecord) -> Result<ScoreRow> {
    let line = record.position().map_or(0, |p| p.line());
    if record.len() != SHEET_HEADER.len() {
        return Err(RankportError::validation(format!(
            "line {line}: expected {} columns, got {}", SHEET_HEADER.len(), record.len()
        )));
    }
    let (name, score) = (&record[0], &record[1]);
    if name.is_empty() {
        return Err(RankportError::validation(format!("line {line}: empty player name")));
    }
    let score: i64 = score.parse()
        .map_err(|e| RankportError::validation(format!("line {line}: bad score {score:?}: {e}")))?;
    Ok(ScoreRow { player_name: name.to_string(), score })
}
