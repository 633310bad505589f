//! CSV export of stored box scores for downstream dashboard tooling.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Serialize;
use std::io;
use std::path::Path;

use crate::db::models::GameRecord;

/// Playoff games are numbered after a full regular season.
const REGULAR_SEASON_GAMES: u32 = 82;

pub const HEADER: [&str; 27] = [
    "game_id", "game_date", "season_id", "team_id", "team_abbreviation", "opponent_team_id",
    "matchup", "wl", "min", "pts", "fgm", "fga", "fg3m", "fg3a", "ftm", "fta", "oreb", "dreb",
    "reb", "ast", "stl", "blk", "tov", "pf", "plus_minus", "game_number", "game_number_rev",
];

#[derive(Debug, Serialize)]
struct ExportRow<'a> {
    game_id: &'a str,
    game_date: NaiveDate,
    season_id: &'a str,
    team_id: i64,
    team_abbreviation: &'a str,
    opponent_team_id: i64,
    matchup: &'a str,
    #[serde(rename = "wl")]
    win_loss: Option<&'a str>,
    #[serde(rename = "min")]
    minutes: f64,
    #[serde(rename = "pts")]
    points: i64,
    fgm: i64,
    fga: i64,
    fg3m: i64,
    fg3a: i64,
    ftm: i64,
    fta: i64,
    oreb: i64,
    dreb: i64,
    reb: i64,
    ast: i64,
    stl: i64,
    blk: i64,
    tov: i64,
    pf: i64,
    plus_minus: i64,
    game_number: u32,
    game_number_rev: u32,
}

impl<'a> ExportRow<'a> {
    fn new(r: &'a GameRecord, (game_number, game_number_rev): (u32, u32)) -> Self {
        ExportRow {
            game_id: &r.game_id,
            game_date: r.game_date,
            season_id: &r.season_id,
            team_id: r.team_id,
            team_abbreviation: &r.team_abbreviation,
            opponent_team_id: r.opponent_team_id,
            matchup: &r.matchup,
            win_loss: r.win_loss.as_deref(),
            minutes: r.minutes,
            points: r.points,
            fgm: r.fgm,
            fga: r.fga,
            fg3m: r.fg3m,
            fg3a: r.fg3a,
            ftm: r.ftm,
            fta: r.fta,
            oreb: r.oreb,
            dreb: r.dreb,
            reb: r.reb,
            ast: r.ast,
            stl: r.stl,
            blk: r.blk,
            tov: r.tov,
            pf: r.pf,
            plus_minus: r.plus_minus,
            game_number,
            game_number_rev,
        }
    }
}

/// Season IDs carry the season type in their first digit; "4" is playoffs.
fn is_playoffs(season_id: &str) -> bool {
    season_id.starts_with('4')
}

/// `(game_number, game_number_rev)` for each record, counted per team and
/// season in date order over the records given. Playoff numbering continues
/// from game 82.
fn game_numbers(records: &[GameRecord]) -> Vec<(u32, u32)> {
    let key = |i: usize| (records[i].team_id, records[i].season_id.as_str());
    let mut order: Vec<usize> = (0..records.len()).collect();
    order.sort_by(|&a, &b| {
        key(a)
            .cmp(&key(b))
            .then(records[a].game_date.cmp(&records[b].game_date))
            .then(records[a].game_id.cmp(&records[b].game_id))
    });

    let mut numbers = vec![(0, 0); records.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && key(order[end]) == key(order[start]) {
            end += 1;
        }
        let size = (end - start) as u32;
        let offset = if is_playoffs(&records[order[start]].season_id) {
            REGULAR_SEASON_GAMES
        } else {
            0
        };
        for (n, &i) in order[start..end].iter().enumerate() {
            let n = n as u32;
            numbers[i] = (offset + n + 1, offset + size - n);
        }
        start = end;
    }
    numbers
}

/// Header row followed by one row per record, in the order given.
pub fn write_records<W: io::Write>(wtr: &mut csv::Writer<W>, records: &[GameRecord]) -> csv::Result<()> {
    if records.is_empty() {
        wtr.write_record(HEADER)?;
    }
    for (record, numbers) in records.iter().zip(game_numbers(records)) {
        wtr.serialize(ExportRow::new(record, numbers))?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn export_to_file(path: &Path, records: &[GameRecord]) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    write_records(&mut wtr, records).with_context(|| format!("Failed to write {}", path.display()))
}
