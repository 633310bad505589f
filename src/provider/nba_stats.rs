use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{header, Client, StatusCode};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::{BoxScoreProvider, DayBoxScores};
use crate::db::models::GameRecord;
use crate::error::ProviderError;

pub const DEFAULT_BASE_URL: &str = "https://stats.nba.com/stats";

/// Box-score provider backed by the stats.nba.com `leaguegamefinder`
/// endpoint, queried one day at a time in team mode.
pub struct NbaStats {
    http: Client,
    base_url: String,
    league_id: String,
    /// e.g. "Regular Season", "Playoffs"; `None` returns every game type
    season_type: Option<String>,
}

impl NbaStats {
    pub fn new(
        base_url: &str,
        league_id: &str,
        season_type: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        // stats.nba.com stalls requests that don't look like they come from nba.com
        headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json, text/plain, */*"));
        headers.insert(header::REFERER, header::HeaderValue::from_static("https://www.nba.com/"));
        headers.insert(header::ORIGIN, header::HeaderValue::from_static("https://www.nba.com"));
        headers.insert("x-nba-stats-origin", header::HeaderValue::from_static("stats"));
        headers.insert("x-nba-stats-token", header::HeaderValue::from_static("true"));

        let http = Client::builder()
            .timeout(timeout)
            .user_agent("Mozilla/5.0 (X11; Linux x86_64) boxscore-ingest/0.1")
            .default_headers(headers)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(NbaStats {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            league_id: league_id.to_string(),
            season_type,
        })
    }

    fn day_url(&self, date: NaiveDate) -> Result<Url, ProviderError> {
        let day = date.format("%m/%d/%Y").to_string();
        let mut query = vec![
            ("PlayerOrTeam", "T"),
            ("LeagueID", self.league_id.as_str()),
            ("DateFromNullable", day.as_str()),
            ("DateToNullable", day.as_str()),
        ];
        if let Some(season_type) = self.season_type.as_deref() {
            query.push(("SeasonTypeNullable", season_type));
        }
        Url::parse_with_params(&format!("{}/leaguegamefinder", self.base_url), &query)
            .map_err(|e| ProviderError::Permanent(format!("invalid provider URL: {}", e)))
    }
}

#[async_trait]
impl BoxScoreProvider for NbaStats {
    fn name(&self) -> &str {
        "stats.nba.com"
    }

    async fn fetch_day(&self, date: NaiveDate) -> Result<DayBoxScores, ProviderError> {
        let url = self.day_url(date)?;
        debug!("Fetching box scores for {} from {}", date, url);

        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(classify_request_error)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        // A body that stops mid-stream is a network hiccup, not a schema problem
        let text = resp.text().await.map_err(classify_request_error)?;
        let raw: Value = serde_json::from_str(&text)
            .map_err(|e| ProviderError::Permanent(format!("response is not JSON: {}", e)))?;

        parse_game_finder(&raw, date)
    }
}

fn classify_request_error(e: reqwest::Error) -> ProviderError {
    if e.is_decode() || e.is_builder() {
        ProviderError::Permanent(e.to_string())
    } else {
        ProviderError::Transient(e.to_string())
    }
}

fn classify_status(status: StatusCode, body: &str) -> ProviderError {
    let snippet: String = body.chars().take(200).collect();
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        ProviderError::Transient(format!("HTTP {}: {}", status, snippet))
    } else {
        ProviderError::Permanent(format!("HTTP {}: {}", status, snippet))
    }
}

// ── Parsing helpers ────────────────────────────────────────────────────────────

/// Column positions in a stats.nba.com result set, looked up by header name.
struct Columns<'a> {
    index: HashMap<&'a str, usize>,
}

impl<'a> Columns<'a> {
    fn new(headers: &'a [Value]) -> Result<Self, ProviderError> {
        let mut index = HashMap::new();
        for (i, h) in headers.iter().enumerate() {
            let name = h
                .as_str()
                .ok_or_else(|| ProviderError::Permanent(format!("header {} is not a string", i)))?;
            index.insert(name, i);
        }
        Ok(Columns { index })
    }

    fn cell<'r>(&self, row: &'r [Value], name: &str) -> Result<&'r Value, ProviderError> {
        let i = *self
            .index
            .get(name)
            .ok_or_else(|| ProviderError::Permanent(format!("missing column {}", name)))?;
        row.get(i)
            .ok_or_else(|| ProviderError::Permanent(format!("row too short for column {}", name)))
    }

    fn string(&self, row: &[Value], name: &str) -> Result<String, ProviderError> {
        match self.cell(row, name)? {
            Value::String(s) => Ok(s.clone()),
            Value::Number(n) => Ok(n.to_string()),
            other => Err(ProviderError::Permanent(format!(
                "column {} is not a string: {}",
                name, other
            ))),
        }
    }

    fn opt_string(&self, row: &[Value], name: &str) -> Result<Option<String>, ProviderError> {
        match self.cell(row, name)? {
            Value::Null => Ok(None),
            Value::String(s) if s.is_empty() => Ok(None),
            _ => self.string(row, name).map(Some),
        }
    }

    fn float(&self, row: &[Value], name: &str) -> Result<f64, ProviderError> {
        let v = self.cell(row, name)?;
        match v {
            // Counting stats come back null for some forfeits/suspended games
            Value::Null => Some(0.0),
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
        .ok_or_else(|| ProviderError::Permanent(format!("column {} is not numeric: {}", name, v)))
    }

    fn int(&self, row: &[Value], name: &str) -> Result<i64, ProviderError> {
        self.float(row, name).map(|f| f.round() as i64)
    }
}

/// Parse a `leaguegamefinder` team-mode payload into records for `date`.
pub(crate) fn parse_game_finder(raw: &Value, date: NaiveDate) -> Result<DayBoxScores, ProviderError> {
    let set = raw["resultSets"]
        .as_array()
        .and_then(|sets| sets.first())
        .ok_or_else(|| ProviderError::Permanent("response has no resultSets".into()))?;
    let headers = set["headers"]
        .as_array()
        .ok_or_else(|| ProviderError::Permanent("result set has no headers".into()))?;
    let rows = set["rowSet"]
        .as_array()
        .ok_or_else(|| ProviderError::Permanent("result set has no rowSet".into()))?;

    if rows.is_empty() {
        return Ok(DayBoxScores::NoGames);
    }

    let cols = Columns::new(headers)?;

    // Provider order is kept; opponents are filled in once every row is seen
    let mut records = Vec::with_capacity(rows.len());
    let mut teams_by_game: HashMap<String, Vec<i64>> = HashMap::new();

    for row in rows {
        let row = row
            .as_array()
            .ok_or_else(|| ProviderError::Permanent("row is not an array".into()))?;

        let game_id = cols.string(row, "GAME_ID")?;
        let date_str = cols.string(row, "GAME_DATE")?;
        // Dates arrive as "2024-01-02" or "2024-01-02T00:00:00"
        let game_date = NaiveDate::parse_from_str(date_str.get(..10).unwrap_or(date_str.as_str()), "%Y-%m-%d")
            .map_err(|e| ProviderError::Permanent(format!("bad GAME_DATE {:?}: {}", date_str, e)))?;
        if game_date != date {
            return Err(ProviderError::Permanent(format!(
                "game {} is dated {}, requested {}",
                game_id, game_date, date
            )));
        }

        let team_id = cols.int(row, "TEAM_ID")?;
        let teams = teams_by_game.entry(game_id.clone()).or_default();
        if !teams.contains(&team_id) {
            teams.push(team_id);
        }

        records.push(GameRecord {
            game_id,
            game_date,
            season_id: cols.string(row, "SEASON_ID")?,
            team_id,
            team_abbreviation: cols.string(row, "TEAM_ABBREVIATION")?,
            opponent_team_id: 0,
            matchup: cols.string(row, "MATCHUP")?,
            win_loss: cols.opt_string(row, "WL")?,
            minutes: cols.float(row, "MIN")?,
            points: cols.int(row, "PTS")?,
            fgm: cols.int(row, "FGM")?,
            fga: cols.int(row, "FGA")?,
            fg3m: cols.int(row, "FG3M")?,
            fg3a: cols.int(row, "FG3A")?,
            ftm: cols.int(row, "FTM")?,
            fta: cols.int(row, "FTA")?,
            oreb: cols.int(row, "OREB")?,
            dreb: cols.int(row, "DREB")?,
            reb: cols.int(row, "REB")?,
            ast: cols.int(row, "AST")?,
            stl: cols.int(row, "STL")?,
            blk: cols.int(row, "BLK")?,
            tov: cols.int(row, "TOV")?,
            pf: cols.int(row, "PF")?,
            plus_minus: cols.int(row, "PLUS_MINUS")?,
        });
    }

    for record in &mut records {
        let teams = &teams_by_game[&record.game_id];
        if teams.len() != 2 {
            return Err(ProviderError::Permanent(format!(
                "game {} has {} team rows, expected 2",
                record.game_id,
                teams.len()
            )));
        }
        record.opponent_team_id = if teams[0] == record.team_id { teams[1] } else { teams[0] };
    }

    Ok(DayBoxScores::Games(records))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use serde_json::json;

    pub const HEADERS: [&str; 28] = [
        "SEASON_ID", "TEAM_ID", "TEAM_ABBREVIATION", "TEAM_NAME", "GAME_ID", "GAME_DATE",
        "MATCHUP", "WL", "MIN", "PTS", "FGM", "FGA", "FG_PCT", "FG3M", "FG3A", "FG3_PCT",
        "FTM", "FTA", "FT_PCT", "OREB", "DREB", "REB", "AST", "STL", "BLK", "TOV", "PF",
        "PLUS_MINUS",
    ];

    pub fn row(game_id: &str, date: &str, team_id: i64, abbr: &str, matchup: &str, wl: &str, pts: i64) -> Value {
        json!([
            "22023", team_id, abbr, "Team", game_id, date, matchup, wl, 240, pts, 42, 88, 0.477,
            13, 36, 0.361, 19, 24, 0.792, 10, 35, 45, 27, 8, 6, 11, 17, 14.0
        ])
    }

    pub fn payload(rows: Vec<Value>) -> Value {
        json!({
            "resource": "leaguegamefinder",
            "resultSets": [{
                "name": "LeagueGameFinderResults",
                "headers": HEADERS,
                "rowSet": rows,
            }]
        })
    }

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn provider(url: &str) -> NbaStats {
        NbaStats::new(url, "00", None, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_parse_pairs_opponents() {
        let raw = payload(vec![
            row("0022300501", "2024-01-02", 1610612738, "BOS", "BOS vs. NYK", "W", 116),
            row("0022300501", "2024-01-02", 1610612752, "NYK", "NYK @ BOS", "L", 102),
        ]);
        let records = parse_game_finder(&raw, d("2024-01-02")).unwrap().into_records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].team_id, 1610612738);
        assert_eq!(records[0].opponent_team_id, 1610612752);
        assert_eq!(records[1].opponent_team_id, 1610612738);
        assert_eq!(records[0].points, 116);
        assert_eq!(records[0].plus_minus, 14);
        assert_eq!(records[0].win_loss.as_deref(), Some("W"));
        assert_relative_eq!(records[0].minutes, 240.0);
    }

    #[test]
    fn test_parse_empty_rowset_is_no_games() {
        let raw = payload(vec![]);
        assert_eq!(parse_game_finder(&raw, d("2024-01-03")).unwrap(), DayBoxScores::NoGames);
    }

    #[test]
    fn test_parse_accepts_timestamp_dates() {
        let raw = payload(vec![
            row("g1", "2024-01-02T00:00:00", 1, "AAA", "AAA vs. BBB", "W", 100),
            row("g1", "2024-01-02T00:00:00", 2, "BBB", "BBB @ AAA", "L", 90),
        ]);
        assert!(parse_game_finder(&raw, d("2024-01-02")).is_ok());
    }

    #[test]
    fn test_parse_rejects_single_team_game() {
        let raw = payload(vec![row("g1", "2024-01-02", 1, "AAA", "AAA vs. BBB", "W", 100)]);
        let err = parse_game_finder(&raw, d("2024-01-02")).unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn test_parse_rejects_wrong_date() {
        let raw = payload(vec![
            row("g1", "2024-01-05", 1, "AAA", "AAA vs. BBB", "W", 100),
            row("g1", "2024-01-05", 2, "BBB", "BBB @ AAA", "L", 90),
        ]);
        let err = parse_game_finder(&raw, d("2024-01-02")).unwrap_err();
        assert!(matches!(err, ProviderError::Permanent(_)));
    }

    #[test]
    fn test_parse_rejects_missing_column() {
        let raw = json!({
            "resultSets": [{ "headers": ["GAME_ID"], "rowSet": [["g1"]] }]
        });
        let err = parse_game_finder(&raw, d("2024-01-02")).unwrap_err();
        assert!(matches!(err, ProviderError::Permanent(m) if m.contains("GAME_DATE")));
    }

    #[test]
    fn test_parse_rejects_unknown_schema() {
        let err = parse_game_finder(&json!({ "error": "nope" }), d("2024-01-02")).unwrap_err();
        assert!(matches!(err, ProviderError::Permanent(_)));
    }

    #[test]
    fn test_classify_status() {
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "").is_transient());
        assert!(classify_status(StatusCode::BAD_GATEWAY, "").is_transient());
        assert!(!classify_status(StatusCode::BAD_REQUEST, "").is_transient());
        assert!(!classify_status(StatusCode::NOT_FOUND, "").is_transient());
    }

    #[tokio::test]
    async fn test_fetch_day_sends_date_query() {
        let mut server = mockito::Server::new_async().await;
        let body = payload(vec![
            row("g1", "2024-01-02", 1, "AAA", "AAA vs. BBB", "W", 100),
            row("g1", "2024-01-02", 2, "BBB", "BBB @ AAA", "L", 90),
        ]);
        let mock = server
            .mock("GET", "/leaguegamefinder")
            .match_query(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("DateFromNullable".into(), "01/02/2024".into()),
                mockito::Matcher::UrlEncoded("DateToNullable".into(), "01/02/2024".into()),
                mockito::Matcher::UrlEncoded("PlayerOrTeam".into(), "T".into()),
                mockito::Matcher::UrlEncoded("LeagueID".into(), "00".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .create_async()
            .await;

        let records = provider(&server.url())
            .fetch_day(d("2024-01-02"))
            .await
            .unwrap()
            .into_records();
        mock.assert_async().await;
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn test_fetch_day_rate_limit_is_transient() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/leaguegamefinder")
            .match_query(mockito::Matcher::Any)
            .with_status(429)
            .create_async()
            .await;

        let err = provider(&server.url()).fetch_day(d("2024-01-02")).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_fetch_day_malformed_body_is_permanent() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/leaguegamefinder")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body("<html>maintenance</html>")
            .create_async()
            .await;

        let err = provider(&server.url()).fetch_day(d("2024-01-02")).await.unwrap_err();
        assert!(matches!(err, ProviderError::Permanent(_)));
    }

    #[tokio::test]
    async fn test_fetch_day_connection_refused_is_transient() {
        // Nothing listens on port 9 on the loopback interface
        let err = provider("http://127.0.0.1:9").fetch_day(d("2024-01-02")).await.unwrap_err();
        assert!(err.is_transient());
    }
}
