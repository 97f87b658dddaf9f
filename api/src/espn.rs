//! Raw ESPN wire types: serde shapes for deserializing ESPN responses.
//! These map to our clean domain types via the mapping functions in client.rs.
use serde::Deserialize;

// ---------------------------------------------------------------------------
// Teams  (site v2 API)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Default, Clone)]
pub struct TeamsResponse {
    pub sports: Option<Vec<EspnSport>>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EspnSport {
    pub leagues: Option<Vec<EspnLeague>>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EspnLeague {
    pub teams: Option<Vec<EspnTeamEntry>>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EspnTeamEntry {
    pub team: Option<EspnTeam>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct EspnTeam {
    pub id: Option<String>,
    #[serde(rename = "displayName")]
    pub display_name: Option<String>,
    pub abbreviation: Option<String>,
    pub location: Option<String>,
    pub color: Option<String>,
    #[serde(rename = "alternateColor")]
    pub alternate_color: Option<String>,
    /// Scoreboard payloads carry a single logo URL instead of the logos array.
    pub logo: Option<String>,
    pub logos: Option<Vec<EspnLogo>>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EspnLogo {
    pub href: Option<String>,
    /// e.g. ["full", "default"], ["full", "dark"], ["full", "scoreboard", "dark"]
    pub rel: Option<Vec<String>>,
}

// ---------------------------------------------------------------------------
// Scoreboard  (site v2 API)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Default, Clone)]
pub struct ScoreboardResponse {
    pub events: Option<Vec<EspnEvent>>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct EspnEvent {
    pub id: Option<String>,
    pub name: Option<String>,
    pub date: Option<String>, // ISO 8601, often without seconds ("2025-09-07T17:00Z")
    pub week: Option<EspnWeek>,
    pub status: Option<EspnStatus>,
    pub competitions: Option<Vec<EspnCompetition>>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EspnWeek {
    pub number: Option<u8>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct EspnStatus {
    #[serde(rename = "type")]
    pub status_type: Option<EspnStatusType>,
    pub period: Option<u8>,
    #[serde(rename = "displayClock")]
    pub display_clock: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EspnStatusType {
    pub name: Option<String>, // "STATUS_SCHEDULED", "STATUS_IN_PROGRESS", "STATUS_FINAL"
    pub completed: Option<bool>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct EspnCompetition {
    pub id: Option<String>,
    pub date: Option<String>,
    pub status: Option<EspnStatus>,
    pub competitors: Option<Vec<EspnCompetitor>>,
    pub situation: Option<EspnSituation>,
    pub odds: Option<Vec<EspnOdds>>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct EspnCompetitor {
    pub id: Option<String>,
    #[serde(rename = "homeAway")]
    pub home_away: Option<String>, // "home" | "away"
    pub team: Option<EspnTeam>,
    pub score: Option<String>, // ESPN sends scores as strings
    pub winner: Option<bool>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct EspnSituation {
    pub down: Option<i8>, // -1 between plays / on kickoffs
    pub distance: Option<i16>,
    #[serde(rename = "yardLine")]
    pub yard_line: Option<i16>,
    #[serde(rename = "possessionText")]
    pub possession_text: Option<String>,
    pub possession: Option<String>, // team id
    #[serde(rename = "downDistanceText")]
    pub down_distance_text: Option<String>,
    #[serde(rename = "shortDownDistanceText")]
    pub short_down_distance_text: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct EspnOdds {
    pub details: Option<String>, // "KC -3.5"
    #[serde(rename = "homeTeamOdds")]
    pub home_team_odds: Option<EspnTeamOdds>,
    #[serde(rename = "awayTeamOdds")]
    pub away_team_odds: Option<EspnTeamOdds>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct EspnTeamOdds {
    pub favorite: Option<bool>,
}

// ---------------------------------------------------------------------------
// Game summary  (site v2 API)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Default, Clone)]
pub struct SummaryResponse {
    pub header: Option<EspnSummaryHeader>,
    /// Betting lines; the summary endpoint names them "pickcenter".
    pub pickcenter: Option<Vec<EspnOdds>>,
    pub situation: Option<EspnSituation>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct EspnSummaryHeader {
    pub id: Option<String>,
    pub week: Option<u8>,
    pub competitions: Option<Vec<EspnCompetition>>,
}

// ---------------------------------------------------------------------------
// Standings  (v2 API)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Default, Clone)]
pub struct StandingsResponse {
    pub children: Option<Vec<EspnStandingsGroup>>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EspnStandingsGroup {
    pub name: Option<String>,
    pub abbreviation: Option<String>,
    pub standings: Option<EspnStandingsTable>,
    /// Divisions nest one level deeper when `level=3` is requested.
    pub children: Option<Vec<EspnStandingsGroup>>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EspnStandingsTable {
    pub entries: Option<Vec<EspnStandingsEntry>>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EspnStandingsEntry {
    pub team: Option<EspnTeam>,
    pub stats: Option<Vec<EspnStat>>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EspnStat {
    pub name: Option<String>,
    pub value: Option<f64>,
}
