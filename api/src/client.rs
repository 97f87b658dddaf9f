use crate::espn::{
    EspnCompetition, EspnCompetitor, EspnEvent, EspnOdds, EspnSituation, EspnStandingsGroup,
    EspnStatus, EspnTeam, ScoreboardResponse, StandingsResponse, SummaryResponse, TeamsResponse,
};
use crate::{Competitor, Game, GameStatus, Side, Situation, Standing, Team, TeamLogos};
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::Client;
use std::fmt;
use std::time::Duration;

pub type ApiResult<T> = Result<T, ApiError>;

pub const ESPN_SITE_V2: &str = "https://site.api.espn.com/apis/site/v2/sports/football/nfl";
pub const ESPN_V2: &str = "https://site.api.espn.com/apis/v2/sports/football/nfl";
pub const ESPN_CORE: &str = "https://sports.core.api.espn.com/v2/sports/football/leagues/nfl";

/// NFL API client backed by ESPN's public endpoints.
#[derive(Debug, Clone)]
pub struct NflApi {
    client: Client,
    timeout: Duration,
    site_url: String,
    v2_url: String,
    core_url: String,
}

impl Default for NflApi {
    fn default() -> Self {
        Self {
            client: Client::builder()
                .user_agent("pickem/0.1 (nfl pick'em)")
                .build()
                .unwrap_or_default(),
            timeout: Duration::from_secs(10),
            site_url: ESPN_SITE_V2.to_owned(),
            v2_url: ESPN_V2.to_owned(),
            core_url: ESPN_CORE.to_owned(),
        }
    }
}

#[derive(Debug)]
pub enum ApiError {
    Network(reqwest::Error, String),
    Api(reqwest::Error, String),
    Parsing(reqwest::Error, String),
    NotFound(String),
    Other(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Network(e, url) => write!(f, "Network error for {url}: {e}"),
            ApiError::Api(e, url) => write!(f, "API error for {url}: {e}"),
            ApiError::Parsing(e, url) => write!(f, "Parse error for {url}: {e}"),
            ApiError::NotFound(msg) => write!(f, "Not found: {msg}"),
            ApiError::Other(msg) => write!(f, "Error: {msg}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl NflApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point the client at alternate hosts. Trailing slashes are ignored.
    pub fn with_base_urls(site_url: &str, v2_url: &str, core_url: &str) -> Self {
        Self {
            site_url: site_url.trim_end_matches('/').to_owned(),
            v2_url: v2_url.trim_end_matches('/').to_owned(),
            core_url: core_url.trim_end_matches('/').to_owned(),
            ..Self::default()
        }
    }

    /// Fetch all 32 teams with colors and the four logo variants.
    pub async fn fetch_teams(&self) -> ApiResult<Vec<Team>> {
        let url = format!("{}/teams?limit=40", self.site_url);
        let raw: TeamsResponse = self.get(&url).await?;
        let teams = raw
            .sports
            .unwrap_or_default()
            .into_iter()
            .flat_map(|s| s.leagues.unwrap_or_default())
            .flat_map(|l| l.teams.unwrap_or_default())
            .filter_map(|entry| entry.team)
            .map(|t| map_team(&t))
            .collect();
        Ok(teams)
    }

    /// Fetch the scoreboard. `None` asks ESPN for the current week.
    pub async fn fetch_scoreboard(&self, week: Option<u8>) -> ApiResult<Vec<Game>> {
        let url = match week {
            Some(week) => format!("{}/scoreboard?seasontype=2&week={week}", self.site_url),
            None => format!("{}/scoreboard", self.site_url),
        };
        let raw: ScoreboardResponse = self.get(&url).await?;
        let games = raw
            .events
            .unwrap_or_default()
            .iter()
            .map(map_event_to_game)
            .collect();
        Ok(games)
    }

    /// Fetch full details for a single game: teams, scores, status, situation, line.
    pub async fn fetch_game(&self, event_id: &str) -> ApiResult<Game> {
        let url = format!("{}/summary?event={event_id}", self.site_url);
        let raw: SummaryResponse = self.get(&url).await?;
        map_summary(event_id, raw)
    }

    /// Fetch only the in-progress situation sub-resource. Much smaller than a summary.
    ///
    /// The resource carries no clock, so `quarter` and `clock` are always `None` here;
    /// [`Game::apply_situation`] keeps the ones from the last full fetch.
    pub async fn fetch_situation(&self, event_id: &str) -> ApiResult<Situation> {
        let url = format!(
            "{}/events/{event_id}/competitions/{event_id}/situation",
            self.core_url
        );
        let raw: EspnSituation = self.get_required(&url).await?;
        Ok(map_situation(&raw, None))
    }

    pub async fn fetch_standings(&self) -> ApiResult<Vec<Standing>> {
        let url = format!("{}/standings", self.v2_url);
        let raw: StandingsResponse = self.get(&url).await?;
        let mut standings = Vec::new();
        for group in raw.children.unwrap_or_default() {
            collect_standings(&group, &mut standings);
        }
        Ok(standings)
    }

    /// A 4xx reads as an empty payload; the mappers decide whether that is "not found".
    async fn get<T: Default + serde::de::DeserializeOwned>(&self, url: &str) -> ApiResult<T> {
        match self.get_required(url).await {
            Err(ApiError::NotFound(_)) => Ok(T::default()),
            other => other,
        }
    }

    /// Like [`get`](Self::get), but a 4xx is [`ApiError::NotFound`].
    async fn get_required<T: serde::de::DeserializeOwned>(&self, url: &str) -> ApiResult<T> {
        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ApiError::Network(e, url.to_owned()))?;

        match response.error_for_status() {
            Ok(res) => res
                .json::<T>()
                .await
                .map_err(|e| ApiError::Parsing(e, url.to_owned())),
            Err(e) => {
                if e.status().map(|s| s.is_client_error()).unwrap_or(false) {
                    Err(ApiError::NotFound(url.to_owned()))
                } else {
                    Err(ApiError::Api(e, url.to_owned()))
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Mapping: ESPN wire types → clean domain types
// ---------------------------------------------------------------------------

fn map_team(t: &EspnTeam) -> Team {
    Team {
        id: t.id.clone().unwrap_or_default(),
        name: t.display_name.clone().unwrap_or_default(),
        abbreviation: t.abbreviation.clone().unwrap_or_default(),
        location: t.location.clone().unwrap_or_default(),
        conference: None,
        color: t.color.clone().filter(|c| !c.is_empty()),
        alternate_color: t.alternate_color.clone().filter(|c| !c.is_empty()),
        logos: map_logos(t),
    }
}

/// ESPN tags each logo with `rel` keywords; the scoreboard feed only has `logo`.
fn map_logos(t: &EspnTeam) -> TeamLogos {
    let mut logos = TeamLogos::default();
    for logo in t.logos.iter().flatten() {
        let Some(href) = logo.href.clone() else {
            continue;
        };
        let rel = logo.rel.as_deref().unwrap_or_default();
        let has = |word: &str| rel.iter().any(|r| r == word);
        match (has("scoreboard"), has("dark")) {
            (true, true) => logos.dark_scoreboard = Some(href),
            (true, false) => logos.scoreboard = Some(href),
            (false, true) => logos.dark = Some(href),
            (false, false) if has("default") => logos.default = Some(href),
            _ => {}
        }
    }
    if logos.default.is_none() {
        logos.default = t.logo.clone();
    }
    logos
}

fn map_event_to_game(event: &EspnEvent) -> Game {
    let competition = event
        .competitions
        .as_ref()
        .and_then(|c| c.first())
        .cloned()
        .unwrap_or_default();
    let status = event.status.as_ref().or(competition.status.as_ref());
    let date = event.date.as_deref().or(competition.date.as_deref());
    let week = event.week.as_ref().and_then(|w| w.number);

    map_competition(
        event.id.clone().unwrap_or_default(),
        week,
        date,
        status,
        &competition,
        competition.odds.as_deref().unwrap_or_default(),
        competition.situation.as_ref(),
    )
}

fn map_summary(event_id: &str, raw: SummaryResponse) -> ApiResult<Game> {
    let header = raw
        .header
        .ok_or_else(|| ApiError::NotFound(format!("no summary for event {event_id}")))?;
    let competition = header
        .competitions
        .and_then(|c| c.into_iter().next())
        .ok_or_else(|| ApiError::NotFound(format!("no competition for event {event_id}")))?;

    // Live summaries carry the situation at the top level; older payloads nest it.
    let situation = raw.situation.as_ref().or(competition.situation.as_ref());
    let odds = raw
        .pickcenter
        .as_deref()
        .or(competition.odds.as_deref())
        .unwrap_or_default();

    Ok(map_competition(
        header.id.unwrap_or_else(|| event_id.to_owned()),
        header.week,
        competition.date.as_deref(),
        competition.status.as_ref(),
        &competition,
        odds,
        situation,
    ))
}

fn map_competition(
    id: String,
    week: Option<u8>,
    date: Option<&str>,
    status: Option<&EspnStatus>,
    competition: &EspnCompetition,
    odds: &[EspnOdds],
    situation: Option<&EspnSituation>,
) -> Game {
    let competitors = competition.competitors.as_deref().unwrap_or_default();
    let home = find_side(competitors, "home").or_else(|| competitors.first());
    let away = find_side(competitors, "away").or_else(|| competitors.get(1));

    let game_status = status
        .and_then(|s| s.status_type.as_ref())
        .and_then(|t| t.name.as_deref())
        .map(parse_status)
        .unwrap_or_default();

    // Situation only means something while the ball is live.
    let situation = situation
        .filter(|_| game_status == GameStatus::Live)
        .map(|s| map_situation(s, status));

    let (favorite, spread) = map_odds(odds);

    Game {
        id,
        date: date.and_then(parse_espn_date),
        week,
        home: home.map(map_competitor).unwrap_or_default(),
        away: away.map(map_competitor).unwrap_or_default(),
        status: game_status,
        situation,
        favorite,
        spread,
    }
}

fn find_side<'a>(competitors: &'a [EspnCompetitor], side: &str) -> Option<&'a EspnCompetitor> {
    competitors
        .iter()
        .find(|c| c.home_away.as_deref() == Some(side))
}

fn map_competitor(c: &EspnCompetitor) -> Competitor {
    Competitor {
        team: c.team.as_ref().map(map_team).unwrap_or_default(),
        score: c.score.as_deref().and_then(|s| s.parse::<u16>().ok()),
    }
}

fn map_situation(s: &EspnSituation, status: Option<&EspnStatus>) -> Situation {
    Situation {
        quarter: status.and_then(|st| st.period),
        clock: status.and_then(|st| st.display_clock.clone()),
        down: s.down.and_then(|d| u8::try_from(d).ok()).filter(|d| *d > 0),
        distance: s.distance.and_then(|d| u16::try_from(d).ok()),
        yard_line: s.yard_line.and_then(|y| u8::try_from(y).ok()),
        possession_text: s.possession_text.clone(),
        possession_team_id: s.possession.clone(),
        down_distance_text: s
            .down_distance_text
            .clone()
            .or_else(|| s.short_down_distance_text.clone()),
    }
}

/// First line with an explicit favorite wins; providers disagree rarely enough.
fn map_odds(odds: &[EspnOdds]) -> (Option<Side>, Option<String>) {
    for line in odds {
        let home_fav = line.home_team_odds.as_ref().and_then(|o| o.favorite);
        let away_fav = line.away_team_odds.as_ref().and_then(|o| o.favorite);
        let favorite = match (home_fav, away_fav) {
            (Some(true), _) => Some(Side::Home),
            (_, Some(true)) => Some(Side::Away),
            _ => None,
        };
        if favorite.is_some() {
            return (favorite, line.details.clone());
        }
    }
    (None, odds.first().and_then(|o| o.details.clone()))
}

fn collect_standings(group: &EspnStandingsGroup, out: &mut Vec<Standing>) {
    let label = group
        .abbreviation
        .clone()
        .or_else(|| group.name.clone())
        .unwrap_or_default();

    let entries = group
        .standings
        .as_ref()
        .and_then(|s| s.entries.as_deref())
        .unwrap_or_default();
    for entry in entries {
        let Some(team) = entry.team.as_ref() else {
            continue;
        };
        let stat = |name: &str| {
            entry
                .stats
                .iter()
                .flatten()
                .find(|s| s.name.as_deref() == Some(name))
                .and_then(|s| s.value)
                .unwrap_or(0.0)
        };
        out.push(Standing {
            team_id: team.id.clone().unwrap_or_default(),
            team_name: team.display_name.clone().unwrap_or_default(),
            abbreviation: team.abbreviation.clone().unwrap_or_default(),
            group: label.clone(),
            wins: stat("wins") as u16,
            losses: stat("losses") as u16,
            ties: stat("ties") as u16,
            win_percent: stat("winPercent"),
        });
    }

    for child in group.children.iter().flatten() {
        collect_standings(child, out);
    }
}

fn parse_status(s: &str) -> GameStatus {
    match s {
        "STATUS_IN_PROGRESS" | "STATUS_HALFTIME" | "STATUS_END_PERIOD" => GameStatus::Live,
        "STATUS_FINAL" | "STATUS_FINAL_OT" => GameStatus::Final,
        "STATUS_POSTPONED" | "STATUS_CANCELED" | "STATUS_CANCELLED" | "STATUS_SUSPENDED"
        | "STATUS_DELAYED" => GameStatus::Post,
        _ => GameStatus::Scheduled,
    }
}

/// ESPN dates drop the seconds ("2025-09-07T17:00Z"), which RFC 3339 rejects.
fn parse_espn_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%MZ")
        .ok()
        .map(|naive| naive.and_utc())
}
