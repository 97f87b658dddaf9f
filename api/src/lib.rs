pub mod client;
pub mod espn;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Domain types, independent of the ESPN wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Team {
    pub id: String,
    pub name: String,         // "Kansas City Chiefs"
    pub abbreviation: String, // "KC"
    pub location: String,     // "Kansas City"
    pub conference: Option<String>,
    pub color: Option<String>,           // hex without '#', as ESPN sends it
    pub alternate_color: Option<String>, // hex without '#'
    pub logos: TeamLogos,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamLogos {
    pub default: Option<String>,
    pub dark: Option<String>,
    pub scoreboard: Option<String>,
    pub dark_scoreboard: Option<String>,
}

impl TeamLogos {
    pub fn url(&self, variant: LogoVariant) -> Option<&str> {
        match variant {
            LogoVariant::Default => self.default.as_deref(),
            LogoVariant::Dark => self.dark.as_deref(),
            LogoVariant::Scoreboard => self.scoreboard.as_deref(),
            LogoVariant::DarkScoreboard => self.dark_scoreboard.as_deref(),
        }
    }
}

/// The four logo renditions ESPN publishes per team.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LogoVariant {
    #[default]
    Default,
    Dark,
    Scoreboard,
    DarkScoreboard,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    #[default]
    Home,
    Away,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Competitor {
    pub team: Team,
    pub score: Option<u16>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Game {
    pub id: String,
    pub date: Option<DateTime<Utc>>,
    pub week: Option<u8>,
    pub home: Competitor,
    pub away: Competitor,
    pub status: GameStatus,
    pub situation: Option<Situation>,
    /// Side favored by the betting line, when ESPN publishes one.
    pub favorite: Option<Side>,
    pub spread: Option<String>, // "KC -3.5"
}

impl Game {
    pub fn is_live(&self) -> bool {
        self.status == GameStatus::Live
    }

    /// Merge a situation-only refresh, leaving teams and scores untouched.
    ///
    /// Down, distance and possession are replaced; a refresh without `quarter` or
    /// `clock` keeps the values from the last full fetch.
    pub fn apply_situation(&mut self, situation: Situation) {
        let previous = self.situation.take().unwrap_or_default();
        self.situation = Some(Situation {
            quarter: situation.quarter.or(previous.quarter),
            clock: situation.clock.or(previous.clock),
            ..situation
        });
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameStatus {
    #[default]
    Scheduled,
    Live,
    Final,
    /// Postponed, suspended or cancelled.
    Post,
}

/// In-progress sub-state, refreshed more often than the full game.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Situation {
    pub quarter: Option<u8>,
    pub clock: Option<String>,
    pub down: Option<u8>,
    pub distance: Option<u16>,
    pub yard_line: Option<u8>,
    pub possession_text: Option<String>, // "KC 35"
    pub possession_team_id: Option<String>,
    pub down_distance_text: Option<String>, // "3rd & 4 at KC 35"
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Standing {
    pub team_id: String,
    pub team_name: String,
    pub abbreviation: String,
    pub group: String, // "AFC West"
    pub wins: u16,
    pub losses: u16,
    pub ties: u16,
    pub win_percent: f64,
}
