//! Team background color and logo selection.
//!
//! An administrator can pin, per team, which of the two declared colors is the
//! background and which logo variant sits on it. Teams without a pinned
//! mapping get the contrast-based fallback in [`resolve_style`].

pub mod cache;

use nfl_api::{LogoVariant, Team};
use serde::{Deserialize, Serialize};

pub use cache::{MappingListener, MappingSet, StyleError, SubscriptionId, TeamStyleCache};

/// Background used when a team declares no usable color.
pub const FALLBACK_BACKGROUND: &str = "#333333";

/// The dark logo variants are drawn as near-black marks.
const DARK_LOGO_REFERENCE: Rgb = Rgb(0, 0, 0);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorChoice {
    #[default]
    Primary,
    Alternate,
}

/// Administrator override, persisted at `teamColorMappings/{abbreviation}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamColorMapping {
    pub abbreviation: String,
    pub background: ColorChoice,
    pub logo: LogoVariant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamStyle {
    pub background: String,
    pub logo: LogoVariant,
    pub logo_url: Option<String>,
}

pub fn resolve_style(team: &Team, mapping: Option<&TeamColorMapping>) -> TeamStyle {
    let primary = team.color.as_deref().and_then(Rgb::parse);
    let alternate = team.alternate_color.as_deref().and_then(Rgb::parse);

    let (background, logo) = match mapping {
        Some(mapping) => {
            let (chosen, other) = match mapping.background {
                ColorChoice::Primary => (primary, alternate),
                ColorChoice::Alternate => (alternate, primary),
            };
            let background = chosen.or(other).map(|c| c.to_hex());
            (background, mapping.logo)
        }
        None => match pick_contrasting(primary, alternate) {
            Some(color) => (Some(color.to_hex()), logo_for_background(color)),
            None => (None, LogoVariant::Default),
        },
    };

    TeamStyle {
        background: background.unwrap_or_else(|| FALLBACK_BACKGROUND.to_owned()),
        logo,
        logo_url: team
            .logos
            .url(logo)
            .or(team.logos.default.as_deref())
            .map(str::to_owned),
    }
}

/// The mapping the fallback policy would produce; used to seed missing overrides.
pub fn default_mapping(team: &Team) -> TeamColorMapping {
    let primary = team.color.as_deref().and_then(Rgb::parse);
    let alternate = team.alternate_color.as_deref().and_then(Rgb::parse);
    let chosen = pick_contrasting(primary, alternate);
    let background = match (chosen, alternate) {
        (Some(c), Some(a)) if c == a && primary != Some(a) => ColorChoice::Alternate,
        _ => ColorChoice::Primary,
    };
    TeamColorMapping {
        abbreviation: team.abbreviation.to_uppercase(),
        background,
        logo: chosen.map(logo_for_background).unwrap_or_default(),
    }
}

/// Whichever candidate stands out more against the dark logo. Ties keep primary.
fn pick_contrasting(primary: Option<Rgb>, alternate: Option<Rgb>) -> Option<Rgb> {
    match (primary, alternate) {
        (Some(p), Some(a)) => {
            if a.contrast_ratio(DARK_LOGO_REFERENCE) > p.contrast_ratio(DARK_LOGO_REFERENCE) {
                Some(a)
            } else {
                Some(p)
            }
        }
        (p, a) => p.or(a),
    }
}

/// Dark mark on light backgrounds, the regular logo otherwise.
fn logo_for_background(background: Rgb) -> LogoVariant {
    let on_dark = background.contrast_ratio(DARK_LOGO_REFERENCE);
    let on_light = background.contrast_ratio(Rgb(255, 255, 255));
    if on_dark > on_light {
        LogoVariant::Dark
    } else {
        LogoVariant::Default
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Rgb(u8, u8, u8);

impl Rgb {
    /// Accepts `#rrggbb`, `rrggbb`, and the three-digit shorthand.
    fn parse(raw: &str) -> Option<Self> {
        let hex = raw.trim().trim_start_matches('#');
        let expanded: String = match hex.len() {
            3 => hex.chars().flat_map(|c| [c, c]).collect(),
            6 => hex.to_owned(),
            _ => return None,
        };
        let channel = |i: usize| u8::from_str_radix(expanded.get(i..i + 2)?, 16).ok();
        Some(Rgb(channel(0)?, channel(2)?, channel(4)?))
    }

    fn to_hex(self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.0, self.1, self.2)
    }

    /// WCAG 2 relative luminance.
    fn luminance(self) -> f64 {
        let linear = |c: u8| {
            let c = f64::from(c) / 255.0;
            if c <= 0.03928 { c / 12.92 } else { ((c + 0.055) / 1.055).powf(2.4) }
        };
        0.2126 * linear(self.0) + 0.7152 * linear(self.1) + 0.0722 * linear(self.2)
    }

    fn contrast_ratio(self, other: Rgb) -> f64 {
        let (a, b) = (self.luminance(), other.luminance());
        let (hi, lo) = if a > b { (a, b) } else { (b, a) };
        (hi + 0.05) / (lo + 0.05)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nfl_api::TeamLogos;

    fn team(color: Option<&str>, alternate: Option<&str>) -> Team {
        Team {
            abbreviation: "tst".into(),
            color: color.map(str::to_owned),
            alternate_color: alternate.map(str::to_owned),
            logos: TeamLogos {
                default: Some("default.png".into()),
                dark: Some("dark.png".into()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn black_and_white_picks_white_with_dark_logo() {
        let style = resolve_style(&team(Some("#000000"), Some("#FFFFFF")), None);
        assert_eq!(style.background, "#FFFFFF");
        assert_eq!(style.logo, LogoVariant::Dark);
        assert_eq!(style.logo_url.as_deref(), Some("dark.png"));

        // Order of the declared colors does not matter.
        let flipped = resolve_style(&team(Some("#FFFFFF"), Some("#000000")), None);
        assert_eq!(flipped.background, "#FFFFFF");
    }

    #[test]
    fn both_colors_missing_falls_back_to_dark_gray() {
        let style = resolve_style(&team(None, Some("")), None);
        assert_eq!(style.background, FALLBACK_BACKGROUND);
        assert_eq!(style.logo, LogoVariant::Default);
        assert_eq!(style.logo_url.as_deref(), Some("default.png"));
    }

    #[test]
    fn single_color_is_used_as_is() {
        let style = resolve_style(&team(Some("00338d"), None), None);
        assert_eq!(style.background, "#00338D");
        assert_eq!(style.logo, LogoVariant::Default, "navy is a dark background");
    }

    #[test]
    fn mapping_overrides_contrast_policy() {
        let mapping = TeamColorMapping {
            abbreviation: "TST".into(),
            background: ColorChoice::Primary,
            logo: LogoVariant::Scoreboard,
        };
        let style = resolve_style(&team(Some("000000"), Some("ffffff")), Some(&mapping));
        assert_eq!(style.background, "#000000");
        assert_eq!(style.logo, LogoVariant::Scoreboard);
        // No scoreboard logo published, so the default URL stands in.
        assert_eq!(style.logo_url.as_deref(), Some("default.png"));
    }

    #[test]
    fn mapping_to_missing_color_uses_the_other() {
        let mapping = TeamColorMapping {
            abbreviation: "TST".into(),
            background: ColorChoice::Alternate,
            logo: LogoVariant::Default,
        };
        let style = resolve_style(&team(Some("e31837"), None), Some(&mapping));
        assert_eq!(style.background, "#E31837");
    }

    #[test]
    fn default_mapping_mirrors_fallback() {
        let mapping = default_mapping(&team(Some("000000"), Some("ffffff")));
        assert_eq!(mapping.abbreviation, "TST");
        assert_eq!(mapping.background, ColorChoice::Alternate);
        assert_eq!(mapping.logo, LogoVariant::Dark);

        let style = resolve_style(&team(Some("000000"), Some("ffffff")), Some(&mapping));
        assert_eq!(style, resolve_style(&team(Some("000000"), Some("ffffff")), None));
    }

    #[test]
    fn hex_parsing_accepts_shorthand_and_rejects_junk() {
        assert_eq!(Rgb::parse("#fff"), Some(Rgb(255, 255, 255)));
        assert_eq!(Rgb::parse("e31837"), Some(Rgb(0xe3, 0x18, 0x37)));
        assert_eq!(Rgb::parse("zzzzzz"), None);
        assert_eq!(Rgb::parse(""), None);
    }

    #[test]
    fn contrast_ratio_extremes() {
        let ratio = Rgb(0, 0, 0).contrast_ratio(Rgb(255, 255, 255));
        assert!((ratio - 21.0).abs() < 1e-9);
        assert!((Rgb(10, 20, 30).contrast_ratio(Rgb(10, 20, 30)) - 1.0).abs() < 1e-9);
    }
}
