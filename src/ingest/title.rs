//! Episode title parsing.
//!
//! Extracts `(series, episode)` from feed entry titles such as
//! `"[Group] Series Name - 05 (1080p) [ABCD1234].mkv"`,
//! `"Series.Name.S01E05.1080p.WEB"` or `"Series Name Episode 5"`.

use regex::Regex;
use releaseforge_common::{Error, Identity, Result};

/// Series name and episode number extracted from a title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTitle {
    pub series: String,
    pub episode: u32,
}

impl ParsedTitle {
    /// The stable identity of this episode.
    pub fn identity(&self) -> Identity {
        Identity::from_parts(&self.series, self.episode)
    }
}

/// Compiled title patterns, tried in order.
#[derive(Debug, Clone)]
pub struct TitleParser {
    dash_episode: Regex,
    season_episode: Regex,
    word_episode: Regex,
    leading_group: Regex,
}

impl TitleParser {
    pub fn new() -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| Error::internal(format!("bad title pattern: {e}")))
        };

        Ok(Self {
            // "Series Name - 05", "Series Name - 05v2"
            dash_episode: compile(r"^(?P<series>.+?)\s+-\s+(?P<ep>\d{1,4})(?:v\d+)?(?:[\s.\[(]|$)")?,
            // "Series Name S01E05", "Series.Name.S2E10"
            season_episode: compile(
                r"(?i)^(?P<series>.+?)[\s._-]+S(?P<season>\d{1,2})E(?P<ep>\d{1,4})(?:[^\d]|$)",
            )?,
            // "Series Name Episode 5", "Series Name Ep. 5"
            word_episode: compile(r"(?i)^(?P<series>.+?)\s+(?:episode|ep\.?)\s*(?P<ep>\d{1,4})\b")?,
            leading_group: compile(r"^\s*(?:\[[^\]]*\]\s*)+")?,
        })
    }

    /// Parse `title` into series and episode.
    ///
    /// Season numbers above 1 are folded into the series name so that the same
    /// episode number in two seasons yields two identities.
    pub fn parse(&self, title: &str) -> Option<ParsedTitle> {
        let stripped = self.leading_group.replace(title, "");
        let text = stripped.trim();

        if let Some(caps) = self.season_episode.captures(text) {
            let episode = caps["ep"].parse().ok()?;
            let season: u32 = caps["season"].parse().ok()?;
            let mut series = clean_series(&caps["series"]);
            if season > 1 {
                series = format!("{series} Season {season}");
            }
            return finish(series, episode);
        }

        for pattern in [&self.dash_episode, &self.word_episode] {
            if let Some(caps) = pattern.captures(text) {
                let episode = caps["ep"].parse().ok()?;
                return finish(clean_series(&caps["series"]), episode);
            }
        }

        None
    }
}

fn clean_series(raw: &str) -> String {
    raw.replace(['.', '_'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn finish(series: String, episode: u32) -> Option<ParsedTitle> {
    if series.is_empty() {
        None
    } else {
        Some(ParsedTitle { series, episode })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(title: &str) -> Option<ParsedTitle> {
        TitleParser::new().unwrap().parse(title)
    }

    #[test]
    fn test_parse_fansub_title() {
        let parsed = parse("[SubsPlease] Sousou no Frieren - 05 (1080p) [ABCD1234].mkv").unwrap();
        assert_eq!(parsed.series, "Sousou no Frieren");
        assert_eq!(parsed.episode, 5);
        assert_eq!(parsed.identity().as_str(), "sousou-no-frieren:5");
    }

    #[test]
    fn test_parse_versioned_episode() {
        let parsed = parse("[Group][Other] Dungeon Meshi - 12v2 [720p].mkv").unwrap();
        assert_eq!(parsed.series, "Dungeon Meshi");
        assert_eq!(parsed.episode, 12);
    }

    #[test]
    fn test_parse_season_episode() {
        let parsed = parse("Series.Name.S01E05.1080p.WEB.x264").unwrap();
        assert_eq!(parsed.series, "Series Name");
        assert_eq!(parsed.episode, 5);

        let second = parse("Series Name S02E05 720p").unwrap();
        assert_eq!(second.series, "Series Name Season 2");
        assert_ne!(parsed.identity(), second.identity());
    }

    #[test]
    fn test_parse_word_episode() {
        let parsed = parse("Sample Anime Episode 1").unwrap();
        assert_eq!(parsed.series, "Sample Anime");
        assert_eq!(parsed.episode, 1);
    }

    #[test]
    fn test_same_episode_from_two_sources_collapses() {
        let a = parse("[SubsPlease] Series A - 05 (720p) [AAAA].mkv").unwrap();
        let b = parse("[Erai-raws] Series A - 05 [1080p][Multiple Subtitle].mkv").unwrap();
        assert_eq!(a.identity(), b.identity());
    }

    #[test]
    fn test_unparseable_titles() {
        assert!(parse("Just Some Movie (2020)").is_none());
        assert!(parse("[Group] - 05").is_none());
        assert!(parse("").is_none());
    }
}
