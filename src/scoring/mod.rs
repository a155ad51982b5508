//! Page scoring
//!
//! Turns a scouted page's words and tags into a point total, and checks its
//! text against the sensitivity denylist. The point total drives the
//! weighted-random ranking that decides what gets visited next.

mod page;

pub use page::PageAnalysis;

use crate::config::{RankingConfig, ScoringConfig};
use crate::ConfigResult;
use std::collections::HashMap;

/// One stored word or tag observation for a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WordTally {
    pub word: String,
    pub is_tag: bool,
    pub count: i64,
}

/// The outcome of scoring one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageScore {
    pub points: i64,
    pub sensitive: bool,
}

/// Scoring tables resolved from configuration.
///
/// Built once at startup; the denylist is decoded here so the rest of the
/// program only ever sees plain terms.
#[derive(Debug, Clone)]
pub struct ScoreTable {
    word_points: HashMap<String, i64>,
    tag_points: HashMap<String, i64>,
    media_points: i64,
    denylist: Vec<String>,
    max_points: Option<i64>,
}

impl ScoreTable {
    pub fn new(scoring: &ScoringConfig, ranking: &RankingConfig) -> ConfigResult<Self> {
        Ok(Self {
            word_points: lowercase_keys(&scoring.word_points),
            tag_points: lowercase_keys(&scoring.tag_points),
            media_points: scoring.media_points,
            denylist: scoring.decoded_denylist()?,
            max_points: ranking.max_points,
        })
    }

    /// Whether a word or tag carries points and therefore must be stored
    /// even when `store-all-words` is off.
    pub fn is_scored(&self, word: &str, is_tag: bool) -> bool {
        if is_tag {
            self.tag_points.contains_key(word)
        } else {
            self.word_points.contains_key(word)
        }
    }

    /// Computes a snapshot's points from its stored word tallies.
    ///
    /// Tags earn their points per occurrence; a plain word earns its points
    /// at most once no matter how often it appears. The total is clamped to
    /// the configured ceiling. Recomputing from tallies keeps the total
    /// stable when a snapshot is scouted again.
    pub fn points(&self, tallies: &[WordTally], is_media: bool) -> i64 {
        let mut total: i64 = 0;

        for tally in tallies {
            if tally.is_tag {
                if let Some(points) = self.tag_points.get(&tally.word) {
                    total += points * tally.count;
                }
            } else if let Some(points) = self.word_points.get(&tally.word) {
                total += points * tally.count.min(1);
            }
        }

        if is_media {
            total += self.media_points;
        }

        match self.max_points {
            Some(max) => total.min(max),
            None => total,
        }
    }

    /// Checks lowercased page text against the denylist.
    pub fn is_sensitive(&self, text: &str) -> bool {
        let text = text.to_lowercase();
        self.denylist.iter().any(|term| text.contains(term))
    }

    /// Scores a full page analysis: points from its words and tags, and the
    /// sensitivity flag from its text.
    pub fn score_page(&self, page: &PageAnalysis, is_media: bool) -> PageScore {
        let tallies = page_tallies(page);
        PageScore {
            points: self.points(&tallies, is_media),
            sensitive: self.is_sensitive(&page.text),
        }
    }
}

/// Flattens a page analysis into word tallies for storage.
pub fn page_tallies(page: &PageAnalysis) -> Vec<WordTally> {
    let mut tallies: Vec<WordTally> = page
        .word_counts
        .iter()
        .map(|(word, count)| WordTally {
            word: word.clone(),
            is_tag: false,
            count: *count,
        })
        .chain(page.tag_counts.iter().map(|(tag, count)| WordTally {
            word: tag.clone(),
            is_tag: true,
            count: *count,
        }))
        .collect();

    // Deterministic order keeps storage writes and tests stable.
    tallies.sort_by(|a, b| (a.is_tag, &a.word).cmp(&(b.is_tag, &b.word)));
    tallies
}

fn lowercase_keys(map: &HashMap<String, i64>) -> HashMap<String, i64> {
    map.iter()
        .map(|(k, v)| (k.to_lowercase(), *v))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use base64::Engine;

    fn table() -> ScoreTable {
        let config = test_config();
        ScoreTable::new(&config.scoring, &config.ranking).unwrap()
    }

    fn tally(word: &str, is_tag: bool, count: i64) -> WordTally {
        WordTally {
            word: word.to_string(),
            is_tag,
            count,
        }
    }

    #[test]
    fn test_words_count_once_tags_count_each() {
        let table = table();

        // One embedded object at 1000 plus the word "flash" at 20, even
        // though the word appears three times.
        let tallies = vec![tally("flash", false, 3), tally("object", true, 1)];
        assert_eq!(table.points(&tallies, false), 1020);

        // A second object doubles the tag contribution.
        let tallies = vec![tally("flash", false, 3), tally("object", true, 2)];
        assert_eq!(table.points(&tallies, false), 2020);
    }

    #[test]
    fn test_unscored_words_earn_nothing() {
        let table = table();
        let tallies = vec![tally("welcome", false, 50), tally("table", true, 12)];
        assert_eq!(table.points(&tallies, false), 0);
    }

    #[test]
    fn test_media_points() {
        let table = table();
        assert_eq!(table.points(&[], true), 1000);
    }

    #[test]
    fn test_clamp_to_max_points() {
        let table = table();
        // 11 objects would be 11000, past the configured ceiling of 10000.
        let tallies = vec![tally("object", true, 11)];
        assert_eq!(table.points(&tallies, false), 10000);
    }

    #[test]
    fn test_no_clamp_when_unset() {
        let mut config = test_config();
        config.ranking.max_points = None;
        let table = ScoreTable::new(&config.scoring, &config.ranking).unwrap();

        let tallies = vec![tally("object", true, 11)];
        assert_eq!(table.points(&tallies, false), 11000);
    }

    #[test]
    fn test_sensitivity_matches_decoded_terms() {
        let mut config = test_config();
        let encoded = base64::engine::general_purpose::STANDARD.encode("forbidden");
        config.scoring.denylist = vec![encoded];
        let table = ScoreTable::new(&config.scoring, &config.ranking).unwrap();

        assert!(table.is_sensitive("this page has FORBIDDEN content"));
        assert!(!table.is_sensitive("this page is fine"));
    }

    #[test]
    fn test_score_page_end_to_end() {
        let table = table();
        let page = PageAnalysis::from_html(
            r#"<html><body><object data="a.swf"></object>
               <p>flash flash flash</p></body></html>"#,
        );

        let score = table.score_page(&page, false);
        assert_eq!(score.points, 1020);
        assert!(!score.sensitive);
    }

    #[test]
    fn test_is_scored() {
        let table = table();
        assert!(table.is_scored("flash", false));
        assert!(table.is_scored("object", true));
        assert!(!table.is_scored("object", false));
        assert!(!table.is_scored("welcome", false));
    }
}
