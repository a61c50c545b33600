//! The attention synopsis: a sliding-window score per publisher, with
//! normalized rankings and a weighted lottery over them.

pub mod options;
pub mod record;
pub mod scorekeeper;
pub mod state;

use crate::clock::{Clock, RandomSource, SystemClock};
use crate::error::SynopsisError;
use crate::resolver::Resolver;
use options::{SynopsisOptions, SynopsisSettings};
use rand::rngs::StdRng;
use rand::SeedableRng;
use record::{Frame, PublisherRecord};
use scorekeeper::{Scorekeeper, Scores};
use serde::Serialize;
use state::{StoredState, SynopsisState};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// A publisher's share of a ranking.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Weighted {
    pub publisher: String,
    pub weight: f64,
}

/// A publisher's record together with its weight under each scorekeeper
/// whose ranking it made.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublisherSummary {
    pub publisher: String,
    pub weights: Scores,
    pub scores: Scores,
    pub visits: u64,
    pub duration: u64,
    pub window: Vec<Frame>,
}

pub struct Synopsis {
    options: SynopsisOptions,
    publishers: BTreeMap<String, PublisherRecord>,
    resolver: Resolver,
    clock: Box<dyn Clock>,
    random: Box<dyn RandomSource>,
}

impl fmt::Debug for Synopsis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Synopsis")
            .field("options", &self.options)
            .field("publishers", &self.publishers.len())
            .finish()
    }
}

impl Default for Synopsis {
    fn default() -> Self {
        Self::from_parts(SynopsisOptions::default(), BTreeMap::new(), Box::new(SystemClock))
    }
}

impl Synopsis {
    pub fn new(settings: SynopsisSettings) -> Result<Self, SynopsisError> {
        let options = SynopsisOptions::resolve(settings)?;
        Ok(Self::from_parts(options, BTreeMap::new(), Box::new(SystemClock)))
    }

    /// Restore from a persisted state blob.
    pub fn from_json(json: &str) -> Result<Self, SynopsisError> {
        Self::restore(StoredState::from_json(json)?, SystemClock)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, SynopsisError> {
        Self::restore(StoredState::from_slice(bytes)?, SystemClock)
    }

    /// Restore from stored state, upgrading older layouts against `clock`.
    pub fn restore(
        stored: StoredState,
        clock: impl Clock + 'static,
    ) -> Result<Self, SynopsisError> {
        let state = stored.upgrade(clock.now())?;
        log::info!("Restored synopsis with {} publishers", state.publishers.len());
        Ok(Self::from_parts(state.options, state.publishers, Box::new(clock)))
    }

    fn from_parts(
        options: SynopsisOptions,
        publishers: BTreeMap<String, PublisherRecord>,
        clock: Box<dyn Clock>,
    ) -> Self {
        Self {
            options,
            publishers,
            resolver: Resolver::default(),
            clock,
            random: Box::new(StdRng::from_entropy()),
        }
    }

    pub fn with_resolver(mut self, resolver: Resolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn with_random(mut self, random: impl RandomSource + 'static) -> Self {
        self.random = Box::new(random);
        self
    }

    pub fn options(&self) -> &SynopsisOptions {
        &self.options
    }

    pub fn publisher(&self, publisher: &str) -> Option<&PublisherRecord> {
        self.publishers.get(publisher)
    }

    pub fn len(&self) -> usize {
        self.publishers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.publishers.is_empty()
    }

    /// Credit a page visit to its publisher. Visits that are too short, or
    /// whose page resolves to no publisher, are dropped.
    pub fn add_visit(
        &mut self,
        location: &str,
        duration: u64,
        markup: Option<&str>,
    ) -> Option<String> {
        if duration < self.options.min_duration {
            return None;
        }

        let publisher = match self.resolver.resolve(location, markup) {
            Ok(resolution) => resolution.into_publisher()?,
            Err(e) => {
                log::debug!("Dropping visit to {location}: {e}");
                return None;
            }
        };

        self.add_publisher(&publisher, duration)
    }

    pub fn add_publisher(&mut self, publisher: &str, duration: u64) -> Option<String> {
        if duration < self.options.min_duration {
            return None;
        }

        let Some(scores) = Scores::for_visit(duration, &self.options) else {
            log::debug!("Visit to {publisher} scored nothing");
            return None;
        };

        let now = self.clock.now();
        let options = &self.options;
        let record = self
            .publishers
            .entry(publisher.to_string())
            .or_insert_with(|| PublisherRecord::new(now, &options.empty_scores));
        record.record_visit(
            now,
            duration,
            &scores,
            options.frame_size,
            &options.empty_scores,
        );

        Some(publisher.to_string())
    }

    /// Drop frames that have left the retention horizon.
    pub fn prune(&mut self) {
        let horizon = self.options.horizon(self.clock.now());
        for (publisher, record) in self.publishers.iter_mut() {
            let dropped = record.prune(horizon);
            if dropped > 0 {
                log::debug!("Pruned {dropped} frames from {publisher}");
            }
        }
    }

    /// The top `n` publishers (all of them when `n` is 0) under the default
    /// scorekeeper, with weights summing to one.
    pub fn top_n(&mut self, n: usize) -> Option<Vec<Weighted>> {
        self.top_n_by(n, self.options.scorekeeper)
    }

    pub fn top_n_by(&mut self, n: usize, keeper: Scorekeeper) -> Option<Vec<Weighted>> {
        self.prune();

        let mut ranked: Vec<(&String, f64)> = self
            .publishers
            .iter()
            .map(|(publisher, record)| (publisher, record.scores.get(keeper)))
            .filter(|(_, score)| *score != 0.0 && !score.is_nan())
            .collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        if n > 0 {
            ranked.truncate(n);
        }

        let total: f64 = ranked.iter().map(|(_, score)| score).sum();
        if total == 0.0 {
            return None;
        }

        Some(
            ranked
                .into_iter()
                .map(|(publisher, score)| Weighted {
                    publisher: publisher.clone(),
                    weight: score / total,
                })
                .collect(),
        )
    }

    /// Every publisher in any scorekeeper's top `n`, with its record and its
    /// weight under each ranking it appears in.
    pub fn all_n(&mut self, n: usize) -> Vec<PublisherSummary> {
        let mut order: Vec<String> = Vec::new();
        let mut weights: HashMap<String, Scores> = HashMap::new();

        for keeper in self.options.scorekeepers.clone() {
            for entry in self.top_n_by(n, keeper).unwrap_or_default() {
                if !weights.contains_key(&entry.publisher) {
                    order.push(entry.publisher.clone());
                }
                weights
                    .entry(entry.publisher)
                    .or_default()
                    .set(keeper, entry.weight);
            }
        }

        order
            .into_iter()
            .filter_map(|publisher| {
                let record = self.publishers.get(&publisher)?;
                Some(PublisherSummary {
                    weights: weights.remove(&publisher).unwrap_or_default(),
                    scores: record.scores.clone(),
                    visits: record.visits,
                    duration: record.duration,
                    window: record.window.clone(),
                    publisher,
                })
            })
            .collect()
    }

    /// Pick a publisher from the top `n` with probability proportional to
    /// its weight.
    pub fn winner(&mut self, n: usize) -> Option<String> {
        let point = self.random.uniform();
        self.draw_winner(n, point)
    }

    /// The cumulative-weight scan behind `winner`, for a given draw in
    /// `[0, 1)`. Rounding can leave the total just short of the draw, in
    /// which case there is no winner.
    pub fn draw_winner(&mut self, n: usize, point: f64) -> Option<String> {
        let mut upper = 0.0;
        for entry in self.top_n(n)? {
            upper += entry.weight;
            if upper >= point {
                return Some(entry.publisher);
            }
        }
        None
    }

    pub fn to_state(&mut self) -> SynopsisState {
        self.prune();
        SynopsisState {
            options: self.options.clone(),
            publishers: self.publishers.clone(),
        }
    }

    pub fn to_json(&mut self) -> Result<String, SynopsisError> {
        Ok(serde_json::to_string(&self.to_state())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    const DAY: i64 = 24 * 60 * 60 * 1000;
    const START: i64 = 1_700_000_000_000;

    fn synopsis(settings: SynopsisSettings) -> (Synopsis, ManualClock) {
        let clock = ManualClock::new(START);
        let synopsis = Synopsis::new(settings)
            .unwrap()
            .with_clock(clock.clone())
            .with_random(StdRng::seed_from_u64(42));
        (synopsis, clock)
    }

    fn by_visits() -> SynopsisSettings {
        SynopsisSettings {
            scorekeeper: Some("visits".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_short_visits_are_ignored() {
        let (mut synopsis, _) = synopsis(SynopsisSettings::default());
        assert_eq!(synopsis.add_visit("https://example.com/", 1_999, None), None);
        assert_eq!(synopsis.add_publisher("example.com", 1_999), None);
        assert!(synopsis.is_empty());
    }

    #[test]
    fn test_add_visit_resolves_publisher() {
        let (mut synopsis, _) = synopsis(SynopsisSettings::default());
        assert_eq!(
            synopsis.add_visit("https://www.example.com/a/b", 5_000, None),
            Some("example.com".to_string())
        );
        let record = synopsis.publisher("example.com").unwrap();
        assert_eq!(record.visits, 1);
        assert_eq!(record.duration, 5_000);
        assert_eq!(record.window.len(), 1);
        assert_eq!(record.window[0].timestamp, START);
    }

    #[test]
    fn test_excluded_visit_creates_no_record() {
        let (mut synopsis, _) = synopsis(SynopsisSettings::default());
        assert_eq!(synopsis.add_visit("https://www.google.com/search?q=x", 5_000, None), None);
        assert_eq!(synopsis.add_visit("not a url", 5_000, None), None);
        assert!(synopsis.is_empty());
    }

    #[test]
    fn test_missing_markup_is_swallowed() {
        let (mut synopsis, _) = synopsis(SynopsisSettings::default());
        assert_eq!(synopsis.add_visit("https://www.youtube.com/watch?v=X", 5_000, None), None);
        assert!(synopsis.is_empty());
    }

    #[test]
    fn test_youtube_watch_visit_with_markup() {
        let (mut synopsis, _) = synopsis(SynopsisSettings::default());
        let markup = r#"<body><div id="watch7-content" class="watch-main-col">
            <meta itemprop="channelId" content="UC123"></div></body>"#;
        assert_eq!(
            synopsis.add_visit("https://www.youtube.com/watch?v=X", 5_000, Some(markup)),
            Some("youtube.com/channel/UC123".to_string())
        );
    }

    #[test]
    fn test_add_publisher_duration_saturates() {
        let (mut synopsis, _) = synopsis(SynopsisSettings::default());
        synopsis.add_publisher("a.com", u64::MAX);
        synopsis.add_publisher("a.com", u64::MAX);
        let record = synopsis.publisher("a.com").unwrap();
        assert_eq!(record.visits, 2);
        assert_eq!(record.duration, u64::MAX);
        assert_eq!(synopsis.top_n(1).unwrap()[0].publisher, "a.com");
    }

    #[test]
    fn test_top_n_by_visits() {
        let (mut synopsis, _) = synopsis(by_visits());
        for _ in 0..100 {
            synopsis.add_publisher("a.com", 2_000);
        }
        synopsis.add_publisher("b.com", 2_000);

        let top = synopsis.top_n(2).unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].publisher, "a.com");
        assert!((top[0].weight - 100.0 / 101.0).abs() < 1e-12);
        assert!((top[1].weight - 1.0 / 101.0).abs() < 1e-12);
    }

    #[test]
    fn test_top_n_weights_sum_to_one() {
        let (mut synopsis, _) = synopsis(SynopsisSettings::default());
        for (i, publisher) in ["a.com", "b.com", "c.com", "d.com"].iter().enumerate() {
            for _ in 0..=i {
                synopsis.add_publisher(publisher, 2_000 + 7_000 * i as u64);
            }
        }

        for n in [0, 1, 2, 3, 10] {
            let top = synopsis.top_n(n).unwrap();
            let sum: f64 = top.iter().map(|e| e.weight).sum();
            assert!((sum - 1.0).abs() < 1e-9, "n = {n}");
            if n > 0 {
                assert_eq!(top.len(), n.min(4));
            }
            assert_eq!(top[0].publisher, "d.com");
        }
    }

    #[test]
    fn test_no_ranking() {
        let (mut synopsis, _) = synopsis(SynopsisSettings::default());
        assert_eq!(synopsis.top_n(5), None);
        assert_eq!(synopsis.winner(5), None);
        assert!(synopsis.all_n(5).is_empty());
    }

    #[test]
    fn test_new_frame_each_day() {
        let (mut synopsis, clock) = synopsis(SynopsisSettings::default());
        synopsis.add_publisher("a.com", 2_000);
        clock.advance(DAY - 1);
        synopsis.add_publisher("a.com", 2_000);
        assert_eq!(synopsis.publisher("a.com").unwrap().window.len(), 1);

        clock.advance(1);
        synopsis.add_publisher("a.com", 2_000);
        let record = synopsis.publisher("a.com").unwrap();
        assert_eq!(record.window.len(), 2);
        assert_eq!(record.window[0].visits, 1);
        assert_eq!(record.window[1].visits, 2);
        assert_eq!(record.visits, 3);
    }

    #[test]
    fn test_prune_drops_frames_past_horizon() {
        let (mut synopsis, clock) = synopsis(SynopsisSettings {
            num_frames: Some(3),
            ..by_visits()
        });
        for _ in 0..5 {
            synopsis.add_publisher("a.com", 2_000);
            synopsis.add_publisher("a.com", 2_000);
            clock.advance(DAY);
        }
        synopsis.add_publisher("b.com", 2_000);
        assert_eq!(synopsis.publisher("a.com").unwrap().window.len(), 5);

        // add_publisher never prunes; ranking does
        let top = synopsis.top_n(0).unwrap();
        let horizon = synopsis.options().horizon(clock.now());
        let record = synopsis.publisher("a.com").unwrap();
        assert!(record.window.iter().all(|f| f.timestamp >= horizon));
        assert_eq!(record.window.len(), 3);
        assert_eq!(record.visits, 6);
        assert_eq!(record.scores.get(Scorekeeper::Visits), 6.0);
        assert_eq!(
            record.visits,
            record.window.iter().map(|f| f.visits).sum::<u64>()
        );
        assert!((top[0].weight - 6.0 / 7.0).abs() < 1e-12);
    }

    #[test]
    fn test_fully_pruned_publisher_leaves_ranking() {
        let (mut synopsis, clock) = synopsis(SynopsisSettings {
            num_frames: Some(1),
            ..Default::default()
        });
        synopsis.add_publisher("old.com", 2_000);
        clock.advance(3 * DAY);
        synopsis.add_publisher("new.com", 2_000);

        let top = synopsis.top_n(0).unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].publisher, "new.com");
        // the record stays, with nothing in it
        assert!(synopsis.publisher("old.com").unwrap().window.is_empty());

        synopsis.add_publisher("old.com", 2_000);
        assert_eq!(synopsis.top_n(0).unwrap().len(), 2);
    }

    #[test]
    fn test_all_n_merges_rankings() {
        let (mut synopsis, _) = synopsis(SynopsisSettings::default());
        // many short visits against one long one
        for _ in 0..3 {
            synopsis.add_publisher("often.com", 2_000);
        }
        synopsis.add_publisher("long.com", 3_600_000);

        let all = synopsis.all_n(1);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].publisher, "long.com");
        assert_eq!(all[0].weights.get(Scorekeeper::Concave), 1.0);
        assert_eq!(all[0].weights.iter().count(), 1);
        assert_eq!(all[1].publisher, "often.com");
        assert_eq!(all[1].weights.get(Scorekeeper::Visits), 1.0);
        assert_eq!(all[1].visits, 3);
        assert_eq!(all[1].window.len(), 1);

        let all = synopsis.all_n(0);
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|s| s.weights.iter().count() == 2));
    }

    #[test]
    fn test_draw_winner_scan() {
        let (mut synopsis, _) = synopsis(by_visits());
        for _ in 0..3 {
            synopsis.add_publisher("a.com", 2_000);
        }
        synopsis.add_publisher("b.com", 2_000);

        assert_eq!(synopsis.draw_winner(0, 0.0), Some("a.com".to_string()));
        assert_eq!(synopsis.draw_winner(0, 0.75), Some("a.com".to_string()));
        assert_eq!(synopsis.draw_winner(0, 0.76), Some("b.com".to_string()));
        assert_eq!(synopsis.draw_winner(1, 0.99), Some("a.com".to_string()));
        // a draw the cumulative weights cannot reach
        assert_eq!(synopsis.draw_winner(0, 1.5), None);
    }

    #[test]
    fn test_winner_is_weighted() {
        let (mut synopsis, _) = synopsis(by_visits());
        for _ in 0..9 {
            synopsis.add_publisher("a.com", 2_000);
        }
        synopsis.add_publisher("b.com", 2_000);

        let wins = (0..2_000)
            .filter_map(|_| synopsis.winner(0))
            .filter(|w| w == "a.com")
            .count();
        assert!((1_600..=1_990).contains(&wins), "a.com won {wins} times");
    }

    #[test]
    fn test_round_trip() {
        let (mut synopsis, clock) = synopsis(SynopsisSettings {
            min_duration: Some(1_000),
            ..Default::default()
        });
        for (i, publisher) in ["a.com", "b.org", "c.net"].iter().enumerate() {
            for day in 0..(i as i64 + 2) {
                clock.set(START + day * DAY);
                synopsis.add_publisher(publisher, 1_500 + 10_000 * day as u64);
            }
        }

        let json = synopsis.to_json().unwrap();
        let stored = StoredState::from_json(&json).unwrap();
        let mut restored = Synopsis::restore(stored, clock.clone()).unwrap();

        assert_eq!(restored.options(), synopsis.options());
        assert_eq!(restored.to_state(), synopsis.to_state());
        assert_eq!(restored.top_n(2), synopsis.top_n(2));
        assert_eq!(restored.all_n(0), synopsis.all_n(0));
        for point in [0.0, 0.3, 0.6, 0.999] {
            assert_eq!(restored.draw_winner(0, point), synopsis.draw_winner(0, point));
        }
    }

    #[test]
    fn test_from_json_defaults() {
        let synopsis = Synopsis::from_json(r#"{ "publishers": {} }"#).unwrap();
        assert_eq!(synopsis.options(), &SynopsisOptions::default());

        let err = Synopsis::from_slice(br#"{ "options": { "_d": -1 }, "publishers": {} }"#)
            .unwrap_err();
        assert!(matches!(err, SynopsisError::InvalidOptions(_)));
    }
}
