//! Persisted engine state and the upgrade of older state layouts.
//!
//! Older state stored a single `score` per entry and per frame instead of a
//! `scores` mapping. Those are upgraded once, when the state is loaded:
//! `score` becomes the `concave` score and `visits` the `visits` score.

use super::options::{SynopsisOptions, SynopsisSettings};
use super::record::{Frame, PublisherRecord};
use super::scorekeeper::{Scorekeeper, Scores};
use crate::error::SynopsisError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Everything needed to rebuild an engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SynopsisState {
    pub options: SynopsisOptions,
    pub publishers: BTreeMap<String, PublisherRecord>,
}

/// State as found on disk, in any layout this crate has written.
#[derive(Debug, Default, Deserialize)]
pub struct StoredState {
    #[serde(default)]
    pub options: Option<SynopsisSettings>,
    #[serde(default)]
    pub publishers: BTreeMap<String, StoredRecord>,
}

#[derive(Debug, Deserialize)]
pub struct StoredRecord {
    #[serde(default)]
    visits: u64,
    #[serde(default)]
    duration: u64,
    #[serde(default)]
    score: Option<f64>,
    #[serde(default)]
    scores: Option<BTreeMap<String, f64>>,
    #[serde(default)]
    window: Option<Vec<StoredFrame>>,
}

#[derive(Debug, Deserialize)]
pub struct StoredFrame {
    timestamp: i64,
    #[serde(default)]
    visits: u64,
    #[serde(default)]
    duration: u64,
    #[serde(default)]
    score: Option<f64>,
    #[serde(default)]
    scores: Option<BTreeMap<String, f64>>,
}

impl StoredState {
    pub fn from_json(json: &str) -> Result<Self, SynopsisError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, SynopsisError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Resolve the options and bring every record up to the current layout.
    /// A record without a window gets a single frame stamped `now` holding
    /// its aggregates.
    pub fn upgrade(self, now: i64) -> Result<SynopsisState, SynopsisError> {
        let options = SynopsisOptions::resolve(self.options.unwrap_or_default())?;

        let publishers = self
            .publishers
            .into_iter()
            .map(|(publisher, stored)| {
                let record = stored.upgrade(&publisher, &options, now)?;
                Ok((publisher, record))
            })
            .collect::<Result<BTreeMap<_, _>, SynopsisError>>()?;

        Ok(SynopsisState {
            options,
            publishers,
        })
    }
}

fn upgrade_scores(
    publisher: &str,
    scores: Option<BTreeMap<String, f64>>,
    score: Option<f64>,
    visits: u64,
    options: &SynopsisOptions,
) -> Scores {
    match scores {
        Some(scores) => {
            let mut upgraded = Scores::default();
            for (name, value) in scores {
                match name.parse::<Scorekeeper>() {
                    Ok(keeper) => upgraded.set(keeper, value),
                    Err(e) => log::warn!("Dropping score for {publisher}: {e}"),
                }
            }
            upgraded
        }
        None => {
            let mut upgraded = options.empty_scores.clone();
            if let Some(score) = score.filter(|s| *s != 0.0) {
                upgraded.set(Scorekeeper::Concave, score);
                upgraded.set(Scorekeeper::Visits, visits as f64);
            }
            upgraded
        }
    }
}

impl StoredRecord {
    fn upgrade(
        self,
        publisher: &str,
        options: &SynopsisOptions,
        now: i64,
    ) -> Result<PublisherRecord, SynopsisError> {
        let scores = upgrade_scores(publisher, self.scores, self.score, self.visits, options);

        let window = match self.window {
            Some(frames) => {
                let window: Vec<Frame> = frames
                    .into_iter()
                    .map(|frame| Frame {
                        timestamp: frame.timestamp,
                        visits: frame.visits,
                        duration: frame.duration,
                        scores: upgrade_scores(
                            publisher,
                            frame.scores,
                            frame.score,
                            frame.visits,
                            options,
                        ),
                    })
                    .collect();
                if window.windows(2).any(|w| w[0].timestamp < w[1].timestamp) {
                    return Err(SynopsisError::Corrupt {
                        publisher: publisher.to_string(),
                        reason: "window frames are not newest first".to_string(),
                    });
                }
                window
            }
            None => {
                log::warn!("Publisher {publisher} has no window, rebuilding it from its totals");
                vec![Frame {
                    timestamp: now,
                    visits: self.visits,
                    duration: self.duration,
                    scores: scores.clone(),
                }]
            }
        };

        Ok(PublisherRecord {
            visits: self.visits,
            duration: self.duration,
            scores,
            window,
        })
    }
}
