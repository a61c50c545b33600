use super::scorekeeper::Scores;
use serde::{Deserialize, Serialize};

/// Activity for one publisher during one `frameSize` interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Start of the interval, in milliseconds since the epoch.
    pub timestamp: i64,
    pub visits: u64,
    pub duration: u64,
    pub scores: Scores,
}

impl Frame {
    pub fn empty(timestamp: i64, scores: Scores) -> Self {
        Self {
            timestamp,
            visits: 0,
            duration: 0,
            scores,
        }
    }
}

/// A publisher's activity. The aggregate fields are the sum of the frames
/// in `window`, which is ordered newest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublisherRecord {
    pub visits: u64,
    pub duration: u64,
    pub scores: Scores,
    pub window: Vec<Frame>,
}

impl PublisherRecord {
    pub fn new(now: i64, empty_scores: &Scores) -> Self {
        Self {
            visits: 0,
            duration: 0,
            scores: empty_scores.clone(),
            window: vec![Frame::empty(now, empty_scores.clone())],
        }
    }

    /// Count one visit, opening a new frame once the current one has run
    /// for `frame_size` milliseconds.
    pub fn record_visit(
        &mut self,
        now: i64,
        duration: u64,
        scores: &Scores,
        frame_size: u64,
        empty_scores: &Scores,
    ) {
        let stale = self
            .window
            .first()
            .map_or(true, |frame| {
                frame.timestamp <= now.saturating_sub_unsigned(frame_size)
            });
        if stale {
            self.window.insert(0, Frame::empty(now, empty_scores.clone()));
        }

        let frame = &mut self.window[0];
        frame.visits = frame.visits.saturating_add(1);
        frame.duration = frame.duration.saturating_add(duration);
        frame.scores.accumulate(scores);

        self.visits = self.visits.saturating_add(1);
        self.duration = self.duration.saturating_add(duration);
        self.scores.accumulate(scores);
    }

    /// Drop frames older than `horizon` and recompute the aggregates from
    /// the frames that remain. Returns the number of frames dropped.
    ///
    /// Frames are newest first, so the scan stops at the first stale frame
    /// and everything after it goes.
    pub fn prune(&mut self, horizon: i64) -> usize {
        let keep = self
            .window
            .iter()
            .take_while(|frame| frame.timestamp >= horizon)
            .count();
        if keep == self.window.len() {
            return 0;
        }

        let mut visits: u64 = 0;
        let mut duration: u64 = 0;
        let mut scores = Scores::default();
        for frame in &self.window[..keep] {
            visits = visits.saturating_add(frame.visits);
            duration = duration.saturating_add(frame.duration);
            scores.accumulate(&frame.scores);
        }

        let dropped = self.window.len() - keep;
        self.window.truncate(keep);
        self.visits = visits;
        self.duration = duration;
        self.scores = scores;
        dropped
    }
}
