use super::scorekeeper::{Scorekeeper, Scores};
use crate::error::SynopsisError;
use serde::{Deserialize, Serialize};

pub const DEFAULT_MIN_DURATION: u64 = 2 * 1000;
pub const DEFAULT_NUM_FRAMES: u32 = 30;
pub const DEFAULT_FRAME_SIZE: u64 = 24 * 60 * 60 * 1000;
pub const DEFAULT_DECAY_RATE: f64 = 1.0 / (30.0 * 1000.0);

/// Engine settings as supplied by a caller, a config file, or a persisted
/// state blob. Anything left out takes its default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SynopsisSettings {
    #[serde(
        default,
        rename = "minDuration",
        alias = "min_duration",
        skip_serializing_if = "Option::is_none"
    )]
    pub min_duration: Option<u64>,
    #[serde(
        default,
        rename = "numFrames",
        alias = "num_frames",
        skip_serializing_if = "Option::is_none"
    )]
    pub num_frames: Option<u32>,
    #[serde(
        default,
        rename = "frameSize",
        alias = "frame_size",
        skip_serializing_if = "Option::is_none"
    )]
    pub frame_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scorekeeper: Option<String>,
    #[serde(
        default,
        rename = "_d",
        alias = "decay_rate",
        skip_serializing_if = "Option::is_none"
    )]
    pub decay_rate: Option<f64>,
    #[serde(default, rename = "_a", skip_serializing_if = "Option::is_none")]
    pub a: Option<f64>,
    #[serde(default, rename = "_b", skip_serializing_if = "Option::is_none")]
    pub b: Option<f64>,
}

/// Resolved engine configuration, persisted alongside the publishers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynopsisOptions {
    #[serde(rename = "minDuration")]
    pub min_duration: u64,
    #[serde(rename = "numFrames")]
    pub num_frames: u32,
    #[serde(rename = "frameSize")]
    pub frame_size: u64,
    /// Used by `top_n` and `winner`.
    pub scorekeeper: Scorekeeper,
    pub scorekeepers: Vec<Scorekeeper>,
    #[serde(rename = "emptyScores")]
    pub empty_scores: Scores,
    #[serde(rename = "_d")]
    pub d: f64,
    #[serde(rename = "_a")]
    pub a: f64,
    #[serde(rename = "_a2")]
    pub a2: f64,
    #[serde(rename = "_a4")]
    pub a4: f64,
    #[serde(rename = "_b")]
    pub b: f64,
    #[serde(rename = "_b2")]
    pub b2: f64,
}

impl Default for SynopsisOptions {
    fn default() -> Self {
        Self::derive(SynopsisSettings::default())
    }
}

impl SynopsisOptions {
    /// Fill in defaults, derive the decay constants, and reject settings
    /// whose constants are not finite.
    pub fn resolve(settings: SynopsisSettings) -> Result<Self, SynopsisError> {
        let options = Self::derive(settings);
        options.validate()?;
        Ok(options)
    }

    fn derive(settings: SynopsisSettings) -> Self {
        let min_duration = settings.min_duration.unwrap_or(DEFAULT_MIN_DURATION);
        let scorekeepers = Scorekeeper::ALL.to_vec();

        let scorekeeper = match settings.scorekeeper.as_deref().map(str::parse::<Scorekeeper>) {
            Some(Ok(keeper)) => keeper,
            Some(Err(e)) => {
                log::warn!("{e}, using {}", scorekeepers[0]);
                scorekeepers[0]
            }
            None => scorekeepers[0],
        };

        let d = settings.decay_rate.unwrap_or(DEFAULT_DECAY_RATE);
        let a = settings
            .a
            .unwrap_or_else(|| 1.0 / (d * 2.0) - min_duration as f64);
        let a2 = a * 2.0;
        let a4 = a2 * 2.0;
        let b = settings.b.unwrap_or(min_duration as f64 - a);
        let b2 = b * b;

        Self {
            min_duration,
            num_frames: settings.num_frames.unwrap_or(DEFAULT_NUM_FRAMES),
            frame_size: settings.frame_size.unwrap_or(DEFAULT_FRAME_SIZE),
            scorekeeper,
            empty_scores: Scores::zeroed(&scorekeepers),
            scorekeepers,
            d,
            a,
            a2,
            a4,
            b,
            b2,
        }
    }

    fn validate(&self) -> Result<(), SynopsisError> {
        if !(self.d.is_finite() && self.d > 0.0) {
            return Err(SynopsisError::InvalidOptions(format!(
                "decay rate must be positive and finite, got {}",
                self.d
            )));
        }
        for (name, value) in [
            ("_a", self.a),
            ("_a2", self.a2),
            ("_a4", self.a4),
            ("_b", self.b),
            ("_b2", self.b2),
        ] {
            if !value.is_finite() {
                return Err(SynopsisError::InvalidOptions(format!(
                    "decay constant {name} is not finite"
                )));
            }
        }
        if self.a2 == 0.0 {
            return Err(SynopsisError::InvalidOptions(
                "decay constant _a2 is zero".to_string(),
            ));
        }
        if self.frame_size == 0 {
            return Err(SynopsisError::InvalidOptions(
                "frame size must be positive".to_string(),
            ));
        }
        let retention = i64::try_from(self.frame_size)
            .ok()
            .and_then(|size| size.checked_mul(i64::from(self.num_frames)));
        if retention.is_none() {
            return Err(SynopsisError::InvalidOptions(format!(
                "retention of {} frames of {} ms is out of range",
                self.num_frames, self.frame_size
            )));
        }
        Ok(())
    }

    /// Oldest frame timestamp still inside the retention horizon at `now`.
    pub fn horizon(&self, now: i64) -> i64 {
        let retention = u64::from(self.num_frames).saturating_mul(self.frame_size);
        now.saturating_sub_unsigned(retention)
    }

    /// Back to the settings that reproduce these options.
    pub fn settings(&self) -> SynopsisSettings {
        SynopsisSettings {
            min_duration: Some(self.min_duration),
            num_frames: Some(self.num_frames),
            frame_size: Some(self.frame_size),
            scorekeeper: Some(self.scorekeeper.name().to_string()),
            decay_rate: Some(self.d),
            a: Some(self.a),
            b: Some(self.b),
        }
    }
}
