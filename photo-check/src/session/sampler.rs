// Window sampler for verification prompt offsets
//
// Picks the two instants (whole seconds from session start) at which a photo
// is requested. Offsets are sampled once and stored; every channel derives due
// times from `start_time + offset`, never by sampling again.

use crate::session::protocol::SlotIndex;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Errors produced when the configured windows cannot yield valid offsets
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SamplerError {
    #[error("workout duration must be at least one second")]
    ZeroDuration,
    #[error("window [{min}, {max}] is not a valid fraction range")]
    InvalidWindow { min: f64, max: f64 },
    #[error("prompt windows overlap: first ends at {first_max}, second starts at {second_min}")]
    Overlapping { first_max: f64, second_min: f64 },
    #[error("prompt windows only allow the same second ({0}s) for both slots")]
    NoSeparation(u64),
}

/// A `[min, max]` range expressed as fractions of the workout duration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PromptWindow {
    pub min: f64,
    pub max: f64,
}

impl PromptWindow {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    fn validate(&self) -> Result<(), SamplerError> {
        let in_range = |v: f64| v.is_finite() && (0.0..=1.0).contains(&v);
        if !in_range(self.min) || !in_range(self.max) || self.min > self.max {
            return Err(SamplerError::InvalidWindow {
                min: self.min,
                max: self.max,
            });
        }
        Ok(())
    }

    /// Inclusive whole-second bounds of this window for a workout of `total_secs`.
    ///
    /// When no whole second lies inside the window, both bounds collapse to the
    /// nearest second to the window start.
    pub fn second_bounds(&self, total_secs: u64) -> (u64, u64) {
        let total = total_secs as f64;
        let lo = (self.min * total).ceil() as u64;
        let hi = (self.max * total).floor() as u64;
        if lo > hi {
            let point = (self.min * total).round() as u64;
            (point, point)
        } else {
            (lo, hi)
        }
    }
}

impl std::str::FromStr for PromptWindow {
    type Err = String;

    /// Parses `"0.30-0.55"`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (min, max) = s
            .split_once('-')
            .ok_or_else(|| format!("Expected <min>-<max>, got: {}", s))?;
        let min: f64 = min
            .trim()
            .parse()
            .map_err(|e| format!("Invalid window start '{}': {}", min, e))?;
        let max: f64 = max
            .trim()
            .parse()
            .map_err(|e| format!("Invalid window end '{}': {}", max, e))?;
        let window = PromptWindow::new(min, max);
        window.validate().map_err(|e| e.to_string())?;
        Ok(window)
    }
}

/// The two disjoint windows, first slot then second slot
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowPair {
    pub first: PromptWindow,
    pub second: PromptWindow,
}

impl WindowPair {
    pub fn validate(&self) -> Result<(), SamplerError> {
        self.first.validate()?;
        self.second.validate()?;
        if self.first.max > self.second.min {
            return Err(SamplerError::Overlapping {
                first_max: self.first.max,
                second_min: self.second.min,
            });
        }
        Ok(())
    }
}

impl Default for WindowPair {
    fn default() -> Self {
        Self {
            first: PromptWindow::new(0.30, 0.55),
            second: PromptWindow::new(0.65, 0.85),
        }
    }
}

/// Ordered pair of offsets (whole seconds from session start)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "[u64; 2]", into = "[u64; 2]")]
pub struct PromptOffsets([u64; 2]);

impl PromptOffsets {
    /// Build from raw seconds; the first offset must be strictly earlier
    pub fn new(first_secs: u64, second_secs: u64) -> Result<Self, String> {
        if first_secs >= second_secs {
            return Err(format!(
                "Prompt offsets must be ascending, got {}s and {}s",
                first_secs, second_secs
            ));
        }
        Ok(Self([first_secs, second_secs]))
    }

    pub fn secs(&self, slot: SlotIndex) -> u64 {
        self.0[slot.index()]
    }

    pub fn get(&self, slot: SlotIndex) -> Duration {
        Duration::from_secs(self.secs(slot))
    }

    /// Absolute instant at which `slot` becomes due for a session started at `start`
    pub fn due_at(&self, start: DateTime<Utc>, slot: SlotIndex) -> DateTime<Utc> {
        start + chrono::Duration::seconds(self.secs(slot) as i64)
    }

    pub fn as_secs(&self) -> [u64; 2] {
        self.0
    }
}

impl TryFrom<[u64; 2]> for PromptOffsets {
    type Error = String;

    fn try_from(value: [u64; 2]) -> Result<Self, Self::Error> {
        Self::new(value[0], value[1])
    }
}

impl From<PromptOffsets> for [u64; 2] {
    fn from(offsets: PromptOffsets) -> Self {
        offsets.0
    }
}

/// Sample one offset from each window, uniformly and inclusive of both bounds.
pub fn sample_offsets<R: Rng + ?Sized>(
    duration: Duration,
    windows: &WindowPair,
    rng: &mut R,
) -> Result<PromptOffsets, SamplerError> {
    let total_secs = duration.as_secs();
    if total_secs == 0 {
        return Err(SamplerError::ZeroDuration);
    }
    windows.validate()?;

    let (lo1, hi1) = windows.first.second_bounds(total_secs);
    let (lo2, hi2) = windows.second.second_bounds(total_secs);

    let first = rng.gen_range(lo1..=hi1);
    // Windows may touch at a shared boundary second; keep the pair strictly ascending.
    let lo2 = lo2.max(first + 1);
    if lo2 > hi2 {
        return Err(SamplerError::NoSeparation(first));
    }
    let second = rng.gen_range(lo2..=hi2);

    Ok(PromptOffsets([first, second]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const FORTY_MINUTES: Duration = Duration::from_secs(40 * 60);

    #[test]
    fn offsets_stay_inside_their_windows() {
        let windows = WindowPair::default();
        let mut rng = StdRng::seed_from_u64(7);
        let total = FORTY_MINUTES.as_secs() as f64;

        for _ in 0..500 {
            let offsets = sample_offsets(FORTY_MINUTES, &windows, &mut rng).unwrap();
            let [first, second] = offsets.as_secs();
            assert!(first as f64 >= windows.first.min * total);
            assert!(first as f64 <= windows.first.max * total);
            assert!(second as f64 >= windows.second.min * total);
            assert!(second as f64 <= windows.second.max * total);
            assert!(first < second);
        }
    }

    #[test]
    fn bounds_are_inclusive() {
        // 10 second workout, first window covers exactly seconds 1..=2
        let windows = WindowPair {
            first: PromptWindow::new(0.1, 0.2),
            second: PromptWindow::new(0.5, 0.5),
        };
        let mut rng = StdRng::seed_from_u64(1);
        let mut seen = [false; 3];
        for _ in 0..200 {
            let offsets = sample_offsets(Duration::from_secs(10), &windows, &mut rng).unwrap();
            seen[offsets.secs(SlotIndex::First) as usize] = true;
            assert_eq!(offsets.secs(SlotIndex::Second), 5);
        }
        assert!(!seen[0]);
        assert!(seen[1] && seen[2]);
    }

    #[test]
    fn degenerate_window_yields_single_second() {
        let windows = WindowPair {
            first: PromptWindow::new(0.25, 0.25),
            second: PromptWindow::new(0.75, 0.75),
        };
        let mut rng = StdRng::seed_from_u64(3);
        let offsets = sample_offsets(Duration::from_secs(100), &windows, &mut rng).unwrap();
        assert_eq!(offsets.as_secs(), [25, 75]);

        // 0.33 * 10 = 3.3 has no whole second inside a point window
        let windows = WindowPair {
            first: PromptWindow::new(0.33, 0.33),
            second: PromptWindow::new(0.9, 0.9),
        };
        let offsets = sample_offsets(Duration::from_secs(10), &windows, &mut rng).unwrap();
        assert_eq!(offsets.as_secs(), [3, 9]);
    }

    #[test]
    fn touching_windows_never_produce_equal_offsets() {
        let windows = WindowPair {
            first: PromptWindow::new(0.4, 0.5),
            second: PromptWindow::new(0.5, 0.6),
        };
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..200 {
            let offsets = sample_offsets(Duration::from_secs(10), &windows, &mut rng).unwrap();
            assert!(offsets.secs(SlotIndex::First) < offsets.secs(SlotIndex::Second));
        }
    }

    #[test]
    fn rejects_invalid_configuration() {
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(
            sample_offsets(Duration::ZERO, &WindowPair::default(), &mut rng),
            Err(SamplerError::ZeroDuration)
        );

        let overlapping = WindowPair {
            first: PromptWindow::new(0.1, 0.6),
            second: PromptWindow::new(0.5, 0.9),
        };
        assert!(matches!(
            sample_offsets(FORTY_MINUTES, &overlapping, &mut rng),
            Err(SamplerError::Overlapping { .. })
        ));

        let inverted = WindowPair {
            first: PromptWindow::new(0.4, 0.2),
            second: PromptWindow::new(0.5, 0.9),
        };
        assert!(matches!(
            sample_offsets(FORTY_MINUTES, &inverted, &mut rng),
            Err(SamplerError::InvalidWindow { .. })
        ));

        let same_point = WindowPair {
            first: PromptWindow::new(0.5, 0.5),
            second: PromptWindow::new(0.5, 0.5),
        };
        assert_eq!(
            sample_offsets(Duration::from_secs(10), &same_point, &mut rng),
            Err(SamplerError::NoSeparation(5))
        );
    }

    #[test]
    fn parse_window_from_env_format() {
        let window: PromptWindow = "0.30-0.55".parse().unwrap();
        assert_eq!(window, PromptWindow::new(0.30, 0.55));
        assert!("0.3".parse::<PromptWindow>().is_err());
        assert!("0.8-0.2".parse::<PromptWindow>().is_err());
        assert!("x-0.2".parse::<PromptWindow>().is_err());
    }

    #[test]
    fn offsets_serialize_as_pair_and_reject_descending() {
        let offsets = PromptOffsets::new(420, 1800).unwrap();
        assert_eq!(serde_json::to_string(&offsets).unwrap(), "[420,1800]");
        assert!(serde_json::from_str::<PromptOffsets>("[1800,420]").is_err());
    }

    #[test]
    fn due_at_adds_offset_to_start() {
        let start = DateTime::parse_from_rfc3339("2026-03-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let offsets = PromptOffsets::new(420, 1800).unwrap();
        assert_eq!(
            offsets.due_at(start, SlotIndex::Second).to_rfc3339(),
            "2026-03-01T10:30:00+00:00"
        );
    }
}
