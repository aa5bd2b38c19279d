//! Run-length compressed animation channels
//!
//! A channel is a flat list of entries. Each run starts with a header
//! entry `{ valid, total }` followed by `valid` value entries; the run
//! covers `total` frames, and frames past `valid` repeat the last value.
//!
//! # Example
//!
//! ```
//! use studio_anim::anim_value::AnimValueStream;
//!
//! let stream = AnimValueStream::from_frames(&[0, 10, 20, 20, 20]);
//! let (v1, v2) = stream.extract_value_pair(1, 0.5);
//! assert_eq!((v1, v2), (5.0, 10.0));
//!
//! // Past the last frame the final sample is held
//! assert_eq!(stream.extract_value(9, 1.0), 20.0);
//! assert_eq!(stream.extract_value_pair(4, 1.0), (20.0, 20.0));
//! ```

use log::warn;

/// One entry of a compressed channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub enum AnimValue {
    /// Run header: `valid` stored values covering `total` frames
    Run {
        /// Number of value entries following the header
        valid: u8,
        /// Number of frames covered by the run
        total: u8,
    },
    /// Raw sample, multiplied by the channel scale when decoded
    Value(i16),
}

/// A run-length compressed animation channel
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub struct AnimValueStream {
    entries: Vec<AnimValue>,
}

impl AnimValueStream {
    /// Wrap already encoded entries
    pub fn new(entries: Vec<AnimValue>) -> Self {
        Self { entries }
    }

    /// Encode one sample per frame
    ///
    /// Trailing repeats of a value inside a run are stored once, and runs
    /// are split so that neither count exceeds 255.
    pub fn from_frames(frames: &[i16]) -> Self {
        let mut entries = Vec::new();
        let mut start = 0;

        while start < frames.len() {
            let mut valid = 1;
            while start + valid < frames.len()
                && valid < usize::from(u8::MAX)
                && frames[start + valid] != frames[start + valid - 1]
            {
                valid += 1;
            }

            let last = frames[start + valid - 1];
            let mut total = valid;
            while start + total < frames.len()
                && total < usize::from(u8::MAX)
                && frames[start + total] == last
            {
                total += 1;
            }

            entries.push(AnimValue::Run {
                valid: valid as u8,
                total: total as u8,
            });
            entries.extend(
                frames[start..start + valid]
                    .iter()
                    .map(|&v| AnimValue::Value(v)),
            );
            start += total;
        }

        Self { entries }
    }

    /// Raw entries
    pub fn entries(&self) -> &[AnimValue] {
        &self.entries
    }

    /// Whether the channel carries no data
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn header(&self, index: usize) -> Option<(usize, usize)> {
        match self.entries.get(index)? {
            AnimValue::Run { valid, total } => Some((usize::from(*valid), usize::from(*total))),
            AnimValue::Value(_) => None,
        }
    }

    fn sample(&self, index: usize) -> f32 {
        match self.entries.get(index) {
            Some(AnimValue::Value(v)) => f32::from(*v),
            Some(AnimValue::Run { .. }) => {
                warn!("Animation channel entry {} is a run header, not a value", index);
                0.0
            }
            None => {
                warn!(
                    "Animation channel read past end ({} of {})",
                    index,
                    self.entries.len()
                );
                self.last_value()
            }
        }
    }

    /// Last stored value entry, zero when there is none
    fn last_value(&self) -> f32 {
        self.entries
            .iter()
            .rev()
            .find_map(|entry| match entry {
                AnimValue::Value(v) => Some(f32::from(*v)),
                AnimValue::Run { .. } => None,
            })
            .unwrap_or(0.0)
    }

    /// Walk the runs until the one containing `frame`
    fn seek(&self, frame: usize) -> Seek {
        let mut base = 0;
        let mut k = frame;
        let mut last = None;
        loop {
            if base >= self.entries.len() {
                return match last {
                    Some((base, valid)) => Seek::PastEnd { base, valid },
                    None => Seek::Malformed,
                };
            }
            let Some((valid, total)) = self.header(base) else {
                warn!("Animation channel has no run header at entry {}", base);
                return Seek::Malformed;
            };
            if total == 0 {
                warn!("Animation channel has a zero-length run at entry {}", base);
                return Seek::Malformed;
            }
            if total > k {
                return Seek::Inside { base, k, valid, total };
            }
            last = Some((base, valid));
            k -= total;
            base += valid + 1;
        }
    }

    /// First value of the run following the one at `base`
    ///
    /// The last run has nothing to chain into, so `held` is kept.
    fn next_run_value(&self, base: usize, valid: usize, held: f32) -> f32 {
        if base + valid + 1 >= self.entries.len() {
            held
        } else {
            self.sample(base + valid + 2)
        }
    }

    /// Bracketing samples for `frame` and `frame + 1`, times `scale`
    ///
    /// Past the stored values of a run the last value is held; at the end
    /// of a run the second sample chains into the first value of the next
    /// run. Past the end of the channel the final sample is held. Malformed
    /// headers decode as zero.
    pub fn extract_value_pair(&self, frame: usize, scale: f32) -> (f32, f32) {
        if self.entries.is_empty() {
            return (0.0, 0.0);
        }

        if self.entries.len() == 2 && self.header(0) == Some((1, 1)) {
            let v = self.sample(1) * scale;
            return (v, v);
        }

        let (base, k, valid, total) = match self.seek(frame) {
            Seek::Inside { base, k, valid, total } => (base, k, valid, total),
            Seek::PastEnd { base, valid } => {
                let v = self.sample(base + valid) * scale;
                return (v, v);
            }
            Seek::Malformed => return (0.0, 0.0),
        };

        let (v1, v2) = if valid > k {
            let v1 = self.sample(base + k + 1);
            let v2 = if valid > k + 1 {
                self.sample(base + k + 2)
            } else if total > k + 1 {
                v1
            } else {
                self.next_run_value(base, valid, v1)
            };
            (v1, v2)
        } else {
            let v1 = self.sample(base + valid);
            let v2 = if total > k + 1 {
                v1
            } else {
                self.next_run_value(base, valid, v1)
            };
            (v1, v2)
        };

        (v1 * scale, v2 * scale)
    }

    /// Sample for `frame`, times `scale`
    ///
    /// Frames past the end of the channel hold the final sample.
    pub fn extract_value(&self, frame: usize, scale: f32) -> f32 {
        if self.entries.is_empty() {
            return 0.0;
        }

        match self.seek(frame) {
            Seek::Inside { base, k, valid, .. } if valid > k => self.sample(base + k + 1) * scale,
            Seek::Inside { base, valid, .. } | Seek::PastEnd { base, valid } => {
                self.sample(base + valid) * scale
            }
            Seek::Malformed => 0.0,
        }
    }
}

/// Where a frame lands in a channel
enum Seek {
    /// Header index, frame offset inside the run and the run's counts
    Inside {
        base: usize,
        k: usize,
        valid: usize,
        total: usize,
    },
    /// Beyond every run; header and value count of the last run
    PastEnd { base: usize, valid: usize },
    Malformed,
}

/// Interpolated value of an optional channel at `frame + s`
///
/// A missing channel decodes as zero.
pub fn sample_channel(stream: Option<&AnimValueStream>, frame: usize, s: f32, scale: f32) -> f32 {
    match stream {
        Some(stream) if s > 0.001 => {
            let (v1, v2) = stream.extract_value_pair(frame, scale);
            v1 * (1.0 - s) + v2 * s
        }
        Some(stream) => stream.extract_value(frame, scale),
        None => 0.0,
    }
}
