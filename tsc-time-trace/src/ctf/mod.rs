//! Event model for the Chrome Trace Event format
//!
//! Based on the documentation available at
//! <https://docs.google.com/document/d/1CvAClvFfyA5R-PhYUmn5OOQtYMH4h6I0nSsKchNAySU>
//!
//! Only the subset emitted by tsc's `--generateTrace` is modeled: duration
//! events (B/E), complete events (X), and the metadata/instant records that
//! the profile contains but which carry no span information.

use serde::Deserialize;
use serde_json as json;
use std::collections::HashMap;
use thiserror::Error;

/// Clock timestamp with microsecond granularity
pub type Timestamp = u64;

/// Durations are just a difference of timestamps
pub type Duration = u64;

/// Event description
//
// Has a #[serde(flatten)] so should not get #[serde(deny_unknown_fields)]
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(tag = "ph")]
pub enum TraceEvent {
    // Duration events, can be nested, timestamps must be in increasing order
    // for a given thread.
    //
    /// Beginning of some work, must come before corresponding E event
    B(DurationEvent),
    //
    /// End of some work, must come after corresponding B event
    E(DurationEvent),

    /// Complete event = combines two consecutive B and E events
    X {
        /// Most fields are shared with duration events
        #[serde(flatten)]
        duration_event: DurationEvent,

        /// Wall-clock duration of the complete event
        dur: Microseconds,
    },

    /// Metadata event, carries no timing information
    M {},

    /// Instant event, a point in time with no extent
    #[serde(rename = "i", alias = "I")]
    I {},

    /// Any other phase, which tsc is not expected to emit
    #[serde(other)]
    Other,
}

/// Common part of duration and complete events
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct DurationEvent {
    /// Tracing clock timestamp
    pub ts: Microseconds,

    /// Name of the event
    pub name: Option<Box<str>>,

    /// Comma-separated list of categories
    pub cat: Option<EventCategories>,

    /// Event arguments, consulted by string key downstream
    pub args: Option<HashMap<Box<str>, json::Value>>,
}

/// Microsecond quantity from the trace
///
/// tsc emits timestamps either as JSON numbers (possibly with a fractional
/// part, which is truncated here) or as decimal strings.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Ord, PartialEq, PartialOrd)]
#[serde(try_from = "RawMicroseconds")]
pub struct Microseconds(pub u64);
//
impl TryFrom<RawMicroseconds> for Microseconds {
    type Error = MicrosecondsParseError;

    fn try_from(raw: RawMicroseconds) -> Result<Self, Self::Error> {
        match raw {
            RawMicroseconds::Num(n) if n >= 0.0 => Ok(Self(n as u64)),
            RawMicroseconds::Num(n) => Err(MicrosecondsParseError::Negative(n)),
            RawMicroseconds::Text(s) => s
                .parse::<u64>()
                .map(Self)
                .map_err(|_| MicrosecondsParseError::BadText(s)),
        }
    }
}
//
impl From<Microseconds> for u64 {
    fn from(us: Microseconds) -> Self {
        us.0
    }
}
//
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(untagged, deny_unknown_fields)]
enum RawMicroseconds {
    Num(f64),
    Text(Box<str>),
}

/// What can go wrong while decoding a microsecond quantity
#[derive(Clone, Debug, Error, PartialEq)]
pub enum MicrosecondsParseError {
    /// Timestamps and durations may not be negative
    #[error("negative microsecond quantity {0}")]
    Negative(f64),

    /// Textual timestamps must be decimal integers
    #[error("invalid microsecond string {0:?}")]
    BadText(Box<str>),
}

/// Event categories
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(from = "Box<str>")]
pub struct EventCategories(pub Box<[Box<str>]>);
//
impl EventCategories {
    /// Truth that the event belongs to a certain category
    pub fn contains(&self, cat: &str) -> bool {
        self.0.iter().any(|c| &**c == cat)
    }
}
//
impl From<Box<str>> for EventCategories {
    fn from(s: Box<str>) -> Self {
        Self(
            s.split(',')
                .filter(|sub| !sub.is_empty())
                .map(|sub| sub.into())
                .collect(),
        )
    }
}
