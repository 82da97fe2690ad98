//! Serialization utilities for common data types
//!
//! Settings files and cache metadata express durations as fractional
//! seconds (`1.5` rather than `1500`), so the helpers here convert
//! between `f64` seconds and [`Duration`].

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serializer};

/// Serde serialization result type
type SerializeResult<S> = Result<<S as Serializer>::Ok, <S as Serializer>::Error>;

fn secs_to_duration<E: serde::de::Error>(secs: f64) -> Result<Duration, E> {
    Duration::try_from_secs_f64(secs)
        .map_err(|_| E::custom(format!("invalid duration: {secs} seconds")))
}

/// Custom serialization module for Duration as fractional seconds
///
/// Accepts integers as well as floats when deserializing, and rejects
/// negative, NaN or infinite values.
///
/// # Usage
/// ```rust
/// use std::time::Duration;
///
/// use clipforge_common::utils::duration_secs;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Example {
///     #[serde(with = "duration_secs")]
///     timeout: Duration,
/// }
///
/// let parsed: Example = serde_json::from_str(r#"{"timeout":0.25}"#).unwrap();
/// assert_eq!(parsed.timeout, Duration::from_millis(250));
/// ```
pub mod duration_secs {
    use super::*;

    /// Serialize a Duration as seconds (f64)
    pub fn serialize<S>(duration: &Duration, serializer: S) -> SerializeResult<S>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    /// Deserialize seconds (f64) into a Duration
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        secs_to_duration(secs)
    }
}

/// Like [`duration_secs`] but for `Option<Duration>`; `null` maps to `None`
pub mod duration_secs_opt {
    use super::*;

    /// Serialize an optional Duration as seconds or null
    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> SerializeResult<S>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&d.as_secs_f64()),
            None => serializer.serialize_none(),
        }
    }

    /// Deserialize optional seconds into an optional Duration
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<f64>::deserialize(deserializer)? {
            Some(secs) => secs_to_duration(secs).map(Some),
            None => Ok(None),
        }
    }
}
