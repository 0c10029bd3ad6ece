//! Coordinate and timestamp normalization, decoupled from any particular
//! block's field layout so they can be shared by both dense and sparse
//! node decoding.

/// Degrees-per-nanodegree conversion factor; coordinates are stored in the
/// PBF as `value * granularity + offset` nanodegrees.
const NANO: f64 = 1e-9;

/// Reconstructs a single coordinate (latitude or longitude) as a decimal
/// degree value from its delta-accumulated raw value, the block's
/// granularity, and its offset.
#[inline]
pub fn decode_coordinate(raw: i64, granularity: i32, offset: i64) -> f64 {
    (offset + granularity as i64 * raw) as f64 * NANO
}

/// Converts a delta-accumulated raw timestamp into milliseconds since the
/// Unix epoch, per `date_granularity`.
#[inline]
pub fn decode_timestamp_millis(raw: i64, date_granularity: i32) -> i64 {
    raw * date_granularity as i64
}
