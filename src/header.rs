//! Decoding of the one `OSMHeader` frame.

use crate::error::Error;
use crate::wire::FieldScanner;

/// The set of `required_features` this crate understands. A feature outside
/// this set in a file's header means the file may use an encoding this
/// reader cannot correctly interpret, so it is a hard error rather than a
/// warning.
pub const RECOGNIZED_REQUIRED_FEATURES: &[&str] = &[
    "OsmSchema-V0.6",
    "DenseNodes",
    "HistoricalInformation",
    "Sort.Type_then_ID",
    "LocationsOnWays",
];

/// The set of `optional_features` this crate knows about. Unlike
/// `required_features`, an entry outside this set never fails the file —
/// it's only ever surfaced as [`crate::error::Warning::UnrecognizedOptionalFeature`].
pub const RECOGNIZED_OPTIONAL_FEATURES: &[&str] = &["Sparse.StreamFile"];

/// The bounding box declared by a `HeaderBlock`, in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox {
    pub left: f64,
    pub right: f64,
    pub top: f64,
    pub bottom: f64,
}

impl BBox {
    fn parse(buf: &[u8]) -> Result<Self, Error> {
        let mut left = None;
        let mut right = None;
        let mut top = None;
        let mut bottom = None;

        for field in FieldScanner::new(buf) {
            let field = field?;
            match field.number {
                1 => left = Some(field.as_svarint()?),
                2 => right = Some(field.as_svarint()?),
                3 => top = Some(field.as_svarint()?),
                4 => bottom = Some(field.as_svarint()?),
                _ => {}
            }
        }

        const NANO: f64 = 1e-9;
        Ok(BBox {
            left: left.unwrap_or(0) as f64 * NANO,
            right: right.unwrap_or(0) as f64 * NANO,
            top: top.unwrap_or(0) as f64 * NANO,
            bottom: bottom.unwrap_or(0) as f64 * NANO,
        })
    }
}

/// The decoded `OSMHeader` frame.
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderBlock {
    pub bbox: Option<BBox>,
    pub required_features: Vec<String>,
    pub optional_features: Vec<String>,
    pub writing_program: Option<String>,
    pub source: Option<String>,
    pub osmosis_replication_timestamp: Option<i64>,
    pub osmosis_replication_sequence_number: Option<i64>,
    pub osmosis_replication_base_url: Option<String>,
}

impl HeaderBlock {
    /// Parses a decompressed `HeaderBlock` message, validating that every
    /// `required_features` entry is one this reader implements.
    pub fn parse(buf: &[u8]) -> Result<Self, Error> {
        let mut bbox = None;
        let mut required_features = Vec::new();
        let mut optional_features = Vec::new();
        let mut writing_program = None;
        let mut source = None;
        let mut osmosis_replication_timestamp = None;
        let mut osmosis_replication_sequence_number = None;
        let mut osmosis_replication_base_url = None;

        for field in FieldScanner::new(buf) {
            let field = field?;
            match field.number {
                1 => bbox = Some(BBox::parse(field.bytes()?)?),
                4 => required_features.push(field.as_str()?.to_string()),
                5 => optional_features.push(field.as_str()?.to_string()),
                16 => writing_program = Some(field.as_str()?.to_string()),
                17 => source = Some(field.as_str()?.to_string()),
                32 => osmosis_replication_timestamp = Some(field.as_int64()?),
                33 => osmosis_replication_sequence_number = Some(field.as_int64()?),
                34 => osmosis_replication_base_url = Some(field.as_str()?.to_string()),
                _ => {}
            }
        }

        for feature in &required_features {
            if !RECOGNIZED_REQUIRED_FEATURES.contains(&feature.as_str()) {
                return Err(Error::UnsupportedFeature(feature.clone()));
            }
        }

        Ok(HeaderBlock {
            bbox,
            required_features,
            optional_features,
            writing_program,
            source,
            osmosis_replication_timestamp,
            osmosis_replication_sequence_number,
            osmosis_replication_base_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(number: u32, wire_type: u8) -> Vec<u8> {
        let mut out = Vec::new();
        let mut v = ((number as u64) << 3) | wire_type as u64;
        loop {
            let byte = (v & 0x7f) as u8;
            v >>= 7;
            if v == 0 {
                out.push(byte);
                break;
            } else {
                out.push(byte | 0x80);
            }
        }
        out
    }

    fn string_field(number: u32, s: &str) -> Vec<u8> {
        let mut out = key(number, 2);
        out.push(s.len() as u8);
        out.extend_from_slice(s.as_bytes());
        out
    }

    #[test]
    fn parses_required_and_optional_features() {
        let mut buf = string_field(4, "OsmSchema-V0.6");
        buf.extend(string_field(4, "DenseNodes"));
        buf.extend(string_field(5, "Sparse.StreamFile"));

        let header = HeaderBlock::parse(&buf).unwrap();
        assert_eq!(header.required_features, vec!["OsmSchema-V0.6", "DenseNodes"]);
        assert_eq!(header.optional_features, vec!["Sparse.StreamFile"]);
    }

    #[test]
    fn unrecognized_required_feature_is_an_error() {
        let buf = string_field(4, "Some.Future.Feature");
        assert!(matches!(HeaderBlock::parse(&buf), Err(Error::UnsupportedFeature(_))));
    }

    #[test]
    fn missing_bbox_is_none() {
        let buf = string_field(4, "OsmSchema-V0.6");
        let header = HeaderBlock::parse(&buf).unwrap();
        assert!(header.bbox.is_none());
    }
}
