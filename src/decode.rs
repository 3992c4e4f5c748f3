//! Streaming decode of JSON arrays and GeoJSON feature collections.
//!
//! Records are materialized one at a time from the byte stream and handed to
//! a [`RecordSink`] as they decode; the whole input is never buffered. The
//! stream is restartable only from the beginning. Pipeline errors raised by
//! the sink are parked next to the deserializer (serde's error type cannot
//! carry them) and take precedence over the synthetic decode error used to
//! stop the parse.

use std::fmt;
use std::io::Read;

use indexmap::IndexMap;
use serde::de::{self, DeserializeSeed, IgnoredAny, MapAccess, SeqAccess, Visitor};

use crate::error::{ImportError, Result};
use crate::record::{Decoded, Feature};

/// Receives records as they decode. Returning an error stops the stream.
pub trait RecordSink {
    fn record(&mut self, record: Decoded) -> Result<()>;
}

const ABORTED: &str = "import aborted";

struct RecordSeq<'a, 'b> {
    sink: &'a mut dyn RecordSink,
    features: bool,
    failure: &'b mut Option<ImportError>,
}

impl<'de> DeserializeSeed<'de> for RecordSeq<'_, '_> {
    type Value = ();

    fn deserialize<D>(self, deserializer: D) -> std::result::Result<(), D::Error>
    where
        D: de::Deserializer<'de>,
    {
        deserializer.deserialize_seq(self)
    }
}

impl<'de> Visitor<'de> for RecordSeq<'_, '_> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "an array of records")
    }

    fn visit_seq<A>(self, mut seq: A) -> std::result::Result<(), A::Error>
    where
        A: SeqAccess<'de>,
    {
        if self.features {
            while let Some(feature) = seq.next_element::<Feature>()? {
                if let Err(err) = self.sink.record(Decoded::Feature(feature)) {
                    *self.failure = Some(err);
                    return Err(de::Error::custom(ABORTED));
                }
            }
        } else {
            while let Some(map) = seq.next_element::<IndexMap<String, serde_json::Value>>()? {
                if let Err(err) = self.sink.record(Decoded::Object(map)) {
                    *self.failure = Some(err);
                    return Err(de::Error::custom(ABORTED));
                }
            }
        }
        Ok(())
    }
}

struct FeatureCollection<'a, 'b> {
    sink: &'a mut dyn RecordSink,
    failure: &'b mut Option<ImportError>,
}

impl<'de> DeserializeSeed<'de> for FeatureCollection<'_, '_> {
    type Value = ();

    fn deserialize<D>(self, deserializer: D) -> std::result::Result<(), D::Error>
    where
        D: de::Deserializer<'de>,
    {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for FeatureCollection<'_, '_> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "a GeoJSON feature collection")
    }

    fn visit_map<A>(self, mut map: A) -> std::result::Result<(), A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut found = false;
        while let Some(key) = map.next_key::<String>()? {
            if key == "features" {
                map.next_value_seed(RecordSeq {
                    sink: &mut *self.sink,
                    features: true,
                    failure: &mut *self.failure,
                })?;
                found = true;
            } else {
                map.next_value::<IgnoredAny>()?;
            }
        }
        if !found {
            return Err(de::Error::custom("missing 'features' array"));
        }
        Ok(())
    }
}

fn finish<R: Read>(
    parsed: std::result::Result<(), serde_json::Error>,
    mut de: serde_json::Deserializer<serde_json::de::IoRead<R>>,
    failure: Option<ImportError>,
) -> Result<()> {
    match parsed {
        Ok(()) => de
            .end()
            .map_err(|err| ImportError::Decode(err.to_string())),
        Err(err) => match failure {
            Some(pipeline) => Err(pipeline),
            None => Err(ImportError::Decode(err.to_string())),
        },
    }
}

/// Streams a top-level JSON array of objects into `sink`.
pub fn stream_json<R: Read>(reader: R, sink: &mut dyn RecordSink) -> Result<()> {
    let mut failure = None;
    let mut de = serde_json::Deserializer::from_reader(reader);
    let parsed = RecordSeq {
        sink,
        features: false,
        failure: &mut failure,
    }
    .deserialize(&mut de);
    finish(parsed, de, failure)
}

/// Streams the `features` array of a GeoJSON `FeatureCollection` into
/// `sink`, skipping every other top-level member.
pub fn stream_geojson<R: Read>(reader: R, sink: &mut dyn RecordSink) -> Result<()> {
    let mut failure = None;
    let mut de = serde_json::Deserializer::from_reader(reader);
    let parsed = FeatureCollection {
        sink,
        failure: &mut failure,
    }
    .deserialize(&mut de);
    finish(parsed, de, failure)
}
