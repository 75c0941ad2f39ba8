//! JSON persistence for tasks, reports and benchmarks
//!
//! Wire rules:
//! - integers and durations are decimal strings (durations in nanoseconds)
//! - row values are shortest round-trip decimal strings
//! - empty `children`/`messages`/`pprof`/`heap` are omitted
//! - report images are base64, empty string when absent
//!
//! Decoding is strict: unknown fields, missing fields and mistyped values are
//! errors. Pretty output is tab-indented.

use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{Read, Write};

/// Compact JSON encoding
pub fn to_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

/// Tab-indented JSON encoding
pub fn to_json_pretty<T: Serialize>(value: &T) -> Result<String> {
    let mut buf = Vec::new();
    write_json(&mut buf, value)?;
    // serde_json only emits UTF-8
    Ok(String::from_utf8(buf).unwrap_or_default())
}

/// Write tab-indented JSON, returning the number of bytes written
pub fn write_json<W: Write, T: Serialize>(writer: W, value: &T) -> Result<usize> {
    let mut counter = CountingWriter { inner: writer, written: 0 };
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"\t");
    let mut ser = serde_json::Serializer::with_formatter(&mut counter, formatter);
    value.serialize(&mut ser)?;
    counter.flush()?;
    Ok(counter.written)
}

/// Decode a JSON document
pub fn from_json<T: DeserializeOwned>(text: &str) -> Result<T> {
    Ok(serde_json::from_str(text)?)
}

/// Read and decode a JSON document
pub fn read_json<R: Read, T: DeserializeOwned>(mut reader: R) -> Result<T> {
    let mut text = String::new();
    reader.read_to_string(&mut text)?;
    from_json(&text)
}

struct CountingWriter<W> {
    inner: W,
    written: usize,
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// `u64` as a decimal string
pub(crate) mod decimal {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse()
            .map_err(|_| de::Error::custom(format!("invalid decimal string {:?}", text)))
    }
}

/// `Duration` as a decimal string of nanoseconds
pub(crate) mod nanos {
    use serde::{de, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&value.as_nanos())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        let invalid = || {
            <D::Error as de::Error>::custom(format!("invalid nanosecond string {:?}", text))
        };
        let nanos: u128 = text.parse().map_err(|_| invalid())?;
        let secs = u64::try_from(nanos / NANOS_PER_SEC).map_err(|_| invalid())?;
        // remainder is below one second
        Ok(Duration::new(secs, (nanos % NANOS_PER_SEC) as u32))
    }

    const NANOS_PER_SEC: u128 = 1_000_000_000;
}

/// `f64` as its shortest round-trip decimal string
pub(crate) mod float {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse()
            .map_err(|_| de::Error::custom(format!("invalid float string {:?}", text)))
    }
}

/// Optional bytes as a base64 string, empty when absent
pub(crate) mod image {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => serializer.serialize_str(&STANDARD.encode(bytes)),
            None => serializer.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        let text = String::deserialize(deserializer)?;
        if text.is_empty() {
            return Ok(None);
        }
        STANDARD
            .decode(text.as_bytes())
            .map(Some)
            .map_err(|e| de::Error::custom(format!("invalid base64 image: {}", e)))
    }
}
