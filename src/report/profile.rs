//! Profile dump wire format
//!
//! Dumps are `perftools.profiles.Profile` protobuf messages, the format written
//! by `pprof` and by the Go runtime. Only the subset the report engine needs is
//! modeled; mappings are skipped on decode. Gzip-compressed dumps, as written
//! by the Go runtime, are inflated first.
//!
//! Within a location, `line` entries are ordered leaf first: the last entry is
//! the caller of the inlined frames before it.

use crate::error::{BenchError, Result};
use flate2::read::GzDecoder;
use prost::Message;
use std::collections::HashMap;
use std::io::Read;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Raw protobuf messages
pub mod proto {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Profile {
        #[prost(message, repeated, tag = "1")]
        pub sample_type: Vec<ValueType>,
        #[prost(message, repeated, tag = "2")]
        pub sample: Vec<Sample>,
        #[prost(message, repeated, tag = "4")]
        pub location: Vec<Location>,
        #[prost(message, repeated, tag = "5")]
        pub function: Vec<Function>,
        /// Index 0 must be the empty string
        #[prost(string, repeated, tag = "6")]
        pub string_table: Vec<String>,
        #[prost(int64, tag = "7")]
        pub drop_frames: i64,
        #[prost(int64, tag = "8")]
        pub keep_frames: i64,
        #[prost(int64, tag = "9")]
        pub time_nanos: i64,
        #[prost(int64, tag = "10")]
        pub duration_nanos: i64,
        #[prost(message, optional, tag = "11")]
        pub period_type: Option<ValueType>,
        #[prost(int64, tag = "12")]
        pub period: i64,
        #[prost(int64, repeated, tag = "13")]
        pub comment: Vec<i64>,
        #[prost(int64, tag = "14")]
        pub default_sample_type: i64,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ValueType {
        #[prost(int64, tag = "1")]
        pub r#type: i64,
        #[prost(int64, tag = "2")]
        pub unit: i64,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Sample {
        /// Leaf first
        #[prost(uint64, repeated, tag = "1")]
        pub location_id: Vec<u64>,
        #[prost(int64, repeated, tag = "2")]
        pub value: Vec<i64>,
        #[prost(message, repeated, tag = "3")]
        pub label: Vec<Label>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Label {
        #[prost(int64, tag = "1")]
        pub key: i64,
        #[prost(int64, tag = "2")]
        pub str: i64,
        #[prost(int64, tag = "3")]
        pub num: i64,
        #[prost(int64, tag = "4")]
        pub num_unit: i64,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Location {
        #[prost(uint64, tag = "1")]
        pub id: u64,
        #[prost(uint64, tag = "2")]
        pub mapping_id: u64,
        #[prost(uint64, tag = "3")]
        pub address: u64,
        #[prost(message, repeated, tag = "4")]
        pub line: Vec<Line>,
        #[prost(bool, tag = "5")]
        pub is_folded: bool,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Line {
        #[prost(uint64, tag = "1")]
        pub function_id: u64,
        #[prost(int64, tag = "2")]
        pub line: i64,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Function {
        #[prost(uint64, tag = "1")]
        pub id: u64,
        #[prost(int64, tag = "2")]
        pub name: i64,
        #[prost(int64, tag = "3")]
        pub system_name: i64,
        #[prost(int64, tag = "4")]
        pub filename: i64,
        #[prost(int64, tag = "5")]
        pub start_line: i64,
    }
}

/// Assembles a profile dump from symbolized stacks
///
/// Each distinct function name gets one function and one location.
#[derive(Debug)]
pub struct ProfileBuilder {
    profile: proto::Profile,
    strings: HashMap<String, i64>,
    locations: HashMap<String, u64>,
}

impl ProfileBuilder {
    /// Start a profile with the given `(type, unit)` sample types
    pub fn new(sample_types: &[(&str, &str)]) -> Self {
        let mut builder = Self {
            profile: proto::Profile::default(),
            strings: HashMap::new(),
            locations: HashMap::new(),
        };
        builder.intern("");
        for (ty, unit) in sample_types {
            let value_type = proto::ValueType {
                r#type: builder.intern(ty),
                unit: builder.intern(unit),
            };
            builder.profile.sample_type.push(value_type);
        }
        builder
    }

    /// Sampling period, in units of `period_type`
    pub fn period(mut self, ty: &str, unit: &str, period: i64) -> Self {
        self.profile.period_type = Some(proto::ValueType {
            r#type: self.intern(ty),
            unit: self.intern(unit),
        });
        self.profile.period = period;
        self
    }

    pub fn duration_nanos(mut self, nanos: i64) -> Self {
        self.profile.duration_nanos = nanos;
        self
    }

    /// Add one sample; `stack` is leaf first
    pub fn add_sample(&mut self, stack: &[&str], values: &[i64], labels: &[(&str, &str)]) {
        let location_id = stack.iter().map(|name| self.location(name)).collect();
        let label = labels
            .iter()
            .map(|(key, value)| proto::Label {
                key: self.intern(key),
                str: self.intern(value),
                ..Default::default()
            })
            .collect();
        self.profile.sample.push(proto::Sample {
            location_id,
            value: values.to_vec(),
            label,
        });
    }

    pub fn sample_count(&self) -> usize {
        self.profile.sample.len()
    }

    pub fn build(self) -> proto::Profile {
        self.profile
    }

    /// Encode as protobuf bytes
    pub fn encode(self) -> Vec<u8> {
        self.profile.encode_to_vec()
    }

    fn intern(&mut self, s: &str) -> i64 {
        if let Some(&id) = self.strings.get(s) {
            return id;
        }
        let id = self.profile.string_table.len() as i64;
        self.profile.string_table.push(s.to_string());
        self.strings.insert(s.to_string(), id);
        id
    }

    fn location(&mut self, name: &str) -> u64 {
        if let Some(&id) = self.locations.get(name) {
            return id;
        }
        let id = self.profile.location.len() as u64 + 1;
        let name_id = self.intern(name);
        self.profile.function.push(proto::Function {
            id,
            name: name_id,
            system_name: name_id,
            ..Default::default()
        });
        self.profile.location.push(proto::Location {
            id,
            line: vec![proto::Line {
                function_id: id,
                line: 0,
            }],
            ..Default::default()
        });
        self.locations.insert(name.to_string(), id);
        id
    }
}

fn lookup(strings: &[String], idx: i64) -> Result<&str> {
    usize::try_from(idx)
        .ok()
        .and_then(|i| strings.get(i))
        .map(String::as_str)
        .ok_or_else(|| BenchError::MalformedProfile(format!("string index {} out of range", idx)))
}

/// Sample type exposed by a profile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleType {
    pub name: String,
    pub unit: String,
}

/// A sample with its stack resolved to function indices
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSample {
    /// Indices into [`ResolvedProfile::functions`], leaf first
    pub stack: Vec<usize>,
    pub values: Vec<i64>,
    /// `(key, value)`; numeric labels are rendered as decimal text
    pub labels: Vec<(String, String)>,
}

/// Decoded profile with all string and id references resolved
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResolvedProfile {
    pub sample_types: Vec<SampleType>,
    pub default_sample_type: Option<String>,
    pub functions: Vec<String>,
    pub samples: Vec<ResolvedSample>,
}

impl ResolvedProfile {
    /// Decode and resolve a raw or gzip-compressed dump
    pub fn decode(data: &[u8]) -> Result<Self> {
        let raw = if data.starts_with(&GZIP_MAGIC) {
            let mut inflated = Vec::new();
            GzDecoder::new(data)
                .read_to_end(&mut inflated)
                .map_err(BenchError::Decompress)?;
            proto::Profile::decode(inflated.as_slice())?
        } else {
            proto::Profile::decode(data)?
        };
        Self::resolve(&raw)
    }

    /// Resolve string and id references of a decoded profile
    pub fn resolve(raw: &proto::Profile) -> Result<Self> {
        let strings = raw.string_table.as_slice();

        let sample_types = raw
            .sample_type
            .iter()
            .map(|vt| {
                Ok(SampleType {
                    name: lookup(strings, vt.r#type)?.to_string(),
                    unit: lookup(strings, vt.unit)?.to_string(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let default_sample_type = match raw.default_sample_type {
            0 => None,
            idx => Some(lookup(strings, idx)?.to_string()),
        };

        // One function index per distinct name
        let mut functions: Vec<String> = Vec::new();
        let mut by_name: HashMap<String, usize> = HashMap::new();
        let mut intern = |name: &str| -> usize {
            if let Some(&idx) = by_name.get(name) {
                return idx;
            }
            let idx = functions.len();
            functions.push(name.to_string());
            by_name.insert(name.to_string(), idx);
            idx
        };

        let mut function_names: HashMap<u64, usize> = HashMap::new();
        for function in &raw.function {
            let name = lookup(strings, function.name)?;
            function_names.insert(function.id, intern(name));
        }

        let mut locations: HashMap<u64, Vec<usize>> = HashMap::new();
        for location in &raw.location {
            let frames = if location.line.is_empty() {
                vec![intern(&format!("{:#x}", location.address))]
            } else {
                location
                    .line
                    .iter()
                    .map(|line| {
                        function_names.get(&line.function_id).copied().ok_or_else(|| {
                            BenchError::MalformedProfile(format!(
                                "location {} references unknown function {}",
                                location.id, line.function_id
                            ))
                        })
                    })
                    .collect::<Result<Vec<_>>>()?
            };
            locations.insert(location.id, frames);
        }

        let mut samples = Vec::with_capacity(raw.sample.len());
        for sample in &raw.sample {
            if sample.value.len() != sample_types.len() {
                return Err(BenchError::MalformedProfile(format!(
                    "sample has {} values for {} sample types",
                    sample.value.len(),
                    sample_types.len()
                )));
            }
            let mut stack = Vec::new();
            for id in &sample.location_id {
                let frames = locations.get(id).ok_or_else(|| {
                    BenchError::MalformedProfile(format!("sample references unknown location {}", id))
                })?;
                stack.extend_from_slice(frames);
            }
            let labels = sample
                .label
                .iter()
                .map(|label| {
                    let key = lookup(strings, label.key)?.to_string();
                    let value = if label.str != 0 {
                        lookup(strings, label.str)?.to_string()
                    } else {
                        label.num.to_string()
                    };
                    Ok((key, value))
                })
                .collect::<Result<Vec<_>>>()?;
            samples.push(ResolvedSample {
                stack,
                values: sample.value.clone(),
                labels,
            });
        }

        Ok(Self {
            sample_types,
            default_sample_type,
            functions,
            samples,
        })
    }

    pub fn function_name(&self, idx: usize) -> &str {
        self.functions.get(idx).map(String::as_str).unwrap_or("")
    }

    /// Position of the sample type named `name`
    pub fn sample_type_index(&self, name: &str) -> Option<usize> {
        self.sample_types.iter().position(|st| st.name == name)
    }
}
