use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Typed value of a tag.
///
/// Serialized untagged so the sink receives a bare JSON boolean or number.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum TagValue {
    /// Coil, discrete input or boolean-typed register.
    Bool(bool),

    /// 16-bit register interpreted as a signed or unsigned integer.
    Integer(i64),

    /// IEEE-754 value (register pairs).
    Float(f64),
}

impl TagValue {
    /// Numeric view of the value; booleans map to 0/1.
    pub fn as_f64(&self) -> f64 {
        match self {
            TagValue::Bool(b) => f64::from(u8::from(*b)),
            TagValue::Integer(i) => *i as f64,
            TagValue::Float(f) => *f,
        }
    }
}

impl From<bool> for TagValue {
    fn from(v: bool) -> Self {
        TagValue::Bool(v)
    }
}

impl From<i64> for TagValue {
    fn from(v: i64) -> Self {
        TagValue::Integer(v)
    }
}

impl From<f64> for TagValue {
    fn from(v: f64) -> Self {
        TagValue::Float(v)
    }
}

impl std::fmt::Display for TagValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TagValue::Bool(b) => write!(f, "{}", b),
            TagValue::Integer(i) => write!(f, "{}", i),
            TagValue::Float(v) => write!(f, "{}", v),
        }
    }
}

/// A single tag value captured during one poll cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Tag name.
    pub tag: String,

    /// Decoded or simulated value.
    pub value: TagValue,

    /// When the cycle that produced this reading started.
    pub timestamp: DateTime<Utc>,
}

/// All readings produced by one poll cycle.
///
/// A tag missing from the set failed to read or decode during that cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingSet {
    /// Cycle timestamp shared by every reading.
    pub timestamp: DateTime<Utc>,

    /// Readings in tag-registry order.
    pub readings: Vec<Reading>,
}

impl ReadingSet {
    /// Create an empty set stamped with the current time.
    pub fn now() -> Self {
        Self::at(Utc::now())
    }

    /// Create an empty set with an explicit timestamp.
    pub fn at(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            readings: Vec::new(),
        }
    }

    /// Append a reading stamped with the set's timestamp.
    pub fn push(&mut self, tag: impl Into<String>, value: impl Into<TagValue>) {
        self.readings.push(Reading {
            tag: tag.into(),
            value: value.into(),
            timestamp: self.timestamp,
        });
    }

    /// Look up the value for a tag.
    pub fn get(&self, tag: &str) -> Option<TagValue> {
        self.readings
            .iter()
            .find(|r| r.tag == tag)
            .map(|r| r.value)
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.readings.iter().any(|r| r.tag == tag)
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Reading> {
        self.readings.iter()
    }
}
