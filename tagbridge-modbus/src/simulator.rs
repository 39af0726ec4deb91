//! Synthetic tag values for running without a device.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use tagbridge_common::{ReadingSet, TagValue};

use crate::tags::{DataType, TagDefinition, TagSnapshot};

/// Probability that a boolean tag flips on a given step.
pub const BOOL_FLIP_PROBABILITY: f64 = 0.1;

/// Range float tags are seeded in.
pub const FLOAT_SEED_RANGE: std::ops::RangeInclusive<f64> = 20.0..=90.0;

/// Upper bound (exclusive) integer tags are seeded below.
pub const INT_SEED_MAX: i64 = 100;

/// Largest step an integer tag moves by in either direction.
const INT_JITTER: i64 = 2;

#[derive(Debug, Clone, Copy)]
struct TagState {
    data_type: DataType,
    value: TagValue,
}

/// Per-tag random-walk generator.
///
/// State is created when a tag first appears, kept while the tag persists
/// across config refreshes, and dropped when the tag goes away.
pub struct Simulator<R: Rng = StdRng> {
    rng: R,
    tags: TagSnapshot,
    states: HashMap<String, TagState>,
}

impl Simulator<StdRng> {
    /// Simulator seeded from the OS entropy source.
    pub fn new(tags: TagSnapshot) -> Self {
        Self::with_rng(tags, StdRng::from_os_rng())
    }
}

impl<R: Rng> Simulator<R> {
    pub fn with_rng(tags: TagSnapshot, rng: R) -> Self {
        let mut sim = Self {
            rng,
            tags: TagSnapshot::from(Vec::new()),
            states: HashMap::new(),
        };
        sim.reconcile(tags);
        sim
    }

    /// Initial value for a tag of the given type.
    pub fn seed(&mut self, data_type: DataType) -> TagValue {
        match data_type {
            DataType::Bool => TagValue::Bool(self.rng.random_bool(0.5)),
            DataType::Float32 => TagValue::Float(self.rng.random_range(FLOAT_SEED_RANGE)),
            DataType::UInt16 | DataType::Int16 => {
                TagValue::Integer(self.rng.random_range(0..INT_SEED_MAX))
            }
        }
    }

    /// Advance every tag one step and return a reading for each.
    pub fn step(&mut self) -> ReadingSet {
        let mut readings = ReadingSet::now();
        let tags = self.tags.clone();

        for tag in tags.iter() {
            let state = match self.states.get(&tag.name) {
                Some(state) => *state,
                None => self.fresh_state(tag),
            };
            let value = self.drift(state.value);
            self.states.insert(
                tag.name.clone(),
                TagState {
                    data_type: state.data_type,
                    value,
                },
            );
            readings.push(tag.name.clone(), value);
        }

        readings
    }

    /// Adopt a new tag list.
    ///
    /// New tags are seeded, tags whose name and type are unchanged keep
    /// their current value, removed tags are forgotten. A tag whose data
    /// type changed is reseeded.
    pub fn reconcile(&mut self, tags: TagSnapshot) {
        self.states.retain(|name, state| {
            tags.iter()
                .any(|t| &t.name == name && t.data_type == state.data_type)
        });

        for tag in tags.iter() {
            if !self.states.contains_key(&tag.name) {
                let state = self.fresh_state(tag);
                self.states.insert(tag.name.clone(), state);
            }
        }

        debug!(tags = tags.len(), "Simulator reconciled");
        self.tags = tags;
    }

    /// Current value of a tag, if it is tracked.
    pub fn value(&self, tag: &str) -> Option<TagValue> {
        self.states.get(tag).map(|s| s.value)
    }

    pub fn tracked(&self) -> usize {
        self.states.len()
    }

    fn fresh_state(&mut self, tag: &TagDefinition) -> TagState {
        TagState {
            data_type: tag.data_type,
            value: self.seed(tag.data_type),
        }
    }

    fn drift(&mut self, value: TagValue) -> TagValue {
        match value {
            TagValue::Bool(b) => {
                if self.rng.random_bool(BOOL_FLIP_PROBABILITY) {
                    TagValue::Bool(!b)
                } else {
                    TagValue::Bool(b)
                }
            }
            TagValue::Float(f) => {
                let next = f + self.rng.random_range(-1.0..=1.0);
                TagValue::Float((next * 100.0).round() / 100.0)
            }
            TagValue::Integer(i) => {
                let next = i + self.rng.random_range(-INT_JITTER..=INT_JITTER);
                TagValue::Integer(next.max(0))
            }
        }
    }
}
