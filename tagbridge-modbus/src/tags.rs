//! Tag definitions and the registry that owns the current tag snapshot.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info};

/// How a tag's raw register data is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    /// Single bit (coil/discrete) or non-zero register.
    Bool,
    /// Raw 16-bit register, unsigned.
    UInt16,
    /// 16-bit register, two's complement.
    Int16,
    /// IEEE-754 single precision over two registers, high word first.
    Float32,
}

impl DataType {
    /// Parse the wire name used by the config source.
    ///
    /// Any other non-empty name is an unrecognized numeric type and reads
    /// as an unsigned 16-bit register.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "" => None,
            "boolean" | "bool" => Some(DataType::Bool),
            "int16" => Some(DataType::Int16),
            "float" | "float32" => Some(DataType::Float32),
            _ => Some(DataType::UInt16),
        }
    }

    /// Wire name of this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Bool => "boolean",
            DataType::UInt16 => "uint16",
            DataType::Int16 => "int16",
            DataType::Float32 => "float",
        }
    }

    /// Number of 16-bit registers a value of this type occupies.
    pub fn register_width(&self) -> u16 {
        match self {
            DataType::Float32 => 2,
            _ => 1,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Modbus object table a tag lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterFunction {
    /// Holding registers (read/write, 16-bit)
    Holding,
    /// Input registers (read-only, 16-bit)
    Input,
    /// Coils (read/write, 1-bit)
    Coil,
    /// Discrete inputs (read-only, 1-bit)
    Discrete,
}

impl RegisterFunction {
    /// All functions in the order groups are read.
    pub const ALL: [RegisterFunction; 4] = [
        RegisterFunction::Holding,
        RegisterFunction::Input,
        RegisterFunction::Coil,
        RegisterFunction::Discrete,
    ];

    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "holding" => Some(RegisterFunction::Holding),
            "input" => Some(RegisterFunction::Input),
            "coil" => Some(RegisterFunction::Coil),
            "discrete" => Some(RegisterFunction::Discrete),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RegisterFunction::Holding => "holding",
            RegisterFunction::Input => "input",
            RegisterFunction::Coil => "coil",
            RegisterFunction::Discrete => "discrete",
        }
    }

    /// Whether this function addresses single bits rather than registers.
    pub fn is_bit(&self) -> bool {
        matches!(self, RegisterFunction::Coil | RegisterFunction::Discrete)
    }
}

impl fmt::Display for RegisterFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A logical data point mapped to one protocol address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TagDefinition {
    pub name: String,
    pub address: u16,
    pub data_type: DataType,
    pub function: RegisterFunction,
    pub label: Option<String>,
    pub unit: Option<String>,
}

impl TagDefinition {
    pub fn new(
        name: impl Into<String>,
        address: u16,
        data_type: DataType,
        function: RegisterFunction,
    ) -> Self {
        Self {
            name: name.into(),
            address,
            data_type,
            function,
            label: None,
            unit: None,
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Number of addressable points this tag covers in its table.
    ///
    /// Bit tables are addressed per point, so every coil/discrete tag is 1 wide.
    pub fn width(&self) -> u16 {
        if self.function.is_bit() {
            1
        } else {
            self.data_type.register_width()
        }
    }
}

/// Why a raw entry was not admitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    NotAnObject,
    MissingName,
    MissingAddress,
    InvalidAddress(String),
    MissingType,
    MissingFunction,
    UnknownFunction(String),
    DuplicateName(String),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::NotAnObject => write!(f, "entry is not an object"),
            Rejection::MissingName => write!(f, "missing tag name"),
            Rejection::MissingAddress => write!(f, "missing address"),
            Rejection::InvalidAddress(a) => write!(f, "invalid address {}", a),
            Rejection::MissingType => write!(f, "missing type"),
            Rejection::MissingFunction => write!(f, "missing function"),
            Rejection::UnknownFunction(func) => write!(f, "unknown function '{}'", func),
            Rejection::DuplicateName(name) => write!(f, "duplicate tag '{}'", name),
        }
    }
}

/// Result of normalizing a raw tag list.
#[derive(Debug, Clone, Default)]
pub struct Normalized {
    pub tags: Vec<TagDefinition>,
    /// Index into the raw list and the reason each dropped entry was rejected.
    pub rejected: Vec<(usize, Rejection)>,
}

/// Normalize raw `{tag, address, type, function, label?, unit?}` entries.
///
/// Malformed entries are dropped whole, never partially admitted. The first
/// entry with a given name wins.
pub fn normalize(raw: &[Value]) -> Vec<TagDefinition> {
    let report = normalize_report(raw);
    for (index, reason) in &report.rejected {
        debug!(index, reason = %reason, "Dropping tag entry");
    }
    report.tags
}

/// Like [`normalize`] but keeps the rejection reasons.
pub fn normalize_report(raw: &[Value]) -> Normalized {
    let mut out = Normalized::default();
    let mut seen = HashSet::new();

    for (index, entry) in raw.iter().enumerate() {
        match parse_entry(entry) {
            Ok(tag) => {
                if seen.insert(tag.name.clone()) {
                    out.tags.push(tag);
                } else {
                    out.rejected
                        .push((index, Rejection::DuplicateName(tag.name)));
                }
            }
            Err(reason) => out.rejected.push((index, reason)),
        }
    }

    out
}

fn parse_entry(entry: &Value) -> Result<TagDefinition, Rejection> {
    let obj = entry.as_object().ok_or(Rejection::NotAnObject)?;

    let name = non_empty_str(obj.get("tag")).ok_or(Rejection::MissingName)?;
    let address = parse_address(obj.get("address"))?;
    let data_type = non_empty_str(obj.get("type"))
        .and_then(DataType::parse)
        .ok_or(Rejection::MissingType)?;
    let function_name = non_empty_str(obj.get("function")).ok_or(Rejection::MissingFunction)?;
    let function = RegisterFunction::parse(function_name)
        .ok_or_else(|| Rejection::UnknownFunction(function_name.to_string()))?;

    Ok(TagDefinition {
        name: name.to_string(),
        address,
        data_type,
        function,
        label: non_empty_str(obj.get("label")).map(str::to_string),
        unit: non_empty_str(obj.get("unit")).map(str::to_string),
    })
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn parse_address(value: Option<&Value>) -> Result<u16, Rejection> {
    let value = match value {
        None | Some(Value::Null) => return Err(Rejection::MissingAddress),
        Some(v) => v,
    };

    let parsed = match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };

    parsed
        .and_then(|a| u16::try_from(a).ok())
        .ok_or_else(|| Rejection::InvalidAddress(value.to_string()))
}

/// Tags used until the config source provides a list.
pub fn default_tags() -> Vec<TagDefinition> {
    use DataType::*;
    use RegisterFunction::*;

    vec![
        TagDefinition::new("WFI-TST-01", 0, Float32, Holding).with_unit("°C"),
        TagDefinition::new("WFI-TST-02", 2, Float32, Holding).with_unit("°C"),
        TagDefinition::new("PRESSURE-01", 4, Float32, Holding).with_unit("bar"),
        TagDefinition::new("LEVEL-01", 10, UInt16, Input).with_unit("%"),
        TagDefinition::new("RUNNING", 0, Bool, Coil),
        TagDefinition::new("STERILIZATION", 1, Bool, Coil),
    ]
}

/// Immutable point-in-time view of the registry.
pub type TagSnapshot = Arc<[TagDefinition]>;

/// Owns the current tag snapshot and notifies subscribers when it changes.
///
/// Snapshots are swapped whole; a reader holding a [`TagSnapshot`] keeps a
/// consistent view for as long as it needs it.
#[derive(Debug)]
pub struct TagRegistry {
    tx: watch::Sender<TagSnapshot>,
}

impl TagRegistry {
    pub fn new(tags: Vec<TagDefinition>) -> Self {
        Self {
            tx: watch::Sender::new(tags.into()),
        }
    }

    /// Registry seeded with [`default_tags`].
    pub fn with_defaults() -> Self {
        Self::new(default_tags())
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> TagSnapshot {
        self.tx.borrow().clone()
    }

    /// Receiver that is marked changed whenever the snapshot is swapped.
    pub fn subscribe(&self) -> watch::Receiver<TagSnapshot> {
        self.tx.subscribe()
    }

    pub fn len(&self) -> usize {
        self.tx.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.borrow().is_empty()
    }

    /// Normalize a raw list and swap it in if it differs from the current one.
    ///
    /// Returns `true` when the snapshot changed.
    pub fn refresh(&self, raw: &[Value]) -> bool {
        self.replace(normalize(raw))
    }

    /// Swap in an already-normalized list if it differs from the current one.
    pub fn replace(&self, tags: Vec<TagDefinition>) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if current[..] == tags[..] {
                false
            } else {
                *current = tags.into();
                true
            }
        });

        if changed {
            info!(tags = self.len(), "Tag config updated");
        }
        changed
    }
}

impl Default for TagRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_full_entry() {
        let raw = vec![json!({
            "tag": "TT-100",
            "address": "12",
            "type": "float",
            "function": "holding",
            "label": "Tank temp",
            "unit": "°C"
        })];

        let tags = normalize(&raw);
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].name, "TT-100");
        assert_eq!(tags[0].address, 12);
        assert_eq!(tags[0].data_type, DataType::Float32);
        assert_eq!(tags[0].function, RegisterFunction::Holding);
        assert_eq!(tags[0].label.as_deref(), Some("Tank temp"));
        assert_eq!(tags[0].unit.as_deref(), Some("°C"));
    }

    #[test]
    fn test_normalize_defaults_optional_fields() {
        let raw = vec![json!({"tag": "RUN", "address": 3, "type": "boolean", "function": "coil", "label": ""})];
        let tags = normalize(&raw);
        assert_eq!(tags[0].label, None);
        assert_eq!(tags[0].unit, None);
    }

    #[test]
    fn test_normalize_rejects_incomplete_entries() {
        let raw = vec![
            json!({"address": 0, "type": "uint16", "function": "holding"}),
            json!({"tag": "A", "type": "uint16", "function": "holding"}),
            json!({"tag": "B", "address": 1, "function": "holding"}),
            json!({"tag": "C", "address": 1, "type": "uint16"}),
            json!({"tag": "D", "address": 1, "type": "uint16", "function": "register"}),
            json!({"tag": "E", "address": -1, "type": "uint16", "function": "input"}),
            json!({"tag": "F", "address": 70000, "type": "uint16", "function": "input"}),
            json!({"tag": "G", "address": "x1", "type": "uint16", "function": "input"}),
            json!("not an object"),
            json!({"tag": "OK", "address": 5, "type": "int16", "function": "input"}),
        ];

        let report = normalize_report(&raw);
        assert_eq!(report.tags.len(), 1);
        assert_eq!(report.tags[0].name, "OK");
        assert_eq!(report.rejected.len(), 9);
        assert_eq!(report.rejected[0], (0, Rejection::MissingName));
        assert_eq!(report.rejected[1], (1, Rejection::MissingAddress));
        assert!(matches!(report.rejected[4].1, Rejection::UnknownFunction(_)));
    }

    #[test]
    fn test_normalize_keeps_first_duplicate() {
        let raw = vec![
            json!({"tag": "X", "address": 1, "type": "uint16", "function": "holding"}),
            json!({"tag": "X", "address": 9, "type": "uint16", "function": "holding"}),
        ];
        let report = normalize_report(&raw);
        assert_eq!(report.tags.len(), 1);
        assert_eq!(report.tags[0].address, 1);
        assert_eq!(
            report.rejected,
            vec![(1, Rejection::DuplicateName("X".to_string()))]
        );
    }

    #[test]
    fn test_unrecognized_type_reads_as_uint16() {
        assert_eq!(DataType::parse("word"), Some(DataType::UInt16));
        assert_eq!(DataType::parse("BOOL"), Some(DataType::Bool));
        assert_eq!(DataType::parse("  "), None);
    }

    #[test]
    fn test_tag_width() {
        let f = TagDefinition::new("f", 0, DataType::Float32, RegisterFunction::Input);
        let u = TagDefinition::new("u", 0, DataType::UInt16, RegisterFunction::Input);
        let c = TagDefinition::new("c", 0, DataType::Float32, RegisterFunction::Coil);
        assert_eq!(f.width(), 2);
        assert_eq!(u.width(), 1);
        assert_eq!(c.width(), 1);
    }

    #[test]
    fn test_refresh_identical_list_is_noop() {
        let registry = TagRegistry::with_defaults();
        let mut rx = registry.subscribe();
        rx.mark_unchanged();

        let raw: Vec<Value> = default_tags()
            .iter()
            .map(|t| {
                json!({
                    "tag": t.name,
                    "address": t.address,
                    "type": t.data_type.as_str(),
                    "function": t.function.as_str(),
                    "unit": t.unit,
                })
            })
            .collect();

        assert!(!registry.refresh(&raw));
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_refresh_swaps_snapshot_and_notifies() {
        let registry = TagRegistry::with_defaults();
        let before = registry.snapshot();
        let mut rx = registry.subscribe();
        rx.mark_unchanged();

        let raw = vec![json!({"tag": "NEW", "address": 7, "type": "int16", "function": "input"})];
        assert!(registry.refresh(&raw));
        assert!(rx.has_changed().unwrap());

        // Old snapshot is still intact for anyone holding it.
        assert_eq!(before.len(), 6);
        let after = registry.snapshot();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].name, "NEW");
    }
}
