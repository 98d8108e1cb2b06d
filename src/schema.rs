use serde::{Serialize, Deserialize};
use serde_json::{Map, Value};

/// Central record type used across the entire collection pipeline.
///
/// Every collector reshapes its source payload into a list of
/// `Reading`s and publishes that list as one JSON array on its topic.
///
/// Wire form:
///
/// ```json
/// [{"timestamp": 1700000000, "measurement": "raspi", "fields": {"cpu_temp": 48.3}}]
/// ```
///
/// DESIGN NOTES:
/// - The shape is shared by all sources so the consumer side can store
///   readings without knowing which collector produced them.
/// - Field values stay as raw JSON values; collectors decide the type.
///
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Reading {
    /// Reading timestamp in seconds since Unix epoch
    pub timestamp: i64,

    /// Series name (e.g. host name, "solcast", "enedis")
    pub measurement: String,

    /// Measured values keyed by field name
    pub fields: Map<String, Value>,
}

impl Reading {
    pub fn new(timestamp: i64, measurement: impl Into<String>) -> Self {
        Self {
            timestamp,
            measurement: measurement.into(),
            fields: Map::new(),
        }
    }

    /// Adds one field, builder style.
    pub fn field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }
}
