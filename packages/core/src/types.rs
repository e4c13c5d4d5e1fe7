//! Core data types shared by the pollers, the store and the API.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A registered sensor node.
///
/// Field names on the wire follow the registry contract
/// (`wids_sensor_id` / `wids_sensor_api`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sensor {
    #[serde(rename = "wids_sensor_id")]
    pub id: String,
    #[serde(rename = "wids_sensor_api")]
    pub api: String,
}

impl Sensor {
    pub fn new(id: impl Into<String>, api: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            api: api.into(),
        }
    }

    /// Join `path` onto the sensor's API base URL.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api, path)
    }
}

/// Cursor-bearing time series fetched incrementally from every sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    PacketCounters,
    ByteCounters,
    MacSeqnums,
    BeaconSeqnums,
    NwkSeqnums,
    NwkAuxSeqnums,
    BatteryPercentages,
}

impl MetricKind {
    pub const ALL: [MetricKind; 7] = [
        MetricKind::PacketCounters,
        MetricKind::ByteCounters,
        MetricKind::MacSeqnums,
        MetricKind::BeaconSeqnums,
        MetricKind::NwkSeqnums,
        MetricKind::NwkAuxSeqnums,
        MetricKind::BatteryPercentages,
    ];

    /// Path segment on the sensor API.
    pub fn path(self) -> &'static str {
        match self {
            MetricKind::PacketCounters => "packet-counters",
            MetricKind::ByteCounters => "byte-counters",
            MetricKind::MacSeqnums => "mac-seqnums",
            MetricKind::BeaconSeqnums => "beacon-seqnums",
            MetricKind::NwkSeqnums => "nwk-seqnums",
            MetricKind::NwkAuxSeqnums => "nwkaux-seqnums",
            MetricKind::BatteryPercentages => "battery-percentages",
        }
    }

    pub fn table(self) -> &'static str {
        match self {
            MetricKind::PacketCounters => "wids_packet_counters",
            MetricKind::ByteCounters => "wids_byte_counters",
            MetricKind::MacSeqnums => "wids_mac_seqnums",
            MetricKind::BeaconSeqnums => "wids_beacon_seqnums",
            MetricKind::NwkSeqnums => "wids_nwk_seqnums",
            MetricKind::NwkAuxSeqnums => "wids_nwkaux_seqnums",
            MetricKind::BatteryPercentages => "wids_battery_percentages",
        }
    }

    pub fn value_column(self) -> &'static str {
        match self {
            MetricKind::PacketCounters => "packet_counter",
            MetricKind::ByteCounters => "byte_counter",
            MetricKind::MacSeqnums => "mac_seqnum",
            MetricKind::BeaconSeqnums => "beacon_seqnum",
            MetricKind::NwkSeqnums => "nwk_seqnum",
            MetricKind::NwkAuxSeqnums => "nwkaux_seqnum",
            MetricKind::BatteryPercentages => "percentage",
        }
    }

    /// Counters arrive as per-network totals with nested per-device totals.
    pub fn is_hierarchical(self) -> bool {
        matches!(self, MetricKind::PacketCounters | MetricKind::ByteCounters)
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// Sensor-scoped topology tables replaced wholesale on every poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopologyTable {
    Networks,
    ShortAddresses,
    ExtendedAddresses,
    Pairs,
}

impl TopologyTable {
    pub const ALL: [TopologyTable; 4] = [
        TopologyTable::Networks,
        TopologyTable::ShortAddresses,
        TopologyTable::ExtendedAddresses,
        TopologyTable::Pairs,
    ];

    pub fn path(self) -> &'static str {
        match self {
            TopologyTable::Networks => "networks",
            TopologyTable::ShortAddresses => "short-addresses",
            TopologyTable::ExtendedAddresses => "extended-addresses",
            TopologyTable::Pairs => "pairs",
        }
    }

    /// Every table except extended addresses is scoped to a PAN.
    pub fn has_panid(self) -> bool {
        !matches!(self, TopologyTable::ExtendedAddresses)
    }

    pub fn table(self) -> &'static str {
        match self {
            TopologyTable::Networks => "wids_networks",
            TopologyTable::ShortAddresses => "wids_short_addresses",
            TopologyTable::ExtendedAddresses => "wids_extended_addresses",
            TopologyTable::Pairs => "wids_pairs",
        }
    }
}

impl fmt::Display for TopologyTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// The two append-only key sets reconciled across sensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyKind {
    Network,
    Link,
}

impl KeyKind {
    pub const ALL: [KeyKind; 2] = [KeyKind::Network, KeyKind::Link];

    pub fn path(self) -> &'static str {
        match self {
            KeyKind::Network => "network-keys",
            KeyKind::Link => "link-keys",
        }
    }

    pub fn table(self) -> &'static str {
        match self {
            KeyKind::Network => "network_keys",
            KeyKind::Link => "link_keys",
        }
    }
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// Length in bytes of every network and link key.
pub const KEY_LENGTH: usize = 16;

/// A 16-byte network or link key. Canonical text form is lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyMaterial([u8; KEY_LENGTH]);

impl KeyMaterial {
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        <[u8; KEY_LENGTH]>::try_from(bytes).ok().map(Self)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for KeyMaterial {
    type Err = String;

    /// Accepts exactly 32 hex digits in either case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != KEY_LENGTH * 2 {
            return Err(format!("key must be {} hex digits, got {}", KEY_LENGTH * 2, s.len()));
        }
        let mut bytes = [0u8; KEY_LENGTH];
        hex::decode_to_slice(s, &mut bytes).map_err(|e| format!("invalid key: {}", e))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

// Keys are secrets; keep them out of debug logs.
impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyMaterial({}..)", &self.to_hex()[..4])
    }
}

impl Serialize for KeyMaterial {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for KeyMaterial {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A set-valued topology field: what a sensor has observed for one
/// attribute of a network or device.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ObservationSet {
    #[default]
    Unknown,
    Single(String),
    Conflicting(Vec<String>),
}

impl ObservationSet {
    pub fn from_values<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut unique: Vec<String> = Vec::new();
        for value in values {
            let value = value.as_ref().trim();
            if !value.is_empty() && !unique.iter().any(|v| v == value) {
                unique.push(value.to_string());
            }
        }
        match unique.len() {
            0 => ObservationSet::Unknown,
            1 => ObservationSet::Single(unique.remove(0)),
            _ => ObservationSet::Conflicting(unique),
        }
    }

    /// Parse the semicolon-joined column form.
    pub fn from_column(raw: &str) -> Self {
        Self::from_values(raw.split(';'))
    }

    /// Semicolon-joined form stored in the topology tables.
    pub fn to_column(&self) -> String {
        match self {
            ObservationSet::Unknown => String::new(),
            ObservationSet::Single(value) => value.clone(),
            ObservationSet::Conflicting(values) => values.join(";"),
        }
    }

    pub fn is_conflicting(&self) -> bool {
        matches!(self, ObservationSet::Conflicting(_))
    }

    /// Combine the observations of several rows (sensors, polls) of the
    /// same attribute.
    pub fn merge<'a, I>(sets: I) -> Self
    where
        I: IntoIterator<Item = &'a ObservationSet>,
    {
        Self::from_values(sets.into_iter().flat_map(|set| match set {
            ObservationSet::Unknown => Vec::new(),
            ObservationSet::Single(value) => vec![value.as_str()],
            ObservationSet::Conflicting(values) => values.iter().map(String::as_str).collect(),
        }))
    }

    /// Operator-facing reading: the value itself, `Unknown` or
    /// `Conflicting Data`.
    pub fn summary(&self) -> String {
        match self {
            ObservationSet::Unknown => "Unknown".to_string(),
            ObservationSet::Single(value) => value.clone(),
            ObservationSet::Conflicting(_) => "Conflicting Data".to_string(),
        }
    }
}

impl<'de> Deserialize<'de> for ObservationSet {
    /// Accepts a semicolon-joined string, an array of strings, or null.
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Joined(String),
            Many(Vec<String>),
        }

        Ok(match Option::<Raw>::deserialize(deserializer)? {
            Some(Raw::Joined(joined)) => ObservationSet::from_column(&joined),
            Some(Raw::Many(values)) => ObservationSet::from_values(values),
            None => ObservationSet::Unknown,
        })
    }
}

impl Serialize for ObservationSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_column())
    }
}

/// A PAN observed by a sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkRow {
    pub panid: String,
    #[serde(default)]
    pub epidset: ObservationSet,
    #[serde(default, deserialize_with = "de_epoch_opt")]
    pub earliest: Option<f64>,
    #[serde(default, deserialize_with = "de_epoch_opt")]
    pub latest: Option<f64>,
}

/// A short address seen within a PAN, with what it was observed to map to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShortAddressRow {
    pub panid: String,
    pub shortaddr: String,
    #[serde(default)]
    pub altset: ObservationSet,
    #[serde(default)]
    pub macset: ObservationSet,
    #[serde(default)]
    pub nwkset: ObservationSet,
    #[serde(default, deserialize_with = "de_epoch_opt")]
    pub earliest: Option<f64>,
    #[serde(default, deserialize_with = "de_epoch_opt")]
    pub latest: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtendedAddressRow {
    pub extendedaddr: String,
    #[serde(default)]
    pub altset: ObservationSet,
    #[serde(default)]
    pub macset: ObservationSet,
    #[serde(default)]
    pub nwkset: ObservationSet,
    #[serde(default, deserialize_with = "de_epoch_opt")]
    pub earliest: Option<f64>,
    #[serde(default, deserialize_with = "de_epoch_opt")]
    pub latest: Option<f64>,
}

/// A source/destination pair observed exchanging frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairRow {
    pub panid: String,
    pub srcaddr: String,
    pub dstaddr: String,
    #[serde(deserialize_with = "de_epoch")]
    pub earliest: f64,
    #[serde(deserialize_with = "de_epoch")]
    pub latest: f64,
}

/// One row of any topology snapshot table.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TopologyRow {
    Network(NetworkRow),
    ShortAddress(ShortAddressRow),
    ExtendedAddress(ExtendedAddressRow),
    Pair(PairRow),
}

impl TopologyRow {
    /// Decode one snapshot entry according to the table it came from.
    pub fn decode(table: TopologyTable, entry: serde_json::Value) -> Result<Self, serde_json::Error> {
        Ok(match table {
            TopologyTable::Networks => TopologyRow::Network(serde_json::from_value(entry)?),
            TopologyTable::ShortAddresses => TopologyRow::ShortAddress(serde_json::from_value(entry)?),
            TopologyTable::ExtendedAddresses => {
                TopologyRow::ExtendedAddress(serde_json::from_value(entry)?)
            }
            TopologyTable::Pairs => TopologyRow::Pair(serde_json::from_value(entry)?),
        })
    }

    pub fn table(&self) -> TopologyTable {
        match self {
            TopologyRow::Network(_) => TopologyTable::Networks,
            TopologyRow::ShortAddress(_) => TopologyTable::ShortAddresses,
            TopologyRow::ExtendedAddress(_) => TopologyTable::ExtendedAddresses,
            TopologyRow::Pair(_) => TopologyTable::Pairs,
        }
    }
}

/// One row of a cursor-bearing time series. Network-aggregate rows carry
/// `src_short_addr = None`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeseriesRow {
    pub sensor_id: String,
    pub timestamp: f64,
    pub src_pan_id: String,
    pub src_short_addr: Option<String>,
    pub value: f64,
}

/// Point-in-time resource usage reported by a sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UtilizationSample {
    #[serde(deserialize_with = "crate::types::de_epoch")]
    pub epoch_timestamp: f64,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_percent: f64,
}

/// An unprocessed or processed event row written by a sensor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawEvent {
    pub row_id: i64,
    pub sensor_id: String,
    pub timestamp: f64,
    pub description: String,
    pub inspected: bool,
}

/// An operator alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub alert_id: String,
    pub message: String,
    pub timestamp: f64,
    pub archived: bool,
    pub notified: bool,
}

/// `HG<epoch>E<index>`
pub fn format_alert_id(epoch: i64, index: i64) -> String {
    format!("HG{}E{}", epoch, index)
}

/// Split an `HG<epoch>E<index>` id into its numbers.
pub fn parse_alert_id(alert_id: &str) -> Option<(i64, i64)> {
    let (epoch, index) = alert_id.strip_prefix("HG")?.split_once('E')?;
    Some((epoch.parse().ok()?, index.parse().ok()?))
}

/// An alert proposed by the inspector, not yet checked against cooldown.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertCandidate {
    pub alert_id: String,
    pub message: String,
    pub timestamp: f64,
}

/// Fractional Unix epoch seconds, accepted as a JSON number or a numeric
/// string.
pub fn de_epoch<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    let value = match Raw::deserialize(deserializer)? {
        Raw::Number(n) => n,
        Raw::Text(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| serde::de::Error::custom(format!("invalid epoch timestamp '{}'", s)))?,
    };

    if !value.is_finite() {
        return Err(serde::de::Error::custom("epoch timestamp must be finite"));
    }
    Ok(value)
}

/// Optional variant of [`de_epoch`].
pub fn de_epoch_opt<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    #[derive(Deserialize)]
    struct Wrapper(#[serde(deserialize_with = "de_epoch")] f64);

    Ok(Option::<Wrapper>::deserialize(deserializer)?.map(|Wrapper(v)| v))
}
