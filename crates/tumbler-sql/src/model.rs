//! Query model, timeframes and entity descriptors
//!
//! These are the statically declared shapes that flow through the planner and
//! the DDL synthesizer. A `QueryModel` comes from the query-builder front end
//! already validated; an `EntityDescriptor` describes either a registered
//! source or a derived entity produced by a planning pass.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use chrono::Weekday;
use serde::{Deserialize, Serialize};

use crate::error::SqlError;
use crate::expr::{Expr, KeyPathStyle};

// ---------------------------------------------------------------------------
// Timeframes
// ---------------------------------------------------------------------------

/// Unit of a timeframe.
///
/// Weeks and months are sized as 7 and 30 days: the engine's tumbling windows
/// are fixed-size and epoch aligned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Seconds,
    Minutes,
    Hours,
    Days,
    Weeks,
    Months,
}

impl TimeUnit {
    /// Length of one unit in seconds.
    pub fn seconds(&self) -> u64 {
        match self {
            TimeUnit::Seconds => 1,
            TimeUnit::Minutes => 60,
            TimeUnit::Hours => 3_600,
            TimeUnit::Days => 86_400,
            TimeUnit::Weeks => 7 * 86_400,
            TimeUnit::Months => 30 * 86_400,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            TimeUnit::Seconds => "s",
            TimeUnit::Minutes => "m",
            TimeUnit::Hours => "h",
            TimeUnit::Days => "d",
            TimeUnit::Weeks => "wk",
            TimeUnit::Months => "mo",
        }
    }

    fn parse_suffix(s: &str) -> Option<TimeUnit> {
        match s.to_ascii_lowercase().as_str() {
            "s" | "sec" | "secs" | "second" | "seconds" => Some(TimeUnit::Seconds),
            "m" | "min" | "mins" | "minute" | "minutes" => Some(TimeUnit::Minutes),
            "h" | "hr" | "hrs" | "hour" | "hours" => Some(TimeUnit::Hours),
            "d" | "day" | "days" => Some(TimeUnit::Days),
            "w" | "wk" | "week" | "weeks" => Some(TimeUnit::Weeks),
            "mo" | "mon" | "month" | "months" => Some(TimeUnit::Months),
            _ => None,
        }
    }
}

/// A window size such as `1m` or `4h`.
///
/// Ordered by total duration; equal durations fall back to unit order so the
/// ordering stays total and deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Timeframe {
    pub amount: u32,
    pub unit: TimeUnit,
}

impl Timeframe {
    /// The hub resolution.
    pub const ONE_SECOND: Timeframe = Timeframe {
        amount: 1,
        unit: TimeUnit::Seconds,
    };

    pub const ONE_MINUTE: Timeframe = Timeframe {
        amount: 1,
        unit: TimeUnit::Minutes,
    };

    pub fn new(amount: u32, unit: TimeUnit) -> Self {
        Self { amount, unit }
    }

    pub fn duration_seconds(&self) -> u64 {
        self.amount as u64 * self.unit.seconds()
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_seconds() * 1000
    }

    /// True when this timeframe lasts exactly one second.
    pub fn is_hub(&self) -> bool {
        self.duration_seconds() == 1
    }

    /// True when this timeframe lasts exactly one minute.
    pub fn is_one_minute(&self) -> bool {
        self.duration_seconds() == 60
    }

    /// Window size as `<n> <UNIT>` using the coarsest exact ksql unit.
    pub fn to_window_size(&self) -> String {
        let secs = self.duration_seconds();
        if secs % 86_400 == 0 {
            format!("{} DAYS", secs / 86_400)
        } else if secs % 3_600 == 0 {
            format!("{} HOURS", secs / 3_600)
        } else if secs % 60 == 0 {
            format!("{} MINUTES", secs / 60)
        } else {
            format!("{} SECONDS", secs)
        }
    }

    /// Start of the bucket containing `ts_ms`.
    ///
    /// Weekly buckets honor `week_anchor`; every other size is epoch aligned.
    pub fn bucket_start_ms(&self, ts_ms: i64, week_anchor: Weekday) -> i64 {
        let size = self.duration_ms() as i64;
        if self.unit == TimeUnit::Weeks {
            // 1970-01-01 was a Thursday
            let anchor_offset_days =
                (week_anchor.num_days_from_monday() as i64 - Weekday::Thu.num_days_from_monday() as i64)
                    .rem_euclid(7);
            let offset = anchor_offset_days * 86_400_000;
            return (ts_ms - offset).div_euclid(size) * size + offset;
        }
        ts_ms.div_euclid(size) * size
    }
}

impl Ord for Timeframe {
    fn cmp(&self, other: &Self) -> Ordering {
        self.duration_seconds()
            .cmp(&other.duration_seconds())
            .then(self.unit.cmp(&other.unit))
    }
}

impl PartialOrd for Timeframe {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.amount, self.unit.label())
    }
}

impl FromStr for Timeframe {
    type Err = SqlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let split = trimmed
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| SqlError::InvalidTimeframe(s.to_string()))?;
        let (digits, suffix) = trimmed.split_at(split);
        let amount: u32 = digits
            .parse()
            .map_err(|_| SqlError::InvalidTimeframe(s.to_string()))?;
        if amount == 0 {
            return Err(SqlError::InvalidTimeframe(s.to_string()));
        }
        let unit = TimeUnit::parse_suffix(suffix.trim())
            .ok_or_else(|| SqlError::InvalidTimeframe(s.to_string()))?;
        Ok(Timeframe::new(amount, unit))
    }
}

impl TryFrom<String> for Timeframe {
    type Error = SqlError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Timeframe> for String {
    fn from(tf: Timeframe) -> Self {
        tf.to_string()
    }
}

// ---------------------------------------------------------------------------
// Column types and descriptors
// ---------------------------------------------------------------------------

/// Column types understood by the engine
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SqlType {
    Boolean,
    Int,
    BigInt,
    Double,
    Decimal { precision: u8, scale: u8 },
    Varchar,
    Timestamp,
    Date,
    Bytes,
}

impl SqlType {
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            SqlType::Int | SqlType::BigInt | SqlType::Double | SqlType::Decimal { .. }
        )
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlType::Boolean => write!(f, "BOOLEAN"),
            SqlType::Int => write!(f, "INT"),
            SqlType::BigInt => write!(f, "BIGINT"),
            SqlType::Double => write!(f, "DOUBLE"),
            SqlType::Decimal { precision, scale } => write!(f, "DECIMAL({}, {})", precision, scale),
            SqlType::Varchar => write!(f, "VARCHAR"),
            SqlType::Timestamp => write!(f, "TIMESTAMP"),
            SqlType::Date => write!(f, "DATE"),
            SqlType::Bytes => write!(f, "BYTES"),
        }
    }
}

impl FromStr for SqlType {
    type Err = SqlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        if let Some(params) = upper
            .strip_prefix("DECIMAL(")
            .and_then(|rest| rest.strip_suffix(')'))
        {
            let mut parts = params.split(',').map(|p| p.trim().parse::<u8>());
            return match (parts.next(), parts.next(), parts.next()) {
                (Some(Ok(precision)), Some(Ok(scale)), None) => {
                    Ok(SqlType::Decimal { precision, scale })
                }
                _ => Err(SqlError::InvalidType(s.to_string())),
            };
        }
        match upper.as_str() {
            "BOOLEAN" | "BOOL" => Ok(SqlType::Boolean),
            "INT" | "INTEGER" => Ok(SqlType::Int),
            "BIGINT" | "LONG" => Ok(SqlType::BigInt),
            "DOUBLE" => Ok(SqlType::Double),
            "VARCHAR" | "STRING" => Ok(SqlType::Varchar),
            "TIMESTAMP" => Ok(SqlType::Timestamp),
            "DATE" => Ok(SqlType::Date),
            "BYTES" => Ok(SqlType::Bytes),
            _ => Err(SqlError::InvalidType(s.to_string())),
        }
    }
}

impl TryFrom<String> for SqlType {
    type Error = SqlError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SqlType> for String {
    fn from(t: SqlType) -> Self {
        t.to_string()
    }
}

/// One column of an entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub sql_type: SqlType,
    #[serde(default)]
    pub is_key: bool,
}

impl FieldDescriptor {
    pub fn key(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self {
            name: name.into(),
            sql_type,
            is_key: true,
        }
    }

    pub fn value(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self {
            name: name.into(),
            sql_type,
            is_key: false,
        }
    }
}

/// Whether an entity is stream-shaped or table-shaped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityShape {
    Stream,
    Table,
}

impl EntityShape {
    pub fn keyword(&self) -> &'static str {
        match self {
            EntityShape::Stream => "STREAM",
            EntityShape::Table => "TABLE",
        }
    }
}

/// Role an entity plays in a rollup plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EntityRole {
    /// Externally declared input, never derived
    #[default]
    Source,
    HubTable,
    HubStream,
    Live,
    Heartbeat,
    PrevBucket,
    Fill,
    /// Top-level entity of a query without a tumbling window
    Direct,
}

impl fmt::Display for EntityRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityRole::Source => "source",
            EntityRole::HubTable => "hub_table",
            EntityRole::HubStream => "hub_stream",
            EntityRole::Live => "live",
            EntityRole::Heartbeat => "heartbeat",
            EntityRole::PrevBucket => "prev_bucket",
            EntityRole::Fill => "fill",
            EntityRole::Direct => "direct",
        };
        f.write_str(name)
    }
}

/// Statically declared shape of an entity, registered by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDescriptor {
    pub name: String,
    pub topic: String,
    pub shape: EntityShape,
    pub fields: Vec<FieldDescriptor>,
    #[serde(default)]
    pub role: EntityRole,
    #[serde(default)]
    pub timeframe: Option<Timeframe>,
    #[serde(default)]
    pub bucket_column: Option<String>,
    #[serde(default)]
    pub week_anchor: Option<Weekday>,
    #[serde(default)]
    pub value_schema_full_name: Option<String>,
    #[serde(default)]
    pub partitions: Option<u32>,
}

impl EntityDescriptor {
    /// A registered source entity.
    pub fn source(
        name: impl Into<String>,
        topic: impl Into<String>,
        shape: EntityShape,
        fields: Vec<FieldDescriptor>,
    ) -> Self {
        Self {
            name: name.into(),
            topic: topic.into(),
            shape,
            fields,
            role: EntityRole::Source,
            timeframe: None,
            bucket_column: None,
            week_anchor: None,
            value_schema_full_name: None,
            partitions: None,
        }
    }

    /// Case-insensitive field lookup.
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name.eq_ignore_ascii_case(name))
    }

    pub fn key_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.is_key)
    }

    pub fn value_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| !f.is_key)
    }
}

/// Name to descriptor lookup used by the planner and the synthesizer.
pub trait DescriptorResolver {
    fn resolve(&self, name: &str) -> Option<EntityDescriptor>;
}

impl DescriptorResolver for HashMap<String, EntityDescriptor> {
    fn resolve(&self, name: &str) -> Option<EntityDescriptor> {
        self.get(name).cloned()
    }
}

impl DescriptorResolver for BTreeMap<String, EntityDescriptor> {
    fn resolve(&self, name: &str) -> Option<EntityDescriptor> {
        self.get(name).cloned()
    }
}

impl DescriptorResolver for [EntityDescriptor] {
    fn resolve(&self, name: &str) -> Option<EntityDescriptor> {
        self.iter().find(|d| d.name == name).cloned()
    }
}

// ---------------------------------------------------------------------------
// Query model
// ---------------------------------------------------------------------------

/// A source the query reads from, bound to the builder's lambda parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    /// Registered entity name
    pub name: String,
    /// Lambda parameter name used by column references
    pub param: String,
    /// Table alias in generated SQL (defaults to the parameter name)
    #[serde(default)]
    pub alias: Option<String>,
}

impl SourceRef {
    pub fn new(name: impl Into<String>, param: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            param: param.into(),
            alias: None,
        }
    }

    pub fn alias(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.param)
    }
}

/// Join kind between the two declared sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JoinKind {
    #[default]
    Inner,
    Left,
}

/// One projected column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    pub expr: Expr,
    pub alias: String,
    /// Explicit output type; inferred when absent
    #[serde(default, rename = "type")]
    pub sql_type: Option<SqlType>,
}

impl Projection {
    pub fn new(expr: Expr, alias: impl Into<String>) -> Self {
        Self {
            expr,
            alias: alias.into(),
            sql_type: None,
        }
    }
}

/// Restricts raw events to the open/close session of a schedule table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasedOnSpec {
    /// Registered schedule table
    pub schedule: String,
    #[serde(default = "default_schedule_alias")]
    pub alias: String,
    /// Columns present on both the source and the schedule
    pub keys: Vec<String>,
    pub open_column: String,
    pub close_column: String,
    /// Schedule column holding the trading day (`yyyy-MM-dd`)
    #[serde(default)]
    pub day_key: Option<String>,
    /// Event-time column on the source
    pub timestamp_column: String,
    #[serde(default = "default_true")]
    pub open_inclusive: bool,
    #[serde(default)]
    pub close_inclusive: bool,
}

fn default_schedule_alias() -> String {
    "s".to_string()
}

fn default_true() -> bool {
    true
}

fn default_week_anchor() -> Weekday {
    Weekday::Mon
}

/// Validated intermediate query handed over by the query-builder front end.
///
/// Immutable once built; planning never mutates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryModel {
    /// Base name every derived entity id starts with
    pub name: String,
    pub sources: Vec<SourceRef>,
    #[serde(default)]
    pub join_kind: JoinKind,
    #[serde(default)]
    pub join_on: Option<Expr>,
    #[serde(default)]
    pub filter: Option<Expr>,
    #[serde(default)]
    pub group_by: Vec<Expr>,
    pub projection: Vec<Projection>,
    #[serde(default)]
    pub having: Option<Expr>,
    /// `None` for queries without a tumbling window
    #[serde(default)]
    pub windows: Option<Vec<Timeframe>>,
    #[serde(default)]
    pub based_on: Option<BasedOnSpec>,
    #[serde(default)]
    pub base_unit_seconds: Option<u32>,
    #[serde(default)]
    pub grace_seconds: Option<u32>,
    #[serde(default)]
    pub grace_overrides: BTreeMap<Timeframe, u32>,
    #[serde(default)]
    pub fill_missing: bool,
    #[serde(default = "default_week_anchor")]
    pub week_anchor: Weekday,
    #[serde(default)]
    pub key_style: Option<KeyPathStyle>,
    /// Namespace for `VALUE_AVRO_SCHEMA_FULL_NAME`
    #[serde(default)]
    pub value_namespace: Option<String>,
    #[serde(default)]
    pub partitions: Option<u32>,
}

impl QueryModel {
    /// A single-source query with no window, filter or grouping.
    pub fn new(name: impl Into<String>, source: SourceRef) -> Self {
        Self {
            name: name.into(),
            sources: vec![source],
            join_kind: JoinKind::Inner,
            join_on: None,
            filter: None,
            group_by: Vec::new(),
            projection: Vec::new(),
            having: None,
            windows: None,
            based_on: None,
            base_unit_seconds: None,
            grace_seconds: None,
            grace_overrides: BTreeMap::new(),
            fill_missing: false,
            week_anchor: default_week_anchor(),
            key_style: None,
            value_namespace: None,
            partitions: None,
        }
    }

    pub fn is_windowed(&self) -> bool {
        self.windows.is_some()
    }

    /// Primary source (the first declared one).
    pub fn primary_source(&self) -> &SourceRef {
        &self.sources[0]
    }

    /// Number of relations in the FROM clause, schedule join included.
    pub fn source_arity(&self) -> usize {
        self.sources.len() + usize::from(self.based_on.is_some())
    }

    pub fn source_for_param(&self, param: &str) -> Option<&SourceRef> {
        self.sources.iter().find(|s| s.param == param)
    }

    /// Alias of the projection designated as window start.
    pub fn bucket_column(&self) -> Option<&str> {
        self.projection
            .iter()
            .find(|p| matches!(p.expr, Expr::WindowStart))
            .map(|p| p.alias.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ---------------------------------------------------------------
    // Timeframe
    // ---------------------------------------------------------------

    #[test]
    fn test_timeframe_parse_labels() {
        assert_eq!("1s".parse::<Timeframe>().unwrap(), Timeframe::ONE_SECOND);
        assert_eq!("5m".parse::<Timeframe>().unwrap(), Timeframe::new(5, TimeUnit::Minutes));
        assert_eq!("1h".parse::<Timeframe>().unwrap(), Timeframe::new(1, TimeUnit::Hours));
        assert_eq!("1wk".parse::<Timeframe>().unwrap(), Timeframe::new(1, TimeUnit::Weeks));
        assert_eq!("1mo".parse::<Timeframe>().unwrap(), Timeframe::new(1, TimeUnit::Months));
        assert_eq!("15 minutes".parse::<Timeframe>().unwrap(), Timeframe::new(15, TimeUnit::Minutes));
    }

    #[test]
    fn test_timeframe_parse_rejects_garbage() {
        assert!("".parse::<Timeframe>().is_err());
        assert!("m".parse::<Timeframe>().is_err());
        assert!("0m".parse::<Timeframe>().is_err());
        assert!("5x".parse::<Timeframe>().is_err());
        assert!("12".parse::<Timeframe>().is_err());
    }

    #[test]
    fn test_timeframe_display_roundtrips_label() {
        for label in ["1s", "5m", "1h", "1d", "1wk", "1mo"] {
            let tf: Timeframe = label.parse().unwrap();
            assert_eq!(tf.to_string(), label);
        }
    }

    #[test]
    fn test_timeframe_ordering_by_duration() {
        let mut tfs: Vec<Timeframe> = ["1mo", "1m", "1d", "5m", "1h", "1wk"]
            .iter()
            .map(|s| s.parse().unwrap())
            .collect();
        tfs.sort();
        let labels: Vec<String> = tfs.iter().map(|t| t.to_string()).collect();
        assert_eq!(labels, vec!["1m", "5m", "1h", "1d", "1wk", "1mo"]);
    }

    #[test]
    fn test_timeframe_window_size_uses_coarsest_unit() {
        assert_eq!(Timeframe::ONE_SECOND.to_window_size(), "1 SECONDS");
        assert_eq!("90s".parse::<Timeframe>().unwrap().to_window_size(), "90 SECONDS");
        assert_eq!("120s".parse::<Timeframe>().unwrap().to_window_size(), "2 MINUTES");
        assert_eq!("60m".parse::<Timeframe>().unwrap().to_window_size(), "1 HOURS");
        assert_eq!("1wk".parse::<Timeframe>().unwrap().to_window_size(), "7 DAYS");
        assert_eq!("1mo".parse::<Timeframe>().unwrap().to_window_size(), "30 DAYS");
    }

    #[test]
    fn test_bucket_start_epoch_aligned() {
        let five = Timeframe::new(5, TimeUnit::Minutes);
        assert_eq!(five.bucket_start_ms(299_999, Weekday::Mon), 0);
        assert_eq!(five.bucket_start_ms(300_000, Weekday::Mon), 300_000);
    }

    #[test]
    fn test_bucket_start_week_anchor() {
        let week = Timeframe::new(1, TimeUnit::Weeks);
        // 1970-01-05 was a Monday
        let monday = 4 * 86_400_000;
        assert_eq!(week.bucket_start_ms(monday + 1_000, Weekday::Mon), monday);
        assert_eq!(week.bucket_start_ms(monday - 1_000, Weekday::Mon), monday - 7 * 86_400_000);
        // Thursday anchoring matches epoch alignment
        assert_eq!(week.bucket_start_ms(1_000, Weekday::Thu), 0);
    }

    #[test]
    fn test_timeframe_serde_as_string() {
        let json = serde_json::to_string(&Timeframe::new(5, TimeUnit::Minutes)).unwrap();
        assert_eq!(json, "\"5m\"");
        let back: Timeframe = serde_json::from_str("\"1h\"").unwrap();
        assert_eq!(back, Timeframe::new(1, TimeUnit::Hours));
    }

    // ---------------------------------------------------------------
    // SqlType
    // ---------------------------------------------------------------

    #[test]
    fn test_sql_type_parse_and_display() {
        assert_eq!("varchar".parse::<SqlType>().unwrap(), SqlType::Varchar);
        assert_eq!(
            "DECIMAL(18, 4)".parse::<SqlType>().unwrap(),
            SqlType::Decimal { precision: 18, scale: 4 }
        );
        assert_eq!(SqlType::Decimal { precision: 18, scale: 4 }.to_string(), "DECIMAL(18, 4)");
        assert!("MAP<INT>".parse::<SqlType>().is_err());
    }

    // ---------------------------------------------------------------
    // Descriptors and query model
    // ---------------------------------------------------------------

    #[test]
    fn test_descriptor_field_lookup_is_case_insensitive() {
        let desc = EntityDescriptor::source(
            "ticks",
            "ticks",
            EntityShape::Stream,
            vec![
                FieldDescriptor::key("Broker", SqlType::Varchar),
                FieldDescriptor::value("Bid", SqlType::Double),
            ],
        );
        assert!(desc.field("broker").is_some());
        assert_eq!(desc.key_fields().count(), 1);
        assert_eq!(desc.value_fields().count(), 1);
    }

    #[test]
    fn test_query_model_from_toml_defaults() {
        let toml_str = r#"
            name = "bar"
            windows = ["1m", "5m"]
            base_unit_seconds = 1

            [[sources]]
            name = "ticks"
            param = "t"

            [[projection]]
            alias = "BucketStart"
            expr = { kind = "window_start" }
        "#;
        let model: QueryModel = toml::from_str(toml_str).unwrap();
        assert_eq!(model.week_anchor, Weekday::Mon);
        assert!(!model.fill_missing);
        assert_eq!(model.windows.as_ref().map(|w| w.len()), Some(2));
        assert_eq!(model.bucket_column(), Some("BucketStart"));
        assert_eq!(model.primary_source().alias(), "t");
    }
}
