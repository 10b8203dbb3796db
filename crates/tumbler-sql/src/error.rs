//! Planning and synthesis error types
//!
//! Every error in this crate is fatal for the pipeline that raised it: nothing
//! here talks to a remote engine, so there is nothing to retry. Errors are
//! split into window configuration problems (`ValidationError`) and the rest
//! of the planning/synthesis failures (`SqlError`).

use thiserror::Error;

use crate::model::Timeframe;

/// Window and grace configuration errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Base unit seconds must be configured for windowed queries")]
    MissingBaseUnit,

    #[error("Base unit of {0}s does not evenly divide 60 seconds")]
    BaseUnitNotDivisor(u32),

    #[error("Window {window} is not a multiple of the {base_unit}s base unit")]
    WindowNotMultipleOfBase { window: Timeframe, base_unit: u32 },

    #[error("Window {0} is at least one minute but not a whole number of minutes")]
    WindowNotWholeMinutes(Timeframe),

    #[error("Grace for {window} was configured as {configured}s but the cascade requires {expected}s")]
    GraceMismatch {
        window: Timeframe,
        configured: u32,
        expected: u32,
    },
}

/// Planning and DDL synthesis errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SqlError {
    #[error("Invalid window configuration: {0}")]
    Validation(#[from] ValidationError),

    #[error("Grouping key '{key}' not found in source '{source_name}'")]
    KeyNotFound { key: String, source_name: String },

    #[error("Grouping key must be a plain column reference, got {0}")]
    UnsupportedGroupingKey(String),

    #[error("Entity '{0}' requires a projection column designated as window start")]
    MissingBucketColumn(String),

    #[error("At most two join sources are supported, got {0}")]
    UnsupportedSourceArity(usize),

    #[error("Windowed query '{0}' declares an empty window list")]
    EmptyWindowList(String),

    #[error("Unknown lambda parameter '{0}'")]
    UnknownParameter(String),

    #[error("Aggregate function not allowed in {0} clause")]
    AggregateNotAllowed(&'static str),

    #[error("Aggregate {0} cannot be re-aggregated from the hub")]
    NonDecomposableAggregate(String),

    #[error("Column '{0}' is neither a grouping key nor aggregated")]
    NonAggregatedColumn(String),

    #[error("Source '{0}' is not registered")]
    UnknownSource(String),

    #[error("Invalid timeframe: {0}")]
    InvalidTimeframe(String),

    #[error("Invalid SQL type: {0}")]
    InvalidType(String),

    #[error("Query '{0}' joins two sources but declares no join condition")]
    MissingJoinCondition(String),

    #[error("Entity '{entity}' depends on '{dependency}' which is not ordered before it")]
    DependencyOrder { entity: String, dependency: String },
}

impl SqlError {
    /// True for window/grace configuration failures.
    pub fn is_validation(&self) -> bool {
        matches!(self, SqlError::Validation(_))
    }
}

pub type Result<T> = std::result::Result<T, SqlError>;
