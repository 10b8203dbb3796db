//! Rolling-window rollup compiler for ksqlDB
//!
//! Turns one windowed aggregation declaration into the dependency-ordered set
//! of derived tables and streams that materialize it, and renders the DDL for
//! each of them. Nothing in this crate performs I/O.
//!
//! ## Example
//!
//! ```
//! use std::collections::HashMap;
//! use tumbler_sql::expr::{AggregateFunc, Expr};
//! use tumbler_sql::model::*;
//! use tumbler_sql::{plan, synthesize};
//!
//! let ticks = EntityDescriptor::source(
//!     "ticks",
//!     "ticks",
//!     EntityShape::Stream,
//!     vec![
//!         FieldDescriptor::key("Symbol", SqlType::Varchar),
//!         FieldDescriptor::value("Bid", SqlType::Double),
//!     ],
//! );
//! let registry = HashMap::from([("ticks".to_string(), ticks)]);
//!
//! let mut query = QueryModel::new("bar", SourceRef::new("ticks", "t"));
//! query.windows = Some(vec!["1m".parse().unwrap(), "5m".parse().unwrap()]);
//! query.base_unit_seconds = Some(1);
//! query.group_by = vec![Expr::col("t", "Symbol")];
//! query.projection = vec![
//!     Projection::new(Expr::col("t", "Symbol"), "Symbol"),
//!     Projection::new(Expr::WindowStart, "BucketStart"),
//!     Projection::new(Expr::agg(AggregateFunc::Max, Expr::col("t", "Bid")), "High"),
//! ];
//!
//! let entities = plan(&query, &registry).unwrap();
//! let ids: Vec<_> = entities.iter().map(|e| e.id.as_str()).collect();
//! assert_eq!(ids, ["bar_1s_final", "bar_1s_final_s", "bar_1m_live", "bar_5m_live"]);
//!
//! let live = synthesize(&entities[2], &query, &registry).unwrap();
//! assert!(live.ddl().contains("FROM bar_1s_final_s t"));
//! ```

pub mod ddl;
pub mod error;
pub mod expr;
pub mod model;
pub mod planner;
pub mod window;

pub use ddl::{synthesize, synthesize_plan, Statement, StatementKind, SynthesizedDdl};
pub use error::{Result, SqlError, ValidationError};
pub use model::{
    DescriptorResolver, EntityDescriptor, EntityRole, EntityShape, FieldDescriptor, QueryModel,
    Timeframe,
};
pub use planner::{entity_id, execution_order, plan, plan_with_fill, DerivedEntity};
pub use window::{validate, GraceMap};
