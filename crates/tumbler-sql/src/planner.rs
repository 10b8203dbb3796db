//! Derivation planner
//!
//! Decomposes one windowed `QueryModel` into the ordered set of derived
//! entities that materialize it:
//!
//! ```text
//!   raw source ──► <base>_1s_final (table, 1s tumbling, EMIT FINAL)
//!                        │  same topic
//!                        ▼
//!                  <base>_1s_final_s (stream)
//!                        │
//!          ┌─────────────┼──────────────┐
//!          ▼             ▼              ▼
//!    <base>_1m_live  <base>_5m_live  ...          one per requested window
//!
//!   fill mode, per window:  _hb (heartbeat) ─┬─► _fill
//!                           _live ───────────┤
//!                           _prev (1m only) ─┘
//! ```
//!
//! Every live tier re-aggregates hub columns, never a sibling tier. Planning is
//! pure and deterministic: the same model always yields the same ids, shapes
//! and (through the synthesizer) the same DDL text.

use std::collections::HashSet;

use chrono::Weekday;
use serde::Serialize;
use tracing::debug;

use crate::error::SqlError;
use crate::expr::{AggregateFunc, BinaryOp, Expr};
use crate::model::{
    BasedOnSpec, DescriptorResolver, EntityDescriptor, EntityRole, EntityShape, FieldDescriptor,
    QueryModel, SourceRef, SqlType, Timeframe,
};
use crate::window;
use crate::Result;

/// Bucket column name the hub uses when the projection designates none.
pub const DEFAULT_BUCKET_COLUMN: &str = "BucketStart";

/// Count column a heartbeat table carries to satisfy the engine's
/// aggregate-in-GROUP-BY requirement.
pub const HEARTBEAT_COUNT_COLUMN: &str = "Beats";

/// One entity of a rollup plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DerivedEntity {
    /// `<base>_<timeframe>_<role suffix>`, or the base name for a direct entity
    pub id: String,
    pub role: EntityRole,
    pub shape: EntityShape,
    pub timeframe: Option<Timeframe>,
    pub key_columns: Vec<FieldDescriptor>,
    pub value_columns: Vec<FieldDescriptor>,
    pub bucket_column: Option<String>,
    /// Entity this one reads from; `None` when it reads raw sources
    pub input_hint: Option<String>,
    /// Every derived entity that must be running before this one
    pub depends_on: Vec<String>,
    /// Registered (non-derived) entities this one reads
    pub sources: Vec<String>,
    pub based_on: Option<BasedOnSpec>,
    pub week_anchor: Weekday,
    pub grace_seconds: Option<u32>,
}

impl DerivedEntity {
    /// Key columns followed by value columns.
    pub fn fields(&self) -> Vec<FieldDescriptor> {
        self.key_columns
            .iter()
            .chain(self.value_columns.iter())
            .cloned()
            .collect()
    }

    /// Whether the engine runs a windowed aggregation for this entity.
    pub fn is_aggregating(&self) -> bool {
        match self.role {
            EntityRole::HubTable | EntityRole::Live | EntityRole::Heartbeat => true,
            EntityRole::Direct => self.shape == EntityShape::Table,
            _ => false,
        }
    }

    /// Descriptor registered for this entity once its DDL is synthesized.
    pub fn descriptor(&self, value_schema_full_name: Option<String>, partitions: Option<u32>) -> EntityDescriptor {
        EntityDescriptor {
            name: self.id.clone(),
            topic: self.id.clone(),
            shape: self.shape,
            fields: self.fields(),
            role: self.role,
            timeframe: self.timeframe,
            bucket_column: self.bucket_column.clone(),
            week_anchor: Some(self.week_anchor),
            value_schema_full_name,
            partitions,
        }
    }
}

/// Id of an entity for `base`, `timeframe` and `role`.
pub fn entity_id(base: &str, timeframe: &Timeframe, role: EntityRole) -> String {
    let suffix = match role {
        EntityRole::HubTable => "final",
        EntityRole::HubStream => "final_s",
        EntityRole::Live => "live",
        EntityRole::Heartbeat => "hb",
        EntityRole::PrevBucket => "prev",
        EntityRole::Fill => "fill",
        EntityRole::Source | EntityRole::Direct => return base.to_string(),
    };
    format!("{}_{}_{}", base, timeframe, suffix)
}

// ---------------------------------------------------------------------------
// Source binding
// ---------------------------------------------------------------------------

/// The query's sources bound to their registered descriptors.
#[derive(Debug, Clone)]
pub struct BoundSources {
    entries: Vec<(SourceRef, EntityDescriptor)>,
}

impl BoundSources {
    /// Resolve every declared source; at most two relations are supported.
    pub fn resolve<R: DescriptorResolver + ?Sized>(query: &QueryModel, resolver: &R) -> Result<Self> {
        let arity = query.source_arity();
        if query.sources.is_empty() || arity > 2 {
            return Err(SqlError::UnsupportedSourceArity(arity));
        }
        if query.sources.len() == 2 && query.join_on.is_none() {
            return Err(SqlError::MissingJoinCondition(query.name.clone()));
        }
        let entries = query
            .sources
            .iter()
            .map(|s| {
                resolver
                    .resolve(&s.name)
                    .map(|d| (s.clone(), d))
                    .ok_or_else(|| SqlError::UnknownSource(s.name.clone()))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { entries })
    }

    pub fn primary(&self) -> (&SourceRef, &EntityDescriptor) {
        let (s, d) = &self.entries[0];
        (s, d)
    }

    pub fn joined(&self) -> Option<(&SourceRef, &EntityDescriptor)> {
        self.entries.get(1).map(|(s, d)| (s, d))
    }

    /// Source a column reference belongs to; unqualified refs bind to the
    /// primary source.
    pub fn for_param(&self, param: Option<&str>) -> Result<(&SourceRef, &EntityDescriptor)> {
        match param {
            None => Ok(self.primary()),
            Some(p) => self
                .entries
                .iter()
                .find(|(s, _)| s.param == p)
                .map(|(s, d)| (s, d))
                .ok_or_else(|| SqlError::UnknownParameter(p.to_string())),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SourceRef, &EntityDescriptor)> {
        self.entries.iter().map(|(s, d)| (s, d))
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|(s, _)| s.name.clone()).collect()
    }

    /// Type of `expr` as evaluated over the raw sources.
    pub fn infer_type(&self, expr: &Expr) -> SqlType {
        match expr {
            Expr::Column { param, name } => self
                .for_param(param.as_deref())
                .ok()
                .and_then(|(_, d)| d.field(name).map(|f| f.sql_type.clone()))
                .unwrap_or(SqlType::Varchar),
            Expr::Literal { value } => match value {
                crate::expr::Literal::Bool(_) => SqlType::Boolean,
                crate::expr::Literal::Int(_) => SqlType::BigInt,
                crate::expr::Literal::Float(_) => SqlType::Double,
                crate::expr::Literal::String(_) | crate::expr::Literal::Null => SqlType::Varchar,
            },
            Expr::Binary { left, op, right } => {
                if op.is_comparison() || op.is_logical() {
                    return SqlType::Boolean;
                }
                let (l, r) = (self.infer_type(left), self.infer_type(right));
                if r == SqlType::Double {
                    r
                } else {
                    l
                }
            }
            Expr::Not { .. } | Expr::IsNull { .. } | Expr::InList { .. } | Expr::Between { .. } => {
                SqlType::Boolean
            }
            Expr::Negate { expr } => self.infer_type(expr),
            Expr::Cast { to, .. } => to.clone(),
            Expr::Function { args, .. } => args
                .first()
                .map(|a| self.infer_type(a))
                .unwrap_or(SqlType::Varchar),
            Expr::Aggregate { func, arg } => match func {
                AggregateFunc::Count | AggregateFunc::CountDistinct => SqlType::BigInt,
                AggregateFunc::Avg => SqlType::Double,
                _ => arg
                    .as_ref()
                    .map(|a| self.infer_type(a))
                    .unwrap_or(SqlType::BigInt),
            },
            Expr::Case {
                branches,
                otherwise,
            } => branches
                .first()
                .map(|b| self.infer_type(&b.then))
                .or_else(|| otherwise.as_ref().map(|o| self.infer_type(o)))
                .unwrap_or(SqlType::Varchar),
            Expr::WindowStart | Expr::WindowEnd => SqlType::BigInt,
            Expr::Raw { .. } => SqlType::Varchar,
        }
    }
}

// ---------------------------------------------------------------------------
// Hub layout
// ---------------------------------------------------------------------------

/// Where an aggregate of the user projection lives in the hub.
#[derive(Debug, Clone, PartialEq)]
enum HubSlot {
    Single(String),
    Average { sum: String, count: String },
}

/// A value column of the hub table.
#[derive(Debug, Clone, PartialEq)]
pub struct HubColumn {
    pub name: String,
    pub func: AggregateFunc,
    pub arg: Option<Expr>,
    pub sql_type: SqlType,
}

impl HubColumn {
    /// The aggregate call evaluated over raw sources.
    pub fn source_expr(&self) -> Expr {
        Expr::Aggregate {
            func: self.func,
            arg: self.arg.clone().map(Box::new),
        }
    }
}

/// A grouping key of the query.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyColumn {
    /// Column name in every derived entity
    pub name: String,
    /// Original key expression over the raw sources
    pub expr: Expr,
    pub sql_type: SqlType,
}

/// Column layout of the 1-second hub, shared by every tier that reads it.
///
/// Rebuilt deterministically from the query wherever it is needed.
#[derive(Debug, Clone, PartialEq)]
pub struct HubLayout {
    pub keys: Vec<KeyColumn>,
    pub bucket_column: String,
    pub columns: Vec<HubColumn>,
    slots: Vec<(Expr, HubSlot)>,
}

impl HubLayout {
    pub fn build(query: &QueryModel, sources: &BoundSources) -> Result<Self> {
        let keys = key_columns(query, sources)?;
        let bucket_column = query
            .bucket_column()
            .unwrap_or(DEFAULT_BUCKET_COLUMN)
            .to_string();

        let mut layout = HubLayout {
            keys,
            bucket_column,
            columns: Vec::new(),
            slots: Vec::new(),
        };

        for item in &query.projection {
            if layout.key_for_expr(&item.expr).is_some() {
                continue;
            }
            layout.check_grouped(&item.expr)?;
            let aggregates = item.expr.aggregates();
            let bare = aggregates.len() == 1 && *aggregates[0] == item.expr;
            for (idx, agg) in aggregates.into_iter().enumerate() {
                let owner = if bare {
                    item.alias.clone()
                } else {
                    format!("{}_{}", item.alias, idx + 1)
                };
                layout.add_aggregate(agg, &owner, sources)?;
            }
        }

        if let Some(having) = &query.having {
            layout.check_grouped(having)?;
            for (idx, agg) in having.aggregates().into_iter().enumerate() {
                layout.add_aggregate(agg, &format!("Having_{}", idx + 1), sources)?;
            }
        }

        Ok(layout)
    }

    fn add_aggregate(&mut self, agg: &Expr, owner: &str, sources: &BoundSources) -> Result<()> {
        if self.slots.iter().any(|(e, _)| e == agg) {
            return Ok(());
        }
        let Expr::Aggregate { func, arg } = agg else {
            return Ok(());
        };
        let arg = arg.as_deref().cloned();
        let arg_type = arg
            .as_ref()
            .map(|a| sources.infer_type(a))
            .unwrap_or(SqlType::BigInt);

        let slot = match func {
            AggregateFunc::CountDistinct => {
                return Err(SqlError::NonDecomposableAggregate(func.sql_name().to_string()))
            }
            AggregateFunc::Avg => {
                let sum = format!("{}_SUM", owner);
                let count = format!("{}_CNT", owner);
                self.columns.push(HubColumn {
                    name: sum.clone(),
                    func: AggregateFunc::Sum,
                    arg: arg.clone(),
                    sql_type: arg_type,
                });
                self.columns.push(HubColumn {
                    name: count.clone(),
                    func: AggregateFunc::Count,
                    arg,
                    sql_type: SqlType::BigInt,
                });
                HubSlot::Average { sum, count }
            }
            AggregateFunc::Count => {
                self.columns.push(HubColumn {
                    name: owner.to_string(),
                    func: *func,
                    arg,
                    sql_type: SqlType::BigInt,
                });
                HubSlot::Single(owner.to_string())
            }
            _ => {
                self.columns.push(HubColumn {
                    name: owner.to_string(),
                    func: *func,
                    arg,
                    sql_type: arg_type,
                });
                HubSlot::Single(owner.to_string())
            }
        };
        self.slots.push((agg.clone(), slot));
        Ok(())
    }

    /// Every column reference outside an aggregate must be a grouping key.
    fn check_grouped(&self, expr: &Expr) -> Result<()> {
        if matches!(expr, Expr::Aggregate { .. }) {
            return Ok(());
        }
        if let Expr::Column { name, .. } = expr {
            if self.key_for_expr(expr).is_none() {
                return Err(SqlError::NonAggregatedColumn(name.clone()));
            }
            return Ok(());
        }
        for child in expr.children() {
            self.check_grouped(child)?;
        }
        Ok(())
    }

    /// Grouping key a column expression refers to.
    pub fn key_for_expr(&self, expr: &Expr) -> Option<&KeyColumn> {
        let Expr::Column { param, name } = expr else {
            return None;
        };
        self.keys.iter().find(|k| match &k.expr {
            Expr::Column {
                param: kp,
                name: kn,
            } => {
                kn.eq_ignore_ascii_case(name)
                    && (kp.is_none() || param.is_none() || kp == param)
            }
            _ => false,
        })
    }

    /// Rewrite an expression over raw sources into one over hub columns,
    /// bound to lambda parameter `param`.
    pub fn reaggregate(&self, expr: &Expr, param: &str) -> Result<Expr> {
        expr.rewrite(&mut |node| match node {
            Expr::Aggregate { func, .. } => {
                let slot = self
                    .slots
                    .iter()
                    .find(|(e, _)| e == node)
                    .map(|(_, s)| s)
                    .ok_or_else(|| SqlError::NonDecomposableAggregate(func.sql_name().to_string()))?;
                Ok(Some(match slot {
                    HubSlot::Single(name) => {
                        let hub_func = match func {
                            AggregateFunc::Count | AggregateFunc::Sum => AggregateFunc::Sum,
                            other => *other,
                        };
                        Expr::agg(hub_func, Expr::col(param, name))
                    }
                    HubSlot::Average { sum, count } => Expr::binary(
                        Expr::Cast {
                            expr: Box::new(Expr::agg(AggregateFunc::Sum, Expr::col(param, sum))),
                            to: SqlType::Double,
                        },
                        BinaryOp::Div,
                        Expr::agg(AggregateFunc::Sum, Expr::col(param, count)),
                    ),
                }))
            }
            Expr::Column { name, .. } => match self.key_for_expr(node) {
                Some(key) => Ok(Some(Expr::col(param, &key.name))),
                None => Err(SqlError::NonAggregatedColumn(name.clone())),
            },
            _ => Ok(None),
        })
    }

    pub fn key_fields(&self) -> Vec<FieldDescriptor> {
        self.keys
            .iter()
            .map(|k| FieldDescriptor::key(&k.name, k.sql_type.clone()))
            .collect()
    }

    /// Value columns of the hub: bucket start, then one column per aggregate.
    pub fn value_fields(&self) -> Vec<FieldDescriptor> {
        std::iter::once(FieldDescriptor::value(&self.bucket_column, SqlType::BigInt))
            .chain(
                self.columns
                    .iter()
                    .map(|c| FieldDescriptor::value(&c.name, c.sql_type.clone())),
            )
            .collect()
    }
}

fn key_columns(query: &QueryModel, sources: &BoundSources) -> Result<Vec<KeyColumn>> {
    query
        .group_by
        .iter()
        .map(|expr| {
            let Expr::Column { param, name } = expr else {
                return Err(SqlError::UnsupportedGroupingKey(format!("{:?}", expr)));
            };
            let (source, descriptor) = sources.for_param(param.as_deref())?;
            let field = descriptor.field(name).ok_or_else(|| SqlError::KeyNotFound {
                key: name.clone(),
                source_name: source.name.clone(),
            })?;
            let projected = query.projection.iter().find(|p| match &p.expr {
                Expr::Column {
                    param: pp,
                    name: pn,
                } => pn.eq_ignore_ascii_case(name) && (pp.is_none() || param.is_none() || pp == param),
                _ => false,
            });
            Ok(KeyColumn {
                name: projected
                    .map(|p| p.alias.clone())
                    .unwrap_or_else(|| field.name.clone()),
                expr: expr.clone(),
                sql_type: projected
                    .and_then(|p| p.sql_type.clone())
                    .unwrap_or_else(|| field.sql_type.clone()),
            })
        })
        .collect()
}

/// Non-key projected columns with their output types.
pub fn projected_values(query: &QueryModel, layout: &HubLayout, sources: &BoundSources) -> Vec<FieldDescriptor> {
    query
        .projection
        .iter()
        .filter(|p| layout.key_for_expr(&p.expr).is_none())
        .map(|p| {
            FieldDescriptor::value(
                &p.alias,
                p.sql_type.clone().unwrap_or_else(|| sources.infer_type(&p.expr)),
            )
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

/// Plan `query`, honoring its own fill-missing flag.
pub fn plan<R: DescriptorResolver + ?Sized>(query: &QueryModel, resolver: &R) -> Result<Vec<DerivedEntity>> {
    plan_with_fill(query, resolver, query.fill_missing)
}

/// Plan `query` into derived entities, hub pair first.
pub fn plan_with_fill<R: DescriptorResolver + ?Sized>(
    query: &QueryModel,
    resolver: &R,
    fill_mode: bool,
) -> Result<Vec<DerivedEntity>> {
    let sources = BoundSources::resolve(query, resolver)?;

    let Some(requested) = &query.windows else {
        return plan_direct(query, &sources).map(|e| vec![e]);
    };
    if requested.is_empty() {
        return Err(SqlError::EmptyWindowList(query.name.clone()));
    }

    let mut windows = requested.clone();
    windows.sort();
    windows.dedup_by(|a, b| a.duration_seconds() == b.duration_seconds());

    let graces = window::validate(
        &windows,
        query.base_unit_seconds,
        query.grace_seconds,
        &query.grace_overrides,
    )?;

    let layout = HubLayout::build(query, &sources)?;
    let keys = layout.key_fields();
    let values = projected_values(query, &layout, &sources);
    let user_bucket = query.bucket_column().map(str::to_string);

    let hub = Timeframe::ONE_SECOND;
    let hub_table_id = entity_id(&query.name, &hub, EntityRole::HubTable);
    let hub_stream_id = entity_id(&query.name, &hub, EntityRole::HubStream);

    let mut source_names = sources.names();
    if let Some(based_on) = &query.based_on {
        source_names.push(based_on.schedule.clone());
    }

    let base = DerivedEntity {
        id: String::new(),
        role: EntityRole::HubTable,
        shape: EntityShape::Table,
        timeframe: Some(hub),
        key_columns: keys.clone(),
        value_columns: layout.value_fields(),
        bucket_column: Some(layout.bucket_column.clone()),
        input_hint: None,
        depends_on: Vec::new(),
        sources: Vec::new(),
        based_on: None,
        week_anchor: query.week_anchor,
        grace_seconds: None,
    };

    let mut entities = vec![
        DerivedEntity {
            id: hub_table_id.clone(),
            sources: source_names,
            based_on: query.based_on.clone(),
            grace_seconds: graces.get(&hub),
            ..base.clone()
        },
        DerivedEntity {
            id: hub_stream_id.clone(),
            role: EntityRole::HubStream,
            shape: EntityShape::Stream,
            input_hint: Some(hub_table_id.clone()),
            depends_on: vec![hub_table_id],
            ..base.clone()
        },
    ];

    for tf in windows.iter().filter(|w| !w.is_hub()) {
        let grace = graces.get(tf);
        let live_id = entity_id(&query.name, tf, EntityRole::Live);
        entities.push(DerivedEntity {
            id: live_id.clone(),
            role: EntityRole::Live,
            timeframe: Some(*tf),
            value_columns: values.clone(),
            bucket_column: user_bucket.clone(),
            input_hint: Some(hub_stream_id.clone()),
            depends_on: vec![hub_stream_id.clone()],
            grace_seconds: grace,
            ..base.clone()
        });

        if !fill_mode {
            continue;
        }

        let hb_id = entity_id(&query.name, tf, EntityRole::Heartbeat);
        // keys plus the bucket, with a COUNT(*) because the engine rejects a
        // grouped projection without an aggregate; do not drop Beats
        let hb_values = user_bucket
            .iter()
            .map(|b| FieldDescriptor::value(b, SqlType::BigInt))
            .chain(std::iter::once(FieldDescriptor::value(
                HEARTBEAT_COUNT_COLUMN,
                SqlType::BigInt,
            )))
            .collect();
        entities.push(DerivedEntity {
            id: hb_id.clone(),
            role: EntityRole::Heartbeat,
            timeframe: Some(*tf),
            value_columns: hb_values,
            bucket_column: user_bucket.clone(),
            input_hint: Some(hub_stream_id.clone()),
            depends_on: vec![hub_stream_id.clone()],
            grace_seconds: grace,
            ..base.clone()
        });

        let mut fill_deps = vec![hb_id.clone(), live_id.clone()];
        if tf.is_one_minute() {
            let prev_id = entity_id(&query.name, tf, EntityRole::PrevBucket);
            entities.push(DerivedEntity {
                id: prev_id.clone(),
                role: EntityRole::PrevBucket,
                timeframe: Some(*tf),
                value_columns: values.clone(),
                bucket_column: user_bucket.clone(),
                input_hint: Some(hb_id.clone()),
                depends_on: vec![hb_id.clone(), live_id.clone()],
                ..base.clone()
            });
            fill_deps.push(prev_id);
        }

        entities.push(DerivedEntity {
            id: entity_id(&query.name, tf, EntityRole::Fill),
            role: EntityRole::Fill,
            timeframe: Some(*tf),
            value_columns: values.clone(),
            bucket_column: user_bucket.clone(),
            input_hint: Some(hb_id),
            depends_on: fill_deps,
            ..base.clone()
        });
    }

    debug!(
        query = %query.name,
        entities = entities.len(),
        fill_mode,
        "Planned rollup"
    );
    execution_order(entities)
}

/// The single entity of a query without a tumbling window.
fn plan_direct(query: &QueryModel, sources: &BoundSources) -> Result<DerivedEntity> {
    let grouped = !query.group_by.is_empty();
    let (_, primary) = sources.primary();

    let (key_columns, value_columns) = if grouped {
        let layout = HubLayout::build(query, sources)?;
        (layout.key_fields(), projected_values(query, &layout, sources))
    } else {
        let mut keys = Vec::new();
        let mut values = Vec::new();
        for p in &query.projection {
            let sql_type = p
                .sql_type
                .clone()
                .unwrap_or_else(|| sources.infer_type(&p.expr));
            let is_source_key = match &p.expr {
                Expr::Column { param, name } => sources
                    .for_param(param.as_deref())
                    .ok()
                    .and_then(|(_, d)| d.field(name))
                    .map(|f| f.is_key)
                    .unwrap_or(false),
                _ => false,
            };
            if is_source_key {
                keys.push(FieldDescriptor::key(&p.alias, sql_type));
            } else {
                values.push(FieldDescriptor::value(&p.alias, sql_type));
            }
        }
        (keys, values)
    };

    let shape = if grouped {
        EntityShape::Table
    } else {
        primary.shape
    };

    let mut source_names = sources.names();
    if let Some(based_on) = &query.based_on {
        source_names.push(based_on.schedule.clone());
    }

    Ok(DerivedEntity {
        id: query.name.clone(),
        role: EntityRole::Direct,
        shape,
        timeframe: None,
        key_columns,
        value_columns,
        bucket_column: None,
        input_hint: None,
        depends_on: Vec::new(),
        sources: source_names,
        based_on: query.based_on.clone(),
        week_anchor: query.week_anchor,
        grace_seconds: None,
    })
}

fn role_rank(role: EntityRole) -> u8 {
    match role {
        EntityRole::Source => 0,
        EntityRole::HubTable => 1,
        EntityRole::HubStream => 2,
        EntityRole::Direct => 3,
        EntityRole::Live => 4,
        EntityRole::Heartbeat => 5,
        EntityRole::PrevBucket => 6,
        EntityRole::Fill => 7,
    }
}

/// Order entities for execution: hub table, hub stream, then every other
/// entity by ascending timeframe and role.
///
/// Fails when a dependency would not run before its dependent.
pub fn execution_order(mut entities: Vec<DerivedEntity>) -> Result<Vec<DerivedEntity>> {
    entities.sort_by(|a, b| {
        let hub = |e: &DerivedEntity| {
            !matches!(e.role, EntityRole::HubTable | EntityRole::HubStream)
        };
        hub(a)
            .cmp(&hub(b))
            .then(a.timeframe.cmp(&b.timeframe))
            .then(role_rank(a.role).cmp(&role_rank(b.role)))
            .then(a.id.cmp(&b.id))
    });

    let mut seen: HashSet<&str> = HashSet::new();
    for entity in &entities {
        for dep in &entity.depends_on {
            if !seen.contains(dep.as_str()) {
                return Err(SqlError::DependencyOrder {
                    entity: entity.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }
        seen.insert(entity.id.as_str());
    }
    Ok(entities)
}
