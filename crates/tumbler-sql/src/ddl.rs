//! DDL synthesizer
//!
//! Renders the statement(s) that create one derived entity. Every persistent
//! statement has the shape
//!
//! ```text
//! CREATE TABLE|STREAM <name> WITH (KAFKA_TOPIC='<name>', KEY_FORMAT='AVRO',
//!     VALUE_FORMAT='AVRO'[, VALUE_AVRO_SCHEMA_FULL_NAME='<ns>.<Name>'])
//!   AS SELECT ... FROM <src> <alias> [WINDOW TUMBLING (...)] [WHERE ...]
//!   [GROUP BY ...] [HAVING ...] EMIT CHANGES|FINAL;
//! ```
//!
//! rendered on a single line so repeated synthesis is byte-identical.

use serde::Serialize;

use crate::error::SqlError;
use crate::expr::{Expr, FragmentCompiler, KeyPathStyle};
use crate::model::{
    DescriptorResolver, EntityDescriptor, EntityRole, EntityShape, FieldDescriptor, QueryModel,
    SqlType, Timeframe,
};
use crate::planner::{BoundSources, DerivedEntity, HubLayout, HEARTBEAT_COUNT_COLUMN};
use crate::Result;

/// Partition count for a direct entity whose query and source declare none.
pub const DEFAULT_DIRECT_PARTITIONS: u32 = 1;

const HEARTBEAT_ALIAS: &str = "h";
const LIVE_ALIAS: &str = "l";
const PREV_ALIAS: &str = "p";

/// What kind of statement the engine is asked to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementKind {
    /// Declares an entity over an existing topic; starts no query
    Create,
    /// `CREATE ... AS SELECT`; starts a persistent query
    CreateAsSelect,
    /// `INSERT INTO ... SELECT`; starts a persistent query
    InsertInto,
}

impl StatementKind {
    pub fn starts_query(&self) -> bool {
        !matches!(self, StatementKind::Create)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Statement {
    pub kind: StatementKind,
    pub sql: String,
}

impl Statement {
    fn new(kind: StatementKind, sql: String) -> Self {
        Self { kind, sql }
    }
}

/// Synthesized statements plus the descriptor of the created entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SynthesizedDdl {
    pub entity: String,
    pub role: EntityRole,
    pub statements: Vec<Statement>,
    pub descriptor: EntityDescriptor,
    /// Namespace used for the value schema's full name
    pub namespace: Option<String>,
    /// Topic the entity reads directly instead of its own (hub stream)
    pub input_topic_override: Option<String>,
    /// True when the entity is produced by a persistent query
    pub is_derived: bool,
}

impl SynthesizedDdl {
    /// All statements, newline separated.
    pub fn ddl(&self) -> String {
        self.statements
            .iter()
            .map(|s| s.sql.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn topic(&self) -> &str {
        &self.descriptor.topic
    }
}

/// Synthesize every entity of a plan, in plan order.
pub fn synthesize_plan<R: DescriptorResolver + ?Sized>(
    entities: &[DerivedEntity],
    query: &QueryModel,
    resolver: &R,
) -> Result<Vec<SynthesizedDdl>> {
    entities
        .iter()
        .map(|e| synthesize(e, query, resolver))
        .collect()
}

/// Synthesize the DDL for one derived entity.
pub fn synthesize<R: DescriptorResolver + ?Sized>(
    entity: &DerivedEntity,
    query: &QueryModel,
    resolver: &R,
) -> Result<SynthesizedDdl> {
    let sources = BoundSources::resolve(query, resolver)?;
    if let Some(based_on) = &query.based_on {
        if resolver.resolve(&based_on.schedule).is_none() {
            return Err(SqlError::UnknownSource(based_on.schedule.clone()));
        }
    }

    let namespace = query.value_namespace.clone();
    let schema_name = schema_full_name(namespace.as_deref(), &entity.id);
    let mut descriptor = entity.descriptor(schema_name.clone(), None);
    let mut input_topic_override = None;

    let statements = match entity.role {
        EntityRole::Direct => {
            let partitions = query
                .partitions
                .or(sources.primary().1.partitions)
                .unwrap_or(DEFAULT_DIRECT_PARTITIONS);
            descriptor.partitions = Some(partitions);
            direct(entity, query, &sources, schema_name.as_deref(), partitions)?
        }
        EntityRole::HubTable => {
            let layout = HubLayout::build(query, &sources)?;
            vec![hub_table(entity, query, &sources, &layout, schema_name.as_deref())?]
        }
        EntityRole::HubStream => {
            let hub_table_id = upstream(entity)?;
            let hub_schema = schema_full_name(namespace.as_deref(), hub_table_id);
            descriptor.topic = hub_table_id.to_string();
            descriptor.value_schema_full_name = hub_schema.clone();
            input_topic_override = Some(hub_table_id.to_string());
            vec![hub_stream(entity, hub_table_id, hub_schema.as_deref())]
        }
        EntityRole::Live => {
            let layout = HubLayout::build(query, &sources)?;
            vec![live(entity, query, &sources, &layout, schema_name.as_deref())?]
        }
        EntityRole::Heartbeat => {
            let layout = HubLayout::build(query, &sources)?;
            vec![heartbeat(entity, &sources, &layout, schema_name.as_deref())?]
        }
        EntityRole::PrevBucket => vec![prev_bucket(entity, schema_name.as_deref())?],
        EntityRole::Fill => vec![fill(entity, schema_name.as_deref())?],
        EntityRole::Source => return Err(SqlError::UnknownSource(entity.id.clone())),
    };

    let is_derived = statements.iter().any(|s| s.kind.starts_query());
    Ok(SynthesizedDdl {
        entity: entity.id.clone(),
        role: entity.role,
        statements,
        descriptor,
        namespace,
        input_topic_override,
        is_derived,
    })
}

// ---------------------------------------------------------------------------
// Per-role statements
// ---------------------------------------------------------------------------

fn hub_table(
    entity: &DerivedEntity,
    query: &QueryModel,
    sources: &BoundSources,
    layout: &HubLayout,
    schema_name: Option<&str>,
) -> Result<Statement> {
    let compiler = source_compiler(query, sources);

    let mut select: Vec<String> = Vec::new();
    for key in &layout.keys {
        select.push(format!("{} AS {}", compiler.expression(&key.expr)?, key.name));
    }
    select.push(format!("WINDOWSTART AS {}", layout.bucket_column));
    for column in &layout.columns {
        select.push(format!(
            "{} AS {}",
            compiler.expression(&column.source_expr())?,
            column.name
        ));
    }

    let mut sql = format!(
        "CREATE TABLE {} {} AS SELECT {} FROM {}",
        entity.id,
        with_clause(&entity.id, schema_name, &[]),
        select.join(", "),
        source_from(query, sources, &compiler)?
    );
    sql.push(' ');
    sql.push_str(&window_clause(&Timeframe::ONE_SECOND, entity.grace_seconds));
    if let Some(predicate) = source_where(query, sources, &compiler)? {
        sql.push_str(&format!(" WHERE {}", predicate));
    }
    if !query.group_by.is_empty() {
        sql.push_str(&format!(" GROUP BY {}", compiler.group_by_clause(&query.group_by)?));
    }
    sql.push_str(" EMIT FINAL;");
    Ok(Statement::new(StatementKind::CreateAsSelect, sql))
}

/// Re-exposes the hub table's changelog topic as a windowed-key stream.
fn hub_stream(entity: &DerivedEntity, hub_topic: &str, schema_name: Option<&str>) -> Statement {
    let window = [
        ("WINDOW_TYPE", "'TUMBLING'".to_string()),
        (
            "WINDOW_SIZE",
            format!("'{}'", Timeframe::ONE_SECOND.to_window_size()),
        ),
    ];
    let sql = format!(
        "CREATE STREAM {} ({}) {};",
        entity.id,
        column_list(&entity.fields(), EntityShape::Stream),
        with_clause(hub_topic, schema_name, &window)
    );
    Statement::new(StatementKind::Create, sql)
}

fn live(
    entity: &DerivedEntity,
    query: &QueryModel,
    sources: &BoundSources,
    layout: &HubLayout,
    schema_name: Option<&str>,
) -> Result<Statement> {
    let timeframe = tier_timeframe(entity)?;
    let (primary, _) = sources.primary();
    let param = primary.param.as_str();
    let compiler = hub_compiler(param, primary.alias());

    let select = query
        .projection
        .iter()
        .map(|p| {
            let rewritten = layout.reaggregate(&p.expr, param)?;
            Ok(format!("{} AS {}", compiler.expression(&rewritten)?, p.alias))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut sql = format!(
        "CREATE TABLE {} {} AS SELECT {} FROM {} {} {}",
        entity.id,
        with_clause(&entity.id, schema_name, &[]),
        select.join(", "),
        upstream(entity)?,
        primary.alias(),
        window_clause(&timeframe, entity.grace_seconds)
    );
    if !layout.keys.is_empty() {
        sql.push_str(&format!(" GROUP BY {}", hub_group_by(layout, &compiler, param)?));
    }
    if let Some(having) = &query.having {
        let rewritten = layout.reaggregate(having, param)?;
        sql.push_str(&format!(" HAVING {}", compiler.having_clause(&rewritten)?));
    }
    sql.push_str(" EMIT CHANGES;");
    Ok(Statement::new(StatementKind::CreateAsSelect, sql))
}

fn heartbeat(
    entity: &DerivedEntity,
    sources: &BoundSources,
    layout: &HubLayout,
    schema_name: Option<&str>,
) -> Result<Statement> {
    let timeframe = tier_timeframe(entity)?;
    let bucket = bucket_column(entity)?;
    let (primary, _) = sources.primary();
    let param = primary.param.as_str();
    let compiler = hub_compiler(param, primary.alias());

    let mut select: Vec<String> = layout
        .keys
        .iter()
        .map(|k| format!("{}.{} AS {}", primary.alias(), k.name, k.name))
        .collect();
    select.push(format!("WINDOWSTART AS {}", bucket));
    select.push(format!("COUNT(*) AS {}", HEARTBEAT_COUNT_COLUMN));

    let mut sql = format!(
        "CREATE TABLE {} {} AS SELECT {} FROM {} {} {}",
        entity.id,
        with_clause(&entity.id, schema_name, &[]),
        select.join(", "),
        upstream(entity)?,
        primary.alias(),
        window_clause(&timeframe, entity.grace_seconds)
    );
    if !layout.keys.is_empty() {
        sql.push_str(&format!(" GROUP BY {}", hub_group_by(layout, &compiler, param)?));
    }
    sql.push_str(" EMIT CHANGES;");
    Ok(Statement::new(StatementKind::CreateAsSelect, sql))
}

/// Aligns the previous bucket's live values to the current heartbeat bucket.
fn prev_bucket(entity: &DerivedEntity, schema_name: Option<&str>) -> Result<Statement> {
    let timeframe = tier_timeframe(entity)?;
    let bucket = bucket_column(entity)?;
    let (heartbeat_id, live_id) = cadence_inputs(entity)?;

    let mut select = heartbeat_keys(entity, bucket);
    for value in entity.value_columns.iter().filter(|v| v.name != bucket) {
        select.push(format!("{}.{} AS {}", LIVE_ALIAS, value.name, value.name));
    }

    let mut on = key_equalities(entity, LIVE_ALIAS);
    on.push(format!(
        "({h}.{b} - {offset}) = {l}.{b}",
        h = HEARTBEAT_ALIAS,
        l = LIVE_ALIAS,
        b = bucket,
        offset = timeframe.duration_ms()
    ));

    let sql = format!(
        "CREATE TABLE {} {} AS SELECT {} FROM {} {} LEFT JOIN {} {} ON {} EMIT CHANGES;",
        entity.id,
        with_clause(&entity.id, schema_name, &[]),
        select.join(", "),
        heartbeat_id,
        HEARTBEAT_ALIAS,
        live_id,
        LIVE_ALIAS,
        on.join(" AND ")
    );
    Ok(Statement::new(StatementKind::CreateAsSelect, sql))
}

/// One row per heartbeat bucket: live values, else the previous bucket's.
fn fill(entity: &DerivedEntity, schema_name: Option<&str>) -> Result<Statement> {
    let bucket = bucket_column(entity)?;
    let (heartbeat_id, live_id) = cadence_inputs(entity)?;
    let prev_id = entity.depends_on.get(2);

    let mut select = heartbeat_keys(entity, bucket);
    for value in entity.value_columns.iter().filter(|v| v.name != bucket) {
        let column = match prev_id {
            Some(_) => format!(
                "COALESCE({l}.{c}, {p}.{c}) AS {c}",
                l = LIVE_ALIAS,
                p = PREV_ALIAS,
                c = value.name
            ),
            None => format!("{}.{} AS {}", LIVE_ALIAS, value.name, value.name),
        };
        select.push(column);
    }

    let bucket_join = |alias: &str| {
        let mut on = key_equalities(entity, alias);
        on.push(format!("{}.{} = {}.{}", HEARTBEAT_ALIAS, bucket, alias, bucket));
        on.join(" AND ")
    };

    let mut sql = format!(
        "CREATE TABLE {} {} AS SELECT {} FROM {} {} LEFT JOIN {} {} ON {}",
        entity.id,
        with_clause(&entity.id, schema_name, &[]),
        select.join(", "),
        heartbeat_id,
        HEARTBEAT_ALIAS,
        live_id,
        LIVE_ALIAS,
        bucket_join(LIVE_ALIAS)
    );
    if let Some(prev_id) = prev_id {
        sql.push_str(&format!(
            " LEFT JOIN {} {} ON {}",
            prev_id,
            PREV_ALIAS,
            bucket_join(PREV_ALIAS)
        ));
    }
    sql.push_str(" EMIT CHANGES;");
    Ok(Statement::new(StatementKind::CreateAsSelect, sql))
}

/// Entity of a query without a tumbling window.
///
/// Streams are declared first and populated with `INSERT INTO`, so a re-run
/// only ever hits "already exists" on the declaration. The engine cannot
/// insert into tables, so a grouped query stays a single `CREATE TABLE AS`.
fn direct(
    entity: &DerivedEntity,
    query: &QueryModel,
    sources: &BoundSources,
    schema_name: Option<&str>,
    partitions: u32,
) -> Result<Vec<Statement>> {
    let compiler = source_compiler(query, sources);
    let select = compiler.select_clause(query.projection.iter().map(|p| (&p.expr, p.alias.as_str())))?;

    let mut body = format!("SELECT {} FROM {}", select, source_from(query, sources, &compiler)?);
    if let Some(predicate) = source_where(query, sources, &compiler)? {
        body.push_str(&format!(" WHERE {}", predicate));
    }
    if !query.group_by.is_empty() {
        body.push_str(&format!(" GROUP BY {}", compiler.group_by_clause(&query.group_by)?));
    }
    if let Some(having) = &query.having {
        body.push_str(&format!(" HAVING {}", compiler.having_clause(having)?));
    }
    body.push_str(" EMIT CHANGES;");

    let partitions_opt = [("PARTITIONS", partitions.to_string())];
    if entity.shape == EntityShape::Table {
        let sql = format!(
            "CREATE TABLE {} {} AS {}",
            entity.id,
            with_clause(&entity.id, schema_name, &partitions_opt),
            body
        );
        return Ok(vec![Statement::new(StatementKind::CreateAsSelect, sql)]);
    }

    let create = format!(
        "CREATE STREAM {} ({}) {};",
        entity.id,
        column_list(&entity.fields(), EntityShape::Stream),
        with_clause(&entity.id, schema_name, &partitions_opt)
    );
    let insert = format!("INSERT INTO {} {}", entity.id, body);
    Ok(vec![
        Statement::new(StatementKind::Create, create),
        Statement::new(StatementKind::InsertInto, insert),
    ])
}

// ---------------------------------------------------------------------------
// Fragments
// ---------------------------------------------------------------------------

/// `KEY->COL` for table-shaped sources unless the query overrides the style.
pub fn effective_key_style(query: &QueryModel, sources: &BoundSources) -> KeyPathStyle {
    query.key_style.unwrap_or(match sources.primary().1.shape {
        EntityShape::Table => KeyPathStyle::KeyPath,
        EntityShape::Stream => KeyPathStyle::Plain,
    })
}

/// Compiler over the raw sources of the query.
fn source_compiler(query: &QueryModel, sources: &BoundSources) -> FragmentCompiler {
    let style = effective_key_style(query, sources);
    let explicit = query.key_style.is_some();
    let keys: Vec<(String, String)> = sources
        .iter()
        .filter(|(_, d)| explicit || d.shape == EntityShape::Table)
        .flat_map(|(s, d)| d.key_fields().map(move |f| (s.param.clone(), f.name.clone())))
        .collect();
    FragmentCompiler::for_sources(&query.sources).with_key_style(style, keys)
}

/// Compiler over a hub-fed entity, bound to the primary parameter.
fn hub_compiler(param: &str, alias: &str) -> FragmentCompiler {
    FragmentCompiler::new([(param.to_string(), alias.to_string())].into_iter().collect())
}

fn hub_group_by(layout: &HubLayout, compiler: &FragmentCompiler, param: &str) -> Result<String> {
    let keys: Vec<Expr> = layout.keys.iter().map(|k| Expr::col(param, &k.name)).collect();
    compiler.group_by_clause(&keys)
}

/// FROM clause over raw sources, join and schedule included.
fn source_from(query: &QueryModel, sources: &BoundSources, compiler: &FragmentCompiler) -> Result<String> {
    let (primary, primary_desc) = sources.primary();
    let mut out = format!("{} {}", primary_desc.name, primary.alias());

    if let Some((joined, joined_desc)) = sources.joined() {
        let on = query
            .join_on
            .as_ref()
            .ok_or_else(|| SqlError::MissingJoinCondition(query.name.clone()))?;
        let keyword = match query.join_kind {
            crate::model::JoinKind::Inner => "JOIN",
            crate::model::JoinKind::Left => "LEFT JOIN",
        };
        out.push_str(&format!(
            " {} {} {} ON {}",
            keyword,
            joined_desc.name,
            joined.alias(),
            compiler.where_clause(on)?
        ));
    }

    if let Some(based_on) = &query.based_on {
        let a = primary.alias();
        let s = &based_on.alias;
        let mut on: Vec<String> = based_on
            .keys
            .iter()
            .map(|k| format!("{}.{} = {}.{}", a, k, s, k))
            .collect();
        if let Some(day_key) = &based_on.day_key {
            on.push(format!(
                "{}.{} = FORMAT_TIMESTAMP({}, 'yyyy-MM-dd')",
                s,
                day_key,
                event_timestamp(query, primary_desc)
            ));
        }
        out.push_str(&format!(" JOIN {} {} ON {}", based_on.schedule, s, on.join(" AND ")));
    }
    Ok(out)
}

/// Event time of the primary source as a TIMESTAMP expression.
fn event_timestamp(query: &QueryModel, primary: &EntityDescriptor) -> String {
    let Some(based_on) = &query.based_on else {
        return String::new();
    };
    let column = format!("{}.{}", query.primary_source().alias(), based_on.timestamp_column);
    match primary.field(&based_on.timestamp_column).map(|f| &f.sql_type) {
        Some(SqlType::Timestamp) => column,
        _ => format!("FROM_UNIXTIME({})", column),
    }
}

/// User filter AND the schedule session restriction.
fn source_where(
    query: &QueryModel,
    sources: &BoundSources,
    compiler: &FragmentCompiler,
) -> Result<Option<String>> {
    let session = query.based_on.as_ref().map(|b| {
        let a = sources.primary().0.alias();
        let ts = format!("{}.{}", a, b.timestamp_column);
        Expr::Raw {
            sql: format!(
                "{ts} {} {s}.{} AND {ts} {} {s}.{}",
                if b.open_inclusive { ">=" } else { ">" },
                b.open_column,
                if b.close_inclusive { "<=" } else { "<" },
                b.close_column,
                ts = ts,
                s = b.alias
            ),
        }
    });
    let predicate = match (query.filter.clone(), session) {
        (Some(filter), Some(session)) => Some(filter.and(session)),
        (filter, session) => filter.or(session),
    };
    predicate.map(|p| compiler.where_clause(&p)).transpose()
}

fn with_clause(topic: &str, schema_name: Option<&str>, extra: &[(&str, String)]) -> String {
    let mut props = vec![
        format!("KAFKA_TOPIC='{}'", topic),
        "KEY_FORMAT='AVRO'".to_string(),
        "VALUE_FORMAT='AVRO'".to_string(),
    ];
    if let Some(name) = schema_name {
        props.push(format!("VALUE_AVRO_SCHEMA_FULL_NAME='{}'", name));
    }
    props.extend(extra.iter().map(|(k, v)| format!("{}={}", k, v)));
    format!("WITH ({})", props.join(", "))
}

fn window_clause(timeframe: &Timeframe, grace_seconds: Option<u32>) -> String {
    match grace_seconds {
        Some(grace) => format!(
            "WINDOW TUMBLING (SIZE {}, GRACE PERIOD {} SECONDS)",
            timeframe.to_window_size(),
            grace
        ),
        None => format!("WINDOW TUMBLING (SIZE {})", timeframe.to_window_size()),
    }
}

fn column_list(fields: &[FieldDescriptor], shape: EntityShape) -> String {
    let key_marker = match shape {
        EntityShape::Stream => " KEY",
        EntityShape::Table => " PRIMARY KEY",
    };
    fields
        .iter()
        .map(|f| {
            format!(
                "{} {}{}",
                f.name,
                f.sql_type,
                if f.is_key { key_marker } else { "" }
            )
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn heartbeat_keys(entity: &DerivedEntity, bucket: &str) -> Vec<String> {
    entity
        .key_columns
        .iter()
        .map(|k| format!("{}.{} AS {}", HEARTBEAT_ALIAS, k.name, k.name))
        .chain(std::iter::once(format!(
            "{}.{} AS {}",
            HEARTBEAT_ALIAS, bucket, bucket
        )))
        .collect()
}

fn key_equalities(entity: &DerivedEntity, alias: &str) -> Vec<String> {
    entity
        .key_columns
        .iter()
        .map(|k| format!("{}.{} = {}.{}", HEARTBEAT_ALIAS, k.name, alias, k.name))
        .collect()
}

/// `<namespace>.<PascalCaseId>`
fn schema_full_name(namespace: Option<&str>, id: &str) -> Option<String> {
    namespace.map(|ns| format!("{}.{}", ns, pascal_case(id)))
}

fn pascal_case(id: &str) -> String {
    id.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

fn upstream(entity: &DerivedEntity) -> Result<&str> {
    entity
        .input_hint
        .as_deref()
        .ok_or_else(|| SqlError::DependencyOrder {
            entity: entity.id.clone(),
            dependency: "<input>".to_string(),
        })
}

fn tier_timeframe(entity: &DerivedEntity) -> Result<Timeframe> {
    entity
        .timeframe
        .ok_or_else(|| SqlError::InvalidTimeframe(entity.id.clone()))
}

fn bucket_column(entity: &DerivedEntity) -> Result<&str> {
    entity
        .bucket_column
        .as_deref()
        .ok_or_else(|| SqlError::MissingBucketColumn(entity.id.clone()))
}

/// Heartbeat and live inputs of a prev-bucket or fill entity.
fn cadence_inputs(entity: &DerivedEntity) -> Result<(&str, &str)> {
    match (entity.depends_on.first(), entity.depends_on.get(1)) {
        (Some(hb), Some(live)) => Ok((hb, live)),
        _ => Err(SqlError::DependencyOrder {
            entity: entity.id.clone(),
            dependency: "<heartbeat, live>".to_string(),
        }),
    }
}
