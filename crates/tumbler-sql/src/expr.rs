//! Expression AST and SQL fragment compiler
//!
//! The query-builder front end hands over filters, grouping keys and
//! projections as an `Expr` tree whose column references are bound to lambda
//! parameters (`t.Bid`). `FragmentCompiler` turns those trees into the text of
//! WHERE / GROUP BY / SELECT / HAVING fragments, mapping each parameter to its
//! table alias.
//!
//! ## Example
//!
//! ```
//! use std::collections::HashMap;
//! use tumbler_sql::expr::{BinaryOp, Expr, FragmentCompiler};
//!
//! let aliases = HashMap::from([("t".to_string(), "o".to_string())]);
//! let compiler = FragmentCompiler::new(aliases);
//! let filter = Expr::binary(Expr::col("t", "Bid"), BinaryOp::Gt, Expr::int(0));
//! assert_eq!(compiler.where_clause(&filter).unwrap(), "o.Bid > 0");
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SqlError;
use crate::model::{SourceRef, SqlType};
use crate::Result;

/// Literal values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Like,
    And,
    Or,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl BinaryOp {
    fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::Like => "LIKE",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::And => 2,
            BinaryOp::Eq
            | BinaryOp::NotEq
            | BinaryOp::Lt
            | BinaryOp::LtEq
            | BinaryOp::Gt
            | BinaryOp::GtEq
            | BinaryOp::Like => 4,
            BinaryOp::Add | BinaryOp::Sub => 5,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => 6,
        }
    }

    fn is_associative(&self) -> bool {
        matches!(
            self,
            BinaryOp::And | BinaryOp::Or | BinaryOp::Add | BinaryOp::Mul
        )
    }

    pub fn is_comparison(&self) -> bool {
        self.precedence() == 4
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }
}

/// Aggregate functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFunc {
    Count,
    CountDistinct,
    Sum,
    Min,
    Max,
    Avg,
    EarliestByOffset,
    LatestByOffset,
}

impl AggregateFunc {
    pub fn sql_name(&self) -> &'static str {
        match self {
            AggregateFunc::Count => "COUNT",
            AggregateFunc::CountDistinct => "COUNT_DISTINCT",
            AggregateFunc::Sum => "SUM",
            AggregateFunc::Min => "MIN",
            AggregateFunc::Max => "MAX",
            AggregateFunc::Avg => "AVG",
            AggregateFunc::EarliestByOffset => "EARLIEST_BY_OFFSET",
            AggregateFunc::LatestByOffset => "LATEST_BY_OFFSET",
        }
    }
}

impl fmt::Display for AggregateFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql_name())
    }
}

/// One `WHEN ... THEN ...` arm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseBranch {
    pub when: Expr,
    pub then: Expr,
}

/// How key columns of the source are addressed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum KeyPathStyle {
    /// `alias.Column`
    #[default]
    Plain,
    /// `KEY->Column`
    KeyPath,
}

/// Expression tree produced by the query builder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expr {
    Column {
        #[serde(default)]
        param: Option<String>,
        name: String,
    },
    Literal {
        value: Literal,
    },
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },
    Not {
        expr: Box<Expr>,
    },
    Negate {
        expr: Box<Expr>,
    },
    IsNull {
        expr: Box<Expr>,
        #[serde(default)]
        negated: bool,
    },
    InList {
        expr: Box<Expr>,
        list: Vec<Expr>,
        #[serde(default)]
        negated: bool,
    },
    Between {
        expr: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
        #[serde(default)]
        negated: bool,
    },
    Function {
        name: String,
        #[serde(default)]
        args: Vec<Expr>,
    },
    Cast {
        expr: Box<Expr>,
        to: SqlType,
    },
    Aggregate {
        func: AggregateFunc,
        #[serde(default)]
        arg: Option<Box<Expr>>,
    },
    Case {
        branches: Vec<CaseBranch>,
        #[serde(default)]
        otherwise: Option<Box<Expr>>,
    },
    WindowStart,
    WindowEnd,
    /// Already-compiled fragment, emitted verbatim
    Raw {
        sql: String,
    },
}

impl Expr {
    pub fn col(param: impl Into<String>, name: impl Into<String>) -> Expr {
        Expr::Column {
            param: Some(param.into()),
            name: name.into(),
        }
    }

    pub fn bare(name: impl Into<String>) -> Expr {
        Expr::Column {
            param: None,
            name: name.into(),
        }
    }

    pub fn int(v: i64) -> Expr {
        Expr::Literal {
            value: Literal::Int(v),
        }
    }

    pub fn float(v: f64) -> Expr {
        Expr::Literal {
            value: Literal::Float(v),
        }
    }

    pub fn string(v: impl Into<String>) -> Expr {
        Expr::Literal {
            value: Literal::String(v.into()),
        }
    }

    pub fn binary(left: Expr, op: BinaryOp, right: Expr) -> Expr {
        Expr::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    pub fn and(self, other: Expr) -> Expr {
        Expr::binary(self, BinaryOp::And, other)
    }

    pub fn agg(func: AggregateFunc, arg: Expr) -> Expr {
        Expr::Aggregate {
            func,
            arg: Some(Box::new(arg)),
        }
    }

    pub fn count_star() -> Expr {
        Expr::Aggregate {
            func: AggregateFunc::Count,
            arg: None,
        }
    }

    pub fn func(name: impl Into<String>, args: Vec<Expr>) -> Expr {
        Expr::Function {
            name: name.into(),
            args,
        }
    }

    /// Direct children, in evaluation order.
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Column { .. }
            | Expr::Literal { .. }
            | Expr::WindowStart
            | Expr::WindowEnd
            | Expr::Raw { .. } => Vec::new(),
            Expr::Binary { left, right, .. } => vec![left.as_ref(), right.as_ref()],
            Expr::Not { expr }
            | Expr::Negate { expr }
            | Expr::IsNull { expr, .. }
            | Expr::Cast { expr, .. } => vec![expr.as_ref()],
            Expr::InList { expr, list, .. } => {
                let mut out = vec![expr.as_ref()];
                out.extend(list.iter());
                out
            }
            Expr::Between {
                expr, low, high, ..
            } => vec![expr.as_ref(), low.as_ref(), high.as_ref()],
            Expr::Function { args, .. } => args.iter().collect(),
            Expr::Aggregate { arg, .. } => arg.iter().map(|a| a.as_ref()).collect(),
            Expr::Case {
                branches,
                otherwise,
            } => {
                let mut out = Vec::new();
                for b in branches {
                    out.push(&b.when);
                    out.push(&b.then);
                }
                out.extend(otherwise.iter().map(|e| e.as_ref()));
                out
            }
        }
    }

    /// Pre-order traversal.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Expr)) {
        f(self);
        for child in self.children() {
            child.walk(f);
        }
    }

    pub fn contains_aggregate(&self) -> bool {
        let mut found = false;
        self.walk(&mut |e| {
            if matches!(e, Expr::Aggregate { .. }) {
                found = true;
            }
        });
        found
    }

    /// Outermost aggregate calls, in traversal order.
    pub fn aggregates(&self) -> Vec<&Expr> {
        fn collect<'a>(expr: &'a Expr, out: &mut Vec<&'a Expr>) {
            if matches!(expr, Expr::Aggregate { .. }) {
                out.push(expr);
                return;
            }
            for child in expr.children() {
                collect(child, out);
            }
        }
        let mut out = Vec::new();
        collect(self, &mut out);
        out
    }

    /// All column references, in traversal order.
    pub fn columns(&self) -> Vec<(Option<&str>, &str)> {
        let mut out = Vec::new();
        self.walk(&mut |e| {
            if let Expr::Column { param, name } = e {
                out.push((param.as_deref(), name.as_str()));
            }
        });
        out
    }

    /// Top-down rewrite: `f` returns a replacement for a node, or `None` to
    /// descend into its children.
    pub fn rewrite(&self, f: &mut dyn FnMut(&Expr) -> Result<Option<Expr>>) -> Result<Expr> {
        if let Some(replaced) = f(self)? {
            return Ok(replaced);
        }
        Ok(match self {
            Expr::Column { .. }
            | Expr::Literal { .. }
            | Expr::WindowStart
            | Expr::WindowEnd
            | Expr::Raw { .. } => self.clone(),
            Expr::Binary { left, op, right } => Expr::Binary {
                left: boxed(left, f)?,
                op: *op,
                right: boxed(right, f)?,
            },
            Expr::Not { expr } => Expr::Not {
                expr: boxed(expr, f)?,
            },
            Expr::Negate { expr } => Expr::Negate {
                expr: boxed(expr, f)?,
            },
            Expr::IsNull { expr, negated } => Expr::IsNull {
                expr: boxed(expr, f)?,
                negated: *negated,
            },
            Expr::InList {
                expr,
                list,
                negated,
            } => Expr::InList {
                expr: boxed(expr, f)?,
                list: list.iter().map(|e| e.rewrite(f)).collect::<Result<_>>()?,
                negated: *negated,
            },
            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => Expr::Between {
                expr: boxed(expr, f)?,
                low: boxed(low, f)?,
                high: boxed(high, f)?,
                negated: *negated,
            },
            Expr::Function { name, args } => Expr::Function {
                name: name.clone(),
                args: args.iter().map(|e| e.rewrite(f)).collect::<Result<_>>()?,
            },
            Expr::Cast { expr, to } => Expr::Cast {
                expr: boxed(expr, f)?,
                to: to.clone(),
            },
            Expr::Aggregate { func, arg } => Expr::Aggregate {
                func: *func,
                arg: match arg {
                    Some(a) => Some(boxed(a, f)?),
                    None => None,
                },
            },
            Expr::Case {
                branches,
                otherwise,
            } => Expr::Case {
                branches: branches
                    .iter()
                    .map(|b| {
                        Ok(CaseBranch {
                            when: b.when.rewrite(f)?,
                            then: b.then.rewrite(f)?,
                        })
                    })
                    .collect::<Result<_>>()?,
                otherwise: match otherwise {
                    Some(o) => Some(boxed(o, f)?),
                    None => None,
                },
            },
        })
    }

    fn precedence(&self) -> u8 {
        match self {
            Expr::Binary { op, .. } => op.precedence(),
            Expr::Not { .. } => 3,
            Expr::IsNull { .. } | Expr::InList { .. } | Expr::Between { .. } => 4,
            _ => u8::MAX,
        }
    }
}

/// Which clause is being compiled; aggregates are only legal in some.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Clause {
    Where,
    GroupBy,
    Select,
    Having,
    AggregateArg,
}

impl Clause {
    fn name(&self) -> &'static str {
        match self {
            Clause::Where => "WHERE",
            Clause::GroupBy => "GROUP BY",
            Clause::Select => "SELECT",
            Clause::Having => "HAVING",
            Clause::AggregateArg => "aggregate argument",
        }
    }

    fn allows_aggregates(&self) -> bool {
        matches!(self, Clause::Select | Clause::Having)
    }
}

/// Stateless translator from expression trees to SQL fragment text.
#[derive(Debug, Clone, Default)]
pub struct FragmentCompiler {
    aliases: HashMap<String, String>,
    key_style: KeyPathStyle,
    key_columns: HashSet<(String, String)>,
}

impl FragmentCompiler {
    /// Compiler over an explicit parameter → table alias map.
    pub fn new(aliases: HashMap<String, String>) -> Self {
        Self {
            aliases,
            key_style: KeyPathStyle::Plain,
            key_columns: HashSet::new(),
        }
    }

    /// Compiler whose aliases come from the declared sources.
    pub fn for_sources(sources: &[SourceRef]) -> Self {
        Self::new(
            sources
                .iter()
                .map(|s| (s.param.clone(), s.alias().to_string()))
                .collect(),
        )
    }

    /// Address `keys` (parameter, column) with the given style.
    pub fn with_key_style(
        mut self,
        style: KeyPathStyle,
        keys: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        self.key_style = style;
        self.key_columns = keys
            .into_iter()
            .map(|(p, c)| (p, c.to_ascii_uppercase()))
            .collect();
        self
    }

    pub fn where_clause(&self, expr: &Expr) -> Result<String> {
        self.render(expr, Clause::Where)
    }

    pub fn having_clause(&self, expr: &Expr) -> Result<String> {
        self.render(expr, Clause::Having)
    }

    pub fn group_by_clause(&self, keys: &[Expr]) -> Result<String> {
        let parts = keys
            .iter()
            .map(|k| self.render(k, Clause::GroupBy))
            .collect::<Result<Vec<_>>>()?;
        Ok(parts.join(", "))
    }

    /// `expr AS alias, ...`
    pub fn select_clause<'a>(
        &self,
        items: impl IntoIterator<Item = (&'a Expr, &'a str)>,
    ) -> Result<String> {
        let parts = items
            .into_iter()
            .map(|(expr, alias)| Ok(format!("{} AS {}", self.render(expr, Clause::Select)?, alias)))
            .collect::<Result<Vec<_>>>()?;
        Ok(parts.join(", "))
    }

    /// A single expression, aggregates allowed.
    pub fn expression(&self, expr: &Expr) -> Result<String> {
        self.render(expr, Clause::Select)
    }

    fn render(&self, expr: &Expr, clause: Clause) -> Result<String> {
        match expr {
            Expr::Column { param, name } => self.column(param.as_deref(), name),
            Expr::Literal { value } => Ok(literal(value)),
            Expr::Binary { left, op, right } => {
                let l = self.operand(left, op.precedence(), false, clause)?;
                let r = self.operand(right, op.precedence(), !op.is_associative(), clause)?;
                Ok(format!("{} {} {}", l, op.symbol(), r))
            }
            Expr::Not { expr: inner } => {
                Ok(format!("NOT {}", self.operand(inner, 3, true, clause)?))
            }
            Expr::Negate { expr: inner } => {
                Ok(format!("-{}", self.operand(inner, 7, true, clause)?))
            }
            Expr::IsNull { expr: inner, negated } => Ok(format!(
                "{} IS {}NULL",
                self.operand(inner, 4, true, clause)?,
                if *negated { "NOT " } else { "" }
            )),
            Expr::InList {
                expr: inner,
                list,
                negated,
            } => {
                let items = list
                    .iter()
                    .map(|e| self.render(e, clause))
                    .collect::<Result<Vec<_>>>()?;
                Ok(format!(
                    "{} {}IN ({})",
                    self.operand(inner, 4, true, clause)?,
                    if *negated { "NOT " } else { "" },
                    items.join(", ")
                ))
            }
            Expr::Between {
                expr: inner,
                low,
                high,
                negated,
            } => Ok(format!(
                "{} {}BETWEEN {} AND {}",
                self.operand(inner, 4, true, clause)?,
                if *negated { "NOT " } else { "" },
                self.operand(low, 5, false, clause)?,
                self.operand(high, 5, false, clause)?
            )),
            Expr::Function { name, args } => {
                let rendered = args
                    .iter()
                    .map(|a| self.render(a, clause))
                    .collect::<Result<Vec<_>>>()?;
                Ok(format!("{}({})", name.to_ascii_uppercase(), rendered.join(", ")))
            }
            Expr::Cast { expr: inner, to } => {
                Ok(format!("CAST({} AS {})", self.render(inner, clause)?, to))
            }
            Expr::Aggregate { func, arg } => {
                if !clause.allows_aggregates() {
                    return Err(SqlError::AggregateNotAllowed(clause.name()));
                }
                let inner = match arg {
                    Some(a) => self.render(a, Clause::AggregateArg)?,
                    None => "*".to_string(),
                };
                Ok(format!("{}({})", func.sql_name(), inner))
            }
            Expr::Case {
                branches,
                otherwise,
            } => {
                let mut out = String::from("CASE");
                for b in branches {
                    out.push_str(&format!(
                        " WHEN {} THEN {}",
                        self.render(&b.when, clause)?,
                        self.render(&b.then, clause)?
                    ));
                }
                if let Some(o) = otherwise {
                    out.push_str(&format!(" ELSE {}", self.render(o, clause)?));
                }
                out.push_str(" END");
                Ok(out)
            }
            Expr::WindowStart => Ok("WINDOWSTART".to_string()),
            Expr::WindowEnd => Ok("WINDOWEND".to_string()),
            Expr::Raw { sql } => Ok(sql.clone()),
        }
    }

    /// Render a child, parenthesized when it binds looser than its parent.
    fn operand(&self, expr: &Expr, parent: u8, strict: bool, clause: Clause) -> Result<String> {
        let text = self.render(expr, clause)?;
        let child = expr.precedence();
        if child < parent || (strict && child == parent) {
            Ok(format!("({})", text))
        } else {
            Ok(text)
        }
    }

    fn column(&self, param: Option<&str>, name: &str) -> Result<String> {
        if self.key_style == KeyPathStyle::KeyPath && self.is_key(param, name) {
            return Ok(format!("KEY->{}", name));
        }
        match param {
            None => Ok(name.to_string()),
            Some(p) => {
                let alias = self
                    .aliases
                    .get(p)
                    .ok_or_else(|| SqlError::UnknownParameter(p.to_string()))?;
                Ok(format!("{}.{}", alias, name))
            }
        }
    }

    fn is_key(&self, param: Option<&str>, name: &str) -> bool {
        let upper = name.to_ascii_uppercase();
        self.key_columns
            .iter()
            .any(|(p, c)| *c == upper && param.map_or(true, |param| param == p))
    }
}

fn boxed(
    expr: &Expr,
    f: &mut dyn FnMut(&Expr) -> Result<Option<Expr>>,
) -> Result<Box<Expr>> {
    Ok(Box::new(expr.rewrite(f)?))
}

fn literal(value: &Literal) -> String {
    match value {
        Literal::Null => "NULL".to_string(),
        Literal::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        Literal::Int(i) => i.to_string(),
        Literal::Float(f) if f.fract() == 0.0 && f.is_finite() => format!("{:.1}", f),
        Literal::Float(f) => f.to_string(),
        Literal::String(s) => format!("'{}'", s.replace('\'', "''")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compiler() -> FragmentCompiler {
        FragmentCompiler::new(HashMap::from([
            ("t".to_string(), "o".to_string()),
            ("s".to_string(), "sch".to_string()),
        ]))
    }

    // ---------------------------------------------------------------
    // WHERE
    // ---------------------------------------------------------------

    #[test]
    fn test_where_maps_params_to_aliases() {
        let expr = Expr::binary(Expr::col("t", "Broker"), BinaryOp::Eq, Expr::col("s", "Broker"));
        assert_eq!(compiler().where_clause(&expr).unwrap(), "o.Broker = sch.Broker");
    }

    #[test]
    fn test_where_unknown_param_fails() {
        let expr = Expr::binary(Expr::col("x", "Bid"), BinaryOp::Gt, Expr::int(1));
        assert_eq!(
            compiler().where_clause(&expr).unwrap_err(),
            SqlError::UnknownParameter("x".to_string())
        );
    }

    #[test]
    fn test_where_rejects_aggregates() {
        let expr = Expr::binary(
            Expr::agg(AggregateFunc::Max, Expr::col("t", "Bid")),
            BinaryOp::Gt,
            Expr::int(1),
        );
        assert_eq!(
            compiler().where_clause(&expr).unwrap_err(),
            SqlError::AggregateNotAllowed("WHERE")
        );
    }

    #[test]
    fn test_precedence_parenthesizes_or_inside_and() {
        let a = Expr::binary(Expr::col("t", "A"), BinaryOp::Eq, Expr::int(1));
        let b = Expr::binary(Expr::col("t", "B"), BinaryOp::Eq, Expr::int(2));
        let c = Expr::binary(Expr::col("t", "C"), BinaryOp::Eq, Expr::int(3));
        let expr = Expr::binary(a, BinaryOp::Or, b).and(c);
        assert_eq!(
            compiler().where_clause(&expr).unwrap(),
            "(o.A = 1 OR o.B = 2) AND o.C = 3"
        );
    }

    #[test]
    fn test_precedence_non_associative_right_operand() {
        let expr = Expr::binary(
            Expr::col("t", "A"),
            BinaryOp::Sub,
            Expr::binary(Expr::col("t", "B"), BinaryOp::Sub, Expr::col("t", "C")),
        );
        assert_eq!(compiler().expression(&expr).unwrap(), "o.A - (o.B - o.C)");

        let flat = Expr::binary(
            Expr::binary(Expr::col("t", "A"), BinaryOp::Sub, Expr::col("t", "B")),
            BinaryOp::Sub,
            Expr::col("t", "C"),
        );
        assert_eq!(compiler().expression(&flat).unwrap(), "o.A - o.B - o.C");
    }

    #[test]
    fn test_string_literal_escaping() {
        let expr = Expr::binary(Expr::col("t", "Name"), BinaryOp::Eq, Expr::string("O'Brien"));
        assert_eq!(compiler().where_clause(&expr).unwrap(), "o.Name = 'O''Brien'");
    }

    #[test]
    fn test_predicates_in_between_is_null() {
        let in_list = Expr::InList {
            expr: Box::new(Expr::col("t", "Symbol")),
            list: vec![Expr::string("EURUSD"), Expr::string("USDJPY")],
            negated: false,
        };
        assert_eq!(
            compiler().where_clause(&in_list).unwrap(),
            "o.Symbol IN ('EURUSD', 'USDJPY')"
        );

        let between = Expr::Between {
            expr: Box::new(Expr::col("t", "Bid")),
            low: Box::new(Expr::float(1.0)),
            high: Box::new(Expr::float(2.5)),
            negated: true,
        };
        assert_eq!(
            compiler().where_clause(&between).unwrap(),
            "o.Bid NOT BETWEEN 1.0 AND 2.5"
        );

        let not_null = Expr::IsNull {
            expr: Box::new(Expr::col("t", "Bid")),
            negated: true,
        };
        assert_eq!(compiler().where_clause(&not_null).unwrap(), "o.Bid IS NOT NULL");
    }

    #[test]
    fn test_not_wraps_binary_operand() {
        let expr = Expr::Not {
            expr: Box::new(Expr::binary(Expr::col("t", "A"), BinaryOp::Gt, Expr::int(1))),
        };
        assert_eq!(compiler().where_clause(&expr).unwrap(), "NOT (o.A > 1)");
    }

    // ---------------------------------------------------------------
    // SELECT / GROUP BY / HAVING
    // ---------------------------------------------------------------

    #[test]
    fn test_select_with_aggregates_and_window() {
        let open = Expr::agg(AggregateFunc::EarliestByOffset, Expr::col("t", "Bid"));
        let start = Expr::WindowStart;
        let count = Expr::count_star();
        let sql = compiler()
            .select_clause([(&start, "BucketStart"), (&open, "Open"), (&count, "Ticks")])
            .unwrap();
        assert_eq!(
            sql,
            "WINDOWSTART AS BucketStart, EARLIEST_BY_OFFSET(o.Bid) AS Open, COUNT(*) AS Ticks"
        );
    }

    #[test]
    fn test_group_by_rejects_aggregates() {
        let keys = vec![Expr::count_star()];
        assert_eq!(
            compiler().group_by_clause(&keys).unwrap_err(),
            SqlError::AggregateNotAllowed("GROUP BY")
        );
    }

    #[test]
    fn test_having_allows_aggregates() {
        let expr = Expr::binary(Expr::count_star(), BinaryOp::Gt, Expr::int(10));
        assert_eq!(compiler().having_clause(&expr).unwrap(), "COUNT(*) > 10");
    }

    #[test]
    fn test_case_and_function_rendering() {
        let expr = Expr::Case {
            branches: vec![CaseBranch {
                when: Expr::binary(Expr::col("t", "Bid"), BinaryOp::Gt, Expr::int(0)),
                then: Expr::func("abs", vec![Expr::col("t", "Bid")]),
            }],
            otherwise: Some(Box::new(Expr::Literal { value: Literal::Null })),
        };
        assert_eq!(
            compiler().expression(&expr).unwrap(),
            "CASE WHEN o.Bid > 0 THEN ABS(o.Bid) ELSE NULL END"
        );
    }

    // ---------------------------------------------------------------
    // Key addressing
    // ---------------------------------------------------------------

    #[test]
    fn test_key_path_style_rewrites_key_columns_only() {
        let compiler = compiler().with_key_style(
            KeyPathStyle::KeyPath,
            [("t".to_string(), "Broker".to_string())],
        );
        let keys = vec![Expr::col("t", "Broker"), Expr::col("t", "Symbol")];
        assert_eq!(compiler.group_by_clause(&keys).unwrap(), "KEY->Broker, o.Symbol");
    }

    #[test]
    fn test_plain_style_ignores_key_set() {
        let compiler = compiler().with_key_style(
            KeyPathStyle::Plain,
            [("t".to_string(), "Broker".to_string())],
        );
        let keys = vec![Expr::col("t", "Broker")];
        assert_eq!(compiler.group_by_clause(&keys).unwrap(), "o.Broker");
    }

    // ---------------------------------------------------------------
    // Tree helpers
    // ---------------------------------------------------------------

    #[test]
    fn test_rewrite_replaces_matching_nodes() {
        let expr = Expr::binary(
            Expr::agg(AggregateFunc::Max, Expr::col("t", "Bid")),
            BinaryOp::Sub,
            Expr::agg(AggregateFunc::Min, Expr::col("t", "Bid")),
        );
        let rewritten = expr
            .rewrite(&mut |e| match e {
                Expr::Column { name, .. } => Ok(Some(Expr::col("h", format!("{}_X", name)))),
                _ => Ok(None),
            })
            .unwrap();
        let cols: Vec<_> = rewritten.columns().into_iter().map(|(_, n)| n.to_string()).collect();
        assert_eq!(cols, vec!["Bid_X", "Bid_X"]);
        assert!(rewritten.contains_aggregate());
    }

    #[test]
    fn test_expr_serde_tagged() {
        let json = r#"{"kind":"aggregate","func":"max","arg":{"kind":"column","param":"t","name":"Bid"}}"#;
        let expr: Expr = serde_json::from_str(json).unwrap();
        assert_eq!(expr, Expr::agg(AggregateFunc::Max, Expr::col("t", "Bid")));
    }
}
