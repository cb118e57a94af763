//! Typed aggregation pipelines.
//!
//! A [`Pipeline`] is a list of `$match`/`$group` style stages. Backends may
//! push parts of it down into their native query language, but the result
//! must equal what [`Pipeline::evaluate`] produces over the same documents.
//!
//! # Example
//!
//! ```
//! use thermostat_store::{Accumulator, Filter, Group, Pipeline};
//! use thermostat_types::{Document, Value};
//!
//! let pipeline = Pipeline::new()
//!     .match_stage(Filter::gte("temperature", 60.0))
//!     .group(
//!         Group::all()
//!             .accumulate("avg", Accumulator::avg("temperature"))
//!             .accumulate("n", Accumulator::count()),
//!     );
//!
//! let docs = vec![
//!     Document::new().with("temperature", 64.0),
//!     Document::new().with("temperature", 70.0),
//!     Document::new().with("temperature", 40.0),
//! ];
//! let out = pipeline.evaluate(docs);
//! assert_eq!(out[0].get("avg"), Some(&Value::Float(67.0)));
//! assert_eq!(out[0].get("n"), Some(&Value::Int(2)));
//! ```

use std::cmp::Ordering;

use thermostat_types::{Document, Value};

/// Field holding the group key in `$group` output documents.
pub const GROUP_ID: &str = "_id";

/// Comparison operator of a [`Filter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    /// Equal.
    Eq,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Gte,
    /// Less than.
    Lt,
    /// Less than or equal.
    Lte,
}

impl Comparison {
    /// SQL spelling of the operator.
    pub fn as_sql(&self) -> &'static str {
        match self {
            Comparison::Eq => "=",
            Comparison::Gt => ">",
            Comparison::Gte => ">=",
            Comparison::Lt => "<",
            Comparison::Lte => "<=",
        }
    }

    fn holds(&self, ordering: Ordering) -> bool {
        match self {
            Comparison::Eq => ordering == Ordering::Equal,
            Comparison::Gt => ordering == Ordering::Greater,
            Comparison::Gte => ordering != Ordering::Less,
            Comparison::Lt => ordering == Ordering::Less,
            Comparison::Lte => ordering != Ordering::Greater,
        }
    }
}

/// A single-field comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    /// Field to compare.
    pub field: String,
    /// Operator.
    pub op: Comparison,
    /// Right-hand side.
    pub value: Value,
}

impl Filter {
    /// Build a filter.
    pub fn new(field: impl Into<String>, op: Comparison, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    /// `field == value`
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, Comparison::Eq, value)
    }

    /// `field > value`
    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, Comparison::Gt, value)
    }

    /// `field >= value`
    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, Comparison::Gte, value)
    }

    /// `field < value`
    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, Comparison::Lt, value)
    }

    /// `field <= value`
    pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, Comparison::Lte, value)
    }

    /// Whether a document satisfies the filter.
    ///
    /// Missing fields never match, and values only compare against values of
    /// the same kind (numbers with numbers, timestamps with timestamps, ...).
    pub fn matches(&self, doc: &Document) -> bool {
        let Some(actual) = doc.get(&self.field) else {
            return false;
        };
        if !same_kind(actual, &self.value) {
            return false;
        }
        self.op.holds(actual.sort_cmp(&self.value))
    }
}

fn same_kind(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => true,
        _ => std::mem::discriminant(a) == std::mem::discriminant(b),
    }
}

/// Operand of a [`Accumulator::Sum`].
#[derive(Debug, Clone, PartialEq)]
pub enum SumOperand {
    /// Add this constant once per document (`{"$sum": 1}` counts).
    Constant(i64),
    /// Add the numeric value of this field.
    Field(String),
}

/// An accumulator of a [`Group`] stage.
#[derive(Debug, Clone, PartialEq)]
pub enum Accumulator {
    /// Sum of a constant or a field.
    Sum(SumOperand),
    /// Mean of a numeric field.
    Avg(String),
    /// Smallest value of a field.
    Min(String),
    /// Largest value of a field.
    Max(String),
}

impl Accumulator {
    /// Count documents.
    pub fn count() -> Self {
        Accumulator::Sum(SumOperand::Constant(1))
    }

    /// Sum a field.
    pub fn sum(field: impl Into<String>) -> Self {
        Accumulator::Sum(SumOperand::Field(field.into()))
    }

    /// Average a field.
    pub fn avg(field: impl Into<String>) -> Self {
        Accumulator::Avg(field.into())
    }

    /// Minimum of a field.
    pub fn min(field: impl Into<String>) -> Self {
        Accumulator::Min(field.into())
    }

    /// Maximum of a field.
    pub fn max(field: impl Into<String>) -> Self {
        Accumulator::Max(field.into())
    }
}

/// A `$group` stage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Group {
    /// Field to group by; `None` folds every document into one group.
    pub key: Option<String>,
    /// Output field name and accumulator, in output order.
    pub accumulators: Vec<(String, Accumulator)>,
}

impl Group {
    /// Group every document together.
    pub fn all() -> Self {
        Self::default()
    }

    /// Group by the value of a field.
    pub fn by(field: impl Into<String>) -> Self {
        Self {
            key: Some(field.into()),
            accumulators: Vec::new(),
        }
    }

    /// Add an output field.
    pub fn accumulate(mut self, name: impl Into<String>, accumulator: Accumulator) -> Self {
        self.accumulators.push((name.into(), accumulator));
        self
    }
}

/// One pipeline stage.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    /// Keep documents matching the filter.
    Match(Filter),
    /// Fold documents into groups.
    Group(Group),
}

/// An ordered list of stages.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    /// Create an empty pipeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a `$match` stage.
    pub fn match_stage(mut self, filter: Filter) -> Self {
        self.stages.push(Stage::Match(filter));
        self
    }

    /// Append a `$group` stage.
    pub fn group(mut self, group: Group) -> Self {
        self.stages.push(Stage::Group(group));
        self
    }

    /// The stages in order.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Run the pipeline over a set of documents.
    pub fn evaluate(&self, docs: Vec<Document>) -> Vec<Document> {
        evaluate_stages(&self.stages, docs)
    }
}

/// Run a slice of stages over a set of documents.
pub fn evaluate_stages(stages: &[Stage], docs: Vec<Document>) -> Vec<Document> {
    stages.iter().fold(docs, |docs, stage| match stage {
        Stage::Match(filter) => docs.into_iter().filter(|d| filter.matches(d)).collect(),
        Stage::Group(group) => run_group(group, docs),
    })
}

#[derive(Debug)]
enum AccState {
    Sum { ints: i64, floats: f64, saw_float: bool },
    Avg { total: f64, n: u64 },
    Extreme { best: Option<Value>, keep: Ordering },
}

impl AccState {
    fn new(acc: &Accumulator) -> Self {
        match acc {
            Accumulator::Sum(_) => AccState::Sum {
                ints: 0,
                floats: 0.0,
                saw_float: false,
            },
            Accumulator::Avg(_) => AccState::Avg { total: 0.0, n: 0 },
            Accumulator::Min(_) => AccState::Extreme {
                best: None,
                keep: Ordering::Less,
            },
            Accumulator::Max(_) => AccState::Extreme {
                best: None,
                keep: Ordering::Greater,
            },
        }
    }

    fn feed(&mut self, acc: &Accumulator, doc: &Document) {
        match (self, acc) {
            (AccState::Sum { ints, .. }, Accumulator::Sum(SumOperand::Constant(c))) => {
                *ints = ints.saturating_add(*c);
            }
            (
                AccState::Sum {
                    ints,
                    floats,
                    saw_float,
                },
                Accumulator::Sum(SumOperand::Field(field)),
            ) => match doc.get(field) {
                Some(Value::Int(v)) => *ints = ints.saturating_add(*v),
                Some(Value::Float(v)) => {
                    *floats += v;
                    *saw_float = true;
                }
                _ => {}
            },
            (AccState::Avg { total, n }, Accumulator::Avg(field)) => {
                if let Some(v) = doc.get(field).and_then(Value::as_f64) {
                    *total += v;
                    *n += 1;
                }
            }
            (
                AccState::Extreme { best, keep },
                Accumulator::Min(field) | Accumulator::Max(field),
            ) => {
                if let Some(v) = doc.get(field).filter(|v| !v.is_null()) {
                    let replace = match best {
                        Some(current) => v.sort_cmp(current) == *keep,
                        None => true,
                    };
                    if replace {
                        *best = Some(v.clone());
                    }
                }
            }
            _ => {}
        }
    }

    fn finish(self) -> Value {
        match self {
            AccState::Sum {
                ints,
                floats,
                saw_float,
            } => {
                if saw_float {
                    Value::Float(ints as f64 + floats)
                } else {
                    Value::Int(ints)
                }
            }
            AccState::Avg { total, n } => {
                if n == 0 {
                    Value::Null
                } else {
                    Value::Float(total / n as f64)
                }
            }
            AccState::Extreme { best, .. } => best.unwrap_or(Value::Null),
        }
    }
}

fn run_group(group: &Group, docs: Vec<Document>) -> Vec<Document> {
    let mut groups: Vec<(Value, Vec<AccState>)> = Vec::new();

    for doc in &docs {
        let key = match &group.key {
            Some(field) => doc.get(field).cloned().unwrap_or(Value::Null),
            None => Value::Null,
        };

        let idx = match groups
            .iter()
            .position(|(k, _)| k.sort_cmp(&key) == Ordering::Equal)
        {
            Some(idx) => idx,
            None => {
                let states = group
                    .accumulators
                    .iter()
                    .map(|(_, acc)| AccState::new(acc))
                    .collect();
                groups.push((key, states));
                groups.len() - 1
            }
        };

        let states = &mut groups[idx].1;
        for (state, (_, acc)) in states.iter_mut().zip(&group.accumulators) {
            state.feed(acc, doc);
        }
    }

    groups
        .into_iter()
        .map(|(key, states)| {
            let mut out = Document::new().with(GROUP_ID, key);
            for (state, (name, _)) in states.into_iter().zip(&group.accumulators) {
                out.insert(name.clone(), state.finish());
            }
            out
        })
        .collect()
}
