use drivers::SharedCursor;
use record::Value;

use crate::transform::Transform;
use crate::{Error, Op};

/// Where a column's value comes from in the source record.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Source {
    #[default]
    None,
    Field(String),
    Fields(Vec<String>),
    /// The whole-record sentinel (`"*"`): the first transform receives the
    /// full source record.
    Whole,
}

/// A database-side expression template. With a `#` placeholder the resolved
/// value binds into the expression; without one the expression stands alone
/// and the resolved value is discarded.
#[derive(Debug, Clone, PartialEq)]
pub struct DbExpr {
    pub(crate) text: String,
    pub(crate) slot: bool,
}

impl DbExpr {
    pub(crate) fn parse(text: &str, column: &str) -> Result<Self, Error> {
        let slots = text.matches('#').count();
        if slots > 1 {
            return Err(Error::DbExpr {
                column: column.to_string(),
            });
        }
        Ok(Self {
            text: text.to_string(),
            slot: slots == 1,
        })
    }

    // The SQL fragment this expression contributes, with `param` substituted
    // for the placeholder.
    pub(crate) fn render(&self, param: &str) -> String {
        if self.slot {
            self.text.replacen('#', param, 1)
        } else {
            self.text.clone()
        }
    }
}

/// How a column participates in one operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Participation {
    /// The operation's readiness bit requires this column non-null.
    pub required: bool,
    /// The column appears in the operation's value or set clause.
    pub in_sql: bool,
    /// The column appears in the operation's key predicate.
    pub is_key: bool,
}

/// The serde-shaped specification a column is built from.
#[derive(serde::Deserialize, Default, Debug)]
#[serde(deny_unknown_fields, default)]
pub struct ColumnSpec {
    pub name: String,
    pub source: Option<SourceSpec>,
    pub default: Option<Value>,
    /// Transform shorthands, resolved at table construction.
    pub transforms: Vec<String>,
    /// Programmatic transforms, applied after the shorthands.
    #[serde(skip)]
    pub functions: Vec<Transform>,
    pub db_expr: Option<String>,
    pub key: bool,
    /// Defaults to true for plain columns and false for key columns.
    pub nullable: Option<bool>,
    pub no_update: bool,
}

#[derive(serde::Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum SourceSpec {
    One(String),
    Many(Vec<String>),
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn source(mut self, field: impl Into<String>) -> Self {
        self.source = Some(SourceSpec::One(field.into()));
        self
    }

    pub fn sources<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.source = Some(SourceSpec::Many(
            fields.into_iter().map(Into::into).collect(),
        ));
        self
    }

    pub fn whole_record(mut self) -> Self {
        self.source = Some(SourceSpec::One("*".to_string()));
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn transform(mut self, shorthand: impl Into<String>) -> Self {
        self.transforms.push(shorthand.into());
        self
    }

    pub fn function(mut self, transform: Transform) -> Self {
        self.functions.push(transform);
        self
    }

    pub fn db_expr(mut self, expr: impl Into<String>) -> Self {
        self.db_expr = Some(expr.into());
        self
    }

    pub fn key(mut self) -> Self {
        self.key = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = Some(false);
        self
    }

    pub fn no_update(mut self) -> Self {
        self.no_update = true;
        self
    }
}

/// Column is the immutable per-target-column descriptor driving value
/// resolution and DML generation.
#[derive(Debug)]
pub struct Column {
    pub(crate) name: String,
    // Unique parameter name within the table, assigned at table construction.
    pub(crate) param: String,
    pub(crate) source: Source,
    pub(crate) default: Option<Value>,
    pub(crate) transforms: Vec<Transform>,
    pub(crate) db_expr: Option<DbExpr>,
    pub(crate) key: bool,
    pub(crate) nullable: bool,
    pub(crate) no_update: bool,
    pub(crate) participation: [Participation; 5],
}

impl Column {
    pub(crate) fn from_spec(spec: ColumnSpec, cursor: &SharedCursor) -> Result<Self, Error> {
        let ColumnSpec {
            name,
            source,
            default,
            transforms,
            functions,
            db_expr,
            key,
            nullable,
            no_update,
        } = spec;

        let source = match source {
            None => Source::None,
            Some(SourceSpec::One(f)) if f == "*" => Source::Whole,
            Some(SourceSpec::One(f)) => Source::Field(f),
            Some(SourceSpec::Many(fs)) => Source::Fields(fs),
        };

        let mut resolved: Vec<Transform> = Vec::with_capacity(transforms.len() + functions.len());
        for shorthand in &transforms {
            resolved.push(Transform::parse(shorthand, cursor)?);
        }
        resolved.extend(functions);

        // A whole-record source is consumed by its first transform; anything
        // else would silently resolve to NULL.
        if source == Source::Whole && !resolved.first().map_or(false, Transform::takes_record) {
            return Err(Error::RecordFnPlacement { column: name });
        }

        let db_expr = match db_expr {
            Some(text) => Some(DbExpr::parse(&text, &name)?),
            None => None,
        };

        let nullable = nullable.unwrap_or(!key);
        let contributes = source != Source::None
            || default.is_some()
            || db_expr.is_some()
            || !resolved.is_empty();

        let mut participation = [Participation::default(); 5];
        participation[Op::Insert.index()] = Participation {
            required: !nullable,
            in_sql: contributes,
            is_key: key,
        };
        participation[Op::Update.index()] = Participation {
            required: key,
            in_sql: contributes && !key && !no_update,
            is_key: key,
        };
        participation[Op::Delete.index()] = Participation {
            required: key,
            in_sql: false,
            is_key: key,
        };
        participation[Op::Merge.index()] = Participation {
            required: !nullable,
            in_sql: contributes,
            is_key: key,
        };
        participation[Op::Select.index()] = Participation {
            required: key,
            in_sql: true,
            is_key: key,
        };

        Ok(Self {
            param: record::normalize(&name),
            name,
            source,
            default,
            transforms: resolved,
            db_expr,
            key,
            nullable,
            no_update,
            participation,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_key(&self) -> bool {
        self.key
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    /// `required` is the complement of `nullable`.
    pub fn is_required(&self) -> bool {
        !self.nullable
    }

    pub fn is_no_update(&self) -> bool {
        self.no_update
    }

    pub fn participation(&self, op: Op) -> Participation {
        self.participation[op.index()]
    }

    /// The SQL fragment this column contributes to a VALUES or SET position:
    /// its db-expression when configured, else a bare parameter placeholder
    /// in canonical named style.
    pub fn value_sql(&self) -> String {
        let param = format!(":{}", self.param);
        match &self.db_expr {
            Some(expr) => expr.render(&param),
            None => param,
        }
    }

    /// Does this column bind a parameter (as opposed to a standalone
    /// database-side expression)?
    pub(crate) fn binds_param(&self) -> bool {
        match &self.db_expr {
            Some(expr) => expr.slot,
            None => true,
        }
    }
}
