use drivers::SharedCursor;
use record::{Record, Value};

use crate::lookup::{CacheMode, Lookup, Validate};
use crate::Error;

/// A transform failing on one value is soft: the row's column goes NULL and
/// the table's error counter moves. Misconfiguration and database failures
/// are fatal and propagate.
#[derive(thiserror::Error, Debug)]
pub enum TransformError {
    #[error("{0}")]
    Soft(String),
    #[error(transparent)]
    Fatal(#[from] Error),
}

pub type ValueFn = Box<dyn Fn(&Value) -> Result<Value, String>>;
pub type RecordFn = Box<dyn Fn(&Record) -> Result<Value, String>>;

/// One stage of a column's transform pipeline: a named builtin or user
/// closure over the current value, a closure over the whole source record,
/// or a reference-table lookup or validation.
pub enum Transform {
    Func { label: String, f: ValueFn },
    RecordFunc { label: String, f: RecordFn },
    Lookup(Lookup),
    Validate(Validate),
}

impl std::fmt::Debug for Transform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transform::Func { label, .. } => write!(f, "Func({label})"),
            Transform::RecordFunc { label, .. } => write!(f, "RecordFunc({label})"),
            Transform::Lookup(l) => write!(f, "Lookup({})", l.table()),
            Transform::Validate(v) => write!(f, "Validate({})", v.table()),
        }
    }
}

impl Transform {
    pub fn func(label: impl Into<String>, f: impl Fn(&Value) -> Result<Value, String> + 'static) -> Self {
        Transform::Func {
            label: label.into(),
            f: Box::new(f),
        }
    }

    pub fn record_func(
        label: impl Into<String>,
        f: impl Fn(&Record) -> Result<Value, String> + 'static,
    ) -> Self {
        Transform::RecordFunc {
            label: label.into(),
            f: Box::new(f),
        }
    }

    /// Does this transform consume the whole source record rather than the
    /// current value?
    pub fn takes_record(&self) -> bool {
        matches!(
            self,
            Transform::RecordFunc { .. } | Transform::Lookup(_) | Transform::Validate(_)
        )
    }

    pub(crate) fn apply(&self, value: Value, record: &Record) -> Result<Value, TransformError> {
        match self {
            Transform::Func { f, .. } => f(&value).map_err(TransformError::Soft),
            Transform::RecordFunc { f, .. } => f(record).map_err(TransformError::Soft),
            Transform::Lookup(lookup) => Ok(lookup.transform(record)?),
            Transform::Validate(validate) => validate.check(value, record),
        }
    }

    /// Resolve a string shorthand to a transform. Unknown shorthands and
    /// malformed arguments fail here, at table construction, never mid-run.
    pub fn parse(spec: &str, cursor: &SharedCursor) -> Result<Transform, Error> {
        let mut parts = spec.split(':');
        let head = parts.next().unwrap_or_default();
        let args: Vec<&str> = parts.collect();

        let arity = |min: usize, max: usize| -> Result<(), Error> {
            if args.len() < min || args.len() > max {
                Err(Error::InvalidTransform {
                    spec: spec.to_string(),
                    reason: "wrong number of arguments".to_string(),
                })
            } else {
                Ok(())
            }
        };

        match head {
            "int" => {
                arity(0, 1)?;
                let default = match args.first() {
                    Some(arg) => Some(arg.parse::<i64>().map_err(|_| Error::InvalidTransform {
                        spec: spec.to_string(),
                        reason: "default is not an integer".to_string(),
                    })?),
                    None => None,
                };
                Ok(Transform::func(spec, move |v| to_int(v, default)))
            }
            "float" => {
                arity(0, 0)?;
                Ok(Transform::func(spec, to_float))
            }
            "bool" => {
                arity(0, 0)?;
                Ok(Transform::func(spec, to_bool))
            }
            "digits" => {
                arity(0, 0)?;
                Ok(Transform::func(spec, digits))
            }
            "number" => {
                arity(0, 0)?;
                Ok(Transform::func(spec, number))
            }
            "lower" => {
                arity(0, 0)?;
                Ok(Transform::func(spec, |v| Ok(map_text(v, str::to_lowercase))))
            }
            "upper" => {
                arity(0, 0)?;
                Ok(Transform::func(spec, |v| Ok(map_text(v, str::to_uppercase))))
            }
            "strip" => {
                arity(0, 0)?;
                Ok(Transform::func(spec, |v| {
                    Ok(map_text(v, |s| s.trim().to_string()))
                }))
            }
            "maxlen" => {
                arity(1, 1)?;
                let n = args[0].parse::<usize>().map_err(|_| Error::InvalidTransform {
                    spec: spec.to_string(),
                    reason: "length is not an integer".to_string(),
                })?;
                Ok(Transform::func(spec, move |v| {
                    Ok(map_text(v, |s| s.chars().take(n).collect()))
                }))
            }
            "indicator" => {
                arity(0, 1)?;
                let (yes, no) = match args.first() {
                    None => ("Y".to_string(), "N".to_string()),
                    Some(&"inv") => ("N".to_string(), "Y".to_string()),
                    Some(pair) => match pair.split_once('/') {
                        Some((yes, no)) => (yes.to_string(), no.to_string()),
                        None => {
                            return Err(Error::InvalidTransform {
                                spec: spec.to_string(),
                                reason: "expected 'inv' or a 'T/F' pair".to_string(),
                            })
                        }
                    },
                };
                Ok(Transform::func(spec, move |v| {
                    Ok(Value::Text(if truthy(v) { yes.clone() } else { no.clone() }))
                }))
            }
            "split" => {
                arity(1, usize::MAX)?;
                // The delimiter may itself contain ':'.
                let delim = args.join(":");
                Ok(Transform::func(spec, move |v| split(v, &delim)))
            }
            "nth" => {
                arity(1, usize::MAX)?;
                let n = args[0].parse::<usize>().map_err(|_| Error::InvalidTransform {
                    spec: spec.to_string(),
                    reason: "index is not an integer".to_string(),
                })?;
                let delim = if args.len() > 1 {
                    Some(args[1..].join(":"))
                } else {
                    None
                };
                Ok(Transform::func(spec, move |v| nth(v, n, delim.as_deref())))
            }
            "lookup" => {
                arity(2, 4)?;
                let table = args[0].to_string();
                let keys = csv(args[1]);
                let returns = csv(args.get(2).copied().unwrap_or_default());
                if returns.is_empty() {
                    return Err(Error::InvalidTransform {
                        spec: spec.to_string(),
                        reason: "lookup requires at least one return column".to_string(),
                    });
                }
                let mode = cache_mode(spec, args.get(3))?;
                Ok(Transform::Lookup(Lookup::new(
                    cursor.clone(),
                    table,
                    keys,
                    returns,
                    mode,
                )))
            }
            "validate" => {
                arity(2, 3)?;
                let table = args[0].to_string();
                let keys = csv(args[1]);
                let mode = cache_mode(spec, args.get(2))?;
                Ok(Transform::Validate(Validate::new(
                    cursor.clone(),
                    table,
                    keys,
                    mode,
                )))
            }
            _ => Err(Error::UnknownTransform {
                spec: spec.to_string(),
            }),
        }
    }
}

fn csv(arg: &str) -> Vec<String> {
    arg.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn cache_mode(spec: &str, arg: Option<&&str>) -> Result<CacheMode, Error> {
    match arg {
        None => Ok(CacheMode::Lazy),
        Some(&"preload") => Ok(CacheMode::Preload),
        Some(&"lazy") => Ok(CacheMode::Lazy),
        Some(&"none") => Ok(CacheMode::None),
        Some(other) => Err(Error::InvalidTransform {
            spec: spec.to_string(),
            reason: format!("unknown cache mode {other:?}"),
        }),
    }
}

fn to_int(v: &Value, default: Option<i64>) -> Result<Value, String> {
    let fallback = || match default {
        Some(d) => Ok(Value::Integer(d)),
        None => Err(format!("cannot convert {v} to integer")),
    };
    match v {
        Value::Null => Ok(Value::Null),
        Value::Integer(i) => Ok(Value::Integer(*i)),
        Value::Bool(b) => Ok(Value::Integer(*b as i64)),
        Value::Float(f) => Ok(Value::Integer(*f as i64)),
        Value::Text(s) => {
            let t = s.trim();
            if let Ok(i) = t.parse::<i64>() {
                Ok(Value::Integer(i))
            } else if let Ok(f) = t.parse::<f64>() {
                Ok(Value::Integer(f as i64))
            } else {
                fallback()
            }
        }
        _ => fallback(),
    }
}

fn to_float(v: &Value) -> Result<Value, String> {
    match v {
        Value::Null => Ok(Value::Null),
        Value::Float(f) => Ok(Value::Float(*f)),
        Value::Integer(i) => Ok(Value::Float(*i as f64)),
        Value::Text(s) => s
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| format!("cannot convert {s:?} to float")),
        other => Err(format!("cannot convert {} to float", other.type_name())),
    }
}

fn to_bool(v: &Value) -> Result<Value, String> {
    match v {
        Value::Null => Ok(Value::Null),
        Value::Bool(b) => Ok(Value::Bool(*b)),
        Value::Integer(i) => Ok(Value::Bool(*i != 0)),
        Value::Text(s) => match s.trim().to_lowercase().as_str() {
            "t" | "true" | "y" | "yes" | "1" => Ok(Value::Bool(true)),
            "f" | "false" | "n" | "no" | "0" | "" => Ok(Value::Bool(false)),
            other => Err(format!("cannot convert {other:?} to bool")),
        },
        other => Err(format!("cannot convert {} to bool", other.type_name())),
    }
}

fn digits(v: &Value) -> Result<Value, String> {
    match v {
        Value::Null => Ok(Value::Null),
        Value::Integer(i) => Ok(Value::Integer(*i)),
        Value::Text(s) => Ok(Value::Text(
            s.chars().filter(char::is_ascii_digit).collect(),
        )),
        other => Err(format!("cannot extract digits from {}", other.type_name())),
    }
}

fn number(v: &Value) -> Result<Value, String> {
    match v {
        Value::Null => Ok(Value::Null),
        Value::Integer(i) => Ok(Value::Integer(*i)),
        Value::Float(f) => Ok(Value::Float(*f)),
        Value::Text(s) => {
            let filtered: String = s
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
                .collect();
            if let Ok(i) = filtered.parse::<i64>() {
                Ok(Value::Integer(i))
            } else if let Ok(f) = filtered.parse::<f64>() {
                Ok(Value::Float(f))
            } else {
                Err(format!("no number in {s:?}"))
            }
        }
        other => Err(format!("cannot extract a number from {}", other.type_name())),
    }
}

// Text transforms pass non-text values through untouched.
fn map_text(v: &Value, f: impl Fn(&str) -> String) -> Value {
    match v {
        Value::Text(s) => Value::Text(f(s)),
        other => other.clone(),
    }
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Integer(i) => *i != 0,
        Value::Float(f) => *f != 0.0,
        Value::Text(s) => !s.is_empty(),
        Value::Blob(b) => !b.is_empty(),
        Value::List(l) => !l.is_empty(),
    }
}

fn split(v: &Value, delim: &str) -> Result<Value, String> {
    match v {
        Value::Null => Ok(Value::Null),
        Value::List(l) => Ok(Value::List(l.clone())),
        Value::Text(s) => Ok(Value::List(
            s.split(delim).map(|p| Value::Text(p.to_string())).collect(),
        )),
        other => Err(format!("cannot split {}", other.type_name())),
    }
}

fn nth(v: &Value, n: usize, delim: Option<&str>) -> Result<Value, String> {
    match v {
        Value::Null => Ok(Value::Null),
        Value::List(l) => Ok(l.get(n).cloned().unwrap_or(Value::Null)),
        Value::Text(s) => {
            let part = match delim {
                Some(d) => s.split(d).nth(n).map(str::to_string),
                None => s.split_whitespace().nth(n).map(str::to_string),
            };
            Ok(part.map(Value::Text).unwrap_or(Value::Null))
        }
        other => Err(format!("cannot index into {}", other.type_name())),
    }
}
