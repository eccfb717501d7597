use std::collections::HashMap;

use record::{Record, Value};

use crate::{Error, ParamStyle};

/// One parsed span of a canonical query: literal SQL text passed through
/// verbatim, or a named parameter occurrence.
#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Param(String),
}

/// SqlTemplate is a canonical query parsed once into literal and parameter
/// segments. The scanner recognizes the two canonical placeholder forms
/// (`:name` and `%(name)s`) and leaves occurrences inside string literals,
/// quoted identifiers, comments, and `::` casts untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlTemplate {
    segments: Vec<Segment>,
    // Distinct parameter names, in first-occurrence order.
    names: Vec<String>,
}

impl SqlTemplate {
    pub fn parse(sql: &str) -> Result<Self, Error> {
        let bytes = sql.as_bytes();
        let mut segments = Vec::new();
        let mut names: Vec<String> = Vec::new();
        let mut detected: Option<ParamStyle> = None;

        let mut lit_start = 0;
        let mut i = 0;

        let detect = |style: ParamStyle, detected: &mut Option<ParamStyle>| match *detected {
            Some(d) if d != style => Err(Error::MixedStyles),
            _ => {
                *detected = Some(style);
                Ok(())
            }
        };

        while i < bytes.len() {
            match bytes[i] {
                // String literals and quoted identifiers, with '' doubling.
                q @ (b'\'' | b'"' | b'`') => {
                    let at = i;
                    i += 1;
                    loop {
                        match bytes[i..].iter().position(|&b| b == q) {
                            Some(rel) if bytes.get(i + rel + 1) == Some(&q) => {
                                i += rel + 2;
                            }
                            Some(rel) => {
                                i += rel + 1;
                                break;
                            }
                            None => {
                                return Err(Error::Unterminated {
                                    what: if q == b'\'' {
                                        "string literal"
                                    } else {
                                        "quoted identifier"
                                    },
                                    at,
                                })
                            }
                        }
                    }
                }
                b'-' if bytes.get(i + 1) == Some(&b'-') => {
                    match bytes[i..].iter().position(|&b| b == b'\n') {
                        Some(rel) => i += rel + 1,
                        None => i = bytes.len(),
                    }
                }
                b'/' if bytes.get(i + 1) == Some(&b'*') => {
                    let at = i;
                    match bytes[i + 2..].windows(2).position(|w| w == b"*/") {
                        Some(rel) => i += rel + 4,
                        None => {
                            return Err(Error::Unterminated {
                                what: "block comment",
                                at,
                            })
                        }
                    }
                }
                b':' => {
                    // A '::' cast, or a colon glued to the preceding word, is
                    // not a placeholder.
                    if bytes.get(i + 1) == Some(&b':') {
                        i += 2;
                        continue;
                    }
                    if i > 0 && is_word(bytes[i - 1]) {
                        i += 1;
                        continue;
                    }
                    let Some(end) = scan_name(bytes, i + 1) else {
                        i += 1;
                        continue;
                    };
                    detect(ParamStyle::Named, &mut detected)?;

                    push_literal(&mut segments, &sql[lit_start..i]);
                    let name = sql[i + 1..end].to_string();
                    if !names.contains(&name) {
                        names.push(name.clone());
                    }
                    segments.push(Segment::Param(name));
                    i = end;
                    lit_start = i;
                }
                b'%' => {
                    if bytes.get(i + 1) != Some(&b'(') || (i > 0 && is_word(bytes[i - 1])) {
                        i += 1;
                        continue;
                    }
                    let Some(end) = scan_name(bytes, i + 2) else {
                        return Err(Error::MalformedPlaceholder { at: i });
                    };
                    if bytes.get(end) != Some(&b')') || bytes.get(end + 1) != Some(&b's') {
                        return Err(Error::MalformedPlaceholder { at: i });
                    }
                    detect(ParamStyle::NamedPercent, &mut detected)?;

                    push_literal(&mut segments, &sql[lit_start..i]);
                    let name = sql[i + 2..end].to_string();
                    if !names.contains(&name) {
                        names.push(name.clone());
                    }
                    segments.push(Segment::Param(name));
                    i = end + 2;
                    lit_start = i;
                }
                _ => i += 1,
            }
        }
        push_literal(&mut segments, &sql[lit_start..]);

        Ok(Self { segments, names })
    }

    /// Distinct parameter names referenced by the query, in first-occurrence
    /// order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Parameter names with one entry per textual occurrence.
    pub fn occurrences(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Param(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Re-emit the query in the target style, paired with its binder plan.
    pub fn render(&self, style: ParamStyle) -> Statement {
        use std::fmt::Write;

        let mut sql = String::new();
        let mut occurrences = Vec::new();

        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => sql.push_str(text),
                Segment::Param(name) => {
                    match style {
                        ParamStyle::Named => write!(sql, ":{name}").unwrap(),
                        ParamStyle::NamedPercent => write!(sql, "%({name})s").unwrap(),
                        ParamStyle::Qmark => sql.push('?'),
                        ParamStyle::Format => sql.push_str("%s"),
                        ParamStyle::Numbered => {
                            // Repeated uses of one name share its number.
                            let n = self.names.iter().position(|x| x == name).unwrap() + 1;
                            write!(sql, ":{n}").unwrap();
                        }
                    }
                    occurrences.push(name.clone());
                }
            }
        }

        let plan = match style {
            ParamStyle::Named | ParamStyle::NamedPercent => BindPlan::Named(self.names.clone()),
            ParamStyle::Qmark | ParamStyle::Format => BindPlan::Positional(occurrences),
            ParamStyle::Numbered => BindPlan::Positional(self.names.clone()),
        };

        Statement { sql, style, plan }
    }
}

fn push_literal(segments: &mut Vec<Segment>, text: &str) {
    if !text.is_empty() {
        segments.push(Segment::Literal(text.to_string()));
    }
}

fn is_word(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

// Scan an identifier starting at `start`; returns the exclusive end, or None
// if no identifier begins there.
fn scan_name(bytes: &[u8], start: usize) -> Option<usize> {
    match bytes.get(start) {
        Some(&b) if b.is_ascii_alphabetic() || b == b'_' => {}
        _ => return None,
    }
    let mut end = start + 1;
    while end < bytes.len() && is_word(bytes[end]) {
        end += 1;
    }
    Some(end)
}

/// The source of values for binding: a name-to-Value mapping, or a Record
/// (which resolves names with its usual normalized fallback). Names the query
/// doesn't reference are silently ignored; referenced names the source lacks
/// bind to SQL NULL.
pub trait ParamSource {
    fn param(&self, name: &str) -> Option<Value>;
}

/// No parameters at all, for statements which bind nothing.
impl ParamSource for () {
    fn param(&self, _name: &str) -> Option<Value> {
        None
    }
}

impl ParamSource for HashMap<String, Value> {
    fn param(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }
}

impl ParamSource for Record {
    fn param(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }
}

impl<P: ParamSource> ParamSource for &P {
    fn param(&self, name: &str) -> Option<Value> {
        (*self).param(name)
    }
}

/// The parameter payload shape a driver accepts.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Named(Vec<(String, Value)>),
    Positional(Vec<Value>),
}

impl Payload {
    pub fn len(&self) -> usize {
        match self {
            Payload::Named(p) => p.len(),
            Payload::Positional(p) => p.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
enum BindPlan {
    // Distinct referenced names; the payload is a mapping.
    Named(Vec<String>),
    // One name per payload slot, in slot order.
    Positional(Vec<String>),
}

/// Statement is a query translated to one driver style, with the binder plan
/// that shapes a name-to-value mapping into that driver's payload. Built once
/// per canonical query and reusable for any number of executions.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    sql: String,
    style: ParamStyle,
    plan: BindPlan,
}

impl Statement {
    /// A parameterless statement in the given style.
    pub fn raw(sql: impl Into<String>, style: ParamStyle) -> Self {
        Self {
            sql: sql.into(),
            style,
            plan: if style.is_positional() {
                BindPlan::Positional(Vec::new())
            } else {
                BindPlan::Named(Vec::new())
            },
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn style(&self) -> ParamStyle {
        self.style
    }

    /// The names this statement binds, one per payload slot (positional) or
    /// one per distinct referenced name (named).
    pub fn bound_names(&self) -> &[String] {
        match &self.plan {
            BindPlan::Named(names) | BindPlan::Positional(names) => names,
        }
    }

    /// Shape `params` into the driver payload. Missing names bind NULL;
    /// extra names are ignored, so one payload may drive several queries.
    pub fn bind<P: ParamSource>(&self, params: &P) -> Payload {
        match &self.plan {
            BindPlan::Named(names) => Payload::Named(
                names
                    .iter()
                    .map(|n| (n.clone(), params.param(n).unwrap_or(Value::Null)))
                    .collect(),
            ),
            BindPlan::Positional(names) => Payload::Positional(
                names
                    .iter()
                    .map(|n| params.param(n).unwrap_or(Value::Null))
                    .collect(),
            ),
        }
    }
}
