use crate::Error;

/// The closed set of driver parameter placeholder styles. Canonical source
/// queries are written in `Named` or `NamedPercent` form; the remaining
/// styles exist only as translation targets declared by drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamStyle {
    /// `WHERE id = :id`
    Named,
    /// `WHERE id = %(id)s`
    NamedPercent,
    /// `WHERE id = ?`
    Qmark,
    /// `WHERE id = %s`
    Format,
    /// `WHERE id = :1`
    Numbered,
}

impl ParamStyle {
    /// Positional styles bind a sequence; named styles bind a mapping.
    pub fn is_positional(&self) -> bool {
        matches!(
            self,
            ParamStyle::Qmark | ParamStyle::Format | ParamStyle::Numbered
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ParamStyle::Named => "named",
            ParamStyle::NamedPercent => "pyformat",
            ParamStyle::Qmark => "qmark",
            ParamStyle::Format => "format",
            ParamStyle::Numbered => "numeric",
        }
    }
}

impl std::fmt::Display for ParamStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ParamStyle {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "named" => Ok(ParamStyle::Named),
            "pyformat" | "named_percent" => Ok(ParamStyle::NamedPercent),
            "qmark" | "question_mark" => Ok(ParamStyle::Qmark),
            "format" | "percent" => Ok(ParamStyle::Format),
            "numeric" | "numbered" => Ok(ParamStyle::Numbered),
            other => Err(Error::UnknownStyle {
                style: other.to_string(),
            }),
        }
    }
}
