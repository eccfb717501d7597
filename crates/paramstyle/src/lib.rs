#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("query mixes ':name' and '%(name)s' parameter styles")]
    MixedStyles,
    #[error("malformed '%(name)s' placeholder at byte {at}")]
    MalformedPlaceholder { at: usize },
    #[error("unterminated {what} starting at byte {at}")]
    Unterminated { what: &'static str, at: usize },
    #[error("unknown parameter style {style:?}")]
    UnknownStyle { style: String },
}

mod style;
mod template;

pub use style::ParamStyle;
pub use template::{ParamSource, Payload, SqlTemplate, Statement};
