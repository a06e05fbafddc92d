//! Error types returned by the public API.

use std::fmt;
use std::fmt::{Debug, Display};
use std::io;
use std::panic::Location;
use std::result::Result as StdResult;

use derive_more::Display;

use crate::parse::BoxType;

//
// public types
//

/// Error type returned by `mp4check`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An IO error occurred while reading the given input.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The input could not be parsed far enough to finish validation.
    ///
    /// The [`Report`] can be used to identify exactly where in the parser the error occurred; its
    /// [`Debug`] implementation prints a human-readable parser stack trace. Recoverable findings
    /// (constraint violations, cardinality problems, overlaps) are not errors of this kind; they
    /// are reported through [`ValidationOutcome`](crate::ValidationOutcome).
    #[error("Parse error: {0}")]
    Parse(#[from] Report),
}

/// Fatal parse error conditions which cut a validation unit short.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// The input ended before the end of a box or table.
    #[error("Truncated file")]
    TruncatedFile,

    /// A bit-level cursor ran out of data mid-structure.
    #[error("Out of data")]
    OutOfData,

    /// A box declared a size smaller than its own header.
    #[error("Bad box size")]
    BadBoxSize,

    /// A scoped bitstream finished with unconsumed data.
    #[error("Trailing data")]
    TrailingData,

    /// The input is invalid in a way that prevents further parsing.
    #[error("Invalid input")]
    InvalidInput,
}

/// A report carrying a [`ParseError`] plus a stack of debugging attachments.
#[derive(thiserror::Error)]
#[error("{error}")]
pub struct Report {
    #[source]
    error: ParseError,
    location: &'static Location<'static>,
    entries: Vec<ReportEntry>,
}

/// A convenience alias for a [`Result`](std::result::Result) whose error is a [`Report`].
pub type Result<T> = StdResult<T, Report>;

/// [`Report`]-related extensions for [`Result`](std::result::Result).
pub trait ResultExt: Sized {
    /// Attach a [`Display`]-able type to the error [`Report`]'s stack trace.
    #[track_caller]
    fn attach_printable<P: Display + Send + Sync + 'static>(self, printable: P) -> Self;

    /// Attach the message "while parsing `<box>` box" to the error [`Report`]'s stack trace.
    #[track_caller]
    fn while_parsing_box(self, box_type: BoxType) -> Self {
        self.attach_printable(WhileParsingBox(box_type))
    }

    /// Attach the message "while parsing `<box>` box field `<field>`" to the error [`Report`]'s
    /// stack trace.
    #[track_caller]
    fn while_parsing_field(self, box_type: BoxType, field_name: &'static str) -> Self {
        self.attach_printable(WhileParsingField(box_type, field_name))
    }
}

/// A [`Display`]-able indicating an error occurred while parsing a certain box.
#[derive(Clone, Copy, Debug, Display)]
#[display(fmt = "while parsing `{}` box", _0)]
pub struct WhileParsingBox(pub BoxType);

/// A [`Display`]-able indicating an error occurred while parsing a certain box field.
#[derive(Clone, Copy, Debug, Display)]
#[display(fmt = "while parsing `{}` box field `{}`", _0, _1)]
pub struct WhileParsingField(pub BoxType, pub &'static str);

/// A [`Display`]-able indicating an error occurred while parsing a certain descriptor.
#[derive(Clone, Copy, Debug, Display)]
#[display(fmt = "while parsing `{}` descriptor", _0)]
pub struct WhileParsingDescriptor(pub &'static str);

//
// private types
//

#[derive(Display)]
#[display(fmt = "{message} at {location}")]
struct ReportEntry {
    message: Box<dyn Display + Send + Sync + 'static>,
    location: &'static Location<'static>,
}

//
// Report impls
//

impl Report {
    /// Get the underlying [`ParseError`].
    pub fn get_ref(&self) -> &ParseError {
        &self.error
    }

    /// Unwrap this report, returning the underlying [`ParseError`].
    pub fn into_inner(self) -> ParseError {
        self.error
    }

    /// Attach a [`Display`]-able type to the stack trace.
    #[track_caller]
    pub fn attach_printable<P: Display + Send + Sync + 'static>(mut self, message: P) -> Self {
        let entry = ReportEntry { message: Box::new(message), location: Location::caller() };
        self.entries.push(entry);
        self
    }
}

impl From<ParseError> for Report {
    #[track_caller]
    fn from(error: ParseError) -> Self {
        Self { error, location: Location::caller(), entries: Vec::new() }
    }
}

impl Debug for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self { error, location, entries } = self;
        write!(f, "{error} at {location}")?;
        for entry in entries {
            write!(f, "\n - {entry}")?;
        }
        Ok(())
    }
}

//
// ResultExt impls
//

impl<T> ResultExt for Result<T> {
    #[track_caller]
    fn attach_printable<P: Display + Send + Sync + 'static>(self, printable: P) -> Self {
        match self {
            Ok(value) => Ok(value),
            Err(err) => Err(err.attach_printable(printable)),
        }
    }
}

impl<T> ResultExt for StdResult<T, Error> {
    #[track_caller]
    fn attach_printable<P: Display + Send + Sync + 'static>(self, printable: P) -> Self {
        match self {
            Err(Error::Parse(err)) => Err(Error::Parse(err.attach_printable(printable))),
            other => other,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const TEST_ATTACHMENT: &str = "test attachment";

    fn test_report() -> Report {
        report_attach!(ParseError::BadBoxSize, TEST_ATTACHMENT)
    }

    #[test]
    fn report_display_is_error_display() {
        assert_eq!(test_report().to_string(), ParseError::BadBoxSize.to_string());
    }

    #[test]
    fn report_debug_contains_attachments() {
        let report_debug = format!("{report:?}", report = test_report());
        assert!(report_debug.starts_with("Bad box size"));
        assert!(report_debug.contains(TEST_ATTACHMENT));
    }

    #[test]
    fn into_inner() {
        assert_eq!(test_report().into_inner(), ParseError::BadBoxSize);
    }
}
