#![warn(missing_docs)]

//! `mp4check` is an MPEG-4 / ISO base media file validator.
//!
//! The validator walks the recursively nested box tree of an MP4 file, enforcing the
//! cardinality, ordering and version rules of each box type, and descends into the embedded
//! bit-level descriptor and codec-configuration streams (MPEG-4 elementary stream descriptors,
//! AAC AudioSpecificConfig, MPEG-4 Visual VOL headers, H.264 parameter sets) to validate them
//! against their respective specifications. After the movie box is parsed, the per-track sample
//! tables are cross-checked and the physical chunk layout is verified across tracks.
//!
//! Findings are collected as [`Finding`] values: errors are specification violations, warnings
//! are legal-but-suspect constructs. A malformed region that cannot be parsed at all (truncated
//! input, impossible box sizes) aborts validation with an [`Error`] instead.
//!
//! # Usage
//!
//! The main entry points are [`validate`]/[`validate_with_config`], which take any
//! [`ByteSource`]: an in-memory buffer or a [`FileSource`] both work, since validation is
//! offset-addressed rather than streaming.
//!
//! ```
//! let empty: &[u8] = &[];
//! let outcome = mp4check::validate(&empty).unwrap();
//!
//! // An empty input has no ftyp or moov box.
//! assert!(outcome.has_errors());
//! ```

#[macro_use]
mod macros;

pub mod bits;
pub mod codec;
pub mod descriptors;
pub mod diag;
pub mod error;
mod overlap;
pub mod parse;
pub mod source;
pub mod track;
mod validate;
pub mod walk;

use derive_builder::Builder;

use crate::walk::ValidationContext;

//
// public types
//

pub use diag::{Finding, FindingKind, Severity};
pub use error::{Error, ParseError, Report};
pub use source::{ByteSource, FileSource};

/// Configuration for the validator.
#[derive(Builder, Clone, Debug)]
#[builder(build_fn(name = "try_build"))]
pub struct Config {
    /// The maximum size of any single box payload read into memory.
    ///
    /// This bounds memory consumption on adversarial inputs; boxes larger than this fail
    /// validation rather than being loaded.
    ///
    /// The default is 1 GiB.
    #[builder(default = "1024 * 1024 * 1024")]
    pub max_payload_size: u64,
}

/// The result of a completed validation run.
#[derive(Debug)]
pub struct ValidationOutcome {
    /// Every finding recorded during the run, in the order it was found.
    pub findings: Vec<Finding>,
}

//
// public functions
//

/// Validate an MP4 input, with the default [`Config`].
///
/// # Errors
///
/// Returns an [`Error`] when the input cannot be parsed far enough to validate: a truncated
/// file, or box sizes that make the tree unresolvable. Ordinary specification violations are
/// reported as [`Finding`]s in the returned [`ValidationOutcome`] instead.
pub fn validate<S: ByteSource>(input: &S) -> Result<ValidationOutcome, Error> {
    validate_with_config(input, Config::default())
}

/// Validate an MP4 input, with the given [`Config`].
///
/// # Errors
///
/// See [`validate`].
pub fn validate_with_config<S: ByteSource>(input: &S, config: Config) -> Result<ValidationOutcome, Error> {
    log::debug!("validating {} bytes", input.len());
    let mut ctx = ValidationContext::new(input, &config);
    validate::validate_file(&mut ctx)?;
    let outcome = ValidationOutcome { findings: ctx.diags.into_findings() };
    log::debug!(
        "validation finished: {} errors, {} warnings",
        outcome.error_count(),
        outcome.findings.len() - outcome.error_count(),
    );
    Ok(outcome)
}

//
// Config impls
//

impl Config {
    /// Construct a builder for `Config`.
    ///
    /// See the documentation for [`ConfigBuilder`].
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::builder().build()
    }
}

//
// ConfigBuilder impls
//

impl ConfigBuilder {
    /// Build a new [`Config`].
    pub fn build(&self) -> Config {
        self.try_build().unwrap()
    }
}

//
// ValidationOutcome impls
//

impl ValidationOutcome {
    /// Whether any error-severity finding was recorded.
    pub fn has_errors(&self) -> bool {
        self.findings.iter().any(|finding| finding.severity == Severity::Error)
    }

    /// The number of error-severity findings.
    pub fn error_count(&self) -> usize {
        self.findings.iter().filter(|finding| finding.severity == Severity::Error).count()
    }

    /// The findings of the given severity.
    pub fn with_severity(&self, severity: Severity) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(move |finding| finding.severity == severity)
    }
}
