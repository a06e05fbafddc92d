//! The per-box rule tables driving the box-tree walk: which children each box expects, with
//! what cardinality, and the field constraints of each box type.

use std::fmt::Display;

use crate::diag::FindingKind;
use crate::parse::{BoxType, FullBoxHeader};
use crate::walk::ValidationContext;

mod file;
mod mdia;
mod meta;
mod moov;
mod stbl;
mod stsd;
mod trak;
mod udta;

pub use file::validate_file;

/// Record a field-constraint finding when `actual != expected`.
pub(crate) fn expect_field<T>(ctx: &mut ValidationContext<'_>, name: &str, actual: T, expected: T)
where
    T: PartialEq + Display,
{
    if actual != expected {
        ctx.error(FindingKind::FieldConstraint, format!("{name} must be {expected} not {actual}"));
    }
}

/// Record a finding when a full box carries non-zero flags.
pub(crate) fn expect_flags_zero(ctx: &mut ValidationContext<'_>, box_type: BoxType, full: &FullBoxHeader) {
    if full.flags != 0 {
        ctx.error(
            FindingKind::FieldConstraint,
            format!("`{box_type}` flags must be 0 not 0x{:x}", full.flags),
        );
    }
}

/// Record a finding when a full box carries a non-zero version.
pub(crate) fn expect_version_zero(ctx: &mut ValidationContext<'_>, box_type: BoxType, full: &FullBoxHeader) {
    if full.version != 0 {
        ctx.error(
            FindingKind::FieldConstraint,
            format!("`{box_type}` version must be 0 not {}", full.version),
        );
    }
}
