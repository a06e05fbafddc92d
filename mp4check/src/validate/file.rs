//! File-level validation: the top-level box list and the `ftyp` box.

use bytes::Buf;

use crate::diag::FindingKind;
use crate::error::Result;
use crate::parse::{box_type, resolve_box_list, BoxType, FourCC, Mp4IntReaderExt};
use crate::walk::{validate_children, report_unknown_children, BoxPolicy, BoxRef, ValidationContext};

use super::{meta, moov};

/// Validate the whole file: resolve the top-level box list and dispatch `ftyp`, `moov` and
/// `meta` with their file-level cardinality rules.
pub fn validate_file(ctx: &mut ValidationContext<'_>) -> Result<()> {
    let headers = resolve_box_list(ctx.source, 0, ctx.source.len())?;
    let mut boxes: Vec<BoxRef> = headers.into_iter().map(BoxRef::new).collect();

    let result = validate_children(
        ctx,
        &mut boxes,
        box_type::FTYP,
        BoxPolicy::EXACTLY_ONE | BoxPolicy::MUST_BE_FIRST,
        validate_ftyp,
    );

    ctx.movie = None;
    let result = result.and(validate_children(
        ctx,
        &mut boxes,
        box_type::MOOV,
        BoxPolicy::EXACTLY_ONE,
        moov::validate_moov,
    ));

    let result = result.and(validate_children(
        ctx,
        &mut boxes,
        box_type::META,
        BoxPolicy::AT_MOST_ONE,
        meta::validate_meta,
    ));

    let result = result.and(validate_children(ctx, &mut boxes, box_type::UUID, BoxPolicy::empty(), validate_uuid));

    report_unknown_children(
        ctx,
        &boxes,
        "file",
        &[box_type::MDAT, box_type::FREE, box_type::SKIP],
    );

    result
}

/// Validate an `ftyp` box: brand layout and the major-brand-in-compatible-brands rule.
pub fn validate_ftyp(ctx: &mut ValidationContext<'_>, boxref: &BoxRef) -> Result<()> {
    let mut payload = ctx.read_payload(&boxref.header)?;

    let major_brand: FourCC = payload.get_mp4()?;
    let minor_version: u32 = payload.get_mp4()?;
    ctx.trace(format_args!("majorbrand=\"{major_brand}\" version=\"0x{minor_version:x}\""));
    ctx.major_brand = Some(major_brand);

    if major_brand == FourCC::ISOM {
        // isom names the base spec; files must brand themselves with something more specific.
        ctx.error(
            FindingKind::FieldConstraint,
            "the brand 'isom' can only be a compatible, not major, brand",
        );
    }

    let compatible_len = payload.remaining();
    if compatible_len % 4 != 0 {
        ctx.error(
            FindingKind::FieldConstraint,
            format!("compatible brands array has {} leftover bytes", compatible_len % 4),
        );
    }
    let brand_count = compatible_len / 4;
    if brand_count == 0 {
        ctx.error(FindingKind::FieldConstraint, "there must be at least one compatible brand");
        return Ok(());
    }

    let mut major_brand_found = false;
    for _ in 0..brand_count {
        let brand: FourCC = payload.get_mp4()?;
        ctx.trace(format_args!("compatible_brand=\"{brand}\""));
        if brand == major_brand {
            major_brand_found = true;
        }
    }
    if !major_brand_found {
        ctx.error(
            FindingKind::FieldConstraint,
            format!("major brand ('{major_brand}') not also found in list of compatible brands"),
        );
    }

    Ok(())
}

/// A `uuid` box is opaque; its extended type is traced and the payload accepted as-is.
pub fn validate_uuid(ctx: &mut ValidationContext<'_>, boxref: &BoxRef) -> Result<()> {
    if let BoxType::Uuid(uuid) = boxref.header.box_type {
        ctx.trace(format_args!("uuid=\"{uuid}\" size=\"{}\"", boxref.header.size));
    }
    Ok(())
}
