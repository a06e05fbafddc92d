//! The `meta` box: a full box whose children describe untimed items.

use crate::diag::FindingKind;
use crate::error::Result;
use crate::parse::{box_type, resolve_box_list, Mp4IntReaderExt};
use crate::walk::{validate_children, report_unknown_children, BoxPolicy, BoxRef, ValidationContext};

use super::{expect_flags_zero, expect_version_zero, mdia};

pub fn validate_meta(ctx: &mut ValidationContext<'_>, boxref: &BoxRef) -> Result<()> {
    let meta_type = boxref.header.box_type;
    let (full, _) = ctx.read_full_box(&boxref.header)?;
    expect_flags_zero(ctx, meta_type, &full);
    expect_version_zero(ctx, meta_type, &full);

    // Children start after the version/flags word.
    let (min_offset, max_offset) = boxref.header.payload_range();
    let headers = resolve_box_list(ctx.source, min_offset + 4, max_offset)?;
    let mut boxes: Vec<BoxRef> = headers.into_iter().map(BoxRef::new).collect();

    let result = validate_children(ctx, &mut boxes, box_type::HDLR, BoxPolicy::EXACTLY_ONE, validate_meta_hdlr);
    let result = result.and(validate_children(ctx, &mut boxes, box_type::PITM, BoxPolicy::AT_MOST_ONE, validate_pitm));
    let result = result.and(validate_children(
        ctx,
        &mut boxes,
        box_type::DINF,
        BoxPolicy::AT_MOST_ONE,
        mdia::validate_dinf,
    ));
    let result = result.and(validate_children(ctx, &mut boxes, box_type::XML, BoxPolicy::AT_MOST_ONE, validate_xml));
    let result = result.and(validate_children(ctx, &mut boxes, box_type::BXML, BoxPolicy::AT_MOST_ONE, validate_xml));

    report_unknown_children(ctx, &boxes, "meta", &[]);
    result
}

/// The meta handler has no constrained handler-type set, unlike the media handler.
fn validate_meta_hdlr(ctx: &mut ValidationContext<'_>, boxref: &BoxRef) -> Result<()> {
    mdia::validate_hdlr_fields(ctx, boxref).map(drop)
}

fn validate_pitm(ctx: &mut ValidationContext<'_>, boxref: &BoxRef) -> Result<()> {
    let box_type = boxref.header.box_type;
    let (full, mut payload) = ctx.read_full_box(&boxref.header)?;
    expect_flags_zero(ctx, box_type, &full);

    let item_id = match full.version {
        0 => {
            let item_id: u16 = payload.get_mp4()?;
            item_id as u32
        }
        _ => payload.get_mp4()?,
    };
    ctx.trace(format_args!("itemID=\"{item_id}\""));
    if item_id == 0 {
        ctx.error(FindingKind::FieldConstraint, "primary item ID must not be 0");
    }
    Ok(())
}

fn validate_xml(ctx: &mut ValidationContext<'_>, boxref: &BoxRef) -> Result<()> {
    let box_type = boxref.header.box_type;
    let (full, payload) = ctx.read_full_box(&boxref.header)?;
    expect_flags_zero(ctx, box_type, &full);
    expect_version_zero(ctx, box_type, &full);

    if payload.is_empty() {
        ctx.warning(FindingKind::FieldConstraint, format!("`{box_type}` box is empty"));
    }
    Ok(())
}
