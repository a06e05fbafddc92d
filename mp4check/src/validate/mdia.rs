//! The `mdia` subtree: media header, handler, and the media information box with its
//! per-media-type header and data information.

use bytes::{Buf, Bytes};

use crate::diag::FindingKind;
use crate::error::Result;
use crate::parse::{box_type, resolve_box_list, FourCC, Mp4IntReaderExt};
use crate::walk::{validate_children, report_unknown_children, BoxPolicy, BoxRef, ValidationContext};

use super::{expect_field, expect_flags_zero, expect_version_zero, stbl};

const KNOWN_HANDLERS: [FourCC; 10] = [
    FourCC::ODSM,
    FourCC::from_str("crsm"),
    FourCC::SDSM,
    FourCC::VIDE,
    FourCC::SOUN,
    FourCC::from_str("m7sm"),
    FourCC::from_str("ocsm"),
    FourCC::from_str("ipsm"),
    FourCC::from_str("mjsm"),
    FourCC::HINT,
];

/// Media header types reserved by ISO/IEC 14496-12 but not currently used.
const RESERVED_MEDIA_HEADERS: [FourCC; 7] = [
    FourCC::from_str("odhd"),
    FourCC::from_str("crhd"),
    FourCC::from_str("sdhd"),
    FourCC::from_str("m7hd"),
    FourCC::from_str("ochd"),
    FourCC::from_str("iphd"),
    FourCC::from_str("mjhd"),
];

pub fn validate_mdia(ctx: &mut ValidationContext<'_>, boxref: &BoxRef) -> Result<()> {
    let mut boxes = ctx.resolve_children(&boxref.header)?;
    for child in &mut boxes {
        child.track = boxref.track;
    }

    let result = validate_children(ctx, &mut boxes, box_type::MDHD, BoxPolicy::EXACTLY_ONE, validate_mdhd);
    let result = result.and(validate_children(
        ctx,
        &mut boxes,
        box_type::HDLR,
        BoxPolicy::EXACTLY_ONE,
        validate_mdia_hdlr,
    ));
    let result = result.and(validate_children(
        ctx,
        &mut boxes,
        box_type::MINF,
        BoxPolicy::EXACTLY_ONE,
        validate_minf,
    ));
    let result = result.and(validate_children(
        ctx,
        &mut boxes,
        box_type::UUID,
        BoxPolicy::empty(),
        super::file::validate_uuid,
    ));

    report_unknown_children(ctx, &boxes, "media", &[]);
    result
}

fn validate_mdhd(ctx: &mut ValidationContext<'_>, boxref: &BoxRef) -> Result<()> {
    let box_type = boxref.header.box_type;
    let (full, mut payload) = ctx.read_full_box(&boxref.header)?;
    expect_flags_zero(ctx, box_type, &full);

    let (timescale, duration) = match full.version {
        0 => {
            let _creation_time: u32 = payload.get_mp4()?;
            let _modification_time: u32 = payload.get_mp4()?;
            let timescale: u32 = payload.get_mp4()?;
            let duration: u32 = payload.get_mp4()?;
            (timescale, duration as u64)
        }
        1 => {
            let _creation_time: u64 = payload.get_mp4()?;
            let _modification_time: u64 = payload.get_mp4()?;
            let timescale: u32 = payload.get_mp4()?;
            let duration: u64 = payload.get_mp4()?;
            (timescale, duration)
        }
        version => {
            ctx.error(FindingKind::FieldConstraint, format!("media header is version {version}, not 0 or 1"));
            return Ok(());
        }
    };
    ctx.trace(format_args!("timescale=\"{timescale}\" duration=\"{duration}\""));

    let language: u16 = payload.get_mp4()?;
    if language == 0 {
        ctx.warning(
            FindingKind::FieldConstraint,
            "media header language code of 0 not strictly legit, 'und' preferred",
        );
    }
    let quality: u16 = payload.get_mp4()?;
    expect_field(ctx, "`mdhd` quality (reserved in mp4)", quality, 0);

    if duration == 0 {
        ctx.error(FindingKind::FieldConstraint, "`mdhd` duration must be > 0");
    }

    if let Some(track) = ctx.track_mut(boxref) {
        track.media_timescale = timescale;
        track.media_duration = duration;
    }
    Ok(())
}

fn validate_mdia_hdlr(ctx: &mut ValidationContext<'_>, boxref: &BoxRef) -> Result<()> {
    let handler = validate_hdlr_fields(ctx, boxref)?;
    if let Some(handler) = handler {
        if !KNOWN_HANDLERS.contains(&handler) {
            ctx.error(
                FindingKind::FieldConstraint,
                format!("`hdlr` handler type `{handler}` is not a known media handler"),
            );
        }
        if let Some(track) = ctx.track_mut(boxref) {
            track.media_type = Some(handler);
        }
    }
    Ok(())
}

/// Shared field validation for `hdlr` boxes; the handler-type value constraints differ between
/// `mdia` and `meta` parents.
pub fn validate_hdlr_fields(ctx: &mut ValidationContext<'_>, boxref: &BoxRef) -> Result<Option<FourCC>> {
    let box_type = boxref.header.box_type;
    let (full, mut payload) = ctx.read_full_box(&boxref.header)?;
    expect_flags_zero(ctx, box_type, &full);
    expect_version_zero(ctx, box_type, &full);

    let component_type: u32 = payload.get_mp4()?;
    expect_field(ctx, "`hdlr` pre-defined (reserved in mp4)", component_type, 0);
    let handler: FourCC = payload.get_mp4()?;
    ctx.trace(format_args!("handler_type=\"{handler}\""));
    let manufacturer: u32 = payload.get_mp4()?;
    expect_field(ctx, "`hdlr` reserved", manufacturer, 0);
    let component_flags: u32 = payload.get_mp4()?;
    expect_field(ctx, "`hdlr` reserved", component_flags, 0);
    let component_flags_mask: u32 = payload.get_mp4()?;
    expect_field(ctx, "`hdlr` reserved", component_flags_mask, 0);

    let name = read_string_to_end(&mut payload);
    ctx.trace(format_args!("name=\"{name}\""));

    Ok(Some(handler))
}

/// Read a nul-terminated string, consuming the terminator, or the rest of the payload if no
/// terminator is present.
pub(crate) fn read_string_to_end(payload: &mut Bytes) -> String {
    match payload.iter().position(|byte| *byte == 0) {
        Some(end) => {
            let bytes = payload.split_to(end);
            payload.advance(1);
            String::from_utf8_lossy(&bytes).into_owned()
        }
        None => {
            let bytes = payload.split_to(payload.len());
            String::from_utf8_lossy(&bytes).into_owned()
        }
    }
}

fn validate_minf(ctx: &mut ValidationContext<'_>, boxref: &BoxRef) -> Result<()> {
    let mut boxes = ctx.resolve_children(&boxref.header)?;
    for child in &mut boxes {
        child.track = boxref.track;
    }

    let media_type = ctx.track_mut(boxref).and_then(|track| track.media_type);
    let result = match media_type {
        Some(FourCC::VIDE) => {
            validate_children(ctx, &mut boxes, box_type::VMHD, BoxPolicy::EXACTLY_ONE, validate_vmhd)
        }
        Some(FourCC::SOUN) => {
            validate_children(ctx, &mut boxes, box_type::SMHD, BoxPolicy::EXACTLY_ONE, validate_smhd)
        }
        Some(FourCC::HINT) => {
            validate_children(ctx, &mut boxes, box_type::HMHD, BoxPolicy::EXACTLY_ONE, validate_hmhd)
        }
        Some(FourCC::ODSM) | Some(FourCC::SDSM) => {
            validate_children(ctx, &mut boxes, box_type::NMHD, BoxPolicy::EXACTLY_ONE, validate_nmhd)
        }
        other => {
            ctx.warning(
                FindingKind::FieldConstraint,
                match other {
                    Some(fourcc) => format!("unknown media type `{fourcc}`"),
                    None => "track has no media handler type".into(),
                },
            );
            Ok(())
        }
    };

    let result = result.and(validate_children(
        ctx,
        &mut boxes,
        box_type::DINF,
        BoxPolicy::EXACTLY_ONE,
        validate_dinf,
    ));
    let result = result.and(validate_children(
        ctx,
        &mut boxes,
        box_type::STBL,
        BoxPolicy::EXACTLY_ONE,
        stbl::validate_stbl,
    ));

    let mut reserved_headers = Vec::new();
    for child in &boxes {
        if child.flags.contains(crate::walk::BoxFlags::VALIDATED) {
            continue;
        }
        if let Some(fourcc) = child.header.box_type.fourcc() {
            if RESERVED_MEDIA_HEADERS.contains(&fourcc) {
                reserved_headers.push(fourcc);
            }
        }
    }
    for fourcc in &reserved_headers {
        ctx.error(
            FindingKind::FieldConstraint,
            format!("`{fourcc}` media type is reserved but not currently used"),
        );
    }
    let reserved_types: Vec<_> = reserved_headers
        .iter()
        .map(|fourcc| crate::parse::BoxType::FourCC(*fourcc))
        .collect();
    report_unknown_children(ctx, &boxes, "media information", &reserved_types);

    result
}

fn validate_vmhd(ctx: &mut ValidationContext<'_>, boxref: &BoxRef) -> Result<()> {
    let box_type = boxref.header.box_type;
    let (full, mut payload) = ctx.read_full_box(&boxref.header)?;
    if full.flags != 1 {
        ctx.error(FindingKind::FieldConstraint, format!("`vmhd` flags must be 1 not 0x{:x}", full.flags));
    }
    expect_version_zero(ctx, box_type, &full);

    let graphics_mode: u16 = payload.get_mp4()?;
    expect_field(ctx, "`vmhd` graphics mode", graphics_mode, 0);
    for channel in ["red", "green", "blue"] {
        let opcolor: u16 = payload.get_mp4()?;
        if opcolor != 0 {
            ctx.error(FindingKind::FieldConstraint, format!("`vmhd` {channel} opcolor must be 0"));
        }
    }
    Ok(())
}

fn validate_smhd(ctx: &mut ValidationContext<'_>, boxref: &BoxRef) -> Result<()> {
    let box_type = boxref.header.box_type;
    let (full, mut payload) = ctx.read_full_box(&boxref.header)?;
    expect_flags_zero(ctx, box_type, &full);
    expect_version_zero(ctx, box_type, &full);

    let balance: i16 = payload.get_mp4()?;
    expect_field(ctx, "`smhd` balance", balance, 0);
    let reserved: u16 = payload.get_mp4()?;
    expect_field(ctx, "`smhd` reserved", reserved, 0);
    Ok(())
}

fn validate_hmhd(ctx: &mut ValidationContext<'_>, boxref: &BoxRef) -> Result<()> {
    let box_type = boxref.header.box_type;
    let (full, mut payload) = ctx.read_full_box(&boxref.header)?;
    expect_flags_zero(ctx, box_type, &full);
    expect_version_zero(ctx, box_type, &full);

    let max_pdu_size: u16 = payload.get_mp4()?;
    let avg_pdu_size: u16 = payload.get_mp4()?;
    let max_bitrate: u32 = payload.get_mp4()?;
    let avg_bitrate: u32 = payload.get_mp4()?;
    ctx.trace(format_args!(
        "maxPDUsize=\"{max_pdu_size}\" avgPDUsize=\"{avg_pdu_size}\" maxbitrate=\"{max_bitrate}\" \
         avgbitrate=\"{avg_bitrate}\""
    ));
    let reserved: u32 = payload.get_mp4()?;
    expect_field(ctx, "`hmhd` reserved", reserved, 0);
    Ok(())
}

fn validate_nmhd(ctx: &mut ValidationContext<'_>, boxref: &BoxRef) -> Result<()> {
    let box_type = boxref.header.box_type;
    let (full, _) = ctx.read_full_box(&boxref.header)?;
    expect_flags_zero(ctx, box_type, &full);
    expect_version_zero(ctx, box_type, &full);
    Ok(())
}

pub fn validate_dinf(ctx: &mut ValidationContext<'_>, boxref: &BoxRef) -> Result<()> {
    let mut boxes = ctx.resolve_children(&boxref.header)?;

    let result = validate_children(ctx, &mut boxes, box_type::DREF, BoxPolicy::EXACTLY_ONE, validate_dref);
    report_unknown_children(ctx, &boxes, "data information", &[]);
    result
}

fn validate_dref(ctx: &mut ValidationContext<'_>, boxref: &BoxRef) -> Result<()> {
    let box_type_ = boxref.header.box_type;
    let (full, mut payload) = ctx.read_full_box(&boxref.header)?;
    expect_flags_zero(ctx, box_type_, &full);
    expect_version_zero(ctx, box_type_, &full);

    let entry_count: u32 = payload.get_mp4()?;
    ctx.trace(format_args!("entryCount=\"{entry_count}\""));

    // The data reference entries are boxes following the entry count.
    let (min_offset, max_offset) = boxref.header.payload_range();
    let entries_offset = min_offset + 8;
    let headers = resolve_box_list(ctx.source, entries_offset, max_offset)?;
    let mut boxes: Vec<BoxRef> = headers.into_iter().map(BoxRef::new).collect();

    if boxes.len() as u32 != entry_count {
        ctx.error(
            FindingKind::FieldConstraint,
            format!("`dref` declares {entry_count} entries but holds {}", boxes.len()),
        );
    }

    let result = validate_children(ctx, &mut boxes, box_type::URL, BoxPolicy::empty(), validate_url_entry);
    let result = result.and(validate_children(ctx, &mut boxes, box_type::URN, BoxPolicy::empty(), validate_urn_entry));
    report_unknown_children(ctx, &boxes, "data reference", &[]);
    result
}

fn validate_url_entry(ctx: &mut ValidationContext<'_>, boxref: &BoxRef) -> Result<()> {
    let (full, mut payload) = ctx.read_full_box(&boxref.header)?;
    expect_version_zero(ctx, boxref.header.box_type, &full);

    if full.flags == 1 {
        // Self-contained: the media data lives in this file and no location string follows.
        if payload.has_remaining() {
            ctx.warning(
                FindingKind::FieldConstraint,
                "self-contained `url ` entry carries a location string",
            );
        }
    } else if !payload.has_remaining() {
        ctx.error(
            FindingKind::FieldConstraint,
            "`url ` entry is not self-contained but carries no location",
        );
    } else {
        let location = read_string_to_end(&mut payload);
        ctx.trace(format_args!("location=\"{location}\""));
    }
    Ok(())
}

fn validate_urn_entry(ctx: &mut ValidationContext<'_>, boxref: &BoxRef) -> Result<()> {
    let (full, mut payload) = ctx.read_full_box(&boxref.header)?;
    expect_version_zero(ctx, boxref.header.box_type, &full);

    if full.flags != 1 && !payload.has_remaining() {
        ctx.error(FindingKind::FieldConstraint, "`urn ` entry is not self-contained but carries no name");
    }
    if payload.has_remaining() {
        let name = read_string_to_end(&mut payload);
        ctx.trace(format_args!("name=\"{name}\""));
    }
    if payload.has_remaining() {
        let location = read_string_to_end(&mut payload);
        ctx.trace(format_args!("location=\"{location}\""));
    }
    Ok(())
}
