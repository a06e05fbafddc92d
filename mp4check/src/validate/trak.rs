//! The `trak` subtree: track header, track references, edit lists, and the per-media-type
//! geometry checks.

use bytes::Buf;

use crate::diag::FindingKind;
use crate::error::Result;
use crate::parse::{box_type, Fixed16, Fixed32, FourCC, Mp4IntReaderExt, Transform};
use crate::walk::{validate_children, report_unknown_children, BoxPolicy, BoxRef, ValidationContext};

use super::{expect_field, expect_flags_zero, file, mdia, meta, udta};

/// Validate a `trak` box and its subtree, then cross-check the header geometry against the
/// track's media type.
pub fn validate_trak(ctx: &mut ValidationContext<'_>, boxref: &BoxRef) -> Result<()> {
    let mut boxes = ctx.resolve_children(&boxref.header)?;
    // Children operate on the same track record as the trak itself.
    for child in &mut boxes {
        child.track = boxref.track;
    }

    let result = validate_children(ctx, &mut boxes, box_type::TKHD, BoxPolicy::EXACTLY_ONE, validate_tkhd);
    let result = result.and(validate_children(ctx, &mut boxes, box_type::TREF, BoxPolicy::AT_MOST_ONE, validate_tref));
    let result = result.and(validate_children(ctx, &mut boxes, box_type::EDTS, BoxPolicy::AT_MOST_ONE, validate_edts));
    let result = result.and(validate_children(
        ctx,
        &mut boxes,
        box_type::MDIA,
        BoxPolicy::EXACTLY_ONE,
        mdia::validate_mdia,
    ));
    let result = result.and(validate_children(ctx, &mut boxes, box_type::UDTA, BoxPolicy::empty(), udta::validate_udta));
    let result = result.and(validate_children(ctx, &mut boxes, box_type::UUID, BoxPolicy::empty(), file::validate_uuid));
    let result = result.and(validate_children(ctx, &mut boxes, box_type::META, BoxPolicy::empty(), meta::validate_meta));

    report_unknown_children(ctx, &boxes, "track", &[]);

    let Some(track) = ctx.track_mut(boxref) else {
        return result;
    };
    let media_type = track.media_type;
    let volume = track.volume;
    let width = track.width;
    let height = track.height;
    let zero16 = Fixed16::from_num(0);
    let zero32 = Fixed32::from_num(0);

    match media_type {
        Some(FourCC::VIDE) => {
            if volume != zero16 {
                ctx.error(FindingKind::FieldConstraint, "video track has non-zero volume");
            }
            if width == zero32 || height == zero32 {
                ctx.error(FindingKind::FieldConstraint, "video track has zero width and/or height");
            }
        }
        Some(FourCC::SOUN) => {
            if width != zero32 || height != zero32 {
                ctx.error(FindingKind::FieldConstraint, "sound track has non-zero width and/or height");
            }
        }
        Some(FourCC::ODSM) => {
            if volume != zero16 || width != zero32 || height != zero32 {
                ctx.error(
                    FindingKind::FieldConstraint,
                    "object descriptor track has non-zero volume, width, or height",
                );
            }
        }
        Some(FourCC::SDSM) => {
            if volume != zero16 || width != zero32 || height != zero32 {
                ctx.error(
                    FindingKind::FieldConstraint,
                    "scene descriptor track has non-zero volume, width, or height",
                );
            }
        }
        Some(FourCC::HINT) => {}
        _ => {
            if volume != zero16 || width != zero32 || height != zero32 {
                ctx.error(
                    FindingKind::FieldConstraint,
                    "non-visual/audio track has non-zero volume, width, or height",
                );
            }
        }
    }

    result
}

fn validate_tkhd(ctx: &mut ValidationContext<'_>, boxref: &BoxRef) -> Result<()> {
    let (full, mut payload) = ctx.read_full_box(&boxref.header)?;

    if full.flags & 7 != full.flags {
        ctx.error(
            FindingKind::FieldConstraint,
            format!("`tkhd` flags 0x{:x} other than enabled/in-movie/in-preview set", full.flags),
        );
    }
    if full.flags == 0 {
        ctx.warning(FindingKind::FieldConstraint, "`tkhd` flags are 0 (OK in a hint track)");
    }

    let (track_id, duration) = match full.version {
        0 => {
            let _creation_time: u32 = payload.get_mp4()?;
            let _modification_time: u32 = payload.get_mp4()?;
            let track_id: u32 = payload.get_mp4()?;
            let reserved: u32 = payload.get_mp4()?;
            expect_field(ctx, "`tkhd` reserved", reserved, 0);
            let duration: u32 = payload.get_mp4()?;
            (track_id, duration as u64)
        }
        1 => {
            let _creation_time: u64 = payload.get_mp4()?;
            let _modification_time: u64 = payload.get_mp4()?;
            let track_id: u32 = payload.get_mp4()?;
            let reserved: u32 = payload.get_mp4()?;
            expect_field(ctx, "`tkhd` reserved", reserved, 0);
            let duration: u64 = payload.get_mp4()?;
            (track_id, duration)
        }
        version => {
            ctx.error(FindingKind::FieldConstraint, format!("track header is version {version}, not 0 or 1"));
            return Ok(());
        }
    };
    ctx.trace(format_args!("trackID=\"{track_id}\" duration=\"{duration}\""));
    if duration == 0 {
        ctx.warning(FindingKind::FieldConstraint, "`tkhd` duration is 0, track may be considered empty");
    }

    let reserved: u32 = payload.get_mp4()?;
    expect_field(ctx, "`tkhd` reserved", reserved, 0);
    let reserved: u32 = payload.get_mp4()?;
    expect_field(ctx, "`tkhd` reserved", reserved, 0);
    let layer: i16 = payload.get_mp4()?;
    expect_field(ctx, "`tkhd` layer", layer, 0);
    let alternate_group: i16 = payload.get_mp4()?;
    expect_field(ctx, "`tkhd` alternate group", alternate_group, 0);

    let volume: Fixed16 = payload.get_mp4()?;
    if volume != Fixed16::from_num(0) && volume != Fixed16::from_num(1) {
        ctx.error(FindingKind::FieldConstraint, format!("`tkhd` volume must be 0 or 1.0, not {volume}"));
    }
    let reserved: u16 = payload.get_mp4()?;
    expect_field(ctx, "`tkhd` reserved", reserved, 0);

    let matrix: Transform = payload.get_mp4()?;
    if !matrix.is_unity() {
        ctx.error(FindingKind::FieldConstraint, "`tkhd` matrix must be the identity");
    }

    let width: Fixed32 = payload.get_mp4()?;
    let height: Fixed32 = payload.get_mp4()?;
    ctx.trace(format_args!("volume=\"{volume}\" width=\"{width}\" height=\"{height}\""));

    if ctx.major_brand == Some(FourCC::MP41) {
        let zero = Fixed32::from_num(0);
        if width != zero && width != Fixed32::from_num(320) {
            ctx.error(FindingKind::FieldConstraint, "`tkhd` width must be 0 or 320 under brand mp41");
        }
        if height != zero && height != Fixed32::from_num(240) {
            ctx.error(FindingKind::FieldConstraint, "`tkhd` height must be 0 or 240 under brand mp41");
        }
    }

    if let Some(track) = ctx.track_mut(boxref) {
        track.track_id = track_id;
        track.volume = volume;
        track.width = width;
        track.height = height;
    } else {
        ctx.error(FindingKind::Other, format!("internal error: track ID {track_id} not recorded"));
    }
    Ok(())
}

fn validate_tref(ctx: &mut ValidationContext<'_>, boxref: &BoxRef) -> Result<()> {
    let mut boxes = ctx.resolve_children(&boxref.header)?;
    for child in &mut boxes {
        child.track = boxref.track;
    }

    let mut result = Ok(());
    for ref_type in [box_type::HINT, box_type::DPND, box_type::IPIR, box_type::MPOD, box_type::SYNC] {
        result = result.and(validate_children(
            ctx,
            &mut boxes,
            ref_type,
            BoxPolicy::AT_MOST_ONE,
            validate_tref_entry,
        ));
    }

    report_unknown_children(ctx, &boxes, "track reference", &[]);
    result
}

/// A track reference entry holds the list of track IDs the owning track depends on.
fn validate_tref_entry(ctx: &mut ValidationContext<'_>, boxref: &BoxRef) -> Result<()> {
    let box_type = boxref.header.box_type;
    let mut payload = ctx.read_payload(&boxref.header)?;

    if payload.remaining() % 4 != 0 {
        ctx.error(
            FindingKind::FieldConstraint,
            format!("`{box_type}` track reference has {} leftover bytes", payload.remaining() % 4),
        );
    }
    let count = payload.remaining() / 4;
    if count == 0 {
        ctx.error(FindingKind::FieldConstraint, format!("`{box_type}` track reference is empty"));
    }

    let known_ids: Vec<u32> = ctx
        .movie
        .as_ref()
        .map(|movie| movie.tracks.iter().map(|track| track.track_id).collect())
        .unwrap_or_default();

    for _ in 0..count {
        let track_id: u32 = payload.get_mp4()?;
        ctx.trace(format_args!("track_ID=\"{track_id}\""));
        if track_id == 0 {
            ctx.error(FindingKind::FieldConstraint, format!("`{box_type}` references track ID 0"));
        } else if !known_ids.contains(&track_id) {
            ctx.warning(
                FindingKind::FieldConstraint,
                format!("`{box_type}` references unknown track ID {track_id}"),
            );
        }
    }
    Ok(())
}

fn validate_edts(ctx: &mut ValidationContext<'_>, boxref: &BoxRef) -> Result<()> {
    let mut boxes = ctx.resolve_children(&boxref.header)?;
    for child in &mut boxes {
        child.track = boxref.track;
    }

    let result = validate_children(ctx, &mut boxes, box_type::ELST, BoxPolicy::AT_MOST_ONE, validate_elst);
    report_unknown_children(ctx, &boxes, "edit list", &[]);
    result
}

fn validate_elst(ctx: &mut ValidationContext<'_>, boxref: &BoxRef) -> Result<()> {
    let box_type = boxref.header.box_type;
    let (full, mut payload) = ctx.read_full_box(&boxref.header)?;
    expect_flags_zero(ctx, box_type, &full);

    let entry_count: u32 = payload.get_mp4()?;
    ctx.trace(format_args!("entryCount=\"{entry_count}\""));

    for _ in 0..entry_count {
        let (segment_duration, media_time) = match full.version {
            0 => {
                let duration: u32 = payload.get_mp4()?;
                let media_time: i32 = payload.get_mp4()?;
                (duration as u64, media_time as i64)
            }
            1 => {
                let duration: u64 = payload.get_mp4()?;
                let media_time: i64 = payload.get_mp4()?;
                (duration, media_time)
            }
            version => {
                ctx.error(FindingKind::FieldConstraint, format!("edit list is version {version}, not 0 or 1"));
                return Ok(());
            }
        };
        let media_rate_integer: i16 = payload.get_mp4()?;
        let _media_rate_fraction: i16 = payload.get_mp4()?;

        if media_time < -1 {
            ctx.error(
                FindingKind::FieldConstraint,
                format!("edit media time {media_time} is invalid (-1 means an empty edit)"),
            );
        }
        if media_rate_integer != 0 && media_rate_integer != 1 {
            ctx.error(
                FindingKind::FieldConstraint,
                format!("edit media rate must be 0 or 1, not {media_rate_integer}"),
            );
        }
        ctx.trace(format_args!(
            "segmentDuration=\"{segment_duration}\" mediaTime=\"{media_time}\" mediaRate=\"{media_rate_integer}\""
        ));
    }

    if payload.has_remaining() {
        ctx.error(FindingKind::TrailingData, format!("`{box_type}` has bytes after its last entry"));
    }
    Ok(())
}
