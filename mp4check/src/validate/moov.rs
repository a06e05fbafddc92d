//! The `moov` subtree: movie header, the two-pass track walk, and the post-parse cross-track
//! checks.

use crate::descriptors;
use crate::diag::FindingKind;
use crate::error::Result;
use crate::overlap::detect_chunk_overlaps;
use crate::parse::{box_type, BoxHeader, Fixed16, Fixed32, FourCC, Mp4IntReaderExt, Transform};
use crate::track::{MovieInfo, TrackInfo};
use crate::walk::{validate_children, report_unknown_children, BoxFlags, BoxPolicy, BoxRef, ValidationContext};

use super::{expect_field, expect_flags_zero, file, meta, trak, udta};

/// Validate a `moov` box: allocate the movie record, validate `mvhd`, walk the `trak` children
/// in two passes (media tracks first, hint tracks second), then `iods` and the free-form
/// children, and finally run the cross-track chunk layout check.
pub fn validate_moov(ctx: &mut ValidationContext<'_>, boxref: &BoxRef) -> Result<()> {
    let mut boxes = ctx.resolve_children(&boxref.header)?;

    let trak_count = boxes.iter().filter(|child| child.header.box_type == box_type::TRAK).count();
    ctx.movie = Some(MovieInfo {
        tracks: (0..trak_count).map(|_| TrackInfo::default()).collect(),
        ..Default::default()
    });
    if trak_count == 0 {
        ctx.error(FindingKind::Cardinality, "no `trak` box");
    }

    let result = validate_children(ctx, &mut boxes, box_type::MVHD, BoxPolicy::EXACTLY_ONE, validate_mvhd);

    // Probe each trak's handler type up front, so the minf/stsd validators can key off it and
    // hint tracks can be deferred to the second pass.
    let mut track_index = 0;
    for index in 0..boxes.len() {
        if boxes[index].header.box_type != box_type::TRAK {
            continue;
        }
        let media_type = probe_trak_media_type(ctx, &boxes[index].header);
        if let Some(movie) = ctx.movie.as_mut() {
            movie.tracks[track_index].media_type = media_type;
        }
        boxes[index].track = Some(track_index);
        if media_type == Some(FourCC::HINT) {
            boxes[index].flags |= BoxFlags::SKIP;
        }
        track_index += 1;
    }

    // First pass: media tracks. Hint tracks reference other tracks' data, so they are checked
    // only after every media track's tables are in place.
    let result = result.and(validate_children(
        ctx,
        &mut boxes,
        box_type::TRAK,
        BoxPolicy::empty(),
        trak::validate_trak,
    ));

    for child in &mut boxes {
        child.flags -= BoxFlags::SKIP;
    }

    // Second pass: the deferred hint tracks.
    let result = result.and(validate_children(
        ctx,
        &mut boxes,
        box_type::TRAK,
        BoxPolicy::empty(),
        trak::validate_trak,
    ));

    let result = result.and(validate_children(
        ctx,
        &mut boxes,
        box_type::IODS,
        BoxPolicy::EXACTLY_ONE,
        validate_iods,
    ));
    let result = result.and(validate_children(ctx, &mut boxes, box_type::UDTA, BoxPolicy::empty(), udta::validate_udta));
    let result = result.and(validate_children(ctx, &mut boxes, box_type::UUID, BoxPolicy::empty(), file::validate_uuid));
    let result = result.and(validate_children(ctx, &mut boxes, box_type::META, BoxPolicy::empty(), meta::validate_meta));

    report_unknown_children(
        ctx,
        &boxes,
        "movie",
        // `wide` is QuickTime-specific padding.
        &[box_type::MDAT, box_type::FREE, box_type::SKIP, box_type::WIDE],
    );

    // A track whose chunks all hold a single sample wastes table space.
    let mut single_sample_tracks = Vec::new();
    if let Some(movie) = &ctx.movie {
        for (index, track) in movie.tracks.iter().enumerate() {
            if track.chunk_count() > 1
                && !track.sample_to_chunk.is_empty()
                && track.sample_to_chunk.iter().all(|run| run.samples_per_chunk == 1)
            {
                single_sample_tracks.push((index, track.chunk_count()));
            }
        }
    }
    for (index, chunk_count) in single_sample_tracks {
        ctx.warning(
            FindingKind::Other,
            format!("track {index} has {chunk_count} chunks all containing 1 sample only"),
        );
    }

    if let Some(movie) = ctx.movie.take() {
        detect_chunk_overlaps(ctx, &movie);
    }

    result
}

/// Find a trak's handler type without validating anything: trak → mdia → hdlr.
fn probe_trak_media_type(ctx: &ValidationContext<'_>, trak: &BoxHeader) -> Option<FourCC> {
    let children = ctx.resolve_children(trak).ok()?;
    let mdia = children.iter().find(|child| child.header.box_type == box_type::MDIA)?;
    let mdia_children = ctx.resolve_children(&mdia.header).ok()?;
    let hdlr = mdia_children.iter().find(|child| child.header.box_type == box_type::HDLR)?;

    let (_, mut payload) = ctx.read_full_box(&hdlr.header).ok()?;
    let _component_type: u32 = payload.get_mp4().ok()?;
    payload.get_mp4().ok()
}

fn validate_mvhd(ctx: &mut ValidationContext<'_>, boxref: &BoxRef) -> Result<()> {
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
            ctx.error(FindingKind::FieldConstraint, format!("movie header is version {version}, not 0 or 1"));
            return Ok(());
        }
    };
    ctx.trace(format_args!("timescale=\"{timescale}\" duration=\"{duration}\""));

    let rate: Fixed32 = payload.get_mp4()?;
    expect_field(ctx, "`mvhd` preferred rate", rate, Fixed32::from_num(1));
    let volume: Fixed16 = payload.get_mp4()?;
    expect_field(ctx, "`mvhd` preferred volume", volume, Fixed16::from_num(1));
    let reserved: u16 = payload.get_mp4()?;
    expect_field(ctx, "`mvhd` reserved", reserved, 0);
    let reserved: u32 = payload.get_mp4()?;
    expect_field(ctx, "`mvhd` reserved", reserved, 0);
    let reserved: u32 = payload.get_mp4()?;
    expect_field(ctx, "`mvhd` reserved", reserved, 0);

    let matrix: Transform = payload.get_mp4()?;
    if !matrix.is_unity() {
        ctx.error(FindingKind::FieldConstraint, "`mvhd` matrix must be the identity");
    }

    // previewTime/previewDuration/posterTime/selectionTime/selectionDuration/currentTime are
    // all reserved in mp4.
    for _ in 0..6 {
        let reserved: u32 = payload.get_mp4()?;
        expect_field(ctx, "`mvhd` reserved", reserved, 0);
    }
    let next_track_id: u32 = payload.get_mp4()?;
    ctx.trace(format_args!("nextTrackID=\"{next_track_id}\""));

    if let Some(movie) = ctx.movie.as_mut() {
        movie.timescale = timescale;
        movie.duration = duration;
    }
    Ok(())
}

fn validate_iods(ctx: &mut ValidationContext<'_>, boxref: &BoxRef) -> Result<()> {
    let box_type = boxref.header.box_type;
    let (full, payload) = ctx.read_full_box(&boxref.header)?;
    expect_flags_zero(ctx, box_type, &full);
    super::expect_version_zero(ctx, box_type, &full);

    descriptors::validate_initial_object_descriptor(ctx, &payload, true)
}
