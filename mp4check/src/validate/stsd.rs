//! The `stsd` box and its sample description entries, including the codec configuration
//! extensions (`esds`, `avcC`, `btrt`, `m4ds`, `colr`, `sinf`).

use bytes::Buf;

use crate::bits::BitCursor;
use crate::codec::avc;
use crate::descriptors::{self, object_type, stream_type};
use crate::diag::FindingKind;
use crate::error::Result;
use crate::parse::{box_type, resolve_box_list, BoxType, Fixed32, FourCC, Mp4IntReaderExt};
use crate::walk::{validate_children, report_unknown_children, BoxPolicy, BoxRef, ValidationContext};

use super::{expect_field, expect_flags_zero, expect_version_zero, mdia};

pub fn validate_stsd(ctx: &mut ValidationContext<'_>, boxref: &BoxRef) -> Result<()> {
    let stsd_type = boxref.header.box_type;
    let (full, mut payload) = ctx.read_full_box(&boxref.header)?;
    expect_flags_zero(ctx, stsd_type, &full);
    expect_version_zero(ctx, stsd_type, &full);

    let entry_count: u32 = payload.get_mp4()?;
    ctx.trace(format_args!("entryCount=\"{entry_count}\""));
    if let Some(track) = ctx.track_mut(boxref) {
        track.sample_description_count = entry_count;
    }

    let (min_offset, max_offset) = boxref.header.payload_range();
    let headers = resolve_box_list(ctx.source, min_offset + 8, max_offset)?;
    let mut entries: Vec<BoxRef> = headers.into_iter().map(BoxRef::new).collect();
    for entry in &mut entries {
        entry.track = boxref.track;
    }

    if entries.len() != 1 {
        ctx.error(FindingKind::Cardinality, "MPEG-4 only allows 1 sample description");
    }
    if entries.len() as u32 != entry_count {
        ctx.error(
            FindingKind::FieldConstraint,
            format!("`stsd` declares {entry_count} entries but holds {}", entries.len()),
        );
    }

    let media_type = ctx.track_mut(boxref).and_then(|track| track.media_type);
    let mut result = Ok(());
    for (index, entry) in entries.iter().enumerate() {
        ctx.diags.push_path(entry.header.box_type, index as u32 + 1);
        let entry_result = match media_type {
            Some(FourCC::VIDE) => validate_visual_entry(ctx, entry),
            Some(FourCC::SOUN) => validate_sound_entry(ctx, entry),
            Some(FourCC::HINT) => validate_hint_entry(ctx, entry),
            Some(FourCC::SDSM) => validate_mp4s_entry(ctx, entry, Some(stream_type::SCENE_DESCRIPTION)),
            Some(FourCC::ODSM) => validate_mp4s_entry(ctx, entry, Some(stream_type::OBJECT_DESCRIPTOR)),
            // MP4 says anything else must be an MpegSampleEntry.
            _ => validate_mp4s_entry(ctx, entry, None),
        };
        ctx.diags.pop_path();
        result = result.and(entry_result);
    }
    result
}

/// The fields every sample entry starts with: six reserved bytes and the data reference index.
fn validate_entry_head<B: Buf>(ctx: &mut ValidationContext<'_>, payload: &mut B) -> Result<()> {
    let reserved: [u8; 6] = payload.get_mp4()?;
    if reserved != [0; 6] {
        ctx.error(FindingKind::FieldConstraint, "sample entry reserved bytes must be 0");
    }
    let data_ref_index: u16 = payload.get_mp4()?;
    ctx.trace(format_args!("dataRefIndex=\"{data_ref_index}\""));
    if data_ref_index == 0 {
        ctx.error(FindingKind::FieldConstraint, "sample entry data reference index is 1-based; 0 is invalid");
    }
    Ok(())
}

fn validate_visual_entry(ctx: &mut ValidationContext<'_>, entry: &BoxRef) -> Result<()> {
    let entry_type = entry.header.box_type;
    let mut payload = ctx.read_payload(&entry.header)?;
    validate_entry_head(ctx, &mut payload)?;

    if !matches!(
        entry_type.fourcc(),
        Some(FourCC::MP4V) | Some(FourCC::AVC1) | Some(FourCC::ENCV)
    ) {
        ctx.error(
            FindingKind::FieldConstraint,
            format!("visual sample entry type must be `mp4v`, `avc1` or `encv`, not `{entry_type}`"),
        );
    }

    let version: i16 = payload.get_mp4()?;
    expect_field(ctx, "visual sample entry version", version, 0);
    let revision: i16 = payload.get_mp4()?;
    expect_field(ctx, "visual sample entry revision", revision, 0);
    let vendor: u32 = payload.get_mp4()?;
    expect_field(ctx, "visual sample entry vendor", vendor, 0);
    let temporal_quality: u32 = payload.get_mp4()?;
    expect_field(ctx, "visual sample entry temporal quality", temporal_quality, 0);
    let spatial_quality: u32 = payload.get_mp4()?;
    expect_field(ctx, "visual sample entry spatial quality", spatial_quality, 0);

    let width: u16 = payload.get_mp4()?;
    let height: u16 = payload.get_mp4()?;
    ctx.trace(format_args!("width=\"{width}\" height=\"{height}\""));
    if width == 0 || height == 0 {
        ctx.error(
            FindingKind::FieldConstraint,
            format!("visual sample entry width ({width}) or height ({height}) is zero"),
        );
    }
    let (track_width, track_height) = ctx
        .track_mut(entry)
        .map(|track| (track.width, track.height))
        .unwrap_or_default();
    if track_width.to_bits() != (width as i32) << 16 {
        ctx.warning(
            FindingKind::FieldConstraint,
            format!("sample entry width {width} differs from track width {track_width}"),
        );
    }
    if track_height.to_bits() != (height as i32) << 16 {
        ctx.warning(
            FindingKind::FieldConstraint,
            format!("sample entry height {height} differs from track height {track_height}"),
        );
    }

    let h_res: Fixed32 = payload.get_mp4()?;
    expect_field(ctx, "visual sample entry horizontal resolution", h_res, Fixed32::from_num(72));
    let v_res: Fixed32 = payload.get_mp4()?;
    expect_field(ctx, "visual sample entry vertical resolution", v_res, Fixed32::from_num(72));
    let data_size: u32 = payload.get_mp4()?;
    expect_field(ctx, "visual sample entry data size", data_size, 0);
    let frame_count: u16 = payload.get_mp4()?;
    expect_field(ctx, "visual sample entry frame count", frame_count, 1);
    let compressor_name: [u8; 32] = payload.get_mp4()?;
    if compressor_name[0] != 0 {
        ctx.warning(FindingKind::FieldConstraint, "visual sample entry compressor name is not empty");
    }
    let depth: u16 = payload.get_mp4()?;
    expect_field(ctx, "visual sample entry depth", depth, 24);
    let clut_id: i16 = payload.get_mp4()?;
    expect_field(ctx, "visual sample entry color table id", clut_id, -1);

    // 8 fixed fields before the extensions: head (8) + the image description (70).
    const FIXED_LEN: u64 = 78;
    validate_visual_extensions(ctx, entry, FIXED_LEN)
}

fn validate_visual_extensions(ctx: &mut ValidationContext<'_>, entry: &BoxRef, fixed_len: u64) -> Result<()> {
    let entry_type = entry.header.box_type;
    let (min_offset, max_offset) = entry.header.payload_range();
    let headers = resolve_box_list(ctx.source, min_offset + fixed_len, max_offset)?;
    let mut extensions: Vec<BoxRef> = headers.into_iter().map(BoxRef::new).collect();
    for extension in &mut extensions {
        extension.track = entry.track;
    }

    let is_avc = entry_type.fourcc() == Some(FourCC::AVC1);
    let is_protected = entry_type.fourcc() == Some(FourCC::ENCV);

    if entry_type.fourcc() == Some(FourCC::MP4V) && extensions.len() != 1 {
        ctx.error(FindingKind::Cardinality, "MPEG-4 only allows 1 sample description extension");
    }

    let mut result = validate_children(ctx, &mut extensions, box_type::ESDS, BoxPolicy::AT_MOST_ONE, |ctx, b| {
        validate_esds(ctx, b, Some(object_type::VISUAL_MPEG4), Some(stream_type::VISUAL))
    });
    if is_avc || is_protected {
        for cfg_type in [BoxType::AVCC, BoxType::SVCC, BoxType::MVCC] {
            result = result.and(validate_children(
                ctx,
                &mut extensions,
                cfg_type,
                BoxPolicy::AT_MOST_ONE,
                validate_avcc,
            ));
        }
        result = result.and(validate_children(
            ctx,
            &mut extensions,
            box_type::BTRT,
            BoxPolicy::AT_MOST_ONE,
            validate_btrt,
        ));
        result = result.and(validate_children(
            ctx,
            &mut extensions,
            box_type::M4DS,
            BoxPolicy::AT_MOST_ONE,
            validate_m4ds,
        ));
    }
    result = result.and(validate_children(
        ctx,
        &mut extensions,
        box_type::COLR,
        BoxPolicy::AT_MOST_ONE,
        validate_colr,
    ));
    result = result.and(validate_children(
        ctx,
        &mut extensions,
        box_type::SINF,
        BoxPolicy::AT_MOST_ONE,
        validate_sinf,
    ));
    result = result.and(validate_children(
        ctx,
        &mut extensions,
        box_type::UUID,
        BoxPolicy::empty(),
        super::file::validate_uuid,
    ));

    if is_protected && !extensions.iter().any(|b| b.header.box_type == box_type::SINF) {
        ctx.error(FindingKind::Cardinality, "protected sample entry without a `sinf` box");
    }

    report_unknown_children(ctx, &extensions, "visual sample description", &[]);
    result
}

fn validate_sound_entry(ctx: &mut ValidationContext<'_>, entry: &BoxRef) -> Result<()> {
    let entry_type = entry.header.box_type;
    let mut payload = ctx.read_payload(&entry.header)?;
    validate_entry_head(ctx, &mut payload)?;

    if !matches!(entry_type.fourcc(), Some(FourCC::MP4A) | Some(FourCC::ENCA)) {
        ctx.error(
            FindingKind::FieldConstraint,
            format!("sound sample entry type must be `mp4a` or `enca`, not `{entry_type}`"),
        );
    }

    let version: i16 = payload.get_mp4()?;
    expect_field(ctx, "sound sample entry version", version, 0);
    let revision: i16 = payload.get_mp4()?;
    expect_field(ctx, "sound sample entry revision", revision, 0);
    let vendor: u32 = payload.get_mp4()?;
    expect_field(ctx, "sound sample entry vendor", vendor, 0);
    let num_channels: i16 = payload.get_mp4()?;
    expect_field(ctx, "sound sample entry channel count", num_channels, 2);
    let sample_size: i16 = payload.get_mp4()?;
    expect_field(ctx, "sound sample entry sample size", sample_size, 16);
    let compression_id: i16 = payload.get_mp4()?;
    expect_field(ctx, "sound sample entry compression id", compression_id, 0);
    let packet_size: i16 = payload.get_mp4()?;
    expect_field(ctx, "sound sample entry packet size", packet_size, 0);

    let sample_rate: u32 = payload.get_mp4()?;
    let rate_integer = sample_rate >> 16;
    let rate_fraction = sample_rate & 0xffff;
    ctx.trace(format_args!("sampleRate=\"{rate_integer}.{rate_fraction}\""));
    if rate_fraction != 0 {
        ctx.error(FindingKind::FieldConstraint, "sound sample entry sample rate must be an integer");
    }
    let media_timescale = ctx.track_mut(entry).map(|track| track.media_timescale).unwrap_or(0);
    if rate_integer != media_timescale {
        ctx.warning(
            FindingKind::FieldConstraint,
            format!("track timescale {media_timescale} not equal to the sample entry sample rate {rate_integer}"),
        );
    }

    // head (8) + the sound description (20).
    const FIXED_LEN: u64 = 28;
    let (min_offset, max_offset) = entry.header.payload_range();
    let headers = resolve_box_list(ctx.source, min_offset + FIXED_LEN, max_offset)?;
    let mut extensions: Vec<BoxRef> = headers.into_iter().map(BoxRef::new).collect();
    for extension in &mut extensions {
        extension.track = entry.track;
    }

    let result = validate_children(ctx, &mut extensions, box_type::ESDS, BoxPolicy::AT_MOST_ONE, |ctx, b| {
        validate_esds(ctx, b, Some(object_type::AUDIO_MPEG4), Some(stream_type::AUDIO))
    });
    let result = result.and(validate_children(
        ctx,
        &mut extensions,
        box_type::SINF,
        BoxPolicy::AT_MOST_ONE,
        validate_sinf,
    ));
    report_unknown_children(ctx, &extensions, "audio sample description", &[]);
    result
}

fn validate_hint_entry(ctx: &mut ValidationContext<'_>, entry: &BoxRef) -> Result<()> {
    let mut payload = ctx.read_payload(&entry.header)?;
    validate_entry_head(ctx, &mut payload)?;
    ctx.trace(format_args!("sdType=\"{}\"", entry.header.box_type));
    Ok(())
}

fn validate_mp4s_entry(
    ctx: &mut ValidationContext<'_>,
    entry: &BoxRef,
    expect_stream: Option<u32>,
) -> Result<()> {
    let entry_type = entry.header.box_type;
    let mut payload = ctx.read_payload(&entry.header)?;
    validate_entry_head(ctx, &mut payload)?;

    if entry_type.fourcc() != Some(FourCC::MP4S) {
        ctx.error(
            FindingKind::FieldConstraint,
            format!("sample entry type must be `mp4s`, not `{entry_type}`"),
        );
    }

    let (min_offset, max_offset) = entry.header.payload_range();
    let headers = resolve_box_list(ctx.source, min_offset + 8, max_offset)?;
    let mut extensions: Vec<BoxRef> = headers.into_iter().map(BoxRef::new).collect();
    for extension in &mut extensions {
        extension.track = entry.track;
    }

    if extensions.len() != 1 {
        ctx.error(FindingKind::Cardinality, "MPEG-4 only allows 1 elementary stream descriptor");
    }
    let result = validate_children(
        ctx,
        &mut extensions,
        box_type::ESDS,
        BoxPolicy::EXACTLY_ONE,
        |ctx, b| validate_esds(ctx, b, None, expect_stream),
    );
    report_unknown_children(ctx, &extensions, "mpeg sample description", &[]);
    result
}

/// Validate an `esds` box: full-box header plus an ES_Descriptor bitstream.
fn validate_esds(
    ctx: &mut ValidationContext<'_>,
    boxref: &BoxRef,
    expect_object: Option<u32>,
    expect_stream: Option<u32>,
) -> Result<()> {
    let box_type = boxref.header.box_type;
    let (full, payload) = ctx.read_full_box(&boxref.header)?;
    expect_flags_zero(ctx, box_type, &full);
    expect_version_zero(ctx, box_type, &full);

    let mut bb = BitCursor::new(&payload);
    descriptors::validate_es_descriptor(ctx, &mut bb, expect_object, expect_stream, true)?;
    if bb.bytes_left() > 1 {
        ctx.error(
            FindingKind::TrailingData,
            format!("`esds` has {} unused bytes after the ES descriptor", bb.bytes_left()),
        );
    }
    Ok(())
}

/// Validate an `avcC`-family box: the AVCDecoderConfigurationRecord.
fn validate_avcc(ctx: &mut ValidationContext<'_>, boxref: &BoxRef) -> Result<()> {
    let payload = ctx.read_payload(&boxref.header)?;
    let mut bb = BitCursor::new(&payload);
    let avc_config = avc::validate_avc_config(ctx, &mut bb)?;
    if let Some(track) = ctx.track_mut(boxref) {
        track.nal_length_size = Some(avc_config.nal_length_size);
    }
    Ok(())
}

fn validate_btrt(ctx: &mut ValidationContext<'_>, boxref: &BoxRef) -> Result<()> {
    let mut payload = ctx.read_payload(&boxref.header)?;
    if payload.remaining() != 12 {
        ctx.error(
            FindingKind::FieldConstraint,
            format!("`btrt` must be 12 bytes of payload, not {}", payload.remaining()),
        );
        return Ok(());
    }
    let buffer_size_db: u32 = payload.get_mp4()?;
    let max_bitrate: u32 = payload.get_mp4()?;
    let avg_bitrate: u32 = payload.get_mp4()?;
    ctx.trace(format_args!(
        "bufferSizeDB=\"{buffer_size_db}\" maxBitrate=\"{max_bitrate}\" avgBitrate=\"{avg_bitrate}\""
    ));
    Ok(())
}

/// An `m4ds` box carries a sequence of descriptors.
fn validate_m4ds(ctx: &mut ValidationContext<'_>, boxref: &BoxRef) -> Result<()> {
    let payload = ctx.read_payload(&boxref.header)?;
    let mut bb = BitCursor::new(&payload);
    while bb.bits_left() > 0 {
        descriptors::validate_any_descriptor(ctx, &mut bb, "Descriptor")?;
    }
    Ok(())
}

fn validate_colr(ctx: &mut ValidationContext<'_>, boxref: &BoxRef) -> Result<()> {
    let mut payload = ctx.read_payload(&boxref.header)?;
    let colour_type: FourCC = payload.get_mp4()?;
    if colour_type == FourCC::from_str("nclc") || colour_type == FourCC::from_str("nclx") {
        let primaries: u16 = payload.get_mp4()?;
        let transfer: u16 = payload.get_mp4()?;
        let matrix: u16 = payload.get_mp4()?;
        ctx.trace(format_args!(
            "colourType=\"{colour_type}\" primaries=\"{primaries}\" transfer=\"{transfer}\" matrix=\"{matrix}\""
        ));
    } else {
        ctx.warning(FindingKind::FieldConstraint, format!("unknown `colr` colour type `{colour_type}`"));
    }
    Ok(())
}

/// The protection scheme information box and its children.
fn validate_sinf(ctx: &mut ValidationContext<'_>, boxref: &BoxRef) -> Result<()> {
    let mut boxes = ctx.resolve_children(&boxref.header)?;

    let result = validate_children(ctx, &mut boxes, box_type::FRMA, BoxPolicy::EXACTLY_ONE, validate_frma);
    let result = result.and(validate_children(ctx, &mut boxes, box_type::SCHM, BoxPolicy::AT_MOST_ONE, validate_schm));
    let result = result.and(validate_children(ctx, &mut boxes, box_type::SCHI, BoxPolicy::AT_MOST_ONE, validate_schi));
    report_unknown_children(ctx, &boxes, "security information", &[]);
    result
}

fn validate_frma(ctx: &mut ValidationContext<'_>, boxref: &BoxRef) -> Result<()> {
    let mut payload = ctx.read_payload(&boxref.header)?;
    let data_format: FourCC = payload.get_mp4()?;
    ctx.trace(format_args!("dataFormat=\"{data_format}\""));
    Ok(())
}

fn validate_schm(ctx: &mut ValidationContext<'_>, boxref: &BoxRef) -> Result<()> {
    let box_type = boxref.header.box_type;
    let (full, mut payload) = ctx.read_full_box(&boxref.header)?;
    expect_version_zero(ctx, box_type, &full);

    let scheme_type: FourCC = payload.get_mp4()?;
    let scheme_version: u32 = payload.get_mp4()?;
    ctx.trace(format_args!("schemeType=\"{scheme_type}\" schemeVersion=\"0x{scheme_version:x}\""));
    if full.flags & 1 != 0 {
        let location = mdia::read_string_to_end(&mut payload);
        ctx.trace(format_args!("schemeUri=\"{location}\""));
    }
    Ok(())
}

/// Scheme-specific data is opaque to the validator.
fn validate_schi(ctx: &mut ValidationContext<'_>, boxref: &BoxRef) -> Result<()> {
    ctx.trace(format_args!("schemeInformation size=\"{}\"", boxref.header.payload_len()));
    Ok(())
}
