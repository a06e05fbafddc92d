//! MPEG-4 systems descriptor validation: the "class tag + variable-length size" tree carried by
//! `esds` and `iods` payloads.
//!
//! Descriptor sizes are base-128 with a continuation bit, not Exp-Golomb. Each descriptor is
//! decoded in a child cursor scoped to exactly its declared size; unconsumed bits at the end of
//! a descriptor are a finding, not silently ignored. Unknown class tags fall through to a
//! generic decoder that only checks byte alignment and renders the payload opaquely, so new or
//! private tags never abort the file.

use crate::bits::BitCursor;
use crate::codec::mpeg4video::VideoSpecContext;
use crate::codec::{aac, avc, mpeg4video};
use crate::diag::FindingKind;
use crate::error::{ParseError, Result};
use crate::walk::ValidationContext;

/// Descriptor class tags from ISO/IEC 14496-1.
#[allow(missing_docs)]
pub mod tag {
    pub const OBJECT_DESCR: u32 = 0x01;
    pub const INITIAL_OBJECT_DESCR: u32 = 0x02;
    pub const ES_DESCR: u32 = 0x03;
    pub const DECODER_CONFIG_DESCR: u32 = 0x04;
    pub const DEC_SPECIFIC_INFO: u32 = 0x05;
    pub const SL_CONFIG_DESCR: u32 = 0x06;
    pub const IPMP_DESCR_POINTER: u32 = 0x0a;
    pub const ES_ID_INC: u32 = 0x0e;
    pub const ES_ID_REF: u32 = 0x0f;
    pub const MP4_IOD: u32 = 0x10;
    pub const MP4_OD: u32 = 0x11;

    pub const OCI_DESCR_START: u32 = 0x40;
    pub const OCI_DESCR_END: u32 = 0x5f;
    pub const EXT_DESCR_START: u32 = 0x6a;
    pub const EXT_DESCR_END: u32 = 0xfe;
}

/// Object type indications from ISO/IEC 14496-1.
#[allow(missing_docs)]
pub mod object_type {
    pub const SYSTEMS_1: u32 = 0x01;
    pub const SYSTEMS_2: u32 = 0x02;
    pub const VISUAL_MPEG4: u32 = 0x20;
    pub const VISUAL_AVC: u32 = 0x21;
    pub const AUDIO_MPEG4: u32 = 0x40;
    pub const UNSPECIFIED: u32 = 0xff;
}

/// Stream types from ISO/IEC 14496-1.
#[allow(missing_docs)]
pub mod stream_type {
    pub const OBJECT_DESCRIPTOR: u32 = 0x01;
    pub const SCENE_DESCRIPTION: u32 = 0x03;
    pub const VISUAL: u32 = 0x04;
    pub const AUDIO: u32 = 0x05;
}

/// Read a descriptor's class tag and its base-128 encoded size in bytes.
pub fn read_tag_and_size(bb: &mut BitCursor<'_>) -> Result<(u32, u64)> {
    let tag = bb.read_bits(8)?;
    let mut size: u64 = 0;
    for i in 0..4 {
        let byte = bb.read_bits(8)?;
        size = (size << 7) | (byte & 0x7f) as u64;
        if byte & 0x80 == 0 {
            break;
        }
        ensure_attach!(i < 3, ParseError::InvalidInput, "descriptor size uses more than 4 length bytes");
    }
    Ok((tag, size))
}

fn check_alignment(ctx: &mut ValidationContext<'_>, bb: &BitCursor<'_>, name: &str) {
    if bb.bits_left() % 8 != 0 {
        ctx.error(FindingKind::FieldConstraint, format!("{name} did not start byte aligned"));
    }
}

fn check_consumed(ctx: &mut ValidationContext<'_>, child: &BitCursor<'_>, name: &str) {
    if child.bits_left() != 0 {
        ctx.error(
            FindingKind::TrailingData,
            format!("{name} left {} bits unconsumed", child.bits_left()),
        );
    }
}

/// Validate an ES_Descriptor.
///
/// `file_form` selects the constraints that apply to descriptors stored in MP4 sample
/// descriptions (ES_ID zero, no OCR stream, SLConfig predefined 2) as opposed to descriptors
/// carried in object-descriptor streams.
pub fn validate_es_descriptor(
    ctx: &mut ValidationContext<'_>,
    bb: &mut BitCursor<'_>,
    expect_object_type: Option<u32>,
    expect_stream_type: Option<u32>,
    file_form: bool,
) -> Result<()> {
    check_alignment(ctx, bb, "ES_Descriptor");
    let (tag, size) = read_tag_and_size(bb)?;
    ctx.trace(format_args!("<ES_descriptor tag=\"0x{tag:02x}\" size=\"{size}\">"));
    if tag != tag::ES_DESCR {
        ctx.error(FindingKind::FieldConstraint, format!("ES_Descriptor tag is 0x{tag:02x}"));
    }
    let mut child = bb.sub_cursor(size)?;

    let es_id = child.read_bits(16)?;
    if file_form && es_id != 0 {
        ctx.error(
            FindingKind::FieldConstraint,
            format!("ES_ID must be 0 in media tracks, not {es_id}"),
        );
    }
    let stream_dependence_flag = child.read_bit()?;
    if stream_dependence_flag != 0 {
        ctx.error(FindingKind::FieldConstraint, "ES_Descriptor streamDependenceFlag must be 0");
    }
    let url_flag = child.read_bit()?;
    let ocr_stream_flag = child.read_bit()?;
    if file_form && ocr_stream_flag != 0 {
        ctx.error(FindingKind::FieldConstraint, "ES_Descriptor OCRstreamFlag must be 0 in media tracks");
    }
    let _stream_priority = child.read_bits(5)?;

    if stream_dependence_flag == 1 {
        let _depends_on_es_id = child.read_bits(16)?;
    }
    if url_flag == 1 {
        let url_length = child.read_bits(8)?;
        let url = child.read_bytes(url_length as usize)?;
        ctx.trace(format_args!("URLstring=\"{}\"", String::from_utf8_lossy(&url)));
    }
    if ocr_stream_flag == 1 {
        let _ocr_es_id = child.read_bits(16)?;
    }

    while child.bits_left() > 0 && child.peek_bits(8).unwrap_or(0) == tag::DECODER_CONFIG_DESCR {
        validate_decoder_config(ctx, &mut child, expect_object_type, expect_stream_type)?;
    }
    while child.bits_left() > 0 && child.peek_bits(8).unwrap_or(0) == tag::SL_CONFIG_DESCR {
        validate_sl_config(ctx, &mut child, file_form)?;
    }
    while child.bits_left() > 0 {
        validate_any_descriptor(ctx, &mut child, "Descriptor")?;
    }

    bb.skip_bytes(size)?;
    ctx.trace(format_args!("</ES_descriptor>"));
    Ok(())
}

/// Validate a DecoderConfigDescriptor and its nested DecoderSpecificInfo.
pub fn validate_decoder_config(
    ctx: &mut ValidationContext<'_>,
    bb: &mut BitCursor<'_>,
    expect_object_type: Option<u32>,
    expect_stream_type: Option<u32>,
) -> Result<()> {
    check_alignment(ctx, bb, "DecoderConfigDescriptor");
    let (tag, size) = read_tag_and_size(bb)?;
    ctx.trace(format_args!("<DecConfig_descriptor tag=\"0x{tag:02x}\" size=\"{size}\">"));
    if tag != tag::DECODER_CONFIG_DESCR {
        ctx.error(FindingKind::FieldConstraint, format!("DecoderConfigDescriptor tag is 0x{tag:02x}"));
    }
    let mut child = bb.sub_cursor(size)?;

    let object_type = child.read_bits(8)?;
    if let Some(expected) = expect_object_type {
        if object_type != expected {
            ctx.error(
                FindingKind::FieldConstraint,
                format!("expected objectTypeIndication 0x{expected:02x}, not 0x{object_type:02x}"),
            );
        }
    }
    let stream_type = child.read_bits(6)?;
    if let Some(expected) = expect_stream_type {
        if stream_type != expected {
            ctx.error(
                FindingKind::FieldConstraint,
                format!("expected streamType 0x{expected:02x}, not 0x{stream_type:02x}"),
            );
        }
    }
    let up_stream = child.read_bit()?;
    if up_stream != 0 {
        ctx.error(FindingKind::FieldConstraint, "DecoderConfigDescriptor upStream must be 0");
    }
    let reserved = child.read_bit()?;
    if reserved != 1 {
        ctx.error(FindingKind::FieldConstraint, "DecoderConfigDescriptor reserved bit must be 1");
    }
    let buffer_size_db = child.read_bits(24)?;
    let max_bitrate = child.read_bits(32)?;
    let _avg_bitrate = child.read_bits(32)?;

    while child.bits_left() > 0 && child.peek_bits(8).unwrap_or(0) == tag::DEC_SPECIFIC_INFO {
        let mut video_context = VideoSpecContext::default();
        validate_dec_specific_info(ctx, &mut child, object_type, stream_type, &mut video_context)?;
        if object_type == object_type::VISUAL_MPEG4 && stream_type == stream_type::VISUAL {
            mpeg4video::check_video_profile_limits(ctx, buffer_size_db, max_bitrate, &video_context);
        }
    }
    while child.bits_left() > 0 {
        validate_any_descriptor(ctx, &mut child, "Descriptor")?;
    }

    bb.skip_bytes(size)?;
    ctx.trace(format_args!("</DecConfig_descriptor>"));
    Ok(())
}

/// Validate a DecoderSpecificInfo, dispatching on the object and stream types of the containing
/// DecoderConfigDescriptor.
pub fn validate_dec_specific_info(
    ctx: &mut ValidationContext<'_>,
    bb: &mut BitCursor<'_>,
    object_type: u32,
    stream_type: u32,
    video_context: &mut VideoSpecContext,
) -> Result<()> {
    check_alignment(ctx, bb, "DecoderSpecificInfo");
    let (tag, size) = read_tag_and_size(bb)?;
    ctx.trace(format_args!("<DecoderSpecificInfo tag=\"0x{tag:02x}\" size=\"{size}\">"));
    if tag != tag::DEC_SPECIFIC_INFO {
        ctx.error(FindingKind::FieldConstraint, format!("DecoderSpecificInfo tag is 0x{tag:02x}"));
    }
    let mut child = bb.sub_cursor(size)?;

    match object_type {
        object_type::SYSTEMS_1 | object_type::SYSTEMS_2 if stream_type == stream_type::SCENE_DESCRIPTION => {
            validate_bifs_config(ctx, &mut child, object_type)?;
        }
        // Some old systems streams leave the object type unspecified.
        object_type::UNSPECIFIED if stream_type == stream_type::SCENE_DESCRIPTION => {
            validate_bifs_config(ctx, &mut child, object_type::SYSTEMS_1)?;
        }
        object_type::AUDIO_MPEG4 => aac::validate_audio_specific_config(ctx, &mut child)?,
        object_type::VISUAL_MPEG4 => {
            mpeg4video::validate_visual_info(
                ctx,
                &mut child,
                Some(mpeg4video::start_code::VISUAL_OBJECT_SEQUENCE),
                1,
                video_context,
            )?;
        }
        object_type::VISUAL_AVC => {
            avc::validate_avc_config(ctx, &mut child)?;
        }
        _ => {}
    }

    check_consumed(ctx, &child, "DecoderSpecificInfo");
    bb.skip_bytes(size)?;
    ctx.trace(format_args!("</DecoderSpecificInfo>"));
    Ok(())
}

/// Validate an SLConfigDescriptor.
pub fn validate_sl_config(ctx: &mut ValidationContext<'_>, bb: &mut BitCursor<'_>, file_form: bool) -> Result<()> {
    check_alignment(ctx, bb, "SLConfigDescriptor");
    let (tag, size) = read_tag_and_size(bb)?;
    ctx.trace(format_args!("<SLConfigDescriptor tag=\"0x{tag:02x}\" size=\"{size}\">"));
    if tag != tag::SL_CONFIG_DESCR {
        ctx.error(FindingKind::FieldConstraint, format!("SLConfigDescriptor tag is 0x{tag:02x}"));
    }
    if file_form && size != 1 {
        ctx.error(
            FindingKind::FieldConstraint,
            format!("SLConfigDescriptor size {size} is not the required size 1"),
        );
    }
    let mut child = bb.sub_cursor(size)?;

    let predefined = child.read_bits(8)?;
    if file_form {
        if predefined != 2 {
            ctx.error(
                FindingKind::FieldConstraint,
                format!("SLConfigDescriptor predefined must be 2 in media tracks, not {predefined}"),
            );
        }
    } else if predefined == 2 {
        ctx.error(
            FindingKind::FieldConstraint,
            "SLConfigDescriptor predefined 2 not allowed outside of mp4 file context",
        );
    }

    let mut duration_flag = 0;
    let mut use_time_stamps_flag = 1;
    let mut time_stamp_length = 0;
    if predefined == 0 {
        let _use_access_unit_start_flag = child.read_bit()?;
        let _use_access_unit_end_flag = child.read_bit()?;
        let _use_random_access_point_flag = child.read_bit()?;
        let _has_random_access_units_only_flag = child.read_bit()?;
        let _use_padding_flag = child.read_bit()?;
        use_time_stamps_flag = child.read_bit()?;
        let _use_idle_flag = child.read_bit()?;
        duration_flag = child.read_bit()?;

        let _time_stamp_resolution = child.read_bits(32)?;
        let _ocr_resolution = child.read_bits(32)?;

        time_stamp_length = child.read_bits(8)?;
        if time_stamp_length > 64 {
            ctx.error(FindingKind::FieldConstraint, format!("timeStampLength {time_stamp_length} out of bounds"));
        }
        let ocr_length = child.read_bits(8)?;
        if ocr_length > 64 {
            ctx.error(FindingKind::FieldConstraint, format!("OCRLength {ocr_length} out of bounds"));
        }
        let au_length = child.read_bits(8)?;
        if au_length > 32 {
            ctx.error(FindingKind::FieldConstraint, format!("AU_Length {au_length} out of bounds"));
        }
        let _instant_bitrate_length = child.read_bits(8)?;
        let _degradation_priority_length = child.read_bits(4)?;
        let au_seq_num_length = child.read_bits(5)?;
        if au_seq_num_length > 16 {
            ctx.error(FindingKind::FieldConstraint, format!("AU_seqNumLength {au_seq_num_length} out of bounds"));
        }
        let packet_seq_num_length = child.read_bits(5)?;
        if packet_seq_num_length > 16 {
            ctx.error(
                FindingKind::FieldConstraint,
                format!("packetSeqNumLength {packet_seq_num_length} out of bounds"),
            );
        }
        let reserved = child.read_bits(2)?;
        if reserved != 3 {
            ctx.error(FindingKind::FieldConstraint, "SLConfigDescriptor reserved bits must be 0b11");
        }
    } else if predefined == 1 {
        duration_flag = 0;
        use_time_stamps_flag = 0;
        time_stamp_length = 32;
    } else {
        if predefined != 2 {
            ctx.error(
                FindingKind::FieldConstraint,
                format!("SLConfigDescriptor predefined {predefined} is not recognized"),
            );
        }
        duration_flag = 0;
        use_time_stamps_flag = 1;
        time_stamp_length = 0;
    }

    if duration_flag == 1 {
        let _time_scale = child.read_bits(32)?;
        let _access_unit_duration = child.read_bits(16)?;
        let _composition_unit_duration = child.read_bits(16)?;
    }
    if use_time_stamps_flag == 0 {
        let _start_decoding_time_stamp = child.read_bits_u64(time_stamp_length)?;
        let _start_composition_time_stamp = child.read_bits_u64(time_stamp_length)?;
    }

    bb.skip_bytes(size)?;
    ctx.trace(format_args!("</SLConfigDescriptor>"));
    Ok(())
}

/// Validate an ObjectDescriptor or MP4 ObjectDescriptor.
pub fn validate_object_descriptor(ctx: &mut ValidationContext<'_>, bb: &mut BitCursor<'_>) -> Result<()> {
    check_alignment(ctx, bb, "ObjectDescriptor");
    let (tag, size) = read_tag_and_size(bb)?;
    ctx.trace(format_args!("<Object_descriptor tag=\"0x{tag:02x}\" size=\"{size}\">"));
    if tag != tag::OBJECT_DESCR && tag != tag::MP4_OD {
        ctx.error(FindingKind::FieldConstraint, format!("ObjectDescriptor tag is 0x{tag:02x}"));
    }
    let mut child = bb.sub_cursor(size)?;

    let _od_id = child.read_bits(10)?;
    let url_flag = child.read_bit()?;
    let reserved = child.read_bits(5)?;
    if reserved != 0x1f {
        ctx.error(FindingKind::FieldConstraint, "ObjectDescriptor reserved bits must be all ones");
    }

    if url_flag == 1 {
        let url_length = child.read_bits(8)?;
        let url = child.read_bytes(url_length as usize)?;
        ctx.trace(format_args!("URLstring=\"{}\"", String::from_utf8_lossy(&url)));
        while child.bits_left() > 0 {
            validate_any_descriptor(ctx, &mut child, "Descriptor")?;
        }
    } else {
        while child.bits_left() > 0 {
            match child.peek_bits(8).unwrap_or(0) {
                tag::ES_DESCR => validate_es_descriptor(ctx, &mut child, None, None, false)?,
                tag::ES_ID_INC => validate_es_id_inc(ctx, &mut child)?,
                tag::ES_ID_REF => validate_es_id_ref(ctx, &mut child)?,
                _ => validate_any_descriptor(ctx, &mut child, "Descriptor")?,
            }
        }
    }

    bb.skip_bytes(size)?;
    ctx.trace(format_args!("</Object_descriptor>"));
    Ok(())
}

/// Validate an ES_ID_Inc descriptor (references an elementary stream by track ID).
pub fn validate_es_id_inc(ctx: &mut ValidationContext<'_>, bb: &mut BitCursor<'_>) -> Result<()> {
    check_alignment(ctx, bb, "ES_ID_Inc descriptor");
    let (tag, size) = read_tag_and_size(bb)?;
    ctx.trace(format_args!("<ES_ID_Inc tag=\"0x{tag:02x}\" size=\"{size}\"/>"));
    if size != 4 {
        ctx.error(FindingKind::FieldConstraint, format!("ES_ID_Inc size must be 4 bytes, not {size}"));
    }
    let mut child = bb.sub_cursor(size)?;
    let _track_id = child.read_bits(32)?;
    bb.skip_bytes(size)?;
    Ok(())
}

/// Validate an ES_ID_Ref descriptor (references an elementary stream by track reference index).
pub fn validate_es_id_ref(ctx: &mut ValidationContext<'_>, bb: &mut BitCursor<'_>) -> Result<()> {
    check_alignment(ctx, bb, "ES_ID_Ref descriptor");
    let (tag, size) = read_tag_and_size(bb)?;
    ctx.trace(format_args!("<ES_ID_Ref tag=\"0x{tag:02x}\" size=\"{size}\"/>"));
    if size != 2 {
        ctx.error(FindingKind::FieldConstraint, format!("ES_ID_Ref size must be 2 bytes, not {size}"));
    }
    let mut child = bb.sub_cursor(size)?;
    let _track_ref_index = child.read_bits(16)?;
    bb.skip_bytes(size)?;
    Ok(())
}

/// Validate any descriptor by tag, falling back to an opaque hex rendering for tags without a
/// dedicated validator.
pub fn validate_any_descriptor(ctx: &mut ValidationContext<'_>, bb: &mut BitCursor<'_>, name: &str) -> Result<()> {
    match bb.peek_bits(8)? {
        tag::OBJECT_DESCR | tag::MP4_OD => validate_object_descriptor(ctx, bb),
        tag::ES_DESCR => validate_es_descriptor(ctx, bb, None, None, false),
        tag::DECODER_CONFIG_DESCR => validate_decoder_config(ctx, bb, None, None),
        tag::SL_CONFIG_DESCR => validate_sl_config(ctx, bb, false),
        tag::ES_ID_INC => validate_es_id_inc(ctx, bb),
        tag::ES_ID_REF => validate_es_id_ref(ctx, bb),
        // A DecSpecificInfo found outside its DecoderConfigDescriptor cannot be decoded (the
        // object and stream types live in the parent), so it renders opaquely like unknown tags.
        _ => {
            check_alignment(ctx, bb, name);
            let (tag, size) = read_tag_and_size(bb)?;
            ctx.trace(format_args!(
                "<{name} tag=\"0x{tag:02x}\" size=\"{size}\" class=\"{}\">",
                tag_class_name(tag)
            ));
            let mut child = bb.sub_cursor(size)?;
            let payload = child.read_bytes(size as usize)?;
            trace_hex(ctx, &payload);
            bb.skip_bytes(size)?;
            ctx.trace(format_args!("</{name}>"));
            Ok(())
        }
    }
}

/// Validate the object-descriptor payload of an `iods` box.
///
/// `file_form` is true for the MP4 file form (MP4_IOD tag, ES_ID_Inc references); false decodes
/// a raw InitialObjectDescriptor.
pub fn validate_initial_object_descriptor(
    ctx: &mut ValidationContext<'_>,
    data: &[u8],
    file_form: bool,
) -> Result<()> {
    let mut bb = BitCursor::new(data);
    ctx.trace(format_args!("<iods_OD>"));

    let (tag, size) = read_tag_and_size(&mut bb)?;
    let expected_tag = if file_form { tag::MP4_IOD } else { tag::INITIAL_OBJECT_DESCR };
    if tag != expected_tag {
        ctx.error(
            FindingKind::FieldConstraint,
            format!("object descriptor tag must be 0x{expected_tag:02x}, not 0x{tag:02x}"),
        );
    }
    if bb.bits_left() != size * 8 {
        ctx.error(FindingKind::FieldConstraint, "descriptor does not fit exactly into the box");
    }

    let _object_descriptor_id = bb.read_bits(10)?;
    let url_flag = bb.read_bit()?;
    let _include_inline_profile_level_flag = bb.read_bit()?;
    let reserved = bb.read_bits(4)?;
    if reserved != 0xf {
        ctx.error(FindingKind::FieldConstraint, "InitialObjectDescriptor reserved bits must be all ones");
    }

    if url_flag == 1 {
        let url_length = bb.read_bits(8)?;
        let url = bb.read_bytes(url_length as usize)?;
        ctx.trace(format_args!("URLstring=\"{}\"", String::from_utf8_lossy(&url)));
    } else {
        let od_profile = bb.read_bits(8)?;
        if od_profile != 0xff {
            ctx.error(
                FindingKind::FieldConstraint,
                format!("ISMA expects no-capability (0xFF) for ODProfileLevelIndication, not 0x{od_profile:02x}"),
            );
        }
        let scene_profile = bb.read_bits(8)?;
        if scene_profile != 0xff {
            ctx.error(
                FindingKind::FieldConstraint,
                format!("ISMA expects no-capability (0xFF) for sceneProfileLevelIndication, not 0x{scene_profile:02x}"),
            );
        }
        let audio_profile = bb.read_bits(8)?;
        if !matches!(audio_profile, 0xff | 0x0f | 0x0e | 0x2a | 0x2c) {
            ctx.error(
                FindingKind::FieldConstraint,
                format!(
                    "ISMA expects no-capability (0xFF), Hi-Quality@L1/L2 (0x0E/0x0F), AAC@L4 (0x2A) or \
                     HE-AAC@L2 (0x2C) for audioProfileLevelIndication, not 0x{audio_profile:02x}"
                ),
            );
        }
        let visual_profile = bb.read_bits(8)?;
        let visual_ok = visual_profile == 0xff
            || visual_profile == 0x08
            || (0x01..=0x03).contains(&visual_profile)
            || (0xf0..=0xf3).contains(&visual_profile)
            || visual_profile == 0xf7
            || visual_profile == 0x7f;
        if !visual_ok {
            ctx.error(
                FindingKind::FieldConstraint,
                format!(
                    "ISMA expects no-capability (0xFF), Simple@L0-3, AdvSimple@L0-3b or AVC (0x7F) for \
                     visualProfileLevelIndication, not 0x{visual_profile:02x}"
                ),
            );
        }
        match ctx.visual_profile_level {
            None => {
                if visual_profile != 0xff {
                    ctx.error(
                        FindingKind::FieldConstraint,
                        format!(
                            "visualProfileLevelIndication 0x{visual_profile:02x} signalled but there seems \
                             to be no video track"
                        ),
                    );
                }
            }
            Some(from_track) => {
                if u32::from(from_track) != visual_profile {
                    ctx.error(
                        FindingKind::FieldConstraint,
                        format!(
                            "visualProfileLevelIndication 0x{visual_profile:02x} does not correspond to the \
                             indication in the sample description 0x{from_track:02x}"
                        ),
                    );
                }
            }
        }
        let graphics_profile = bb.read_bits(8)?;
        if graphics_profile != 0xff {
            ctx.error(
                FindingKind::FieldConstraint,
                format!(
                    "ISMA expects no-capability (0xFF) for graphicsProfileLevelIndication, not \
                     0x{graphics_profile:02x}"
                ),
            );
        }

        if file_form {
            if bb.peek_bits(8).unwrap_or(0) != tag::ES_ID_INC {
                ctx.error(FindingKind::FieldConstraint, "iods must carry at least one ES_ID_Inc descriptor");
            }
            while bb.peek_bits(8).unwrap_or(0) == tag::ES_ID_INC {
                validate_es_id_inc(ctx, &mut bb)?;
            }
        } else {
            if bb.peek_bits(8).unwrap_or(0) != tag::ES_DESCR {
                ctx.error(FindingKind::FieldConstraint, "iods must carry at least one ES_Descriptor");
            }
            while bb.peek_bits(8).unwrap_or(0) == tag::ES_DESCR {
                validate_es_descriptor(ctx, &mut bb, None, None, false)?;
            }
        }

        while matches!(bb.peek_bits(8).unwrap_or(0), t if (tag::EXT_DESCR_START..=tag::EXT_DESCR_END).contains(&t)) {
            validate_any_descriptor(ctx, &mut bb, "ExtensionDescriptor")?;
        }
        while bb.peek_bits(8).unwrap_or(0) == tag::IPMP_DESCR_POINTER {
            validate_any_descriptor(ctx, &mut bb, "IPMP_descriptor")?;
        }
    }

    while matches!(bb.peek_bits(8).unwrap_or(0), t if (tag::OCI_DESCR_START..=tag::OCI_DESCR_END).contains(&t)) {
        validate_any_descriptor(ctx, &mut bb, "OCIDescriptor")?;
    }

    ctx.trace(format_args!("</iods_OD>"));
    if bb.bytes_left() > 1 {
        ctx.error(FindingKind::TrailingData, "object descriptor leaves unused bytes in the box");
    }
    Ok(())
}

/// BIFS scene-description decoder configuration.
fn validate_bifs_config(ctx: &mut ValidationContext<'_>, bb: &mut BitCursor<'_>, object_type: u32) -> Result<()> {
    if object_type != object_type::SYSTEMS_1 {
        let _use_3d_mesh_coding = bb.read_bit()?;
        let _reserved = bb.read_bit()?;
    }
    let _node_id_bits = bb.read_bits(5)?;
    let _route_id_bits = bb.read_bits(5)?;
    if object_type != object_type::SYSTEMS_1 {
        let _proto_id_bits = bb.read_bits(5)?;
    }
    let is_command_stream = bb.read_bit()?;
    if is_command_stream == 1 {
        let _pixel_metric = bb.read_bit()?;
        let has_size = bb.read_bit()?;
        if has_size == 1 {
            let _pixel_width = bb.read_bits(16)?;
            let _pixel_height = bb.read_bits(16)?;
        }
    } else {
        let _random_access = bb.read_bit()?;
    }
    bb.align_to_byte()?;
    Ok(())
}

fn tag_class_name(tag: u32) -> &'static str {
    match tag {
        0x00 | 0xff => "Forbidden",
        0x01 => "ObjectDescrTag",
        0x02 => "InitialObjectDescrTag",
        0x03 => "ES_DescrTag",
        0x04 => "DecoderConfigDescrTag",
        0x05 => "DecSpecificInfoTag",
        0x06 => "SLConfigDescrTag",
        0x07 => "ContentIdentDescrTag",
        0x08 => "SupplContentIdentDescrTag",
        0x09 => "IPI_DescrPointerTag",
        0x0a => "IPMP_DescrPointerTag",
        0x0b => "IPMP_DescrTag",
        0x0c => "QoS_DescrTag",
        0x0d => "RegistrationDescrTag",
        0x0e => "ES_ID_IncTag",
        0x0f => "ES_ID_RefTag",
        0x10 => "MP4_IOD_Tag",
        0x11 => "MP4_OD_Tag",
        0x12 => "IPI_DescrPointerRefTag",
        0x13 => "ExtendedProfileLevelDescrTag",
        0x14 => "profileLevelIndicationIndexDescrTag",
        0x15..=0x3f => "ISO Reserved",
        0x40 => "ContentClassificationDescrTag",
        0x41 => "KeyWordDescrTag",
        0x42 => "RatingDescrTag",
        0x43 => "LanguageDescrTag",
        0x44 => "ShortTextualDescrTag",
        0x45 => "ExpandedTextualDescrTag",
        0x46 => "ContentCreatorNameDescrTag",
        0x47 => "ContentCreationDateDescrTag",
        0x48 => "OCICreatorNameDescrTag",
        0x49 => "OCICreationDateDescrTag",
        0x4a => "SmpteCameraPositionDescrTag",
        0x4b..=0x5f => "ISO OCI Reserved",
        0x60..=0xbf => "ISO Reserved",
        0xc0..=0xfe => "user private",
        _ => "Forbidden",
    }
}

fn trace_hex(ctx: &ValidationContext<'_>, bytes: &[u8]) {
    for chunk in bytes.chunks(16) {
        let line: Vec<String> = chunk.iter().map(|byte| format!("{byte:02x}")).collect();
        ctx.trace(format_args!("{}", line.join(" ")));
    }
}

#[cfg(test)]
mod test {
    use bytes::Bytes;

    use crate::diag::Severity;
    use crate::Config;

    use super::*;

    fn test_run(f: impl FnOnce(&mut ValidationContext<'_>)) -> Vec<crate::diag::Finding> {
        let source = Bytes::new();
        let config = Config::default();
        let mut ctx = ValidationContext::new(&source, &config);
        f(&mut ctx);
        ctx.diags.into_findings()
    }

    fn put_descriptor(out: &mut Vec<u8>, tag: u8, payload: &[u8]) {
        out.push(tag);
        assert!(payload.len() < 0x80);
        out.push(payload.len() as u8);
        out.extend_from_slice(payload);
    }

    /// An SLConfigDescriptor in the mp4 file form: predefined == 2.
    fn file_sl_config(out: &mut Vec<u8>) {
        put_descriptor(out, tag::SL_CONFIG_DESCR as u8, &[2]);
    }

    fn minimal_decoder_config(out: &mut Vec<u8>, object_type: u8, stream_type: u8) {
        let mut payload = vec![object_type, (stream_type << 2) | 0b01];
        payload.extend_from_slice(&[0, 16, 0]); // bufferSizeDB
        payload.extend_from_slice(&0u32.to_be_bytes()); // maxBitrate
        payload.extend_from_slice(&0u32.to_be_bytes()); // avgBitrate
        put_descriptor(out, tag::DECODER_CONFIG_DESCR as u8, &payload);
    }

    #[test]
    fn tag_and_size_single_byte() {
        let data = [0x03, 0x19];
        let mut bb = BitCursor::new(&data);
        assert_eq!(read_tag_and_size(&mut bb).unwrap(), (3, 0x19));
    }

    #[test]
    fn tag_and_size_continuation_bytes() {
        // 0x81 0x02 => (1 << 7) | 2.
        let data = [0x04, 0x81, 0x02];
        let mut bb = BitCursor::new(&data);
        assert_eq!(read_tag_and_size(&mut bb).unwrap(), (4, 0x82));
    }

    #[test]
    fn tag_and_size_rejects_over_long_size() {
        let data = [0x04, 0x81, 0x82, 0x83, 0x84, 0x05];
        let mut bb = BitCursor::new(&data);
        read_tag_and_size(&mut bb).unwrap_err();
    }

    #[test]
    fn es_descriptor_file_form_happy_path() {
        let mut es_payload = vec![0, 0, 0]; // ES_ID == 0, no flags, priority 0
        minimal_decoder_config(&mut es_payload, 0x6b, stream_type::AUDIO as u8); // mp3, no DecSpecificInfo
        file_sl_config(&mut es_payload);
        let mut data = vec![];
        put_descriptor(&mut data, tag::ES_DESCR as u8, &es_payload);

        let findings = test_run(|ctx| {
            let mut bb = BitCursor::new(&data);
            validate_es_descriptor(ctx, &mut bb, None, None, true).unwrap();
            assert_eq!(bb.bits_left(), 0);
        });
        assert!(findings.is_empty(), "unexpected findings: {findings:?}");
    }

    #[test]
    fn es_descriptor_nonzero_es_id_in_file_form() {
        let mut es_payload = vec![0, 7, 0]; // ES_ID == 7
        minimal_decoder_config(&mut es_payload, 0x6b, stream_type::AUDIO as u8);
        file_sl_config(&mut es_payload);
        let mut data = vec![];
        put_descriptor(&mut data, tag::ES_DESCR as u8, &es_payload);

        let findings = test_run(|ctx| {
            let mut bb = BitCursor::new(&data);
            validate_es_descriptor(ctx, &mut bb, None, None, true).unwrap();
        });
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, FindingKind::FieldConstraint);
        assert!(findings[0].message.contains("ES_ID"));
    }

    #[test]
    fn unknown_descriptor_is_skipped_gracefully() {
        let mut data = vec![];
        put_descriptor(&mut data, 0xc5, &[1, 2, 3, 4]); // user private tag

        let findings = test_run(|ctx| {
            let mut bb = BitCursor::new(&data);
            validate_any_descriptor(ctx, &mut bb, "Descriptor").unwrap();
            assert_eq!(bb.bits_left(), 0);
        });
        assert!(findings.is_empty());
    }

    #[test]
    fn sl_config_wrong_predefined_in_file_form() {
        let mut data = vec![];
        put_descriptor(&mut data, tag::SL_CONFIG_DESCR as u8, &[1]);

        let findings = test_run(|ctx| {
            let mut bb = BitCursor::new(&data);
            validate_sl_config(ctx, &mut bb, true).unwrap();
        });
        assert_eq!(findings.len(), 1);
        assert!(findings[0].message.contains("predefined"));
    }

    #[test]
    fn iods_missing_es_id_inc_is_flagged() {
        let mut payload = vec![];
        // objectDescriptorID 10 bits == 1, urlFlag 0, includeInline 0, reserved 1111.
        payload.extend_from_slice(&[0b0000_0000, 0b0100_1111]);
        payload.extend_from_slice(&[0xff, 0xff, 0xff, 0xff, 0xff]); // five profile indications
        let mut data = vec![];
        put_descriptor(&mut data, tag::MP4_IOD as u8, &payload);

        let findings = test_run(|ctx| {
            validate_initial_object_descriptor(ctx, &data, true).unwrap();
        });
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Error);
        assert!(findings[0].message.contains("ES_ID_Inc"));
    }
}
