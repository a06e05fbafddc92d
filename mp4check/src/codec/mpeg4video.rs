//! MPEG-4 Visual (Part 2) configuration validation: the recursive start-code descent over
//! VisualObjectSequence, VisualObject and VideoObjectLayer headers, plus the profile-limit
//! cross-check against the declared decoder buffer size and bitrate.

use crate::bits::BitCursor;
use crate::diag::FindingKind;
use crate::error::Result;
use crate::walk::ValidationContext;

/// MPEG-4 Visual start codes (full 32-bit values).
#[allow(missing_docs)]
pub mod start_code {
    pub const VISUAL_OBJECT_SEQUENCE: u32 = 0x0000_01b0;
    pub const VISUAL_OBJECT_SEQUENCE_END: u32 = 0x0000_01b1;
    pub const USER_DATA: u32 = 0x0000_01b2;
    pub const VISUAL_OBJECT: u32 = 0x0000_01b5;
    pub const VIDEO_OBJECT_FIRST: u32 = 0x0000_0100;
    pub const VIDEO_OBJECT_LAST: u32 = 0x0000_011f;
    pub const VIDEO_OBJECT_LAYER_FIRST: u32 = 0x0000_0120;
    pub const VIDEO_OBJECT_LAYER_LAST: u32 = 0x0000_012f;
}

/// Cross-descriptor state threaded through the nested VOL decode calls and consulted afterward
/// against the declared buffer size and bitrate.
#[derive(Clone, Copy, Debug, Default)]
pub struct VideoSpecContext {
    /// The profile-level indication from the VisualObjectSequence header.
    pub profile_level: u32,
    /// VOL width in pixels (rectangular shape only).
    pub width: u32,
    /// VOL height in pixels (rectangular shape only).
    pub height: u32,
    /// The VOP time increment resolution.
    pub vop_time_increment_resolution: u32,
}

fn visual_profile_name(indicator: u32) -> &'static str {
    match indicator {
        0x01 => "SP@L1",
        0x02 => "SP@L2",
        0x03 => "SP@L3",
        0x08 => "SP@L0",
        0x10 => "SSP@L0",
        0x11 => "SSP@L1",
        0x12 => "SSP@L2",
        0x21 => "CP@L1",
        0x22 => "CP@L2",
        0x32 => "MP@L2",
        0x33 => "MP@L3",
        0x34 => "MP@L4",
        0x42 => "NBP@L2",
        0x51 => "STP@L1",
        0x7f => "AVC",
        0xf0 => "ASP@L0",
        0xf1 => "ASP@L1",
        0xf2 => "ASP@L2",
        0xf3 => "ASP@L3",
        0xf4 => "ASP@L4",
        0xf5 => "ASP@L5",
        0xf7 => "ASP@L3B",
        0xf8 => "FGSP@L0",
        0xf9 => "FGSP@L1",
        0xfa => "FGSP@L2",
        0xfb => "FGSP@L3",
        0xfc => "FGSP@L4",
        0xfd => "FGSP@L5",
        _ => "reserved",
    }
}

/// Number of bits needed to represent `x`.
fn bit_width(x: u32) -> u32 {
    32 - x.leading_zeros()
}

fn expect_marker_bit(ctx: &mut ValidationContext<'_>, bb: &mut BitCursor<'_>) -> Result<()> {
    if bb.read_bit()? != 1 {
        ctx.error(FindingKind::FieldConstraint, "marker bit must be 1");
    }
    Ok(())
}

fn check_vo_ver_id(ctx: &mut ValidationContext<'_>, vo_ver_id: u32) {
    if !matches!(vo_ver_id, 1 | 2 | 5) {
        ctx.error(FindingKind::FieldConstraint, format!("visual object verid {vo_ver_id} should be 1, 2 or 5"));
    }
}

/// Validate a chunk of MPEG-4 Visual configuration, dispatching on its leading 32-bit start
/// code. Recurses for nested user data, VisualObject and VideoObjectLayer headers.
pub fn validate_visual_info(
    ctx: &mut ValidationContext<'_>,
    bb: &mut BitCursor<'_>,
    expect_startcode: Option<u32>,
    default_vo_ver_id: u32,
    vsc: &mut VideoSpecContext,
) -> Result<()> {
    let start_code = bb.read_bits(32)?;
    ctx.trace(format_args!("startcode=\"0x{start_code:08x}\""));
    if let Some(expected) = expect_startcode {
        if start_code != expected {
            ctx.error(
                FindingKind::FieldConstraint,
                format!("expected start code 0x{expected:08x}, got 0x{start_code:08x}"),
            );
        }
    }

    if start_code == start_code::VISUAL_OBJECT_SEQUENCE {
        let profile_level = bb.read_bits(8)?;
        ctx.trace(format_args!(
            "profile=\"0x{profile_level:02x}\" profile_name=\"{}\"",
            visual_profile_name(profile_level)
        ));
        vsc.profile_level = profile_level;
        // Recorded for the cross-check against the iods declaration.
        ctx.visual_profile_level = Some(profile_level as u8);

        while bb.peek_bits(32).unwrap_or(0) == start_code::USER_DATA {
            validate_visual_info(ctx, bb, Some(start_code::USER_DATA), default_vo_ver_id, vsc)?;
        }
        validate_visual_info(ctx, bb, Some(start_code::VISUAL_OBJECT), default_vo_ver_id, vsc)?;
        if bb.bits_left() >= 32 {
            let end_code = bb.read_bits(32)?;
            if end_code != start_code::VISUAL_OBJECT_SEQUENCE_END {
                ctx.error(
                    FindingKind::FieldConstraint,
                    format!("expected VisualObjectSequence end code, got 0x{end_code:08x}"),
                );
            }
        }
    } else if start_code == start_code::USER_DATA {
        let mut count = 0u32;
        while bb.peek_bits(24).unwrap_or(1) != 1 {
            bb.skip_bytes(1)?;
            count += 1;
        }
        ctx.trace(format_args!("<VideoUserData length=\"{count}\"/>"));
    } else if start_code == start_code::VISUAL_OBJECT {
        validate_visual_object(ctx, bb, default_vo_ver_id, vsc)?;
    } else if (start_code::VIDEO_OBJECT_LAYER_FIRST..=start_code::VIDEO_OBJECT_LAYER_LAST).contains(&start_code) {
        validate_video_object_layer(ctx, bb, default_vo_ver_id, vsc)?;
    }

    Ok(())
}

fn validate_visual_object(
    ctx: &mut ValidationContext<'_>,
    bb: &mut BitCursor<'_>,
    default_vo_ver_id: u32,
    vsc: &mut VideoSpecContext,
) -> Result<()> {
    let mut vo_ver_id = default_vo_ver_id;
    let is_visual_object_identifier = bb.read_bit()?;
    if is_visual_object_identifier == 1 {
        vo_ver_id = bb.read_bits(4)?;
        check_vo_ver_id(ctx, vo_ver_id);
        let _vo_priority = bb.read_bits(3)?;
    }
    let vo_type = bb.read_bits(4)?;
    if vo_type != 1 {
        ctx.error(FindingKind::FieldConstraint, format!("visual object type {vo_type} should be 1 (video)"));
    }

    if vo_type == 1 || vo_type == 2 {
        let video_signal_type = bb.read_bit()?;
        if video_signal_type == 1 {
            let _video_format = bb.read_bits(3)?;
            let _video_range = bb.read_bit()?;
            let colour_description = bb.read_bit()?;
            if colour_description == 1 {
                let _colour_primaries = bb.read_bits(8)?;
                let _transfer_characteristics = bb.read_bits(8)?;
                let _matrix_coefficients = bb.read_bits(8)?;
            }
        }
    }
    bb.align_to_byte()?;
    if bb.peek_bits(32).unwrap_or(0) == start_code::USER_DATA {
        validate_visual_info(ctx, bb, Some(start_code::USER_DATA), vo_ver_id, vsc)?;
    }

    if vo_type == 1 {
        let start_code = bb.read_bits(32)?;
        if (start_code::VIDEO_OBJECT_FIRST..=start_code::VIDEO_OBJECT_LAST).contains(&start_code) {
            match bb.peek_bits(32) {
                Err(_) => ctx.trace(format_args!("comment=\"short headers\"")),
                Ok(next) if (start_code::VIDEO_OBJECT_LAYER_FIRST..=start_code::VIDEO_OBJECT_LAYER_LAST)
                    .contains(&next) =>
                {
                    validate_visual_info(ctx, bb, None, vo_ver_id, vsc)?;
                }
                Ok(_) => ctx.error(
                    FindingKind::FieldConstraint,
                    "expected a VideoObjectLayer start code or nothing (short headers)",
                ),
            }
        } else {
            ctx.error(FindingKind::FieldConstraint, "expected a VideoObject start code");
        }
    }
    Ok(())
}

fn validate_video_object_layer(
    ctx: &mut ValidationContext<'_>,
    bb: &mut BitCursor<'_>,
    default_vo_ver_id: u32,
    vsc: &mut VideoSpecContext,
) -> Result<()> {
    let _random_accessible_vol = bb.read_bit()?;
    let vo_type_indication = bb.read_bits(8)?;

    if vo_type_indication == 0x12 {
        validate_fine_granularity_scalable_vol(ctx, bb, vsc)?;
    } else {
        validate_classic_vol(ctx, bb, default_vo_ver_id, vsc)?;
    }

    while bb.peek_bits(32).unwrap_or(0) == start_code::USER_DATA {
        validate_visual_info(ctx, bb, Some(start_code::USER_DATA), default_vo_ver_id, vsc)?;
    }
    Ok(())
}

fn validate_aspect_ratio(ctx: &mut ValidationContext<'_>, bb: &mut BitCursor<'_>) -> Result<()> {
    let aspect_ratio_info = bb.read_bits(4)?;
    if aspect_ratio_info == 0xf {
        // extended_PAR
        let _par_width = bb.read_bits(8)?;
        let _par_height = bb.read_bits(8)?;
    } else if aspect_ratio_info == 0 {
        ctx.error(FindingKind::FieldConstraint, "aspect ratio info 0 is forbidden");
    }
    Ok(())
}

/// A zero-terminated quantization matrix load of up to 64 `bits`-wide values.
fn validate_quant_matrix(_ctx: &mut ValidationContext<'_>, bb: &mut BitCursor<'_>, bits: u32) -> Result<()> {
    let load = bb.read_bit()?;
    if load == 1 {
        let mut count = 0;
        loop {
            let value = bb.read_bits(bits)?;
            count += 1;
            if count >= 64 || value == 0 {
                break;
            }
        }
    }
    Ok(())
}

fn validate_fine_granularity_scalable_vol(
    ctx: &mut ValidationContext<'_>,
    bb: &mut BitCursor<'_>,
    vsc: &mut VideoSpecContext,
) -> Result<()> {
    let fgs_layer_type = bb.read_bits(2)?;
    let _vol_priority = bb.read_bits(3)?;
    validate_aspect_ratio(ctx, bb)?;
    let vol_control_parameters = bb.read_bit()?;
    if vol_control_parameters == 1 {
        let chroma_format = bb.read_bits(2)?;
        if chroma_format != 1 {
            ctx.error(FindingKind::FieldConstraint, "chroma format must be 1 (4:2:0)");
        }
        let _low_delay = bb.read_bit()?;
    }

    expect_marker_bit(ctx, bb)?;
    let vop_time_increment_resolution = bb.read_bits(16)?;
    expect_marker_bit(ctx, bb)?;
    vsc.vop_time_increment_resolution = vop_time_increment_resolution;

    let fixed_vop_rate = bb.read_bit()?;
    if fixed_vop_rate == 1 {
        let _fixed_vop_time_increment = bb.read_bits(bit_width(vop_time_increment_resolution))?;
    }

    expect_marker_bit(ctx, bb)?;
    let width = bb.read_bits(13)?;
    expect_marker_bit(ctx, bb)?;
    let height = bb.read_bits(13)?;
    expect_marker_bit(ctx, bb)?;
    vsc.width = width;
    vsc.height = height;

    let _interlaced = bb.read_bit()?;

    if fgs_layer_type == 2 || fgs_layer_type == 3 {
        let _fgs_ref_layer_id = bb.read_bits(4)?;
    }
    if fgs_layer_type == 1 || fgs_layer_type == 3 {
        let frequency_weighting_enable = bb.read_bit()?;
        if frequency_weighting_enable == 1 {
            validate_quant_matrix(ctx, bb, 3)?;
        }
    }
    if fgs_layer_type == 2 || fgs_layer_type == 3 {
        let frequency_weighting_enable = bb.read_bit()?;
        if frequency_weighting_enable == 1 {
            validate_quant_matrix(ctx, bb, 3)?;
        }
    }
    let _quarter_sample = bb.read_bit()?;
    let _resync_marker_disable = bb.read_bit()?;
    bb.align_to_byte()?;
    Ok(())
}

fn validate_classic_vol(
    ctx: &mut ValidationContext<'_>,
    bb: &mut BitCursor<'_>,
    default_vo_ver_id: u32,
    vsc: &mut VideoSpecContext,
) -> Result<()> {
    let mut vo_ver_id = default_vo_ver_id;
    let is_object_layer_identifier = bb.read_bit()?;
    if is_object_layer_identifier == 1 {
        vo_ver_id = bb.read_bits(4)?;
        check_vo_ver_id(ctx, vo_ver_id);
        let _vo_priority = bb.read_bits(3)?;
    }

    validate_aspect_ratio(ctx, bb)?;
    let vol_control_parameters = bb.read_bit()?;
    if vol_control_parameters == 1 {
        let chroma_format = bb.read_bits(2)?;
        if chroma_format != 1 {
            ctx.error(FindingKind::FieldConstraint, "chroma format must be 1 (4:2:0)");
        }
        let _low_delay = bb.read_bit()?;
        let vbv_parameters = bb.read_bit()?;
        if vbv_parameters == 1 {
            let _first_half_bit_rate = bb.read_bits(15)?;
            expect_marker_bit(ctx, bb)?;
            let _latter_half_bit_rate = bb.read_bits(15)?;
            expect_marker_bit(ctx, bb)?;
            let _first_half_vbv_buffer_size = bb.read_bits(15)?;
            expect_marker_bit(ctx, bb)?;
            let _latter_half_vbv_buffer_size = bb.read_bits(3)?;
            let _first_half_vbv_occupancy = bb.read_bits(11)?;
            expect_marker_bit(ctx, bb)?;
            let _latter_half_vbv_occupancy = bb.read_bits(15)?;
            expect_marker_bit(ctx, bb)?;
        }
    }

    let vol_shape = bb.read_bits(2)?;
    if vol_shape == 3 && vo_ver_id != 1 {
        // grayscale
        let _vol_shape_extension = bb.read_bits(4)?;
    }

    expect_marker_bit(ctx, bb)?;
    let vop_time_increment_resolution = bb.read_bits(16)?;
    expect_marker_bit(ctx, bb)?;
    vsc.vop_time_increment_resolution = vop_time_increment_resolution;
    let fixed_vop_rate = bb.read_bit()?;
    if fixed_vop_rate == 1 {
        let _fixed_vop_time_increment = bb.read_bits(bit_width(vop_time_increment_resolution))?;
    }

    if vol_shape != 2 {
        if vol_shape == 0 {
            // rectangular
            expect_marker_bit(ctx, bb)?;
            let width = bb.read_bits(13)?;
            expect_marker_bit(ctx, bb)?;
            let height = bb.read_bits(13)?;
            expect_marker_bit(ctx, bb)?;
            vsc.width = width;
            vsc.height = height;
        }
        let _interlaced = bb.read_bit()?;
        let _obmc_disable = bb.read_bit()?;

        let sprite_enable = bb.read_bits(if vo_ver_id == 1 { 1 } else { 2 })?;
        if sprite_enable == 1 || sprite_enable == 2 {
            // static sprite or GMC
            if sprite_enable != 2 {
                let _sprite_width = bb.read_bits(13)?;
                expect_marker_bit(ctx, bb)?;
                let _sprite_height = bb.read_bits(13)?;
                expect_marker_bit(ctx, bb)?;
                let _sprite_left = bb.read_bits(13)?;
                expect_marker_bit(ctx, bb)?;
                let _sprite_top = bb.read_bits(13)?;
                expect_marker_bit(ctx, bb)?;
            }
            let _no_of_sprite_warping_points = bb.read_bits(6)?;
            let _sprite_warping_accuracy = bb.read_bits(2)?;
            let _sprite_brightness_change = bb.read_bit()?;
            if sprite_enable != 2 {
                let _low_latency_sprite_enable = bb.read_bit()?;
            }
        }
        if vo_ver_id != 1 && vol_shape != 0 {
            let _sadct_disable = bb.read_bit()?;
        }
        let not_8_bit = bb.read_bit()?;
        if not_8_bit == 1 {
            let _quant_precision = bb.read_bits(4)?;
            let _bits_per_pixel = bb.read_bits(4)?;
        }
        if vol_shape == 3 {
            // grayscale
            let _no_gray_quant_update = bb.read_bit()?;
            let _composition_method = bb.read_bit()?;
            let _linear_composition = bb.read_bit()?;
        }
        let quant_type = bb.read_bit()?;
        if quant_type == 1 {
            validate_quant_matrix(ctx, bb, 8)?;
            validate_quant_matrix(ctx, bb, 8)?;
            if vol_shape == 3 {
                validate_quant_matrix(ctx, bb, 8)?;
                validate_quant_matrix(ctx, bb, 8)?;
            }
        }
        if vo_ver_id != 1 {
            let _quarter_sample = bb.read_bit()?;
        }
        let complexity_estimation_disable = bb.read_bit()?;
        if complexity_estimation_disable == 0 {
            validate_complexity_estimation_header(ctx, bb)?;
        }
        let _resync_marker_disable = bb.read_bit()?;
        let data_partitioned = bb.read_bit()?;
        if data_partitioned == 1 {
            let _reversible_vlc = bb.read_bit()?;
        }
        if vo_ver_id != 1 {
            let newpred_enable = bb.read_bit()?;
            if newpred_enable == 1 {
                let _requested_upstream_message_type = bb.read_bits(2)?;
                let _newpred_segment_type = bb.read_bit()?;
            }
            let _reduced_resolution_vop_enable = bb.read_bit()?;
        }
        let scalability = bb.read_bit()?;
        if scalability == 1 {
            let hierarchy_type = bb.read_bit()?;
            let _ref_layer_id = bb.read_bits(4)?;
            let _ref_layer_sampling_direc = bb.read_bit()?;
            let _hor_sampling_factor_n = bb.read_bits(5)?;
            let _hor_sampling_factor_m = bb.read_bits(5)?;
            let _vert_sampling_factor_n = bb.read_bits(5)?;
            let _vert_sampling_factor_m = bb.read_bits(5)?;
            let _enhancement_type = bb.read_bit()?;
            if vol_shape == 1 && hierarchy_type == 0 {
                let _use_ref_shape = bb.read_bit()?;
                let _use_ref_texture = bb.read_bit()?;
                let _shape_hor_sampling_factor_n = bb.read_bits(5)?;
                let _shape_hor_sampling_factor_m = bb.read_bits(5)?;
                let _shape_vert_sampling_factor_n = bb.read_bits(5)?;
                let _shape_vert_sampling_factor_m = bb.read_bits(5)?;
            }
        }
    } else {
        // binary-shape-only
        if vo_ver_id != 1 {
            let scalability = bb.read_bit()?;
            if scalability == 1 {
                let _shape_hor_sampling_factor_n = bb.read_bits(5)?;
                let _shape_hor_sampling_factor_m = bb.read_bits(5)?;
                let _shape_vert_sampling_factor_n = bb.read_bits(5)?;
                let _shape_vert_sampling_factor_m = bb.read_bits(5)?;
            }
        }
        let _resync_marker_disable = bb.read_bit()?;
    }

    // There is always at least one stuffing bit here.
    let _zero_bit = bb.read_bit()?;
    bb.align_to_byte()?;
    Ok(())
}

fn validate_complexity_estimation_header(ctx: &mut ValidationContext<'_>, bb: &mut BitCursor<'_>) -> Result<()> {
    let estimation_method = bb.read_bits(2)?;
    if estimation_method == 0 {
        let shape_complexity_estimation_disable = bb.read_bit()?;
        if shape_complexity_estimation_disable == 0 {
            let _opaque = bb.read_bit()?;
            let _transparent = bb.read_bit()?;
            let _intra_cae = bb.read_bit()?;
            let _inter_cae = bb.read_bit()?;
            let _no_update = bb.read_bit()?;
            let _upsampling = bb.read_bit()?;
        }
        let texture_complexity_estimation_set_1_disable = bb.read_bit()?;
        if texture_complexity_estimation_set_1_disable == 0 {
            let _intra_blocks = bb.read_bit()?;
            let _inter_blocks = bb.read_bit()?;
            let _inter4v_blocks = bb.read_bit()?;
            let _not_coded_blocks = bb.read_bit()?;
        }
        expect_marker_bit(ctx, bb)?;
        let texture_complexity_estimation_set_2_disable = bb.read_bit()?;
        if texture_complexity_estimation_set_2_disable == 0 {
            let _dct_coefs = bb.read_bit()?;
            let _dct_lines = bb.read_bit()?;
            let _vlc_symbols = bb.read_bit()?;
            let _vlc_bits = bb.read_bit()?;
        }
        let motion_compensation_complexity_disable = bb.read_bit()?;
        if motion_compensation_complexity_disable == 0 {
            let _apm = bb.read_bit()?;
            let _npm = bb.read_bit()?;
            let _interpolate_mc_q = bb.read_bit()?;
            let _forw_back_mc_q = bb.read_bit()?;
            let _halfpel2 = bb.read_bit()?;
            let _halfpel4 = bb.read_bit()?;
        }
        expect_marker_bit(ctx, bb)?;
    }
    Ok(())
}

/// Per-profile decoder limits: (max macroblocks per second, max bitrate, max VBV buffer size).
fn profile_limits(profile_level: u32) -> Option<(&'static str, u32, u32, u32)> {
    match profile_level {
        0x08 => Some(("SP0", 1485, 65536, 163840)),
        0x01 => Some(("SP1", 1485, 65536, 163840)),
        0x02 => Some(("SP2", 5940, 131072, 655360)),
        0x03 => Some(("SP3", 11880, 393216, 655360)),
        0xf0 => Some(("ASP0", 2970, 131072, 163840)),
        0xf1 => Some(("ASP1", 2970, 131072, 163840)),
        0xf2 => Some(("ASP2", 5940, 393216, 655360)),
        0xf3 => Some(("ASP3", 11880, 786432, 655360)),
        0xf7 => Some(("ASP3b", 11880, 1536000, 1064960)),
        _ => None,
    }
}

/// Check the VOL geometry and the declared decoder buffer size and bitrate against the limits
/// of the signalled visual profile, and derive the maximum average frame rate from the
/// macroblocks-per-second limit.
pub fn check_video_profile_limits(
    ctx: &mut ValidationContext<'_>,
    buffer_size_db: u32,
    max_bitrate: u32,
    vsc: &VideoSpecContext,
) {
    let Some((profile_name, max_mb_per_sec, limit_bitrate, limit_buffer_size)) =
        profile_limits(vsc.profile_level)
    else {
        if vsc.profile_level == 255 {
            ctx.error(FindingKind::FieldConstraint, "invalid visual profile 255");
        } else {
            ctx.warning(
                FindingKind::FieldConstraint,
                format!("unknown visual profile 0x{:02x}", vsc.profile_level),
            );
        }
        return;
    };

    if max_bitrate > limit_bitrate || buffer_size_db > limit_buffer_size {
        ctx.error(
            FindingKind::FieldConstraint,
            format!(
                "video profile limitations exceeded: profile {profile_name}, max bitrate {max_bitrate} \
                 (limit {limit_bitrate}), buffer size {buffer_size_db} (limit {limit_buffer_size})"
            ),
        );
        return;
    }

    let width_mb = (vsc.width + 15) / 16;
    let height_mb = (vsc.height + 15) / 16;
    if width_mb * height_mb > 0 {
        let fps_max = max_mb_per_sec as f64 / (width_mb * height_mb) as f64;
        ctx.trace(format_args!(
            "comment=\"profile {profile_name} with {}x{} allows an average frame rate of {fps_max:.2} fps\"",
            vsc.width, vsc.height,
        ));
    }
}

#[cfg(test)]
mod test {
    use bytes::Bytes;

    use crate::diag::Severity;
    use crate::Config;

    use super::*;

    fn run_check(buffer_size: u32, bitrate: u32, vsc: VideoSpecContext) -> Vec<crate::diag::Finding> {
        let source = Bytes::new();
        let config = Config::default();
        let mut ctx = crate::walk::ValidationContext::new(&source, &config);
        check_video_profile_limits(&mut ctx, buffer_size, bitrate, &vsc);
        ctx.diags.into_findings()
    }

    #[test]
    fn profile_limits_within_bounds() {
        let vsc = VideoSpecContext { profile_level: 0x03, width: 320, height: 240, ..Default::default() };
        assert!(run_check(100_000, 200_000, vsc).is_empty());
    }

    #[test]
    fn profile_limits_exceeded() {
        let vsc = VideoSpecContext { profile_level: 0x01, width: 176, height: 144, ..Default::default() };
        let findings = run_check(0, 1_000_000, vsc);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Error);
        assert!(findings[0].message.contains("limit"));
    }

    #[test]
    fn forbidden_profile_level() {
        let vsc = VideoSpecContext { profile_level: 255, ..Default::default() };
        let findings = run_check(0, 0, vsc);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Error);
    }

    #[test]
    fn bit_width_matches_field_sizes() {
        assert_eq!(bit_width(0), 0);
        assert_eq!(bit_width(1), 1);
        assert_eq!(bit_width(2), 2);
        assert_eq!(bit_width(29_999), 15);
        assert_eq!(bit_width(30_000), 15);
    }
}
