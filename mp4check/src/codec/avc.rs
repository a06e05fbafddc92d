//! H.264/AVC configuration validation: the AVCDecoderConfigurationRecord and the NAL units it
//! carries (SPS with VUI and HRD parameters, PPS, SPS extension).

use crate::bits::BitCursor;
use crate::diag::FindingKind;
use crate::error::Result;
use crate::walk::ValidationContext;

/// NAL unit types with dedicated validators.
#[allow(missing_docs)]
pub mod nal_type {
    pub const SPS: u32 = 7;
    pub const PPS: u32 = 8;
    pub const SPS_EXT: u32 = 13;
}

/// Summary of a validated AVCDecoderConfigurationRecord.
#[derive(Clone, Copy, Debug)]
pub struct AvcConfig {
    /// The AVC profile indication.
    pub profile: u32,
    /// The AVC level indication.
    pub level: u32,
    /// The size in bytes of the NAL length fields used by samples (1, 2 or 4).
    pub nal_length_size: u32,
}

fn nal_type_name(nal_type: u32) -> &'static str {
    match nal_type {
        1 => "Coded slice of a non-IDR picture",
        2 => "Coded slice data partition A",
        3 => "Coded slice data partition B",
        4 => "Coded slice data partition C",
        5 => "Coded slice of an IDR picture",
        6 => "Supplemental enhancement information (SEI)",
        7 => "Sequence parameter set",
        8 => "Picture parameter set",
        9 => "Access unit delimiter",
        10 => "End of sequence",
        11 => "End of stream",
        12 => "Filler data",
        13 => "Sequence parameter set extension",
        14 => "Prefix NAL unit",
        15 => "Subset SPS",
        19 => "Coded slice of an auxiliary coded picture without partitioning",
        20 => "Coded slice extension",
        16..=18 | 21..=23 => "Reserved",
        _ => "Unspecified",
    }
}

fn profile_name(profile: u32) -> Option<&'static str> {
    match profile {
        66 => Some("baseline"),
        77 => Some("main"),
        88 => Some("extended"),
        100 => Some("high"),
        110 => Some("high 10"),
        122 => Some("high 4:2:2"),
        144 => Some("high 4:4:4"),
        _ => None,
    }
}

fn has_profile_extensions(profile: u32) -> bool {
    matches!(profile, 100 | 110 | 122 | 144)
}

/// Number of bits needed to represent `x`.
fn bit_width(x: u32) -> u32 {
    32 - x.leading_zeros()
}

/// Cross-check a profile/level combination against `constraint_set3_flag`, which redefines
/// level 11 as "level 1b" for the baseline, main and extended profiles.
fn validate_level_idc(ctx: &mut ValidationContext<'_>, profile: u32, level: u32, constraint_set3_flag: u32) {
    if matches!(profile, 66 | 77 | 88) && level == 11 && constraint_set3_flag == 1 {
        ctx.trace(format_args!("comment=\"level 1b\""));
        return;
    }
    if level > 9 {
        ctx.trace(format_args!("comment=\"level {}.{}\"", level / 10, level % 10));
    }
    if matches!(profile, 100 | 110) && constraint_set3_flag == 1 {
        ctx.trace(format_args!("comment=\"High 10 Intra profile compatible\""));
    } else if profile == 122 && constraint_set3_flag == 1 {
        ctx.trace(format_args!("comment=\"High 4:2:2 Intra profile compatible\""));
    } else if profile == 44 {
        if constraint_set3_flag != 1 {
            ctx.error(FindingKind::FieldConstraint, "constraint_set3_flag must be 1 when profile_idc is 44");
        }
    } else if profile == 244 && constraint_set3_flag == 1 {
        ctx.trace(format_args!("comment=\"High 4:4:4 Intra profile compatible\""));
    } else if constraint_set3_flag == 1 {
        ctx.warning(FindingKind::FieldConstraint, "constraint_set3_flag is 1 where it seems to be reserved to zero");
    }
}

fn validate_constraint_flags(ctx: &mut ValidationContext<'_>, bb: &mut BitCursor<'_>, profile: u32) -> Result<u32> {
    let constraint_set0_flag = bb.read_bit()?;
    if profile == 66 && constraint_set0_flag == 0 {
        ctx.warning(
            FindingKind::FieldConstraint,
            "baseline profile signalled but constraint_set0_flag not set",
        );
    }
    let constraint_set1_flag = bb.read_bit()?;
    if profile == 77 && constraint_set1_flag == 0 {
        ctx.warning(FindingKind::FieldConstraint, "main profile signalled but constraint_set1_flag not set");
    }
    let _constraint_set2_flag = bb.read_bit()?;
    let constraint_set3_flag = bb.read_bit()?;
    let reserved = bb.read_bits(4)?;
    if reserved != 0 {
        ctx.error(FindingKind::FieldConstraint, "reserved zero bits after the constraint flags are not zero");
    }
    Ok(constraint_set3_flag)
}

/// Validate an AVCDecoderConfigurationRecord.
pub fn validate_avc_config(ctx: &mut ValidationContext<'_>, bb: &mut BitCursor<'_>) -> Result<AvcConfig> {
    let configuration_version = bb.read_bits(8)?;
    if configuration_version != 1 {
        ctx.error(
            FindingKind::FieldConstraint,
            format!("AVC configuration version must be 1, not {configuration_version}"),
        );
    }
    let profile = bb.read_bits(8)?;
    ctx.trace(format_args!("profile=\"{profile}\""));
    if let Some(name) = profile_name(profile) {
        ctx.trace(format_args!("comment=\"{name} profile\""));
    }
    let constraint_set3_flag = validate_constraint_flags(ctx, bb, profile)?;
    let level = bb.read_bits(8)?;
    ctx.trace(format_args!("level=\"{level}\""));
    validate_level_idc(ctx, profile, level, constraint_set3_flag);

    let length_byte = bb.read_bits(8)?;
    if length_byte & 0xfc != 0xfc {
        ctx.error(
            FindingKind::FieldConstraint,
            format!("reserved one bits before lengthSizeMinusOne are not all 1 (0x{length_byte:02x})"),
        );
    }
    let length_size_minus_one = length_byte & 3;
    ctx.trace(format_args!("lengthSizeMinusOne=\"{length_size_minus_one}\""));
    if length_size_minus_one == 2 {
        ctx.error(FindingKind::FieldConstraint, "AVC NAL lengths must be 1, 2 or 4 bytes, not 3");
    }

    let sps_byte = bb.read_bits(8)?;
    if sps_byte & 0xe0 != 0xe0 {
        ctx.error(
            FindingKind::FieldConstraint,
            format!("reserved one bits before numOfSequenceParameterSets are not all 1 (0x{sps_byte:02x})"),
        );
    }
    let sps_count = sps_byte & 0x1f;
    ctx.trace(format_args!("sps_count=\"{sps_count}\""));
    for _ in 0..sps_count {
        let nal_length = bb.read_bits(16)?;
        validate_nal_unit(ctx, bb, Some(nal_type::SPS), nal_length as u64)?;
    }

    let pps_count = bb.read_bits(8)?;
    ctx.trace(format_args!("pps_count=\"{pps_count}\""));
    for _ in 0..pps_count {
        let nal_length = bb.read_bits(16)?;
        validate_nal_unit(ctx, bb, Some(nal_type::PPS), nal_length as u64)?;
    }

    if has_profile_extensions(profile) {
        let reserved = bb.read_bits(6)?;
        if reserved != 0x3f {
            ctx.error(FindingKind::FieldConstraint, "reserved one bits before chroma_format are not all 1");
        }
        let _chroma_format = bb.read_bits(2)?;
        let reserved = bb.read_bits(5)?;
        if reserved != 0x1f {
            ctx.error(FindingKind::FieldConstraint, "reserved one bits before bit_depth_luma_minus8 are not all 1");
        }
        let _bit_depth_luma_minus8 = bb.read_bits(3)?;
        let reserved = bb.read_bits(5)?;
        if reserved != 0x1f {
            ctx.error(FindingKind::FieldConstraint, "reserved one bits before bit_depth_chroma_minus8 are not all 1");
        }
        let _bit_depth_chroma_minus8 = bb.read_bits(3)?;
        let sps_ext_count = bb.read_bits(8)?;
        for _ in 0..sps_ext_count {
            let nal_length = bb.read_bits(16)?;
            validate_nal_unit(ctx, bb, Some(nal_type::SPS_EXT), nal_length as u64)?;
        }
    }

    if bb.bits_left() != 0 {
        ctx.error(
            FindingKind::TrailingData,
            format!("AVC configuration record left {} bits unconsumed", bb.bits_left()),
        );
    }

    Ok(AvcConfig { profile, level, nal_length_size: length_size_minus_one + 1 })
}

/// Validate one NAL unit of `length` bytes at the parent cursor's position, then advance the
/// parent past it.
///
/// Emulation-prevention stuffing is removed while decoding, and the RBSP trailing zero bits are
/// stripped before field decoding so the trailing stop bit can be checked. Unknown NAL types are
/// consumed opaquely.
pub fn validate_nal_unit(
    ctx: &mut ValidationContext<'_>,
    bb: &mut BitCursor<'_>,
    expected_type: Option<u32>,
    length: u64,
) -> Result<()> {
    ctx.trace(format_args!("<NALUnit length=\"{length}\">"));
    let mut nal = bb.sub_cursor(length)?;
    nal.enable_emulation_prevention();

    let trailing = nal.strip_trailing_zero_bits();
    if trailing > 8 {
        ctx.warning(FindingKind::FieldConstraint, format!("NAL unit has {trailing} trailing zero bits"));
    }

    let forbidden_zero_bit = nal.read_bit()?;
    if forbidden_zero_bit != 0 {
        ctx.error(FindingKind::FieldConstraint, "forbidden_zero_bit must be 0");
    }
    let _nal_ref_idc = nal.read_bits(2)?;
    let nal_unit_type = nal.read_bits(5)?;
    if let Some(expected) = expected_type {
        if nal_unit_type != expected {
            ctx.error(
                FindingKind::FieldConstraint,
                format!("NAL unit type must be {expected}, not {nal_unit_type}"),
            );
        }
    }
    ctx.trace(format_args!("comment=\"{}\"", nal_type_name(nal_unit_type)));

    match nal_unit_type {
        nal_type::SPS => validate_sps(ctx, &mut nal)?,
        nal_type::PPS => validate_pps(ctx, &mut nal)?,
        nal_type::SPS_EXT => validate_sps_ext(ctx, &mut nal)?,
        _ => {
            // No validator for this type; consume the payload.
            while nal.bits_left() >= 8 {
                nal.read_bits(8)?;
            }
            let leftover = nal.bits_left();
            nal.read_bits(leftover as u32)?;
        }
    }

    if nal.bits_left() != 0 {
        ctx.error(
            FindingKind::TrailingData,
            format!("NAL unit left {} bits unconsumed", nal.bits_left()),
        );
    }

    bb.skip_bytes(length)?;
    ctx.trace(format_args!("</NALUnit>"));
    Ok(())
}

/// Decode one scaling list with the delta-scale scheme.
fn validate_scaling_list(bb: &mut BitCursor<'_>, size: u32) -> Result<()> {
    let mut last_scale: i64 = 8;
    let mut next_scale: i64 = 8;
    for _ in 0..size {
        if next_scale != 0 {
            let delta_scale = bb.read_se()? as i64;
            next_scale = (last_scale + delta_scale + 256) % 256;
        }
        last_scale = if next_scale == 0 { last_scale } else { next_scale };
    }
    Ok(())
}

fn validate_rbsp_trailing_bits(ctx: &mut ValidationContext<'_>, bb: &mut BitCursor<'_>) -> Result<()> {
    let stop_bit = bb.read_bit()?;
    if stop_bit != 1 {
        ctx.error(FindingKind::FieldConstraint, "rbsp_stop_one_bit must be 1");
    }
    let padding = bb.align_to_byte()?;
    if padding != 0 {
        ctx.error(FindingKind::FieldConstraint, format!("trailing zero bits not zero ({padding})"));
    }
    Ok(())
}

fn validate_sps(ctx: &mut ValidationContext<'_>, bb: &mut BitCursor<'_>) -> Result<()> {
    let profile_idc = bb.read_bits(8)?;
    ctx.trace(format_args!("profile_idc=\"{profile_idc}\""));
    if profile_name(profile_idc).is_none() {
        ctx.warning(FindingKind::FieldConstraint, format!("unknown profile {profile_idc}"));
    }
    let constraint_set3_flag = validate_constraint_flags(ctx, bb, profile_idc)?;
    let level_idc = bb.read_bits(8)?;
    validate_level_idc(ctx, profile_idc, level_idc, constraint_set3_flag);

    let _seq_parameter_set_id = bb.read_ue()?;

    if has_profile_extensions(profile_idc) {
        let chroma_format_idc = bb.read_ue()?;
        if chroma_format_idc == 3 {
            let _residual_colour_transform_flag = bb.read_bit()?;
        }
        let _bit_depth_luma_minus8 = bb.read_ue()?;
        let _bit_depth_chroma_minus8 = bb.read_ue()?;
        let _qpprime_y_zero_transform_bypass_flag = bb.read_bit()?;
        let seq_scaling_matrix_present_flag = bb.read_bit()?;
        if seq_scaling_matrix_present_flag == 1 {
            for i in 0..8 {
                let seq_scaling_list_present_flag = bb.read_bit()?;
                if seq_scaling_list_present_flag == 1 {
                    validate_scaling_list(bb, if i < 6 { 16 } else { 64 })?;
                }
            }
        }
    }

    let _log2_max_frame_num_minus4 = bb.read_ue()?;
    let pic_order_cnt_type = bb.read_ue()?;
    if pic_order_cnt_type == 0 {
        let _log2_max_pic_order_cnt_lsb_minus4 = bb.read_ue()?;
    } else if pic_order_cnt_type == 1 {
        let _delta_pic_order_always_zero_flag = bb.read_bit()?;
        let _offset_for_non_ref_pic = bb.read_se()?;
        let _offset_for_top_to_bottom_field = bb.read_se()?;
        let num_ref_frames_in_pic_order_cnt_cycle = bb.read_ue()?;
        for _ in 0..num_ref_frames_in_pic_order_cnt_cycle {
            let _offset_for_ref_frame = bb.read_se()?;
        }
    }
    let _num_ref_frames = bb.read_ue()?;
    let _gaps_in_frame_num_value_allowed_flag = bb.read_bit()?;
    let pic_width_in_mbs_minus1 = bb.read_ue()?;
    ctx.trace(format_args!("comment=\"width {} pixels\"", (pic_width_in_mbs_minus1 + 1) * 16));
    let pic_height_in_map_units_minus1 = bb.read_ue()?;
    ctx.trace(format_args!("comment=\"height {} pixels\"", (pic_height_in_map_units_minus1 + 1) * 16));

    let frame_mbs_only_flag = bb.read_bit()?;
    if frame_mbs_only_flag == 0 {
        let _mb_adaptive_frame_field_flag = bb.read_bit()?;
    }
    let _direct_8x8_inference_flag = bb.read_bit()?;
    let frame_cropping_flag = bb.read_bit()?;
    if frame_cropping_flag == 1 {
        let _frame_crop_left_offset = bb.read_ue()?;
        let _frame_crop_right_offset = bb.read_ue()?;
        let _frame_crop_top_offset = bb.read_ue()?;
        let _frame_crop_bottom_offset = bb.read_ue()?;
    }

    let vui_parameters_present_flag = bb.read_bit()?;
    if vui_parameters_present_flag == 1 {
        validate_vui(ctx, bb)?;
    }

    validate_rbsp_trailing_bits(ctx, bb)
}

fn validate_vui(ctx: &mut ValidationContext<'_>, bb: &mut BitCursor<'_>) -> Result<()> {
    let aspect_ratio_info_present_flag = bb.read_bit()?;
    if aspect_ratio_info_present_flag == 1 {
        let aspect_ratio_idc = bb.read_bits(8)?;
        if aspect_ratio_idc == 255 {
            // Extended_SAR
            let _sar_width = bb.read_bits(16)?;
            let _sar_height = bb.read_bits(16)?;
        }
    }
    let overscan_info_present_flag = bb.read_bit()?;
    if overscan_info_present_flag == 1 {
        let _overscan_appropriate_flag = bb.read_bit()?;
    }
    let video_signal_type_present_flag = bb.read_bit()?;
    if video_signal_type_present_flag == 1 {
        let _video_format = bb.read_bits(3)?;
        let _video_full_range_flag = bb.read_bit()?;
        let colour_description_present_flag = bb.read_bit()?;
        if colour_description_present_flag == 1 {
            let _colour_primaries = bb.read_bits(8)?;
            let _transfer_characteristics = bb.read_bits(8)?;
            let _matrix_coefficients = bb.read_bits(8)?;
        }
    }
    let chroma_loc_info_present_flag = bb.read_bit()?;
    if chroma_loc_info_present_flag == 1 {
        let _chroma_sample_loc_type_top_field = bb.read_ue()?;
        let _chroma_sample_loc_type_bottom_field = bb.read_ue()?;
    }
    let timing_info_present_flag = bb.read_bit()?;
    if timing_info_present_flag == 1 {
        let _num_units_in_tick = bb.read_bits(32)?;
        let _time_scale = bb.read_bits(32)?;
        let _fixed_frame_rate_flag = bb.read_bit()?;
    }
    let nal_hrd_parameters_present_flag = bb.read_bit()?;
    if nal_hrd_parameters_present_flag == 1 {
        validate_hrd(ctx, bb)?;
    }
    let vcl_hrd_parameters_present_flag = bb.read_bit()?;
    if vcl_hrd_parameters_present_flag == 1 {
        validate_hrd(ctx, bb)?;
    }
    if nal_hrd_parameters_present_flag == 1 || vcl_hrd_parameters_present_flag == 1 {
        let _low_delay_hrd_flag = bb.read_bit()?;
    }
    let _pic_struct_present_flag = bb.read_bit()?;
    let bitstream_restriction_flag = bb.read_bit()?;
    if bitstream_restriction_flag == 1 {
        let _motion_vectors_over_pic_boundaries_flag = bb.read_bit()?;
        let _max_bytes_per_pic_denom = bb.read_ue()?;
        let _max_bits_per_mb_denom = bb.read_ue()?;
        let _log2_max_mv_length_horizontal = bb.read_ue()?;
        let _log2_max_mv_length_vertical = bb.read_ue()?;
        let _num_reorder_frames = bb.read_ue()?;
        let _max_dec_frame_buffering = bb.read_ue()?;
    }
    Ok(())
}

fn validate_hrd(ctx: &mut ValidationContext<'_>, bb: &mut BitCursor<'_>) -> Result<()> {
    let cpb_cnt_minus1 = bb.read_ue()?;
    let _bit_rate_scale = bb.read_bits(4)?;
    let _cpb_size_scale = bb.read_bits(4)?;
    for sched_sel_idx in 0..=cpb_cnt_minus1 {
        ctx.trace(format_args!("<Schedule {sched_sel_idx}>"));
        let _bit_rate_value_minus1 = bb.read_ue()?;
        let _cpb_size_value_minus1 = bb.read_ue()?;
        let _cbr_flag = bb.read_bit()?;
        ctx.trace(format_args!("</Schedule>"));
    }
    let _initial_cpb_removal_delay_length_minus1 = bb.read_bits(5)?;
    let _cpb_removal_delay_length_minus1 = bb.read_bits(5)?;
    let _dpb_output_delay_length_minus1 = bb.read_bits(5)?;
    let _time_offset_length = bb.read_bits(5)?;
    Ok(())
}

fn validate_pps(ctx: &mut ValidationContext<'_>, bb: &mut BitCursor<'_>) -> Result<()> {
    let _pic_parameter_set_id = bb.read_ue()?;
    let _seq_parameter_set_id = bb.read_ue()?;
    let _entropy_coding_mode_flag = bb.read_bit()?;
    let _pic_order_present_flag = bb.read_bit()?;
    let num_slice_groups_minus1 = bb.read_ue()?;

    if num_slice_groups_minus1 > 0 {
        let slice_group_map_type = bb.read_ue()?;
        match slice_group_map_type {
            0 => {
                for _ in 0..=num_slice_groups_minus1 {
                    let _run_length_minus1 = bb.read_ue()?;
                }
            }
            2 => {
                for _ in 0..num_slice_groups_minus1 {
                    let _top_left = bb.read_ue()?;
                    let _bottom_right = bb.read_ue()?;
                }
            }
            3 | 4 | 5 => {
                let _slice_group_change_direction_flag = bb.read_bit()?;
                let _slice_group_change_rate_minus1 = bb.read_ue()?;
            }
            6 => {
                let pic_size_in_map_units_minus1 = bb.read_ue()?;
                let id_bits = bit_width(num_slice_groups_minus1);
                for _ in 0..=pic_size_in_map_units_minus1 {
                    let _slice_group_id = bb.read_bits(id_bits)?;
                }
            }
            _ => {}
        }
    }

    let _num_ref_idx_l0_active_minus1 = bb.read_ue()?;
    let _num_ref_idx_l1_active_minus1 = bb.read_ue()?;
    let _weighted_pred_flag = bb.read_bit()?;
    let _weighted_bipred_idc = bb.read_bits(2)?;
    let _pic_init_qp_minus26 = bb.read_se()?;
    let _pic_init_qs_minus26 = bb.read_se()?;
    let _chroma_qp_index_offset = bb.read_se()?;
    let _deblocking_filter_control_present_flag = bb.read_bit()?;
    let _constrained_intra_pred_flag = bb.read_bit()?;
    let _redundant_pic_cnt_present_flag = bb.read_bit()?;

    // More than the stop bit left means the extended block is present.
    if bb.bits_left() > 1 {
        let _transform_8x8_mode_flag = bb.read_bit()?;
        let pic_scaling_matrix_present_flag = bb.read_bit()?;
        if pic_scaling_matrix_present_flag == 1 {
            for i in 0..8 {
                let pic_scaling_list_present_flag = bb.read_bit()?;
                if pic_scaling_list_present_flag == 1 {
                    validate_scaling_list(bb, if i < 6 { 16 } else { 64 })?;
                }
            }
        }
        let _second_chroma_qp_index_offset = bb.read_se()?;
    }

    validate_rbsp_trailing_bits(ctx, bb)
}

fn validate_sps_ext(ctx: &mut ValidationContext<'_>, bb: &mut BitCursor<'_>) -> Result<()> {
    let _seq_parameter_set_id = bb.read_ue()?;
    let aux_format_idc = bb.read_ue()?;
    if aux_format_idc != 0 {
        let bit_depth_aux_minus8 = bb.read_ue()?;
        let _alpha_incr_flag = bb.read_bit()?;
        let alpha_bits = bit_depth_aux_minus8 + 9;
        let _alpha_opaque_value = bb.read_bits_u64(alpha_bits.min(64))?;
        let _alpha_transparent_value = bb.read_bits_u64(alpha_bits.min(64))?;
    }
    let _additional_extension_flag = bb.read_bit()?;
    validate_rbsp_trailing_bits(ctx, bb)
}

#[cfg(test)]
mod test {
    use bytes::Bytes;

    use crate::diag::{Finding, Severity};
    use crate::Config;

    use super::*;

    struct BitWriter {
        bits: Vec<bool>,
    }

    impl BitWriter {
        fn new() -> Self {
            Self { bits: Vec::new() }
        }

        fn put(&mut self, value: u32, n: u32) {
            for i in (0..n).rev() {
                self.bits.push(value >> i & 1 == 1);
            }
        }

        fn put_ue(&mut self, value: u32) {
            let code = value as u64 + 1;
            let width = 64 - code.leading_zeros();
            for _ in 0..width - 1 {
                self.bits.push(false);
            }
            for i in (0..width).rev() {
                self.bits.push(code >> i & 1 == 1);
            }
        }

        fn put_se(&mut self, value: i32) {
            let code = if value > 0 { (value as u32) * 2 - 1 } else { (-value as u32) * 2 };
            self.put_ue(code);
        }

        fn finish_rbsp(mut self) -> Vec<u8> {
            self.bits.push(true); // rbsp_stop_one_bit
            let mut bytes = vec![0u8; (self.bits.len() + 7) / 8];
            for (i, bit) in self.bits.iter().enumerate() {
                if *bit {
                    bytes[i / 8] |= 1 << (7 - i % 8);
                }
            }
            bytes
        }
    }

    fn baseline_sps() -> Vec<u8> {
        let mut w = BitWriter::new();
        w.put(0, 1); // forbidden_zero_bit
        w.put(3, 2); // nal_ref_idc
        w.put(7, 5); // nal_unit_type SPS
        w.put(66, 8); // profile_idc baseline
        w.put(0b1000, 4); // constraint_set0..3
        w.put(0, 4); // reserved
        w.put(30, 8); // level_idc
        w.put_ue(0); // seq_parameter_set_id
        w.put_ue(0); // log2_max_frame_num_minus4
        w.put_ue(0); // pic_order_cnt_type
        w.put_ue(0); // log2_max_pic_order_cnt_lsb_minus4
        w.put_ue(1); // num_ref_frames
        w.put(0, 1); // gaps_in_frame_num_value_allowed_flag
        w.put_ue(19); // pic_width_in_mbs_minus1 (320 px)
        w.put_ue(14); // pic_height_in_map_units_minus1 (240 px)
        w.put(1, 1); // frame_mbs_only_flag
        w.put(1, 1); // direct_8x8_inference_flag
        w.put(0, 1); // frame_cropping_flag
        w.put(0, 1); // vui_parameters_present_flag
        w.finish_rbsp()
    }

    fn minimal_pps() -> Vec<u8> {
        let mut w = BitWriter::new();
        w.put(0, 1); // forbidden_zero_bit
        w.put(3, 2); // nal_ref_idc
        w.put(8, 5); // nal_unit_type PPS
        w.put_ue(0); // pic_parameter_set_id
        w.put_ue(0); // seq_parameter_set_id
        w.put(0, 1); // entropy_coding_mode_flag
        w.put(0, 1); // pic_order_present_flag
        w.put_ue(0); // num_slice_groups_minus1
        w.put_ue(0); // num_ref_idx_l0_active_minus1
        w.put_ue(0); // num_ref_idx_l1_active_minus1
        w.put(0, 1); // weighted_pred_flag
        w.put(0, 2); // weighted_bipred_idc
        w.put_se(0); // pic_init_qp_minus26
        w.put_se(0); // pic_init_qs_minus26
        w.put_se(0); // chroma_qp_index_offset
        w.put(1, 1); // deblocking_filter_control_present_flag
        w.put(0, 1); // constrained_intra_pred_flag
        w.put(0, 1); // redundant_pic_cnt_present_flag
        w.finish_rbsp()
    }

    fn avcc_record(length_size_minus_one: u8) -> Vec<u8> {
        let sps = baseline_sps();
        let pps = minimal_pps();
        let mut record = vec![1, 66, 0x80, 30, 0xfc | length_size_minus_one, 0xe1];
        record.extend_from_slice(&(sps.len() as u16).to_be_bytes());
        record.extend_from_slice(&sps);
        record.push(1);
        record.extend_from_slice(&(pps.len() as u16).to_be_bytes());
        record.extend_from_slice(&pps);
        record
    }

    fn run_config(data: &[u8]) -> (AvcConfig, Vec<Finding>) {
        let source = Bytes::new();
        let config = Config::default();
        let mut ctx = crate::walk::ValidationContext::new(&source, &config);
        let mut bb = BitCursor::new(data);
        let avc_config = validate_avc_config(&mut ctx, &mut bb).unwrap();
        (avc_config, ctx.diags.into_findings())
    }

    #[test]
    fn well_formed_record_has_no_findings() {
        let (avc_config, findings) = run_config(&avcc_record(3));
        assert!(findings.is_empty(), "unexpected findings: {findings:?}");
        assert_eq!(avc_config.profile, 66);
        assert_eq!(avc_config.level, 30);
        assert_eq!(avc_config.nal_length_size, 4);
    }

    #[test]
    fn three_byte_nal_lengths_are_one_finding() {
        let (avc_config, findings) = run_config(&avcc_record(2));
        assert_eq!(avc_config.nal_length_size, 3);
        let errors: Vec<_> = findings
            .iter()
            .filter(|finding| finding.severity == Severity::Error)
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, FindingKind::FieldConstraint);
        assert!(errors[0].message.contains("1, 2 or 4"));
    }

    #[test]
    fn sps_with_wrong_nal_type_is_flagged() {
        let sps = minimal_pps(); // a PPS where an SPS is expected
        let mut record = vec![1, 66, 0, 30, 0xff, 0xe1];
        record.extend_from_slice(&(sps.len() as u16).to_be_bytes());
        record.extend_from_slice(&sps);
        record.push(0); // no PPS

        let (_, findings) = run_config(&record);
        assert!(findings
            .iter()
            .any(|finding| finding.message.contains("NAL unit type must be 7")));
    }

    #[test]
    fn truncated_sps_aborts_decode() {
        let sps = baseline_sps();
        let mut record = vec![1, 66, 0, 30, 0xff, 0xe1];
        // Lie about the SPS length: claim 4 bytes.
        record.extend_from_slice(&4u16.to_be_bytes());
        record.extend_from_slice(&sps[..4]);
        record.push(0);

        let source = Bytes::new();
        let config = Config::default();
        let mut ctx = crate::walk::ValidationContext::new(&source, &config);
        let mut bb = BitCursor::new(&record);
        validate_avc_config(&mut ctx, &mut bb).unwrap_err();
    }
}
