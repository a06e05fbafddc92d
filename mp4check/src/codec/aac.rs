//! AAC AudioSpecificConfig validation.

use crate::bits::BitCursor;
use crate::diag::FindingKind;
use crate::error::Result;
use crate::walk::ValidationContext;

/// The 11-bit marker announcing an SBR sync extension in the trailing bits.
const SYNC_EXTENSION_TYPE_SBR: u32 = 0x2b7;

fn audio_object_type_name(object_type: u32) -> &'static str {
    match object_type {
        1 => "AAC-Main",
        2 => "AAC-LC",
        3 => "AAC-SSR",
        4 => "AAC-LTP",
        5 => "GA-SBR",
        6 => "AAC-scalable",
        7 => "TwinVQ",
        8 => "CELP",
        9 => "HVXC",
        12 => "TTS",
        13 => "Main-synth",
        14 => "WaveTbl-synth",
        15 => "Gen-Midi",
        16 => "Alg-Synth-Audio-FX",
        17 => "ER-AAC-LC",
        19 => "ER-AAC-LTP",
        20 => "ER-AAC-scalable",
        21 => "ER-TwinVQ",
        22 => "ER-BSAC",
        23 => "ER-AAC-LD",
        24 => "ER-CELP",
        25 => "ER-HVXC",
        26 => "ER-HILN",
        27 => "ER-Parametric",
        _ => "reserved",
    }
}

/// Validate an AudioSpecificConfig.
///
/// Covers the General Audio branch (with the Program Config Element for channel configuration
/// zero), CELP, the error-resilient object types with their epConfig block, and the trailing
/// SBR sync extension. All branches leave the cursor byte-aligned.
pub fn validate_audio_specific_config(ctx: &mut ValidationContext<'_>, bb: &mut BitCursor<'_>) -> Result<()> {
    let mut audio_object_type = bb.read_bits(5)?;
    ctx.trace(format_args!(
        "audioObjectType=\"{audio_object_type}\" comment=\"audio is {}\"",
        audio_object_type_name(audio_object_type)
    ));
    let sampling_freq_index = bb.read_bits(4)?;
    if sampling_freq_index == 0x0f {
        let _sampling_freq = bb.read_bits(24)?;
    }
    let channel_config = bb.read_bits(4)?;

    // Explicit (non-backward-compatible) SBR signalling.
    let mut ext_audio_object_type = 0;
    if audio_object_type == 5 {
        ext_audio_object_type = 5;
        let ext_sampling_freq_index = bb.read_bits(4)?;
        if ext_sampling_freq_index == 0x0f {
            let _ext_sampling_freq = bb.read_bits(24)?;
        }
        audio_object_type = bb.read_bits(5)?;
    }

    match audio_object_type {
        1 | 2 | 3 | 4 | 6 | 7 | 17 | 19 | 20 | 21 | 22 | 23 => {
            validate_ga_specific_config(ctx, bb, audio_object_type, sampling_freq_index, channel_config)?;
        }
        8 => validate_celp_specific_config(ctx, bb)?,
        // HVXC, TTS and structured audio carry no config fields the validator decodes.
        9 | 12 | 13 | 14 | 15 => {}
        _ => {}
    }

    if matches!(audio_object_type, 17 | 19..=27) {
        let ep_config = bb.read_bits(2)?;
        if ep_config == 2 || ep_config == 3 {
            validate_error_protection_config(ctx, bb)?;
        }
        if ep_config == 3 {
            let _direct_mapping = bb.read_bit()?;
        }
    }

    // Backward-compatible SBR signalling in the trailing bits.
    if ext_audio_object_type != 5 && bb.bits_left() >= 16 {
        let sync_extension_type = bb.read_bits(11)?;
        if sync_extension_type == SYNC_EXTENSION_TYPE_SBR {
            let ext_type = bb.read_bits(5)?;
            ctx.trace(format_args!("comment=\"extension audio is {}\"", audio_object_type_name(ext_type)));
            if ext_type == 5 {
                let sbr_present = bb.read_bit()?;
                if sbr_present == 1 {
                    let ext_sampling_freq_index = bb.read_bits(4)?;
                    if ext_sampling_freq_index == 0x0f {
                        let _ext_sampling_freq = bb.read_bits(24)?;
                    }
                }
            }
        }
    }

    bb.align_to_byte()?;
    Ok(())
}

fn validate_ga_specific_config(
    ctx: &mut ValidationContext<'_>,
    bb: &mut BitCursor<'_>,
    audio_object_type: u32,
    _sampling_freq_index: u32,
    channel_config: u32,
) -> Result<()> {
    let frame_length_flag = bb.read_bit()?;
    ctx.trace(format_args!("comment=\"frame length is {}\"", if frame_length_flag == 0 { 1024 } else { 960 }));
    let depends_on_core_coder = bb.read_bit()?;
    if depends_on_core_coder == 1 {
        let _core_coder_delay = bb.read_bits(14)?;
    }
    let extension_flag = bb.read_bit()?;

    if channel_config == 0 {
        validate_program_config_element(ctx, bb)?;
    }
    if audio_object_type == 6 || audio_object_type == 20 {
        let _layer_number = bb.read_bits(3)?;
    }
    if extension_flag == 1 {
        if audio_object_type == 22 {
            let _num_of_sub_frame = bb.read_bits(5)?;
            let _layer_length = bb.read_bits(11)?;
        }
        if matches!(audio_object_type, 17 | 18 | 19 | 20 | 21 | 23) {
            let _aac_section_data_resilience_flag = bb.read_bit()?;
            let _aac_scalefactor_data_resilience_flag = bb.read_bit()?;
            let _aac_spectral_data_resilience_flag = bb.read_bit()?;
        }
        let _extension_flag_3 = bb.read_bit()?;
    }
    Ok(())
}

fn validate_program_config_element(ctx: &mut ValidationContext<'_>, bb: &mut BitCursor<'_>) -> Result<()> {
    ctx.trace(format_args!("<ProgramConfigElement>"));
    let _element_instance_tag = bb.read_bits(4)?;
    let _object_type = bb.read_bits(2)?;
    let _sampling_freq_index = bb.read_bits(4)?;

    let num_front_channel_elements = bb.read_bits(4)?;
    let num_side_channel_elements = bb.read_bits(4)?;
    let num_back_channel_elements = bb.read_bits(4)?;
    let num_lfe_channel_elements = bb.read_bits(2)?;
    let num_assoc_data_elements = bb.read_bits(3)?;
    let num_valid_cc_elements = bb.read_bits(4)?;
    let mono_mixdown_present = bb.read_bit()?;
    if mono_mixdown_present == 1 {
        let _mono_mixdown_element_number = bb.read_bits(4)?;
    }
    let stereo_mixdown_present = bb.read_bit()?;
    if stereo_mixdown_present == 1 {
        let _stereo_mixdown_element_number = bb.read_bits(4)?;
    }
    let matrix_mixdown_present = bb.read_bit()?;
    if matrix_mixdown_present == 1 {
        let _matrix_mixdown_idx = bb.read_bits(2)?;
        let _pseudo_surround_enable = bb.read_bit()?;
    }
    for _ in 0..num_front_channel_elements {
        let _is_cpe = bb.read_bit()?;
        let _tag_select = bb.read_bits(4)?;
    }
    for _ in 0..num_side_channel_elements {
        let _is_cpe = bb.read_bit()?;
        let _tag_select = bb.read_bits(4)?;
    }
    for _ in 0..num_back_channel_elements {
        let _is_cpe = bb.read_bit()?;
        let _tag_select = bb.read_bits(4)?;
    }
    for _ in 0..num_lfe_channel_elements {
        let _tag_select = bb.read_bits(4)?;
    }
    for _ in 0..num_assoc_data_elements {
        let _tag_select = bb.read_bits(4)?;
    }
    for _ in 0..num_valid_cc_elements {
        let _cc_element_is_ind_sw = bb.read_bit()?;
        let _tag_select = bb.read_bits(4)?;
    }

    bb.align_to_byte()?;
    let comment_field_bytes = bb.read_bits(8)?;
    if comment_field_bytes > 0 {
        let comment = bb.read_bytes(comment_field_bytes as usize)?;
        ctx.trace(format_args!("commentString=\"{}\"", String::from_utf8_lossy(&comment)));
    }
    ctx.trace(format_args!("</ProgramConfigElement>"));
    Ok(())
}

fn validate_celp_specific_config(_ctx: &mut ValidationContext<'_>, bb: &mut BitCursor<'_>) -> Result<()> {
    let is_base_layer = bb.read_bit()?;
    if is_base_layer == 1 {
        let excitation_mode = bb.read_bit()?;
        let _sample_rate_mode = bb.read_bit()?;
        let _fine_rate_control = bb.read_bit()?;
        if excitation_mode == 1 {
            // RPE
            let _rpe_configuration = bb.read_bits(3)?;
        } else {
            // MPE
            let _mpe_configuration = bb.read_bits(5)?;
            let _num_enh_layers = bb.read_bits(2)?;
            let _band_scalability_mode = bb.read_bit()?;
        }
    } else {
        let is_bws_layer = bb.read_bit()?;
        if is_bws_layer == 1 {
            let _bws_configuration = bb.read_bits(2)?;
        } else {
            let _brs_id = bb.read_bits(2)?;
        }
    }
    Ok(())
}

fn validate_error_protection_config(_ctx: &mut ValidationContext<'_>, bb: &mut BitCursor<'_>) -> Result<()> {
    let number_of_predefined_set = bb.read_bits(8)?;
    let interleave_type = bb.read_bits(2)?;
    let _bit_stuffing = bb.read_bits(3)?;
    let number_of_concatenated_frames = bb.read_bits(3)?;
    for _ in 0..number_of_predefined_set {
        let number_of_classes = bb.read_bits(6)?;
        for _ in 0..number_of_classes {
            let length_escape = bb.read_bit()?;
            let rate_escape = bb.read_bit()?;
            let crclen_escape = bb.read_bit()?;
            if number_of_concatenated_frames != 1 {
                let _concatenate_flag = bb.read_bit()?;
            }
            let fec_type = bb.read_bits(2)?;
            if fec_type == 0 {
                let _termination_switch = bb.read_bit()?;
            }
            if interleave_type == 2 {
                let _interleave_switch = bb.read_bits(2)?;
            }
            let _class_optional = bb.read_bit()?;
            if length_escape == 1 {
                let _number_of_bits_for_length = bb.read_bits(4)?;
            } else {
                let _class_length = bb.read_bits(16)?;
            }
            if rate_escape != 1 {
                let _class_rate = bb.read_bits(5)?;
            }
            if crclen_escape != 1 {
                let _class_crc_length = bb.read_bits(5)?;
            }
        }
        let class_reordered_output = bb.read_bit()?;
        if class_reordered_output == 1 {
            for _ in 0..number_of_classes {
                let _class_output_order = bb.read_bits(6)?;
            }
        }
    }
    let header_protection = bb.read_bit()?;
    if header_protection == 1 {
        let _header_rate = bb.read_bits(5)?;
        let _header_crc_length = bb.read_bits(5)?;
    }
    let _rs_fec_capability = bb.read_bits(7)?;
    Ok(())
}

#[cfg(test)]
mod test {
    use bytes::Bytes;

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

        fn finish(self) -> Vec<u8> {
            let mut bytes = vec![0u8; (self.bits.len() + 7) / 8];
            for (i, bit) in self.bits.iter().enumerate() {
                if *bit {
                    bytes[i / 8] |= 1 << (7 - i % 8);
                }
            }
            bytes
        }
    }

    fn run_decoder(data: &[u8]) -> Vec<crate::diag::Finding> {
        let source = Bytes::new();
        let config = Config::default();
        let mut ctx = crate::walk::ValidationContext::new(&source, &config);
        let mut bb = BitCursor::new(data);
        validate_audio_specific_config(&mut ctx, &mut bb).unwrap();
        assert!(bb.bits_left() < 8, "decoder must end byte-aligned");
        ctx.diags.into_findings()
    }

    #[test]
    fn aac_lc_stereo() {
        let mut bits = BitWriter::new();
        bits.put(2, 5); // AAC-LC
        bits.put(4, 4); // 44.1 kHz
        bits.put(2, 4); // stereo
        bits.put(0, 1); // frameLengthFlag
        bits.put(0, 1); // dependsOnCoreCoder
        bits.put(0, 1); // extensionFlag
        let findings = run_decoder(&bits.finish());
        assert!(findings.is_empty());
    }

    #[test]
    fn explicit_sampling_frequency_escape() {
        let mut bits = BitWriter::new();
        bits.put(2, 5); // AAC-LC
        bits.put(0x0f, 4); // escape
        bits.put(48000, 24);
        bits.put(1, 4); // mono
        bits.put(0, 1);
        bits.put(0, 1);
        bits.put(0, 1);
        let findings = run_decoder(&bits.finish());
        assert!(findings.is_empty());
    }

    #[test]
    fn sbr_sync_extension_is_consumed() {
        let mut bits = BitWriter::new();
        bits.put(2, 5); // AAC-LC
        bits.put(6, 4); // 24 kHz
        bits.put(2, 4); // stereo
        bits.put(0, 1);
        bits.put(0, 1);
        bits.put(0, 1);
        bits.put(0x2b7, 11); // sync extension
        bits.put(5, 5); // SBR object type
        bits.put(1, 1); // sbrPresent
        bits.put(3, 4); // 48 kHz
        let findings = run_decoder(&bits.finish());
        assert!(findings.is_empty());
    }
}
