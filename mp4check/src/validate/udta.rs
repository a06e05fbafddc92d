//! The `udta` subtree: copyright notices, location information, and hint-track user data.

use bytes::Buf;

use crate::diag::FindingKind;
use crate::error::Result;
use crate::parse::{box_type, Fixed32, FourCC, Mp4IntReaderExt};
use crate::walk::{validate_children, report_unknown_children, BoxPolicy, BoxRef, ValidationContext};

use super::{expect_flags_zero, expect_version_zero, mdia};

pub fn validate_udta(ctx: &mut ValidationContext<'_>, boxref: &BoxRef) -> Result<()> {
    let mut boxes = ctx.resolve_children(&boxref.header)?;

    // Multiple copyright and location boxes are allowed (one per language).
    let result = validate_children(ctx, &mut boxes, box_type::CPRT, BoxPolicy::empty(), validate_cprt);
    let result = result.and(validate_children(ctx, &mut boxes, box_type::LOCI, BoxPolicy::empty(), validate_loci));
    let result = result.and(validate_children(
        ctx,
        &mut boxes,
        box_type::HNTI,
        BoxPolicy::AT_MOST_ONE,
        validate_hnti,
    ));

    report_unknown_children(ctx, &boxes, "user data", &[]);
    result
}

/// Decode a packed ISO-639-2/T language code: a zero pad bit and three 5-bit letters offset
/// from 0x60.
fn decode_language(ctx: &mut ValidationContext<'_>, language: u16) -> String {
    if language & 0x8000 != 0 {
        ctx.error(FindingKind::FieldConstraint, "language code pad bit must be 0");
    }
    let letters = [
        ((language >> 10) & 0x1f) as u8 + 0x60,
        ((language >> 5) & 0x1f) as u8 + 0x60,
        (language & 0x1f) as u8 + 0x60,
    ];
    if letters.iter().any(|letter| !letter.is_ascii_lowercase()) {
        ctx.error(FindingKind::FieldConstraint, format!("language code 0x{language:04x} is not three letters"));
    }
    String::from_utf8_lossy(&letters).into_owned()
}

/// Read a text field that is either UTF-8 or UTF-16 introduced by a byte order mark.
fn read_text(payload: &mut bytes::Bytes) -> String {
    if payload.len() >= 2 && payload[0] == 0xfe && payload[1] == 0xff {
        payload.advance(2);
        let units: Vec<u16> = payload
            .chunks(2)
            .take_while(|pair| pair.len() == 2 && *pair != [0, 0])
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        payload.advance((units.len() * 2).min(payload.len()));
        if payload.len() >= 2 && payload[0] == 0 && payload[1] == 0 {
            payload.advance(2);
        }
        String::from_utf16_lossy(&units)
    } else {
        mdia::read_string_to_end(payload)
    }
}

fn validate_cprt(ctx: &mut ValidationContext<'_>, boxref: &BoxRef) -> Result<()> {
    let box_type = boxref.header.box_type;
    let (full, mut payload) = ctx.read_full_box(&boxref.header)?;
    expect_flags_zero(ctx, box_type, &full);
    expect_version_zero(ctx, box_type, &full);

    let language: u16 = payload.get_mp4()?;
    let language = decode_language(ctx, language);
    let notice = read_text(&mut payload);
    ctx.trace(format_args!("language=\"{language}\" notice=\"{notice}\""));
    Ok(())
}

fn validate_loci(ctx: &mut ValidationContext<'_>, boxref: &BoxRef) -> Result<()> {
    let box_type = boxref.header.box_type;
    let (full, mut payload) = ctx.read_full_box(&boxref.header)?;
    expect_flags_zero(ctx, box_type, &full);
    expect_version_zero(ctx, box_type, &full);

    let language: u16 = payload.get_mp4()?;
    let language = decode_language(ctx, language);
    let name = read_text(&mut payload);
    let role: u8 = payload.get_mp4()?;
    if role > 3 {
        ctx.warning(FindingKind::FieldConstraint, format!("location role {role} is reserved"));
    }
    let longitude: Fixed32 = payload.get_mp4()?;
    let latitude: Fixed32 = payload.get_mp4()?;
    let altitude: Fixed32 = payload.get_mp4()?;
    let astronomical_body = read_text(&mut payload);
    let additional_notes = read_text(&mut payload);
    ctx.trace(format_args!(
        "language=\"{language}\" name=\"{name}\" role=\"{role}\" longitude=\"{longitude}\" \
         latitude=\"{latitude}\" altitude=\"{altitude}\" body=\"{astronomical_body}\" \
         notes=\"{additional_notes}\""
    ));
    Ok(())
}

fn validate_hnti(ctx: &mut ValidationContext<'_>, boxref: &BoxRef) -> Result<()> {
    let mut boxes = ctx.resolve_children(&boxref.header)?;

    let rtp = crate::parse::BoxType::FourCC(FourCC::from_str("rtp"));
    let result = validate_children(ctx, &mut boxes, rtp, BoxPolicy::AT_MOST_ONE, validate_rtp);
    report_unknown_children(ctx, &boxes, "hint information", &[]);
    result
}

fn validate_rtp(ctx: &mut ValidationContext<'_>, boxref: &BoxRef) -> Result<()> {
    let mut payload = ctx.read_payload(&boxref.header)?;
    let sub_type: FourCC = payload.get_mp4()?;
    if sub_type != FourCC::from_str("sdp") {
        ctx.error(FindingKind::FieldConstraint, "no sdp data in movie hint information");
        return Ok(());
    }
    let sdp = String::from_utf8_lossy(&payload).into_owned();
    ctx.trace(format_args!("sdp=\"{sdp}\""));
    Ok(())
}
