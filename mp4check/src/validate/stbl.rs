//! The `stbl` subtree: the sample tables and the cross-table consistency checks that tie them
//! together once all of them are parsed.

use bytes::Buf;

use crate::diag::FindingKind;
use crate::error::Result;
use crate::parse::{box_type, Mp4IntReaderExt};
use crate::track::{SampleSizes, SampleToChunkEntry, TimeToSampleEntry};
use crate::walk::{validate_children, report_unknown_children, BoxPolicy, BoxRef, ValidationContext};

use super::{expect_flags_zero, stsd};

pub fn validate_stbl(ctx: &mut ValidationContext<'_>, boxref: &BoxRef) -> Result<()> {
    let mut boxes = ctx.resolve_children(&boxref.header)?;
    for child in &mut boxes {
        child.track = boxref.track;
    }

    // Exactly one of stsz/stz2 and at least one of stco/co64 must be present; the per-type
    // policies below cannot see across types, so count them here.
    let count_of = |boxes: &[BoxRef], box_type| {
        boxes.iter().filter(|child| child.header.box_type == box_type).count()
    };
    let stsz_count = count_of(&boxes, box_type::STSZ) + count_of(&boxes, box_type::STZ2);
    if stsz_count == 0 {
        ctx.error(FindingKind::Cardinality, "no `stsz` or `stz2` box");
    } else if stsz_count > 1 && count_of(&boxes, box_type::STSZ) > 0 && count_of(&boxes, box_type::STZ2) > 0 {
        ctx.error(FindingKind::Cardinality, "both `stsz` and `stz2` boxes present");
    }
    let offset_count = count_of(&boxes, box_type::STCO) + count_of(&boxes, box_type::CO64);
    if offset_count == 0 {
        ctx.error(FindingKind::Cardinality, "no `stco` or `co64` box");
    } else if count_of(&boxes, box_type::STCO) > 0 && count_of(&boxes, box_type::CO64) > 0 {
        ctx.error(FindingKind::Cardinality, "both `stco` and `co64` boxes present");
    }

    let result = validate_children(ctx, &mut boxes, box_type::STSD, BoxPolicy::EXACTLY_ONE, stsd::validate_stsd);
    let result = result.and(validate_children(ctx, &mut boxes, box_type::STTS, BoxPolicy::EXACTLY_ONE, validate_stts));
    let result = result.and(validate_children(ctx, &mut boxes, box_type::CTTS, BoxPolicy::AT_MOST_ONE, validate_ctts));
    let result = result.and(validate_children(ctx, &mut boxes, box_type::STSS, BoxPolicy::AT_MOST_ONE, validate_stss));
    let result = result.and(validate_children(ctx, &mut boxes, box_type::STSC, BoxPolicy::EXACTLY_ONE, validate_stsc));
    let result = result.and(validate_children(ctx, &mut boxes, box_type::STSZ, BoxPolicy::AT_MOST_ONE, validate_stsz));
    let result = result.and(validate_children(ctx, &mut boxes, box_type::STZ2, BoxPolicy::AT_MOST_ONE, validate_stz2));
    let result = result.and(validate_children(ctx, &mut boxes, box_type::STCO, BoxPolicy::AT_MOST_ONE, validate_stco));
    let result = result.and(validate_children(ctx, &mut boxes, box_type::CO64, BoxPolicy::AT_MOST_ONE, validate_co64));
    let result = result.and(validate_children(ctx, &mut boxes, box_type::STSH, BoxPolicy::AT_MOST_ONE, validate_stsh));
    let result = result.and(validate_children(ctx, &mut boxes, box_type::STDP, BoxPolicy::AT_MOST_ONE, validate_stdp));
    let result = result.and(validate_children(ctx, &mut boxes, box_type::SDTP, BoxPolicy::AT_MOST_ONE, validate_sdtp));
    let result = result.and(validate_children(ctx, &mut boxes, box_type::PADB, BoxPolicy::AT_MOST_ONE, validate_padb));

    report_unknown_children(ctx, &boxes, "sample table", &[]);

    check_cross_table_consistency(ctx, boxref);
    result
}

/// The post-parse cross-checks between stts, stsz/stz2, stsc and stco/co64.
fn check_cross_table_consistency(ctx: &mut ValidationContext<'_>, boxref: &BoxRef) {
    let Some(track) = ctx.track_mut(boxref) else {
        return;
    };
    let sample_count = track.sample_sizes.sample_count();
    let stts_sample_count = track.time_to_sample_sample_count;
    let stts_duration = track.time_to_sample_duration;
    let media_duration = track.media_duration;
    let chunk_count = track.chunk_count();
    let subtotal = track.sample_to_chunk_subtotal;
    let last_run = track.sample_to_chunk.last().copied();

    if sample_count != stts_sample_count {
        ctx.error(
            FindingKind::Other,
            "number of samples described by the SampleSize box ('stsz') does not match the number \
             of samples described by the TimeToSample box ('stts')",
        );
    }
    if media_duration != stts_duration {
        ctx.error(
            FindingKind::Other,
            format!(
                "media duration ({media_duration}) in the MediaHeader does not match the sum of \
                 durations described by the TimeToSample box ({stts_duration})"
            ),
        );
    }

    if let Some(last_run) = last_run {
        if last_run.first_chunk > chunk_count {
            ctx.error(
                FindingKind::Other,
                "SampleToChunk box describes more chunks than the ChunkOffset box",
            );
        } else if last_run.samples_per_chunk > 0 && last_run.first_chunk >= 1 {
            let remaining = sample_count.saturating_sub(subtotal);
            if remaining % last_run.samples_per_chunk as u64 != 0 {
                ctx.error(
                    FindingKind::Other,
                    "SampleToChunk box does not evenly describe the number of samples defined by \
                     the SampleSize box",
                );
            } else if chunk_count > 0 {
                let extrapolated_chunks = last_run.first_chunk as u64 - 1 + remaining / last_run.samples_per_chunk as u64;
                if extrapolated_chunks != chunk_count as u64 {
                    ctx.error(
                        FindingKind::Other,
                        format!(
                            "SampleToChunk box accounts for {extrapolated_chunks} chunks but the \
                             ChunkOffset box declares {chunk_count}"
                        ),
                    );
                }
            }
        }
    }
}

fn validate_stts(ctx: &mut ValidationContext<'_>, boxref: &BoxRef) -> Result<()> {
    let box_type = boxref.header.box_type;
    let (full, mut payload) = ctx.read_full_box(&boxref.header)?;
    expect_flags_zero(ctx, box_type, &full);

    let entry_count: u32 = payload.get_mp4()?;
    ctx.trace(format_args!("entryCount=\"{entry_count}\""));

    let mut entries = Vec::with_capacity(entry_count.min(1024) as usize);
    let mut sample_count_total: u64 = 0;
    let mut duration_total: u64 = 0;
    let mut last_sample_duration_is_zero = false;
    for index in 0..entry_count {
        let sample_count: u32 = payload.get_mp4()?;
        let sample_duration: u32 = payload.get_mp4()?;
        if sample_duration == 0 {
            if index + 1 == entry_count {
                last_sample_duration_is_zero = true;
            } else {
                ctx.error(
                    FindingKind::FieldConstraint,
                    "a zero duration is only allowed in the last TimeToSample entry",
                );
            }
        }
        sample_count_total += sample_count as u64;
        duration_total += sample_count as u64 * sample_duration as u64;
        entries.push(TimeToSampleEntry { sample_count, sample_duration });
    }

    let media_duration = ctx.track_mut(boxref).map(|track| track.media_duration).unwrap_or(0);
    if last_sample_duration_is_zero && media_duration != 0 {
        if duration_total > media_duration {
            ctx.error(
                FindingKind::Other,
                format!(
                    "the last TimeToSample duration is zero, but the table total ({duration_total}) \
                     already exceeds the `mdhd` duration ({media_duration})"
                ),
            );
        } else if duration_total == media_duration {
            ctx.warning(
                FindingKind::Other,
                "the last TimeToSample duration is zero, but the table total already equals the \
                 `mdhd` duration",
            );
        }
    }

    if let Some(track) = ctx.track_mut(boxref) {
        track.time_to_sample = entries;
        track.time_to_sample_sample_count = sample_count_total;
        track.time_to_sample_duration = duration_total;
    }
    Ok(())
}

fn validate_ctts(ctx: &mut ValidationContext<'_>, boxref: &BoxRef) -> Result<()> {
    let box_type = boxref.header.box_type;
    let (full, mut payload) = ctx.read_full_box(&boxref.header)?;
    expect_flags_zero(ctx, box_type, &full);

    let entry_count: u32 = payload.get_mp4()?;
    let mut total_count: u64 = 0;
    let mut all_zero = true;
    for _ in 0..entry_count {
        let sample_count: u32 = payload.get_mp4()?;
        let sample_offset: i32 = payload.get_mp4()?;
        if sample_offset < 0 {
            ctx.error(FindingKind::FieldConstraint, "negative offset in the CompositionOffset box");
        }
        total_count += sample_count as u64;
        if sample_offset != 0 {
            all_zero = false;
        }
    }
    if total_count == 0 {
        ctx.warning(FindingKind::Other, "CompositionOffset box has no entries so is un-needed");
    } else if all_zero {
        ctx.warning(
            FindingKind::Other,
            "CompositionOffset box has no entry with a non-zero offset so is un-needed",
        );
    }
    Ok(())
}

fn validate_stss(ctx: &mut ValidationContext<'_>, boxref: &BoxRef) -> Result<()> {
    let box_type = boxref.header.box_type;
    let (full, mut payload) = ctx.read_full_box(&boxref.header)?;
    expect_flags_zero(ctx, box_type, &full);

    let entry_count: u32 = payload.get_mp4()?;
    let mut previous: u32 = 0;
    for _ in 0..entry_count {
        let sample_number: u32 = payload.get_mp4()?;
        if sample_number == 0 {
            ctx.error(FindingKind::FieldConstraint, "sync sample numbers are 1-based; 0 is invalid");
        } else if sample_number <= previous {
            ctx.error(FindingKind::FieldConstraint, "sync sample numbers must be strictly increasing");
        }
        previous = sample_number;
    }
    Ok(())
}

fn validate_stsc(ctx: &mut ValidationContext<'_>, boxref: &BoxRef) -> Result<()> {
    let box_type = boxref.header.box_type;
    let (full, mut payload) = ctx.read_full_box(&boxref.header)?;
    expect_flags_zero(ctx, box_type, &full);

    let entry_count: u32 = payload.get_mp4()?;
    ctx.trace(format_args!("entryCount=\"{entry_count}\""));

    let sample_description_count = ctx
        .track_mut(boxref)
        .map(|track| track.sample_description_count)
        .unwrap_or(0);

    let mut entries: Vec<SampleToChunkEntry> = Vec::with_capacity(entry_count.min(1024) as usize);
    let mut subtotal: u64 = 0;
    for index in 0..entry_count {
        let first_chunk: u32 = payload.get_mp4()?;
        let samples_per_chunk: u32 = payload.get_mp4()?;
        let sample_description_index: u32 = payload.get_mp4()?;

        if index == 0 && first_chunk != 1 {
            ctx.error(FindingKind::FieldConstraint, "the first SampleToChunk entry must start at chunk 1");
        }
        if let Some(previous) = entries.last() {
            if first_chunk <= previous.first_chunk {
                ctx.error(
                    FindingKind::FieldConstraint,
                    "SampleToChunk first-chunk numbers must be strictly increasing",
                );
            } else {
                subtotal += (first_chunk - previous.first_chunk) as u64 * previous.samples_per_chunk as u64;
            }
        }
        if samples_per_chunk == 0 {
            ctx.error(FindingKind::FieldConstraint, "SampleToChunk samples-per-chunk must not be 0");
        }
        if sample_description_index == 0
            || (sample_description_count > 0 && sample_description_index > sample_description_count)
        {
            ctx.error(
                FindingKind::FieldConstraint,
                format!("SampleToChunk sample description index {sample_description_index} out of range"),
            );
        }
        entries.push(SampleToChunkEntry { first_chunk, samples_per_chunk, sample_description_index });
    }

    if let Some(track) = ctx.track_mut(boxref) {
        track.sample_to_chunk = entries;
        track.sample_to_chunk_subtotal = subtotal;
    }
    Ok(())
}

fn validate_stsz(ctx: &mut ValidationContext<'_>, boxref: &BoxRef) -> Result<()> {
    let box_type = boxref.header.box_type;
    let (full, mut payload) = ctx.read_full_box(&boxref.header)?;
    expect_flags_zero(ctx, box_type, &full);

    let sample_size: u32 = payload.get_mp4()?;
    let entry_count: u32 = payload.get_mp4()?;
    ctx.trace(format_args!("sampleSize=\"{sample_size}\" entryCount=\"{entry_count}\""));

    let sizes = if sample_size == 0 {
        let mut sizes = Vec::with_capacity(entry_count.min(1 << 20) as usize);
        for _ in 0..entry_count {
            let size: u32 = payload.get_mp4()?;
            if size == 0 {
                ctx.error(FindingKind::FieldConstraint, "a zero sample size is not allowed in `stsz`");
            }
            sizes.push(size);
        }
        SampleSizes::PerSample(sizes)
    } else {
        SampleSizes::Constant { size: sample_size, count: entry_count }
    };

    if let Some(track) = ctx.track_mut(boxref) {
        track.sample_sizes = sizes;
    }
    Ok(())
}

fn validate_stz2(ctx: &mut ValidationContext<'_>, boxref: &BoxRef) -> Result<()> {
    let box_type = boxref.header.box_type;
    let (full, mut payload) = ctx.read_full_box(&boxref.header)?;
    expect_flags_zero(ctx, box_type, &full);

    let reserved: [u8; 3] = payload.get_mp4()?;
    if reserved != [0; 3] {
        ctx.error(FindingKind::FieldConstraint, "`stz2` reserved bytes must be 0");
    }
    let field_size: u8 = payload.get_mp4()?;
    let entry_count: u32 = payload.get_mp4()?;
    ctx.trace(format_args!("fieldSize=\"{field_size}\" entryCount=\"{entry_count}\""));

    // A bad field size makes the whole table undecodable; leave it empty rather than populate
    // it with garbage.
    if !matches!(field_size, 4 | 8 | 16) {
        ctx.error(
            FindingKind::FieldConstraint,
            format!("`stz2` field size must be 4, 8 or 16, not {field_size}"),
        );
        return Ok(());
    }

    let mut sizes = Vec::with_capacity(entry_count.min(1 << 20) as usize);
    match field_size {
        4 => {
            for _ in 0..(entry_count as u64 + 1) / 2 {
                let byte: u8 = payload.get_mp4()?;
                sizes.push((byte >> 4) as u32);
                if sizes.len() < entry_count as usize {
                    sizes.push((byte & 0x0f) as u32);
                }
            }
        }
        8 => {
            for _ in 0..entry_count {
                let byte: u8 = payload.get_mp4()?;
                sizes.push(byte as u32);
            }
        }
        _ => {
            for _ in 0..entry_count {
                let size: u16 = payload.get_mp4()?;
                sizes.push(size as u32);
            }
        }
    }
    for size in &sizes {
        if *size == 0 {
            ctx.error(FindingKind::FieldConstraint, "a zero sample size is not allowed in `stz2`");
        }
    }

    if let Some(track) = ctx.track_mut(boxref) {
        track.sample_sizes = SampleSizes::PerSample(sizes);
    }
    Ok(())
}

fn validate_stco(ctx: &mut ValidationContext<'_>, boxref: &BoxRef) -> Result<()> {
    let box_type = boxref.header.box_type;
    let (full, mut payload) = ctx.read_full_box(&boxref.header)?;
    expect_flags_zero(ctx, box_type, &full);

    let entry_count: u32 = payload.get_mp4()?;
    ctx.trace(format_args!("entryCount=\"{entry_count}\""));
    let mut offsets = Vec::with_capacity(entry_count.min(1 << 20) as usize);
    for _ in 0..entry_count {
        let offset: u32 = payload.get_mp4()?;
        if offset == 0 {
            ctx.error(FindingKind::FieldConstraint, "a zero chunk offset is not allowed in `stco`");
        }
        offsets.push(offset as u64);
    }

    if let Some(track) = ctx.track_mut(boxref) {
        track.chunk_offsets = offsets;
    }
    Ok(())
}

fn validate_co64(ctx: &mut ValidationContext<'_>, boxref: &BoxRef) -> Result<()> {
    let box_type = boxref.header.box_type;
    let (full, mut payload) = ctx.read_full_box(&boxref.header)?;
    expect_flags_zero(ctx, box_type, &full);

    let entry_count: u32 = payload.get_mp4()?;
    ctx.trace(format_args!("entryCount=\"{entry_count}\""));
    let mut offsets = Vec::with_capacity(entry_count.min(1 << 20) as usize);
    for _ in 0..entry_count {
        let offset: u64 = payload.get_mp4()?;
        if offset == 0 {
            ctx.error(FindingKind::FieldConstraint, "a zero chunk offset is not allowed in `co64`");
        }
        offsets.push(offset);
    }

    if let Some(track) = ctx.track_mut(boxref) {
        track.chunk_offsets = offsets;
    }
    Ok(())
}

fn validate_stsh(ctx: &mut ValidationContext<'_>, boxref: &BoxRef) -> Result<()> {
    let box_type = boxref.header.box_type;
    let (full, mut payload) = ctx.read_full_box(&boxref.header)?;
    expect_flags_zero(ctx, box_type, &full);

    let entry_count: u32 = payload.get_mp4()?;
    for _ in 0..entry_count {
        let shadowed_sample: u32 = payload.get_mp4()?;
        let sync_sample: u32 = payload.get_mp4()?;
        if shadowed_sample == 0 || sync_sample == 0 {
            ctx.error(FindingKind::FieldConstraint, "shadow sync sample numbers are 1-based; 0 is invalid");
        }
    }
    Ok(())
}

fn validate_stdp(ctx: &mut ValidationContext<'_>, boxref: &BoxRef) -> Result<()> {
    let box_type = boxref.header.box_type;
    let (full, payload) = ctx.read_full_box(&boxref.header)?;
    expect_flags_zero(ctx, box_type, &full);

    let entry_count = payload.remaining() as u64 / 2;
    let sample_count = ctx
        .track_mut(boxref)
        .map(|track| track.sample_sizes.sample_count())
        .unwrap_or(0);
    if sample_count != 0 && entry_count != sample_count {
        ctx.error(
            FindingKind::Other,
            format!(
                "DegradationPriority box holds {entry_count} entries for {sample_count} samples"
            ),
        );
    }
    Ok(())
}

fn validate_sdtp(ctx: &mut ValidationContext<'_>, boxref: &BoxRef) -> Result<()> {
    let box_type = boxref.header.box_type;
    let (full, payload) = ctx.read_full_box(&boxref.header)?;
    expect_flags_zero(ctx, box_type, &full);

    let entry_count = payload.remaining() as u64;
    let sample_count = ctx
        .track_mut(boxref)
        .map(|track| track.sample_sizes.sample_count())
        .unwrap_or(0);
    if sample_count != 0 && entry_count != sample_count {
        ctx.error(
            FindingKind::Other,
            format!("SampleDependency box holds {entry_count} entries for {sample_count} samples"),
        );
    }
    Ok(())
}

fn validate_padb(ctx: &mut ValidationContext<'_>, boxref: &BoxRef) -> Result<()> {
    let box_type = boxref.header.box_type;
    let (full, mut payload) = ctx.read_full_box(&boxref.header)?;
    expect_flags_zero(ctx, box_type, &full);

    let sample_count: u32 = payload.get_mp4()?;
    let mut reserved_set = false;
    for _ in 0..(sample_count as u64 + 1) / 2 {
        let byte: u8 = payload.get_mp4()?;
        // Each nibble is a reserved bit plus 3 pad bits.
        if byte & 0x88 != 0 {
            reserved_set = true;
        }
    }
    if reserved_set {
        ctx.error(FindingKind::FieldConstraint, "`padb` reserved bits must be 0");
    }
    Ok(())
}
