//! Cross-track chunk overlap detection.
//!
//! Most tracks store their chunks in increasing file order, so the detector runs a k-way merge
//! over the per-track chunk cursors, picking the lowest unprocessed chunk start each round.
//! A chunk starting at or past the highest end seen so far is appended in O(1); otherwise it is
//! inserted into the sorted working list and checked for overlap against its immediate
//! neighbors only, which is sufficient because chunks within one track are non-overlapping and
//! the list is sorted. This avoids both an all-pairs comparison and a full post-sort.

use crate::diag::FindingKind;
use crate::parse::FourCC;
use crate::track::MovieInfo;
use crate::walk::ValidationContext;

struct ChunkSpan {
    start: u64,
    /// Inclusive end offset.
    stop: u64,
    track_id: u32,
    media_type: Option<FourCC>,
}

/// Check every track's chunks for physical overlap in the file, and for zero-length or
/// past-end-of-file chunks.
///
/// Overlap between two non-hint tracks is an error; overlap involving a hint track is a
/// warning, since hint tracks intentionally reference other tracks' data.
pub fn detect_chunk_overlaps(ctx: &mut ValidationContext<'_>, movie: &MovieInfo) {
    let file_len = ctx.source.len();
    let total_chunks: usize = movie.tracks.iter().map(|track| track.chunk_count() as usize).sum();

    // 1-based next-chunk cursor per track.
    let mut next_chunk: Vec<u32> = vec![1; movie.tracks.len()];
    let mut placed: Vec<ChunkSpan> = Vec::with_capacity(total_chunks);
    let mut high_water_mark = 0u64;

    loop {
        // Select the track whose next unconsumed chunk has the lowest start offset.
        let mut lowest: Option<(usize, u64)> = None;
        for (index, track) in movie.tracks.iter().enumerate() {
            if next_chunk[index] <= track.chunk_count() {
                let offset = track.chunk_offsets[next_chunk[index] as usize - 1];
                if lowest.map_or(true, |(_, low_offset)| offset < low_offset) {
                    lowest = Some((index, offset));
                }
            }
        }
        let Some((track_index, _)) = lowest else {
            break;
        };

        let track = &movie.tracks[track_index];
        let chunk_number = next_chunk[track_index];
        next_chunk[track_index] += 1;

        let Some((start, size)) = track.chunk_offset_size(chunk_number) else {
            ctx.error(
                FindingKind::Other,
                format!(
                    "chunk {chunk_number} of track ID {} cannot be resolved against the sample tables",
                    track.track_id
                ),
            );
            continue;
        };
        if size == 0 {
            ctx.error(
                FindingKind::Other,
                format!("chunk {chunk_number} of track ID {} has zero length", track.track_id),
            );
            continue;
        }
        let Some(stop) = start.checked_add(size - 1) else {
            ctx.error(
                FindingKind::Other,
                format!("chunk {chunk_number} of track ID {} overflows the file offset space", track.track_id),
            );
            continue;
        };

        if start >= file_len {
            ctx.error(
                FindingKind::Other,
                format!("chunk offset 0x{start:x} is at or beyond file size 0x{file_len:x}"),
            );
        } else if stop >= file_len {
            ctx.error(
                FindingKind::Other,
                format!("chunk end 0x{stop:x} is beyond file size 0x{file_len:x}"),
            );
        }

        let slot = if start >= high_water_mark {
            // The common case: the chunk starts after every chunk seen so far.
            placed.len()
        } else {
            // Find the first placed chunk starting after the candidate. This could be a binary
            // chop, but the case is rare.
            let slot = placed
                .iter()
                .position(|span| span.start > start)
                .unwrap_or(placed.len());

            // Overlap with anything before the prior slot would also overlap the prior slot,
            // and would already have been reported when that chunk was placed; one report per
            // neighbor is enough. Same reasoning after the next slot.
            if let Some(prior) = slot.checked_sub(1).and_then(|prior_slot| placed.get(prior_slot)) {
                if start >= prior.start && start <= prior.stop {
                    report_overlap(ctx, track.media_type, track.track_id, chunk_number, start, prior);
                }
            }
            if let Some(next) = placed.get(slot) {
                if stop >= next.start && stop <= next.stop {
                    report_overlap(ctx, track.media_type, track.track_id, chunk_number, start, next);
                }
            }
            slot
        };

        placed.insert(
            slot,
            ChunkSpan { start, stop, track_id: track.track_id, media_type: track.media_type },
        );
        if stop > high_water_mark {
            high_water_mark = stop;
        }
    }
}

fn report_overlap(
    ctx: &mut ValidationContext<'_>,
    media_type: Option<FourCC>,
    track_id: u32,
    chunk_number: u32,
    start: u64,
    other: &ChunkSpan,
) {
    let message = format!(
        "chunk {chunk_number} of track ID {track_id} at {start} overlaps chunk of track ID {} at {}",
        other.track_id, other.start,
    );
    let hint_involved = media_type == Some(FourCC::HINT) || other.media_type == Some(FourCC::HINT);
    if hint_involved {
        ctx.warning(FindingKind::ChunkOverlap, message);
    } else {
        ctx.error(FindingKind::ChunkOverlap, message);
    }
}

#[cfg(test)]
mod test {
    use bytes::Bytes;

    use crate::diag::Severity;
    use crate::track::{SampleSizes, SampleToChunkEntry, TrackInfo};
    use crate::Config;

    use super::*;

    /// A track whose chunks each hold one `chunk_size`-byte sample.
    fn test_track(track_id: u32, media_type: FourCC, chunk_size: u32, offsets: &[u64]) -> TrackInfo {
        TrackInfo {
            track_id,
            media_type: Some(media_type),
            sample_to_chunk: vec![SampleToChunkEntry {
                first_chunk: 1,
                samples_per_chunk: 1,
                sample_description_index: 1,
            }],
            sample_sizes: SampleSizes::Constant { size: chunk_size, count: offsets.len() as u32 },
            chunk_offsets: offsets.to_vec(),
            ..Default::default()
        }
    }

    fn run(movie: &MovieInfo) -> Vec<crate::diag::Finding> {
        let source = Bytes::from(vec![0u8; 0x10000]);
        let config = Config::default();
        let mut ctx = ValidationContext::new(&source, &config);
        detect_chunk_overlaps(&mut ctx, movie);
        ctx.diags.into_findings()
    }

    fn overlap_findings(findings: &[crate::diag::Finding]) -> Vec<&crate::diag::Finding> {
        findings.iter().filter(|finding| finding.kind == FindingKind::ChunkOverlap).collect()
    }

    #[test]
    fn interleaved_disjoint_tracks_produce_no_findings() {
        let movie = MovieInfo {
            tracks: vec![
                test_track(1, FourCC::VIDE, 0x100, &[0x1000, 0x1200, 0x1400]),
                test_track(2, FourCC::SOUN, 0x100, &[0x1100, 0x1300, 0x1500]),
            ],
            ..Default::default()
        };
        assert!(run(&movie).is_empty());
    }

    #[test]
    fn same_type_overlap_is_one_error() {
        let movie = MovieInfo {
            tracks: vec![
                test_track(1, FourCC::VIDE, 0x200, &[0x1000]),
                test_track(2, FourCC::VIDE, 0x200, &[0x1100]),
            ],
            ..Default::default()
        };
        let findings = run(&movie);
        let overlaps = overlap_findings(&findings);
        assert_eq!(overlaps.len(), 1);
        assert_eq!(overlaps[0].severity, Severity::Error);
    }

    #[test]
    fn hint_overlap_is_a_warning() {
        let movie = MovieInfo {
            tracks: vec![
                test_track(1, FourCC::VIDE, 0x200, &[0x1000]),
                test_track(2, FourCC::HINT, 0x200, &[0x1100]),
            ],
            ..Default::default()
        };
        let findings = run(&movie);
        let overlaps = overlap_findings(&findings);
        assert_eq!(overlaps.len(), 1);
        assert_eq!(overlaps[0].severity, Severity::Warning);
    }

    #[test]
    fn zero_length_chunk_is_an_error() {
        let movie = MovieInfo {
            tracks: vec![test_track(1, FourCC::VIDE, 0, &[0x1000])],
            ..Default::default()
        };
        let findings = run(&movie);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Error);
        assert!(findings[0].message.contains("zero length"));
    }

    #[test]
    fn chunk_past_end_of_file_is_reported() {
        let movie = MovieInfo {
            tracks: vec![test_track(1, FourCC::VIDE, 0x100, &[0x2000_0000])],
            ..Default::default()
        };
        let findings = run(&movie);
        assert_eq!(findings.len(), 1);
        assert!(findings[0].message.contains("beyond file size"));
    }

    #[test]
    fn non_monotonic_chunk_table_still_detects_neighbor_overlap() {
        // Chunks deliberately out of file order within one track; the merge still places them
        // by start offset, and the inserted chunk overlaps its successor.
        let movie = MovieInfo {
            tracks: vec![
                test_track(1, FourCC::VIDE, 0x200, &[0x3000, 0x1000]),
                test_track(2, FourCC::SOUN, 0x200, &[0x1100]),
            ],
            ..Default::default()
        };
        let findings = run(&movie);
        let overlaps = overlap_findings(&findings);
        assert_eq!(overlaps.len(), 1);
    }
}
