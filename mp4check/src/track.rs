//! Per-track and per-movie state accumulated while the `moov` subtree is validated, plus the
//! sample-table arithmetic used by the chunk-overlap detector and the cross-table checks.

use crate::parse::{Fixed16, Fixed32, FourCC};

/// Movie-level state, one per `moov` box.
#[derive(Debug, Default)]
pub struct MovieInfo {
    /// The movie timescale from `mvhd`.
    pub timescale: u32,
    /// The movie duration from `mvhd`, in timescale units.
    pub duration: u64,
    /// One record per `trak` child, in file order.
    pub tracks: Vec<TrackInfo>,
}

/// Per-track state, filled in incrementally as the track's sub-boxes are validated.
#[derive(Debug, Default)]
pub struct TrackInfo {
    /// The track ID from `tkhd`.
    pub track_id: u32,
    /// The handler type from `mdia`/`hdlr` (`vide`, `soun`, `hint`, `odsm`, `sdsm`, ...).
    pub media_type: Option<FourCC>,
    /// Track presentation width from `tkhd`, 16.16 fixed point.
    pub width: Fixed32,
    /// Track presentation height from `tkhd`, 16.16 fixed point.
    pub height: Fixed32,
    /// Track volume from `tkhd`, 8.8 fixed point.
    pub volume: Fixed16,
    /// The media timescale from `mdhd`.
    pub media_timescale: u32,
    /// The media duration from `mdhd`, in media timescale units.
    pub media_duration: u64,

    /// The `stts` run-length table.
    pub time_to_sample: Vec<TimeToSampleEntry>,
    /// Total sample count described by `stts`.
    pub time_to_sample_sample_count: u64,
    /// Total duration described by `stts`.
    pub time_to_sample_duration: u64,

    /// The sample-size table from `stsz` or `stz2`.
    pub sample_sizes: SampleSizes,
    /// The `stsc` run-length table.
    pub sample_to_chunk: Vec<SampleToChunkEntry>,
    /// Samples accounted for by all but the last `stsc` run.
    pub sample_to_chunk_subtotal: u64,
    /// Chunk offsets from `stco`/`co64`, normalized to 64 bits.
    pub chunk_offsets: Vec<u64>,

    /// Number of sample descriptions in `stsd`.
    pub sample_description_count: u32,
    /// NAL length field size in bytes, recorded from `avcC` for AVC tracks.
    pub nal_length_size: Option<u32>,
}

/// One `stts` run: `sample_count` samples of `sample_duration` each.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeToSampleEntry {
    #[allow(missing_docs)]
    pub sample_count: u32,
    #[allow(missing_docs)]
    pub sample_duration: u32,
}

/// One `stsc` run, starting at the 1-based `first_chunk`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SampleToChunkEntry {
    #[allow(missing_docs)]
    pub first_chunk: u32,
    #[allow(missing_docs)]
    pub samples_per_chunk: u32,
    #[allow(missing_docs)]
    pub sample_description_index: u32,
}

/// The sample-size table: either one constant size for every sample, or one size per sample.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SampleSizes {
    /// Every sample has the same size.
    Constant {
        #[allow(missing_docs)]
        size: u32,
        #[allow(missing_docs)]
        count: u32,
    },
    /// Per-sample sizes.
    PerSample(Vec<u32>),
}

/// The samples of one chunk, resolved from the `stsc` runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkSamples {
    /// Zero-based index of the chunk's first sample.
    pub first_sample: u64,
    /// Number of samples in the chunk.
    pub samples_per_chunk: u32,
    /// The 1-based sample description index the chunk's samples use.
    pub sample_description_index: u32,
}

//
// SampleSizes impls
//

impl SampleSizes {
    /// Total number of samples described by the table.
    pub fn sample_count(&self) -> u64 {
        match self {
            SampleSizes::Constant { count, .. } => *count as u64,
            SampleSizes::PerSample(sizes) => sizes.len() as u64,
        }
    }

    /// The size of the zero-based `sample` in bytes, if it is within the table.
    pub fn size_of(&self, sample: u64) -> Option<u32> {
        match self {
            SampleSizes::Constant { size, count } => (sample < *count as u64).then_some(*size),
            SampleSizes::PerSample(sizes) => sizes.get(sample as usize).copied(),
        }
    }
}

impl Default for SampleSizes {
    fn default() -> Self {
        SampleSizes::PerSample(Vec::new())
    }
}

//
// TrackInfo impls
//

impl TrackInfo {
    /// Whether this is a hint track.
    pub fn is_hint(&self) -> bool {
        self.media_type == Some(FourCC::HINT)
    }

    /// The number of chunks in the track.
    pub fn chunk_count(&self) -> u32 {
        self.chunk_offsets.len() as u32
    }

    /// Resolve the sample range of the 1-based `chunk_number` from the `stsc` runs.
    ///
    /// The last run extrapolates to all remaining chunks. Returns [`None`] when the table is
    /// empty or does not cover the chunk.
    pub fn chunk_samples(&self, chunk_number: u32) -> Option<ChunkSamples> {
        let mut first_sample: u64 = 0;
        let mut runs = self.sample_to_chunk.iter().peekable();
        while let Some(run) = runs.next() {
            if chunk_number < run.first_chunk {
                return None;
            }
            let run_end = runs.peek().map(|next| next.first_chunk).unwrap_or(u32::MAX);
            if run_end < run.first_chunk {
                // Non-monotonic runs make the table unresolvable.
                return None;
            }
            if chunk_number < run_end {
                let chunks_into_run = (chunk_number - run.first_chunk) as u64;
                return Some(ChunkSamples {
                    first_sample: first_sample + chunks_into_run * run.samples_per_chunk as u64,
                    samples_per_chunk: run.samples_per_chunk,
                    sample_description_index: run.sample_description_index,
                });
            }
            first_sample = ((run_end - run.first_chunk) as u64)
                .checked_mul(run.samples_per_chunk as u64)
                .and_then(|samples| first_sample.checked_add(samples))?;
        }
        None
    }

    /// The file offset and total byte size of the 1-based `chunk_number`.
    ///
    /// The size is the sum of the chunk's sample sizes. Returns [`None`] when the chunk or any
    /// of its samples is not covered by the tables.
    pub fn chunk_offset_size(&self, chunk_number: u32) -> Option<(u64, u64)> {
        let offset = *self.chunk_offsets.get(chunk_number.checked_sub(1)? as usize)?;
        let span = self.chunk_samples(chunk_number)?;
        let mut size = 0u64;
        for sample in span.first_sample..span.first_sample.checked_add(span.samples_per_chunk as u64)? {
            size = size.checked_add(self.sample_sizes.size_of(sample)? as u64)?;
        }
        Some((offset, size))
    }

    /// The file offset, byte size, and sample description index of the 1-based
    /// `sample_number`.
    pub fn sample_offset_size(&self, sample_number: u64) -> Option<(u64, u32, u32)> {
        let target = sample_number.checked_sub(1)?;
        for chunk_number in 1..=self.chunk_count() {
            let span = self.chunk_samples(chunk_number)?;
            let end = span.first_sample + span.samples_per_chunk as u64;
            if target < end {
                let mut offset = *self.chunk_offsets.get(chunk_number as usize - 1)?;
                for sample in span.first_sample..target {
                    offset = offset.checked_add(self.sample_sizes.size_of(sample)? as u64)?;
                }
                return Some((offset, self.sample_sizes.size_of(target)?, span.sample_description_index));
            }
        }
        None
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn test_track() -> TrackInfo {
        TrackInfo {
            // Chunks 1-2 hold 3 samples each, chunk 3 and later hold 2.
            sample_to_chunk: vec![
                SampleToChunkEntry { first_chunk: 1, samples_per_chunk: 3, sample_description_index: 1 },
                SampleToChunkEntry { first_chunk: 3, samples_per_chunk: 2, sample_description_index: 1 },
            ],
            sample_sizes: SampleSizes::PerSample((1..=10u32).map(|n| n * 10).collect()),
            chunk_offsets: vec![1000, 2000, 3000, 4000],
            ..Default::default()
        }
    }

    #[test]
    fn chunk_samples_resolution() {
        let track = test_track();
        assert_eq!(
            track.chunk_samples(1).unwrap(),
            ChunkSamples { first_sample: 0, samples_per_chunk: 3, sample_description_index: 1 },
        );
        assert_eq!(track.chunk_samples(2).unwrap().first_sample, 3);
        assert_eq!(track.chunk_samples(3).unwrap().first_sample, 6);
        // The last run extrapolates.
        assert_eq!(track.chunk_samples(4).unwrap().first_sample, 8);
        assert_eq!(track.chunk_samples(4).unwrap().samples_per_chunk, 2);
    }

    #[test]
    fn chunk_offset_size_sums_sample_sizes() {
        let track = test_track();
        // Chunk 2 holds samples 3..6 (zero-based), sized 40+50+60.
        assert_eq!(track.chunk_offset_size(2), Some((2000, 150)));
        assert_eq!(track.chunk_offset_size(4), Some((4000, 90 + 100)));
        assert_eq!(track.chunk_offset_size(0), None);
        assert_eq!(track.chunk_offset_size(5), None);
    }

    #[test]
    fn sample_offset_size_walks_the_chunk() {
        let track = test_track();
        // Sample 5 (1-based) is the middle sample of chunk 2.
        assert_eq!(track.sample_offset_size(5), Some((2000 + 40, 50, 1)));
        assert_eq!(track.sample_offset_size(1), Some((1000, 10, 1)));
        assert_eq!(track.sample_offset_size(11), None);
    }

    #[test]
    fn constant_sample_sizes() {
        let sizes = SampleSizes::Constant { size: 64, count: 5 };
        assert_eq!(sizes.sample_count(), 5);
        assert_eq!(sizes.size_of(4), Some(64));
        assert_eq!(sizes.size_of(5), None);
    }

    #[test]
    fn empty_tables_resolve_to_none() {
        let track = TrackInfo::default();
        assert_eq!(track.chunk_samples(1), None);
        assert_eq!(track.chunk_offset_size(1), None);
    }
}
