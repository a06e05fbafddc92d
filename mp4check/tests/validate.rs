//! End-to-end validation tests over synthetic MP4 files built in memory.

use bytes::{BufMut, Bytes, BytesMut};
use mp4check::{validate, FindingKind, Severity, ValidationOutcome};

//
// box builders
//

fn mp4_box(name: &str, payload: &[u8]) -> Vec<u8> {
    let mut out = BytesMut::new();
    out.put_u32(8 + payload.len() as u32);
    out.put_slice(&fourcc(name));
    out.put_slice(payload);
    out.to_vec()
}

fn full_box(name: &str, version: u8, flags: u32, body: &[u8]) -> Vec<u8> {
    let mut payload = BytesMut::new();
    payload.put_u32(((version as u32) << 24) | (flags & 0x00ff_ffff));
    payload.put_slice(body);
    mp4_box(name, &payload)
}

fn fourcc(name: &str) -> [u8; 4] {
    let mut value = [b' '; 4];
    value[..name.len()].copy_from_slice(name.as_bytes());
    value
}

fn identity_matrix(out: &mut BytesMut) {
    let rows: [u32; 9] = [0x0001_0000, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000];
    for word in rows {
        out.put_u32(word);
    }
}

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

fn ftyp(major: &str, compatible: &[&str]) -> Vec<u8> {
    let mut payload = BytesMut::new();
    payload.put_slice(&fourcc(major));
    payload.put_u32(0);
    for brand in compatible {
        payload.put_slice(&fourcc(brand));
    }
    mp4_box("ftyp", &payload)
}

fn mvhd(timescale: u32, duration: u32) -> Vec<u8> {
    let mut body = BytesMut::new();
    body.put_u32(0); // creation time
    body.put_u32(0); // modification time
    body.put_u32(timescale);
    body.put_u32(duration);
    body.put_u32(0x0001_0000); // rate 1.0
    body.put_u16(0x0100); // volume 1.0
    body.put_u16(0);
    body.put_u32(0);
    body.put_u32(0);
    identity_matrix(&mut body);
    for _ in 0..6 {
        body.put_u32(0);
    }
    body.put_u32(2); // next track ID
    full_box("mvhd", 0, 0, &body)
}

fn tkhd(track_id: u32, duration: u32, volume: u16, width: u32, height: u32) -> Vec<u8> {
    let mut body = BytesMut::new();
    body.put_u32(0); // creation time
    body.put_u32(0); // modification time
    body.put_u32(track_id);
    body.put_u32(0);
    body.put_u32(duration);
    body.put_u32(0);
    body.put_u32(0);
    body.put_i16(0); // layer
    body.put_i16(0); // alternate group
    body.put_u16(volume);
    body.put_u16(0);
    identity_matrix(&mut body);
    body.put_u32(width);
    body.put_u32(height);
    full_box("tkhd", 0, 7, &body)
}

fn mdhd(timescale: u32, duration: u32) -> Vec<u8> {
    let mut body = BytesMut::new();
    body.put_u32(0);
    body.put_u32(0);
    body.put_u32(timescale);
    body.put_u32(duration);
    body.put_u16(0x55c4); // "und"
    body.put_u16(0);
    full_box("mdhd", 0, 0, &body)
}

fn hdlr(handler: &str, name: &str) -> Vec<u8> {
    let mut body = BytesMut::new();
    body.put_u32(0);
    body.put_slice(&fourcc(handler));
    body.put_u32(0);
    body.put_u32(0);
    body.put_u32(0);
    body.put_slice(name.as_bytes());
    body.put_u8(0);
    full_box("hdlr", 0, 0, &body)
}

fn smhd() -> Vec<u8> {
    full_box("smhd", 0, 0, &[0; 4])
}

fn vmhd() -> Vec<u8> {
    full_box("vmhd", 0, 1, &[0; 8])
}

fn dinf() -> Vec<u8> {
    let url = full_box("url ", 0, 1, &[]);
    let mut dref_body = BytesMut::new();
    dref_body.put_u32(1);
    dref_body.put_slice(&url);
    let dref = full_box("dref", 0, 0, &dref_body);
    mp4_box("dinf", &dref)
}

fn stts(entries: &[(u32, u32)]) -> Vec<u8> {
    let mut body = BytesMut::new();
    body.put_u32(entries.len() as u32);
    for (sample_count, sample_duration) in entries {
        body.put_u32(*sample_count);
        body.put_u32(*sample_duration);
    }
    full_box("stts", 0, 0, &body)
}

fn stsc(entries: &[(u32, u32, u32)]) -> Vec<u8> {
    let mut body = BytesMut::new();
    body.put_u32(entries.len() as u32);
    for (first_chunk, samples_per_chunk, description_index) in entries {
        body.put_u32(*first_chunk);
        body.put_u32(*samples_per_chunk);
        body.put_u32(*description_index);
    }
    full_box("stsc", 0, 0, &body)
}

fn stsz(sizes: &[u32]) -> Vec<u8> {
    let mut body = BytesMut::new();
    body.put_u32(0);
    body.put_u32(sizes.len() as u32);
    for size in sizes {
        body.put_u32(*size);
    }
    full_box("stsz", 0, 0, &body)
}

fn stco(offsets: &[u32]) -> Vec<u8> {
    let mut body = BytesMut::new();
    body.put_u32(offsets.len() as u32);
    for offset in offsets {
        body.put_u32(*offset);
    }
    full_box("stco", 0, 0, &body)
}

fn descriptor(tag: u8, body: &[u8]) -> Vec<u8> {
    assert!(body.len() < 0x80);
    let mut out = vec![tag, body.len() as u8];
    out.extend_from_slice(body);
    out
}

/// An AudioSpecificConfig for AAC-LC, 48 kHz, stereo.
fn aac_audio_specific_config() -> Vec<u8> {
    let mut bits = BitWriter::new();
    bits.put(2, 5); // AAC-LC
    bits.put(3, 4); // 48 kHz
    bits.put(2, 4); // stereo
    bits.put(0, 1); // frameLengthFlag
    bits.put(0, 1); // dependsOnCoreCoder
    bits.put(0, 1); // extensionFlag
    bits.finish()
}

fn esds_audio() -> Vec<u8> {
    let dec_specific = descriptor(0x05, &aac_audio_specific_config());

    let mut dec_config_body = BytesMut::new();
    dec_config_body.put_u8(0x40); // objectTypeIndication: MPEG-4 audio
    dec_config_body.put_u8((0x05 << 2) | 0b01); // streamType audio, upStream 0, reserved 1
    dec_config_body.put_slice(&[0, 0x10, 0]); // bufferSizeDB
    dec_config_body.put_u32(128_000); // maxBitrate
    dec_config_body.put_u32(128_000); // avgBitrate
    dec_config_body.put_slice(&dec_specific);
    let dec_config = descriptor(0x04, &dec_config_body);

    let sl_config = descriptor(0x06, &[0x02]);

    let mut es_body = BytesMut::new();
    es_body.put_u16(0); // ES_ID
    es_body.put_u8(0); // flags + streamPriority
    es_body.put_slice(&dec_config);
    es_body.put_slice(&sl_config);
    let es_descriptor = descriptor(0x03, &es_body);

    full_box("esds", 0, 0, &es_descriptor)
}

fn mp4a_entry(timescale: u32) -> Vec<u8> {
    let mut payload = BytesMut::new();
    payload.put_slice(&[0; 6]); // reserved
    payload.put_u16(1); // data reference index
    payload.put_i16(0); // version
    payload.put_i16(0); // revision
    payload.put_u32(0); // vendor
    payload.put_i16(2); // channels
    payload.put_i16(16); // sample size
    payload.put_i16(0); // compression id
    payload.put_i16(0); // packet size
    payload.put_u32(timescale << 16); // sample rate
    payload.put_slice(&esds_audio());
    mp4_box("mp4a", &payload)
}

fn avcc(length_size_minus_one: u8) -> Vec<u8> {
    // An empty parameter-set record: version, baseline profile (constraint_set0 set),
    // level 3.0, no SPS, no PPS.
    mp4_box("avcC", &[1, 66, 0x80, 30, 0xfc | length_size_minus_one, 0xe0, 0])
}

fn avc1_entry(length_size_minus_one: u8) -> Vec<u8> {
    let mut payload = BytesMut::new();
    payload.put_slice(&[0; 6]); // reserved
    payload.put_u16(1); // data reference index
    payload.put_i16(0); // version
    payload.put_i16(0); // revision
    payload.put_u32(0); // vendor
    payload.put_u32(0); // temporal quality
    payload.put_u32(0); // spatial quality
    payload.put_u16(320);
    payload.put_u16(240);
    payload.put_u32(72 << 16); // hRes
    payload.put_u32(72 << 16); // vRes
    payload.put_u32(0); // data size
    payload.put_u16(1); // frame count
    payload.put_slice(&[0; 32]); // compressor name
    payload.put_u16(24); // depth
    payload.put_i16(-1); // color table id
    payload.put_slice(&avcc(length_size_minus_one));
    mp4_box("avc1", &payload)
}

fn stsd(entry: &[u8]) -> Vec<u8> {
    let mut body = BytesMut::new();
    body.put_u32(1);
    body.put_slice(entry);
    full_box("stsd", 0, 0, &body)
}

fn stbl(entry: &[u8], stts_box: &[u8], stsz_box: &[u8], chunk_offsets: &[u32]) -> Vec<u8> {
    let mut payload = BytesMut::new();
    payload.put_slice(&stsd(entry));
    payload.put_slice(stts_box);
    payload.put_slice(&stsc(&[(1, 2, 1)]));
    payload.put_slice(stsz_box);
    payload.put_slice(&stco(chunk_offsets));
    mp4_box("stbl", &payload)
}

struct TrackSpec {
    handler: &'static str,
    media_header: Vec<u8>,
    tkhd_box: Vec<u8>,
    mdhd_box: Vec<u8>,
    entry: Vec<u8>,
    stts_box: Vec<u8>,
    stsz_box: Vec<u8>,
    chunk_offsets: Vec<u32>,
}

fn audio_track() -> TrackSpec {
    TrackSpec {
        handler: "soun",
        media_header: smhd(),
        tkhd_box: tkhd(1, 600, 0x0100, 0, 0),
        mdhd_box: mdhd(48000, 48000),
        entry: mp4a_entry(48000),
        stts_box: stts(&[(4, 12000)]),
        stsz_box: stsz(&[0x100; 4]),
        chunk_offsets: vec![32, 32 + 0x200],
    }
}

fn video_track(length_size_minus_one: u8) -> TrackSpec {
    TrackSpec {
        handler: "vide",
        media_header: vmhd(),
        tkhd_box: tkhd(1, 600, 0, 320 << 16, 240 << 16),
        mdhd_box: mdhd(600, 2400),
        entry: avc1_entry(length_size_minus_one),
        stts_box: stts(&[(4, 600)]),
        stsz_box: stsz(&[0x100; 4]),
        chunk_offsets: vec![32, 32 + 0x200],
    }
}

fn build_file(tracks: &[TrackSpec]) -> Bytes {
    let mut moov_payload = BytesMut::new();
    moov_payload.put_slice(&mvhd(600, 600));
    for track in tracks {
        let mut minf_payload = BytesMut::new();
        minf_payload.put_slice(&track.media_header);
        minf_payload.put_slice(&dinf());
        minf_payload.put_slice(&stbl(&track.entry, &track.stts_box, &track.stsz_box, &track.chunk_offsets));
        let minf = mp4_box("minf", &minf_payload);

        let mut mdia_payload = BytesMut::new();
        mdia_payload.put_slice(&track.mdhd_box);
        mdia_payload.put_slice(&hdlr(track.handler, "handler"));
        mdia_payload.put_slice(&minf);
        let mdia = mp4_box("mdia", &mdia_payload);

        let mut trak_payload = BytesMut::new();
        trak_payload.put_slice(&track.tkhd_box);
        trak_payload.put_slice(&mdia);
        moov_payload.put_slice(&mp4_box("trak", &trak_payload));
    }
    let moov = mp4_box("moov", &moov_payload);

    let mut file = BytesMut::new();
    file.put_slice(&ftyp("mp42", &["mp42", "isom"]));
    assert_eq!(file.len(), 24);
    file.put_slice(&mp4_box("mdat", &[0u8; 0x400]));
    file.put_slice(&moov);
    file.freeze()
}

fn errors(outcome: &ValidationOutcome) -> Vec<&mp4check::Finding> {
    outcome.with_severity(Severity::Error).collect()
}

//
// tests
//

#[test]
fn minimal_audio_file_is_clean() {
    let file = build_file(&[audio_track()]);
    let outcome = validate(&file).unwrap();
    assert!(errors(&outcome).is_empty(), "unexpected errors: {:?}", errors(&outcome));

    // The only expected warning is the missing object descriptor.
    assert!(outcome
        .with_severity(Severity::Warning)
        .all(|finding| finding.kind == FindingKind::Cardinality && finding.message.contains("iods")));
}

#[test]
fn minimal_video_file_is_clean() {
    let file = build_file(&[video_track(3)]);
    let outcome = validate(&file).unwrap();
    assert!(errors(&outcome).is_empty(), "unexpected errors: {:?}", errors(&outcome));
}

#[test]
fn moov_without_tracks_reports_cardinality_not_crash() {
    // Scenario: ftyp(major isom-compatible) + moov holding only an mvhd.
    let mut file = BytesMut::new();
    file.put_slice(&ftyp("mp42", &["mp42", "isom"]));
    file.put_slice(&mp4_box("moov", &mvhd(600, 600)));
    let file = file.freeze();

    let outcome = validate(&file).unwrap();
    let errors = errors(&outcome);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind, FindingKind::Cardinality);
    assert!(errors[0].message.contains("trak"));

    // The missing iods is the softer, warning-level cardinality finding.
    assert!(outcome
        .with_severity(Severity::Warning)
        .any(|finding| finding.kind == FindingKind::Cardinality && finding.message.contains("iods")));
}

#[test]
fn major_brand_missing_from_compatible_brands() {
    let mut track = audio_track();
    track.chunk_offsets = vec![28, 28 + 0x200]; // ftyp is 4 bytes shorter with one brand

    let mut moov_file = BytesMut::new();
    moov_file.put_slice(&ftyp("mp42", &["isom"]));
    assert_eq!(moov_file.len(), 20);

    // Rebuild the rest of the file around the shorter ftyp.
    let full = build_file(&[track]);
    moov_file.put_slice(&full[24..]);
    let file = moov_file.freeze();

    let outcome = validate(&file).unwrap();
    let errors = errors(&outcome);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("major brand"));
    assert!(errors[0].message.contains("compatible brands"));
}

#[test]
fn avcc_with_three_byte_nal_lengths() {
    // Scenario: an avcC whose lengthSizeMinusOne decodes to 2.
    let file = build_file(&[video_track(2)]);
    let outcome = validate(&file).unwrap();

    let errors = errors(&outcome);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind, FindingKind::FieldConstraint);
    assert!(errors[0].message.contains("1, 2 or 4"));
}

#[test]
fn stsz_and_stts_sample_count_mismatch() {
    // Scenario: stts declares 5 samples, stsz only 4.
    let mut track = audio_track();
    track.stts_box = stts(&[(5, 12000)]);
    track.mdhd_box = mdhd(48000, 60000);
    let file = build_file(&[track]);

    let outcome = validate(&file).unwrap();
    let errors = errors(&outcome);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("stsz"));
    assert!(errors[0].message.contains("stts"));
}

#[test]
fn ftyp_must_be_first() {
    let mut file = BytesMut::new();
    file.put_slice(&mp4_box("free", &[]));
    file.put_slice(&mp4_box("free", &[]));
    file.put_slice(&ftyp("mp42", &["mp42", "isom"]));
    file.put_slice(&mp4_box("moov", &mvhd(600, 600)));
    let file = file.freeze();

    let outcome = validate(&file).unwrap();
    assert!(outcome
        .findings
        .iter()
        .any(|finding| finding.severity == Severity::Error
            && finding.kind == FindingKind::Cardinality
            && finding.message.contains("must be first")));
}

#[test]
fn signature_box_before_ftyp_is_a_warning() {
    let mut file = BytesMut::new();
    file.put_slice(&mp4_box("free", &[]));
    file.put_slice(&ftyp("mp42", &["mp42", "isom"]));
    file.put_slice(&mp4_box("moov", &mvhd(600, 600)));
    let file = file.freeze();

    let outcome = validate(&file).unwrap();
    assert!(outcome
        .with_severity(Severity::Warning)
        .any(|finding| finding.message.contains("signature")));
    assert!(!outcome
        .findings
        .iter()
        .any(|finding| finding.severity == Severity::Error && finding.message.contains("must be first")));
}

#[test]
fn unknown_top_level_box_is_a_warning() {
    let mut file = BytesMut::new();
    file.put_slice(&ftyp("mp42", &["mp42", "isom"]));
    file.put_slice(&mp4_box("zzzz", &[0; 16]));
    file.put_slice(&mp4_box("moov", &mvhd(600, 600)));
    let file = file.freeze();

    let outcome = validate(&file).unwrap();
    assert!(outcome
        .with_severity(Severity::Warning)
        .any(|finding| finding.kind == FindingKind::UnknownBox && finding.message.contains("zzzz")));
}

#[test]
fn multiple_moov_boxes_are_one_cardinality_error() {
    let mut file = BytesMut::new();
    file.put_slice(&ftyp("mp42", &["mp42", "isom"]));
    file.put_slice(&mp4_box("moov", &mvhd(600, 600)));
    file.put_slice(&mp4_box("moov", &mvhd(600, 600)));
    let file = file.freeze();

    let outcome = validate(&file).unwrap();
    let multiple: Vec<_> = outcome
        .findings
        .iter()
        .filter(|finding| finding.message.contains("multiple `moov`"))
        .collect();
    assert_eq!(multiple.len(), 1);
}

#[test]
fn overlapping_tracks_of_same_type_error() {
    let mut first = audio_track();
    let mut second = audio_track();
    second.tkhd_box = tkhd(2, 600, 0x0100, 0, 0);
    // Both tracks claim the same byte range.
    first.chunk_offsets = vec![32, 32 + 0x200];
    second.chunk_offsets = vec![32 + 0x100, 32 + 0x300];

    let file = build_file(&[first, second]);
    let outcome = validate(&file).unwrap();
    assert!(outcome
        .findings
        .iter()
        .any(|finding| finding.kind == FindingKind::ChunkOverlap && finding.severity == Severity::Error));
}

#[test]
fn truncated_moov_is_fatal() {
    let mut file = BytesMut::new();
    file.put_slice(&ftyp("mp42", &["mp42", "isom"]));
    let moov = mp4_box("moov", &mvhd(600, 600));
    file.put_slice(&moov[..moov.len() - 20]); // declared size overruns the file
    let file = file.freeze();

    validate(&file).unwrap_err();
}
