//! The generic box-tree walking engine: sibling resolution, per-type dispatch with cardinality
//! and ordering policies, and the validation context threaded through every validator.

use std::fmt;

use bitflags::bitflags;
use bytes::Bytes;

use crate::diag::{Diagnostics, FindingKind};
use crate::error::{ParseError, Report, Result, ResultExt, WhileParsingBox};
use crate::parse::{resolve_box_list, BoxHeader, BoxType, FourCC, FullBoxHeader};
use crate::source::ByteSource;
use crate::track::MovieInfo;
use crate::Config;

bitflags! {
    /// Cardinality and ordering rules enforced by [`validate_children`].
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct BoxPolicy: u32 {
        /// At least one box of the type must be present.
        const MUST_HAVE_ONE = 1 << 0;
        /// At most one box of the type may be present.
        const AT_MOST_ONE = 1 << 1;
        /// The box must be the first of its siblings.
        const MUST_BE_FIRST = 1 << 2;
    }
}

bitflags! {
    /// Per-sibling lifecycle state.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct BoxFlags: u32 {
        /// The box has been visited by a validator.
        const VALIDATED = 1 << 0;
        /// The box is hidden from the current dispatch pass.
        const SKIP = 1 << 1;
    }
}

impl BoxPolicy {
    /// Exactly one box of the type must be present.
    pub const EXACTLY_ONE: Self = Self::MUST_HAVE_ONE.union(Self::AT_MOST_ONE);
}

/// One sibling box as seen by the dispatcher: its header plus walk state.
#[derive(Clone, Debug)]
pub struct BoxRef {
    /// The resolved box header.
    pub header: BoxHeader,
    /// Lifecycle flags.
    pub flags: BoxFlags,
    /// When set, validators receive this track's record instead of the ambient one; used to
    /// point each `trak` box at its own track info.
    pub track: Option<usize>,
}

impl BoxRef {
    /// Wrap a resolved header with fresh walk state.
    pub fn new(header: BoxHeader) -> Self {
        Self { header, flags: BoxFlags::empty(), track: None }
    }
}

/// All mutable state of one validation run.
///
/// Owned by the top-level entry point and passed by reference through every validator; nothing
/// is stored statically, so concurrent runs over different files are safe.
pub struct ValidationContext<'a> {
    /// The input being validated.
    pub source: &'a dyn ByteSource,
    /// Run configuration.
    pub config: &'a Config,
    /// The findings sink and current box path.
    pub diags: Diagnostics,
    /// Movie state, present while a `moov` box is being validated.
    pub movie: Option<MovieInfo>,
    /// The file's major brand, recorded by the `ftyp` validator.
    pub major_brand: Option<FourCC>,
    /// The visual profile-level indication recorded from the video track's decoder config, for
    /// the cross-check against the `iods` declaration.
    pub visual_profile_level: Option<u8>,
}

impl<'a> ValidationContext<'a> {
    /// Create a context for one run over `source`.
    pub fn new(source: &'a dyn ByteSource, config: &'a Config) -> Self {
        Self {
            source,
            config,
            diags: Diagnostics::default(),
            movie: None,
            major_brand: None,
            visual_profile_level: None,
        }
    }

    /// Record an error finding at the current box path.
    pub fn error(&mut self, kind: FindingKind, message: impl Into<String>) {
        self.diags.error(kind, message);
    }

    /// Record a warning finding at the current box path.
    pub fn warning(&mut self, kind: FindingKind, message: impl Into<String>) {
        self.diags.warning(kind, message);
    }

    /// Emit a line of the box trace, indented to the current depth.
    pub fn trace(&self, args: fmt::Arguments<'_>) {
        log::debug!("{:indent$}{args}", "", indent = self.diags.depth() * 2);
    }

    /// Read the full payload of a box (excluding its header) into memory.
    pub fn read_payload(&self, header: &BoxHeader) -> Result<Bytes> {
        ensure_attach!(
            header.payload_len() <= self.config.max_payload_size,
            ParseError::InvalidInput,
            PayloadTooLarge(header.payload_len(), self.config.max_payload_size),
            WhileParsingBox(header.box_type),
        );
        let (min_offset, max_offset) = header.payload_range();
        self.source
            .read_at(min_offset, max_offset - min_offset)
            .attach_printable(WhileParsingBox(header.box_type))
    }

    /// Read a full box's version/flags header and return it along with the remaining payload.
    pub fn read_full_box(&self, header: &BoxHeader) -> Result<(FullBoxHeader, Bytes)> {
        let mut payload = self.read_payload(header)?;
        let full = FullBoxHeader::parse(&mut payload).while_parsing_box(header.box_type)?;
        Ok((full, payload))
    }

    /// The track record a box's validator should operate on, per its context override.
    pub fn track_mut(&mut self, boxref: &BoxRef) -> Option<&mut crate::track::TrackInfo> {
        let index = boxref.track?;
        self.movie.as_mut()?.tracks.get_mut(index)
    }

    /// Resolve the children of `header` into a dispatchable sibling list.
    pub fn resolve_children(&self, header: &BoxHeader) -> Result<Vec<BoxRef>> {
        let (min_offset, max_offset) = header.payload_range();
        let headers = resolve_box_list(self.source, min_offset, max_offset)
            .attach_printable(WhileParsingBox(header.box_type))?;
        Ok(headers.into_iter().map(BoxRef::new).collect())
    }
}

/// Validate every not-yet-validated sibling of type `expected` with `validator`, enforcing
/// `policy`.
///
/// Matching boxes are visited in file order; a validator error becomes the returned error
/// ("first error wins") but never stops the scan, so one run surfaces as many diagnostics as
/// possible. Visited boxes are marked [`BoxFlags::VALIDATED`]; boxes flagged
/// [`BoxFlags::SKIP`] are invisible to this pass.
pub fn validate_children<'a, F>(
    ctx: &mut ValidationContext<'a>,
    boxes: &mut [BoxRef],
    expected: BoxType,
    policy: BoxPolicy,
    mut validator: F,
) -> Result<()>
where
    F: FnMut(&mut ValidationContext<'a>, &BoxRef) -> Result<()>,
{
    let mut first_err: Option<Report> = None;
    let mut match_count: u32 = 0;

    for index in 0..boxes.len() {
        if boxes[index].flags.intersects(BoxFlags::VALIDATED | BoxFlags::SKIP) {
            continue;
        }
        if !type_matches(boxes[index].header.box_type, expected) {
            continue;
        }

        match_count += 1;

        if policy.contains(BoxPolicy::MUST_BE_FIRST) && index > 0 {
            if index == 1 {
                ctx.warning(
                    FindingKind::Cardinality,
                    format!(
                        "box `{}` before `{expected}` must be a signature box",
                        boxes[0].header.box_type
                    ),
                );
            } else {
                ctx.error(
                    FindingKind::Cardinality,
                    format!("box `{expected}` must be first but is at position {}", index + 1),
                );
            }
        }

        ctx.diags.push_path(expected, match_count);
        ctx.trace(format_args!("<{expected}>"));
        let result = validator(ctx, &boxes[index]);
        ctx.trace(format_args!("</{expected}>"));
        ctx.diags.pop_path();

        boxes[index].flags |= BoxFlags::VALIDATED;

        if let Err(err) = result {
            if first_err.is_none() {
                first_err = Some(err);
            }
        }
    }

    if policy.contains(BoxPolicy::MUST_HAVE_ONE) && match_count == 0 {
        // A missing object descriptor is common enough in practice that the original tooling
        // only warns about it.
        if expected == BoxType::IODS {
            ctx.warning(FindingKind::Cardinality, format!("no `{expected}` box"));
        } else {
            ctx.error(FindingKind::Cardinality, format!("no `{expected}` box"));
        }
    }
    if policy.contains(BoxPolicy::AT_MOST_ONE) && match_count > 1 {
        ctx.error(FindingKind::Cardinality, format!("multiple `{expected}` boxes not allowed"));
    }

    first_err.map_or(Ok(()), Err)
}

/// Warn about every sibling no registered type matched, excluding the `ignored` types.
///
/// The set of known children differs per parent box type, so this is the parent validator's
/// responsibility, invoked after all its `validate_children` calls.
pub fn report_unknown_children(
    ctx: &mut ValidationContext<'_>,
    boxes: &[BoxRef],
    parent_desc: &str,
    ignored: &[BoxType],
) {
    for boxref in boxes {
        if boxref.flags.contains(BoxFlags::VALIDATED) {
            continue;
        }
        if ignored.iter().any(|ignore| type_matches(boxref.header.box_type, *ignore)) {
            continue;
        }
        ctx.warning(
            FindingKind::UnknownBox,
            format!("unknown {parent_desc} box `{}`", boxref.header.box_type),
        );
    }
}

#[derive(Clone, Copy, Debug, derive_more::Display)]
#[display(fmt = "box payload of {} bytes exceeds the configured maximum of {}", _0, _1)]
struct PayloadTooLarge(u64, u64);

/// `uuid` boxes match the generic `uuid` type regardless of their extended identifier.
fn type_matches(actual: BoxType, expected: BoxType) -> bool {
    if expected == BoxType::UUID {
        matches!(actual, BoxType::Uuid(_))
    } else {
        actual == expected
    }
}

#[cfg(test)]
mod test {
    use crate::diag::Severity;
    use crate::parse::box_type;

    use super::*;

    fn test_box(box_type: BoxType, offset: u64) -> BoxRef {
        BoxRef::new(BoxHeader { offset, size: 8, header_len: 8, box_type })
    }

    fn test_ctx<'a>(source: &'a Bytes, config: &'a Config) -> ValidationContext<'a> {
        ValidationContext::new(source, config)
    }

    fn cardinality_findings(ctx: &ValidationContext<'_>) -> usize {
        ctx.diags
            .findings()
            .iter()
            .filter(|finding| finding.kind == FindingKind::Cardinality && finding.severity == Severity::Error)
            .count()
    }

    #[test]
    fn exactly_one_on_empty_list_records_one_violation_and_no_calls() {
        let source = Bytes::new();
        let config = Config::default();
        let mut ctx = test_ctx(&source, &config);
        let mut boxes = vec![];
        let mut calls = 0;

        validate_children(&mut ctx, &mut boxes, box_type::MVHD, BoxPolicy::EXACTLY_ONE, |_, _| {
            calls += 1;
            Ok(())
        })
        .unwrap();

        assert_eq!(calls, 0);
        assert_eq!(cardinality_findings(&ctx), 1);
    }

    #[test]
    fn at_most_one_with_three_matches_visits_all_three() {
        let source = Bytes::new();
        let config = Config::default();
        let mut ctx = test_ctx(&source, &config);
        let mut boxes = vec![
            test_box(box_type::ELST, 0),
            test_box(box_type::ELST, 8),
            test_box(box_type::ELST, 16),
        ];
        let mut calls = 0;

        validate_children(&mut ctx, &mut boxes, box_type::ELST, BoxPolicy::AT_MOST_ONE, |_, _| {
            calls += 1;
            Ok(())
        })
        .unwrap();

        assert_eq!(calls, 3);
        assert_eq!(cardinality_findings(&ctx), 1);
        assert!(boxes.iter().all(|b| b.flags.contains(BoxFlags::VALIDATED)));
    }

    #[test]
    fn skip_flag_hides_boxes_from_a_pass() {
        let source = Bytes::new();
        let config = Config::default();
        let mut ctx = test_ctx(&source, &config);
        let mut boxes = vec![test_box(box_type::TRAK, 0), test_box(box_type::TRAK, 8)];
        boxes[1].flags |= BoxFlags::SKIP;

        let mut visited = vec![];
        validate_children(&mut ctx, &mut boxes, box_type::TRAK, BoxPolicy::empty(), |_, b| {
            visited.push(b.header.offset);
            Ok(())
        })
        .unwrap();
        assert_eq!(visited, [0]);

        // Second pass over the same list with the flag cleared picks up only the deferred box.
        boxes[1].flags -= BoxFlags::SKIP;
        let mut visited = vec![];
        validate_children(&mut ctx, &mut boxes, box_type::TRAK, BoxPolicy::empty(), |_, b| {
            visited.push(b.header.offset);
            Ok(())
        })
        .unwrap();
        assert_eq!(visited, [8]);
    }

    #[test]
    fn must_be_first_position_one_is_lenient() {
        let source = Bytes::new();
        let config = Config::default();
        let mut ctx = test_ctx(&source, &config);
        let mut boxes = vec![test_box(box_type::FREE, 0), test_box(box_type::FTYP, 8)];

        validate_children(&mut ctx, &mut boxes, box_type::FTYP, BoxPolicy::MUST_BE_FIRST, |_, _| Ok(()))
            .unwrap();

        assert!(!ctx.diags.has_errors());
        assert_eq!(ctx.diags.findings().len(), 1);
        assert_eq!(ctx.diags.findings()[0].severity, Severity::Warning);
    }

    #[test]
    fn first_error_wins_but_all_siblings_are_visited() {
        let source = Bytes::new();
        let config = Config::default();
        let mut ctx = test_ctx(&source, &config);
        let mut boxes = vec![test_box(box_type::STTS, 0), test_box(box_type::STTS, 8)];

        let mut calls = 0;
        let result = validate_children(&mut ctx, &mut boxes, box_type::STTS, BoxPolicy::empty(), |_, b| {
            calls += 1;
            if b.header.offset == 0 {
                bail_attach!(ParseError::TruncatedFile, "first");
            }
            Ok(())
        });

        assert_eq!(calls, 2);
        assert_eq!(result.unwrap_err().into_inner(), ParseError::TruncatedFile);
    }

    #[test]
    fn missing_iods_is_a_warning() {
        let source = Bytes::new();
        let config = Config::default();
        let mut ctx = test_ctx(&source, &config);
        let mut boxes = vec![];

        validate_children(&mut ctx, &mut boxes, box_type::IODS, BoxPolicy::EXACTLY_ONE, |_, _| Ok(()))
            .unwrap();

        assert!(!ctx.diags.has_errors());
        assert_eq!(ctx.diags.findings().len(), 1);
    }
}
