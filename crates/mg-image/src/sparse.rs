use crate::color::Color;
use crate::dense::{DenseImage, DensePayload};
use crate::error::ImageError;
use crate::region::{union_or_gap, Region};
use crate::storage::DenseBuffer;
use crate::viewport::Viewport;

/// A `(background_count, foreground_count)` pair; a sparse image's region is
/// a concatenation of these.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunLength {
    pub background: u32,
    pub foreground: u32,
}

impl RunLength {
    pub fn total(&self) -> usize {
        (self.background + self.foreground) as usize
    }
}

/// The background color (and, for the color+depth discipline, depth) every
/// run's background pixels are understood to hold.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BackgroundTemplate {
    ColorOnly(Color),
    ColorDepth(Color, f32),
}

/// A sparse wrapper over either color discipline: a shared run-length
/// sequence partitioning the region into alternating background/foreground
/// runs, a shared dense buffer holding only the foreground ("active")
/// pixels in order, and the background template.
#[derive(Clone)]
pub struct SparseImage {
    pub width: u32,
    pub height: u32,
    pub region: Region,
    pub viewport: Viewport,
    runs: DenseBuffer<RunLength>,
    run_count: usize,
    dense: DensePayload,
    active_count: usize,
    pub background: BackgroundTemplate,
}

impl SparseImage {
    pub fn new_cleared(
        width: u32,
        height: u32,
        region: Region,
        viewport: Viewport,
        background: BackgroundTemplate,
    ) -> Self {
        let dense = match background {
            BackgroundTemplate::ColorOnly(_) => {
                DensePayload::ColorOnly { colors: DenseBuffer::from_vec(vec![]) }
            }
            BackgroundTemplate::ColorDepth(..) => DensePayload::ColorDepth {
                colors: DenseBuffer::from_vec(vec![]),
                depths: DenseBuffer::from_vec(vec![]),
            },
        };
        SparseImage {
            width,
            height,
            region,
            viewport,
            runs: DenseBuffer::from_vec(vec![RunLength { background: region.len() as u32, foreground: 0 }]),
            run_count: 1,
            dense,
            active_count: 0,
            background,
        }
    }

    /// Pre-sizes receive-side storage to the resource policy's upper bound:
    /// `(pixels/2)+1` runs and `pixels` active entries (§5).
    pub fn preallocate_for_receive(
        width: u32,
        height: u32,
        region: Region,
        viewport: Viewport,
        background: BackgroundTemplate,
    ) -> Self {
        let pixels = region.len();
        let max_runs = pixels / 2 + 1;
        let dense = match background {
            BackgroundTemplate::ColorOnly(_) => DensePayload::ColorOnly {
                colors: DenseBuffer::from_vec(vec![Color::default(); pixels]),
            },
            BackgroundTemplate::ColorDepth(..) => DensePayload::ColorDepth {
                colors: DenseBuffer::from_vec(vec![Color::default(); pixels]),
                depths: DenseBuffer::from_vec(vec![0.0; pixels]),
            },
        };
        SparseImage {
            width,
            height,
            region,
            viewport,
            runs: DenseBuffer::from_vec(vec![RunLength::default(); max_runs]),
            run_count: 0,
            dense,
            active_count: 0,
            background,
        }
    }

    pub fn is_color_only(&self) -> bool {
        matches!(self.dense, DensePayload::ColorOnly { .. })
    }

    pub fn blend_is_order_dependent(&self) -> bool {
        self.is_color_only()
    }

    pub fn variant_name(&self) -> &'static str {
        if self.is_color_only() { "sparse-color-only" } else { "sparse-color-depth" }
    }

    pub fn runs(&self) -> &[RunLength] {
        self.runs.as_slice(self.run_count)
    }

    pub fn run_count(&self) -> usize {
        self.run_count
    }

    pub fn number_of_active_pixels(&self) -> usize {
        self.active_count
    }

    pub fn active_colors(&self) -> &[Color] {
        match &self.dense {
            DensePayload::ColorOnly { colors } => colors.as_slice(self.active_count),
            DensePayload::ColorDepth { colors, .. } => colors.as_slice(self.active_count),
        }
    }

    pub fn active_depths(&self) -> Option<&[f32]> {
        match &self.dense {
            DensePayload::ColorOnly { .. } => None,
            DensePayload::ColorDepth { depths, .. } => Some(depths.as_slice(self.active_count)),
        }
    }

    fn background_color(&self) -> Color {
        match self.background {
            BackgroundTemplate::ColorOnly(c) => c,
            BackgroundTemplate::ColorDepth(c, _) => c,
        }
    }

    fn background_depth(&self) -> f32 {
        match self.background {
            BackgroundTemplate::ColorDepth(_, d) => d,
            BackgroundTemplate::ColorOnly(_) => f32::INFINITY,
        }
    }

    /// Directly assign already-known run-lengths and active-pixel counts,
    /// e.g. after a receive has written into pre-allocated storage. Callers
    /// must then call [`SparseImage::shrink`].
    pub fn set_counts(&mut self, run_count: usize, active_count: usize) {
        self.run_count = run_count;
        self.active_count = active_count;
    }

    pub fn runs_mut(&mut self, len: usize) -> &mut [RunLength] {
        self.runs.make_mut(len)
    }

    pub fn active_colors_mut(&mut self, len: usize) -> &mut [Color] {
        match &mut self.dense {
            DensePayload::ColorOnly { colors } => colors.make_mut(len),
            DensePayload::ColorDepth { colors, .. } => colors.make_mut(len),
        }
    }

    pub fn active_depths_mut(&mut self, len: usize) -> &mut [f32] {
        match &mut self.dense {
            DensePayload::ColorOnly { .. } => panic!("active_depths_mut: color-only sparse image has no depth buffer"),
            DensePayload::ColorDepth { depths, .. } => depths.make_mut(len),
        }
    }

    /// Drops trailing over-allocation so every buffer's physical length
    /// matches its logical count (§3.1 invariants, §5 "dynamic buffer growth").
    pub fn shrink(&mut self) {
        self.runs.make_mut(self.run_count);
        match &mut self.dense {
            DensePayload::ColorOnly { colors } => {
                colors.make_mut(self.active_count);
            }
            DensePayload::ColorDepth { colors, depths } => {
                colors.make_mut(self.active_count);
                depths.make_mut(self.active_count);
            }
        }
    }

    /// Collapses to a single `(bg=N, fg=0)` run, capturing `background` as
    /// the new template.
    pub fn clear(&mut self, background: BackgroundTemplate) {
        *self = SparseImage::new_cleared(self.width, self.height, self.region, self.viewport, background);
    }

    /// §4.1.1: advance through `self`'s runs to find the run-length
    /// sub-sequence and active-pixel sub-range for `[a, b)`, without
    /// touching the pixel buffer itself.
    fn subrange_runs(&self, a: usize, b: usize) -> (Vec<RunLength>, usize, usize) {
        let alpha_a = active_pixels_before(self.runs(), a);
        let alpha_b = active_pixels_before(self.runs(), b);
        let mut out = Vec::new();
        let mut pos = 0usize;
        for run in self.runs() {
            let run_start = pos;
            let run_end = pos + run.total();
            let split = run_start + run.background as usize;
            let clip_start = run_start.max(a);
            let clip_end = run_end.min(b);
            if clip_start < clip_end {
                let bg_start = clip_start.max(run_start);
                let bg_end = clip_end.min(split);
                let bg_amount = bg_end.saturating_sub(bg_start);
                let fg_start = clip_start.max(split);
                let fg_end = clip_end.min(run_end);
                let fg_amount = fg_end.saturating_sub(fg_start);
                if bg_amount + fg_amount > 0 {
                    out.push(RunLength { background: bg_amount as u32, foreground: fg_amount as u32 });
                }
            }
            pos = run_end;
            if pos >= b {
                break;
            }
        }
        (out, alpha_a, alpha_b)
    }

    pub fn window(&self, a: usize, b: usize) -> SparseImage {
        assert!(a <= b && b <= self.region.len());
        let (runs, alpha_a, alpha_b) = self.subrange_runs(a, b);
        let region = Region::new(self.region.begin + a, self.region.begin + b);
        let run_count = runs.len();
        let active_count = alpha_b - alpha_a;
        let dense = match &self.dense {
            DensePayload::ColorOnly { colors } => DensePayload::ColorOnly { colors: colors.window(alpha_a) },
            DensePayload::ColorDepth { colors, depths } => {
                DensePayload::ColorDepth { colors: colors.window(alpha_a), depths: depths.window(alpha_a) }
            }
        };
        SparseImage {
            width: self.width,
            height: self.height,
            region,
            viewport: self.viewport,
            runs: DenseBuffer::from_vec(runs),
            run_count,
            dense,
            active_count,
            background: self.background,
        }
    }

    pub fn copy_subrange(&self, a: usize, b: usize) -> SparseImage {
        let mut img = self.window(a, b);
        let active_count = img.active_count;
        img.dense = match &img.dense {
            DensePayload::ColorOnly { colors } => {
                DensePayload::ColorOnly { colors: colors.copy_subrange(active_count) }
            }
            DensePayload::ColorDepth { colors, depths } => DensePayload::ColorDepth {
                colors: colors.copy_subrange(active_count),
                depths: depths.copy_subrange(active_count),
            },
        };
        img
    }

    /// Re-expands to a fully dense image, honoring original_source's
    /// `ImageSparse::uncompress`.
    pub fn uncompress(&self) -> DenseImage {
        let (colors, depths, _active) = self.expand_samples();
        let payload = match depths {
            Some(depths) => DensePayload::ColorDepth {
                colors: DenseBuffer::from_vec(colors),
                depths: DenseBuffer::from_vec(depths),
            },
            None => DensePayload::ColorOnly { colors: DenseBuffer::from_vec(colors) },
        };
        DenseImage { width: self.width, height: self.height, region: self.region, viewport: self.viewport, payload }
    }

    /// `Image::compress`'s counterpart (named after `ImageFull::compress` in
    /// original_source/Common/ImageFull.hpp): background-colored runs are
    /// detected by exact equality with `background`.
    pub fn compress(dense: &DenseImage, background: BackgroundTemplate) -> SparseImage {
        let len = dense.region.len();
        let colors = dense.colors();
        let depths = dense.depths();
        let active: Vec<bool> = (0..len)
            .map(|i| {
                let bg = match (&background, depths) {
                    (BackgroundTemplate::ColorOnly(c), None) => colors[i] == *c,
                    (BackgroundTemplate::ColorDepth(c, d), Some(depths)) => colors[i] == *c && depths[i] == *d,
                    _ => false,
                };
                !bg
            })
            .collect();
        build_from_samples(
            dense.width,
            dense.height,
            dense.region,
            dense.viewport,
            colors,
            depths,
            &active,
            background,
        )
    }

    fn expand_samples(&self) -> (Vec<Color>, Option<Vec<f32>>, Vec<bool>) {
        let len = self.region.len();
        let mut colors = Vec::with_capacity(len);
        let mut depths = if self.is_color_only() { None } else { Some(Vec::with_capacity(len)) };
        let mut active = Vec::with_capacity(len);
        let active_colors = self.active_colors();
        let active_depths = self.active_depths();
        let mut ai = 0usize;
        for run in self.runs() {
            for _ in 0..run.background {
                colors.push(self.background_color());
                if let Some(d) = depths.as_mut() {
                    d.push(self.background_depth());
                }
                active.push(false);
            }
            for _ in 0..run.foreground {
                colors.push(active_colors[ai]);
                if let Some(d) = depths.as_mut() {
                    d.push(active_depths.expect("color-depth image must carry active depths")[ai]);
                }
                ai += 1;
                active.push(true);
            }
        }
        (colors, depths, active)
    }

    /// §4.1.2: walks `self.runs()` and `other.runs()` in lockstep, emitting
    /// merged runs directly. Non-overlapping leading/trailing zones (when
    /// the two regions don't line up) are appended wholesale from whichever
    /// side covers them via [`window`](SparseImage::window) + the existing
    /// run-boundary walk; only the genuinely shared zone is stepped through
    /// pixel by pixel, and only its fg-fg stretches ever touch both active
    /// buffers at once.
    pub fn blend(&self, other: &SparseImage) -> Result<SparseImage, ImageError> {
        let color_only = match (self.is_color_only(), other.is_color_only()) {
            (true, true) => true,
            (false, false) => false,
            _ => {
                return Err(ImageError::BlendTypeMismatch { left: self.variant_name(), right: other.variant_name() })
            }
        };
        if color_only && self.region != other.region {
            return Err(ImageError::BlendRegionGap { left_end: self.region.end, right_begin: other.region.begin });
        }
        let union = union_or_gap(self.region, other.region)?;

        let s = self.region;
        let o = other.region;
        let overlap_begin = s.begin.max(o.begin);
        let overlap_end = s.end.min(o.end);
        let has_overlap = overlap_begin < overlap_end;

        let cap = (self.active_count + other.active_count).min(union.len());
        let mut runs_out: Vec<RunLength> = Vec::new();
        let mut colors_out: Vec<Color> = Vec::with_capacity(cap);
        let mut depths_out: Option<Vec<f32>> = if color_only { None } else { Some(Vec::with_capacity(cap)) };

        if s.begin < o.begin {
            let end = overlap_begin.min(s.end);
            let zone = self.window(0, end - s.begin);
            append_side_zone(&zone, &mut runs_out, &mut colors_out, &mut depths_out);
        } else if o.begin < s.begin {
            let end = overlap_begin.min(o.end);
            let zone = other.window(0, end - o.begin);
            append_side_zone(&zone, &mut runs_out, &mut colors_out, &mut depths_out);
        }

        if has_overlap {
            let self_zone = self.window(overlap_begin - s.begin, overlap_end - s.begin);
            let other_zone = other.window(overlap_begin - o.begin, overlap_end - o.begin);
            let self_colors = self_zone.active_colors();
            let self_depths = self_zone.active_depths();
            let other_colors = other_zone.active_colors();
            let other_depths = other_zone.active_depths();

            let mut sc = Cursor::new(self_zone.runs());
            let mut oc = Cursor::new(other_zone.runs());
            let total = overlap_end - overlap_begin;
            let mut processed = 0usize;
            while processed < total {
                let step = sc.remaining.min(oc.remaining);
                match (sc.is_active(), oc.is_active()) {
                    (false, false) => push_run(&mut runs_out, RunLength { background: step as u32, foreground: 0 }),
                    (true, false) => {
                        push_run(&mut runs_out, RunLength { background: 0, foreground: step as u32 });
                        colors_out.extend_from_slice(&self_colors[sc.active_pos..sc.active_pos + step]);
                        if let (Some(out), Some(src)) = (depths_out.as_mut(), self_depths) {
                            out.extend_from_slice(&src[sc.active_pos..sc.active_pos + step]);
                        }
                    }
                    (false, true) => {
                        push_run(&mut runs_out, RunLength { background: 0, foreground: step as u32 });
                        colors_out.extend_from_slice(&other_colors[oc.active_pos..oc.active_pos + step]);
                        if let (Some(out), Some(src)) = (depths_out.as_mut(), other_depths) {
                            out.extend_from_slice(&src[oc.active_pos..oc.active_pos + step]);
                        }
                    }
                    (true, true) => {
                        push_run(&mut runs_out, RunLength { background: 0, foreground: step as u32 });
                        for k in 0..step {
                            let si = sc.active_pos + k;
                            let oi = oc.active_pos + k;
                            if color_only {
                                colors_out.push(self_colors[si].over(other_colors[oi]));
                            } else {
                                let sd = self_depths.expect("color-depth zone carries depths")[si];
                                let od = other_depths.expect("color-depth zone carries depths")[oi];
                                if sd <= od {
                                    colors_out.push(self_colors[si]);
                                } else {
                                    colors_out.push(other_colors[oi]);
                                }
                                depths_out.as_mut().unwrap().push(if sd <= od { sd } else { od });
                            }
                        }
                    }
                }
                sc.consume(step);
                oc.consume(step);
                processed += step;
            }
        }

        if s.end > o.end {
            let begin = overlap_end.max(s.begin);
            let zone = self.window(begin - s.begin, s.end - s.begin);
            append_side_zone(&zone, &mut runs_out, &mut colors_out, &mut depths_out);
        } else if o.end > s.end {
            let begin = overlap_end.max(o.begin);
            let zone = other.window(begin - o.begin, o.end - o.begin);
            append_side_zone(&zone, &mut runs_out, &mut colors_out, &mut depths_out);
        }

        let run_count = runs_out.len();
        let active_count = colors_out.len();
        let dense = match depths_out {
            Some(depths) => {
                DensePayload::ColorDepth { colors: DenseBuffer::from_vec(colors_out), depths: DenseBuffer::from_vec(depths) }
            }
            None => DensePayload::ColorOnly { colors: DenseBuffer::from_vec(colors_out) },
        };
        Ok(SparseImage {
            width: self.width,
            height: self.height,
            region: union,
            viewport: self.viewport.union(other.viewport),
            runs: DenseBuffer::from_vec(runs_out),
            run_count,
            dense,
            active_count,
            background: self.background,
        })
    }
}

/// Appends `run` to `out`, merging into a trailing pure-background run
/// rather than starting a new entry (a `RunLength` is always
/// background-then-foreground, so extending one that has no foreground yet
/// just grows its background count before carrying over `run`'s own
/// foreground). Drops zero-length runs entirely.
fn push_run(out: &mut Vec<RunLength>, run: RunLength) {
    if run.total() == 0 {
        return;
    }
    if let Some(last) = out.last_mut() {
        if last.foreground == 0 {
            last.background += run.background;
            last.foreground = run.foreground;
            return;
        }
    }
    out.push(run);
}

/// Appends a zone covered by only one operand: its runs merge in as-is and
/// its active pixels copy over in bulk, with no per-pixel blending.
fn append_side_zone(
    zone: &SparseImage,
    runs_out: &mut Vec<RunLength>,
    colors_out: &mut Vec<Color>,
    depths_out: &mut Option<Vec<f32>>,
) {
    for &run in zone.runs() {
        push_run(runs_out, run);
    }
    colors_out.extend_from_slice(zone.active_colors());
    if let (Some(out), Some(src)) = (depths_out.as_mut(), zone.active_depths()) {
        out.extend_from_slice(src);
    }
}

/// Walks one side's run-length sequence pixel position by pixel position,
/// tracking which active-buffer index the cursor is currently at. Used to
/// step `blend`'s two operands through their shared zone in lockstep.
struct Cursor<'a> {
    runs: &'a [RunLength],
    run_idx: usize,
    /// `false` while consuming the current run's background pixels, `true`
    /// once into its foreground pixels.
    active_phase: bool,
    remaining: usize,
    active_pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(runs: &'a [RunLength]) -> Self {
        let mut cursor = Cursor { runs, run_idx: 0, active_phase: false, remaining: 0, active_pos: 0 };
        cursor.load_phase();
        cursor.skip_empty_phases();
        cursor
    }

    fn load_phase(&mut self) {
        self.remaining = match self.runs.get(self.run_idx) {
            Some(run) if !self.active_phase => run.background as usize,
            Some(run) => run.foreground as usize,
            None => 0,
        };
    }

    fn advance_phase(&mut self) {
        if self.active_phase {
            self.active_phase = false;
            self.run_idx += 1;
        } else {
            self.active_phase = true;
        }
        self.load_phase();
    }

    fn skip_empty_phases(&mut self) {
        while self.remaining == 0 && self.run_idx < self.runs.len() {
            self.advance_phase();
        }
    }

    fn is_active(&self) -> bool {
        self.active_phase
    }

    fn consume(&mut self, n: usize) {
        if self.active_phase {
            self.active_pos += n;
        }
        self.remaining -= n;
        if self.remaining == 0 {
            self.advance_phase();
            self.skip_empty_phases();
        }
    }
}

/// How many active (foreground) pixels precede position `pos` in `runs`.
fn active_pixels_before(runs: &[RunLength], pos: usize) -> usize {
    let mut walked = 0usize;
    let mut active = 0usize;
    for run in runs {
        let len = run.total();
        if walked + len <= pos {
            active += run.foreground as usize;
            walked += len;
            continue;
        }
        let local = pos - walked;
        let bg = run.background as usize;
        if local > bg {
            active += (local - bg).min(run.foreground as usize);
        }
        break;
    }
    active
}

#[allow(clippy::too_many_arguments)]
fn build_from_samples(
    width: u32,
    height: u32,
    region: Region,
    viewport: Viewport,
    colors: Vec<Color>,
    depths: Option<Vec<f32>>,
    active: &[bool],
    background: BackgroundTemplate,
) -> SparseImage {
    let mut runs = Vec::new();
    let mut active_colors = Vec::new();
    let mut active_depths = Vec::new();
    let mut cur_bg = 0u32;
    let mut cur_fg = 0u32;
    for i in 0..active.len() {
        if active[i] {
            if cur_bg > 0 && cur_fg == 0 {
                // starting a foreground run after a background run; nothing to flush yet.
            }
            cur_fg += 1;
            active_colors.push(colors[i]);
            if let Some(d) = &depths {
                active_depths.push(d[i]);
            }
        } else {
            if cur_fg > 0 {
                runs.push(RunLength { background: cur_bg, foreground: cur_fg });
                cur_bg = 0;
                cur_fg = 0;
            }
            cur_bg += 1;
        }
    }
    if cur_bg > 0 || cur_fg > 0 {
        runs.push(RunLength { background: cur_bg, foreground: cur_fg });
    }
    let run_count = runs.len();
    let active_count = active_colors.len();
    let dense = if depths.is_some() {
        DensePayload::ColorDepth {
            colors: DenseBuffer::from_vec(active_colors),
            depths: DenseBuffer::from_vec(active_depths),
        }
    } else {
        DensePayload::ColorOnly { colors: DenseBuffer::from_vec(active_colors) }
    };
    SparseImage {
        width,
        height,
        region,
        viewport,
        runs: DenseBuffer::from_vec(runs),
        run_count,
        dense,
        active_count,
        background,
    }
}
