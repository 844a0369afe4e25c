use crate::{Event, Sequence};
use std::collections::HashSet;

pub const LINEAR: f32 = 0.0;
pub const STEPPED: f32 = 1.0;
pub const BEZIER: f32 = 2.0;
/// Floats per pre-expanded Bezier segment: 9 (x, y) samples.
pub const BEZIER_SIZE: usize = 18;

pub const BONE1_ENTRIES: usize = 2;
pub const BONE2_ENTRIES: usize = 3;
pub const RGBA_ENTRIES: usize = 5;
pub const RGB_ENTRIES: usize = 4;
pub const ALPHA_ENTRIES: usize = 2;
pub const RGBA2_ENTRIES: usize = 8;
pub const RGB2_ENTRIES: usize = 7;
pub const IK_ENTRIES: usize = 6;
pub const TRANSFORM_ENTRIES: usize = 7;
pub const PATH_VALUE_ENTRIES: usize = 2;
pub const PATH_MIX_ENTRIES: usize = 4;
pub const SEQUENCE_ENTRIES: usize = 3;

/// Index of the last frame whose time is `<= time`, scaled by `step`. Returns 0 when `time` is
/// before the first frame.
pub(crate) fn search(frames: &[f32], time: f32, step: usize) -> usize {
    let frame_count = frames.len() / step;
    if frame_count == 0 {
        return 0;
    }
    let mut lo = 0usize;
    let mut hi = frame_count;
    while lo < hi {
        let mid = (lo + hi) / 2;
        if frames[mid * step] <= time {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo.saturating_sub(1) * step
}

/// Keyframes stored flat as `[time, value0, value1, ...]` per frame, plus one curve descriptor per
/// frame followed by the sample tables of every Bezier segment.
#[derive(Clone, Debug)]
pub struct CurveTimeline {
    frame_entries: usize,
    frames: Vec<f32>,
    curves: Vec<f32>,
}

impl CurveTimeline {
    pub fn new(frame_count: usize, bezier_count: usize, frame_entries: usize) -> Self {
        let mut curves = vec![LINEAR; frame_count + bezier_count * BEZIER_SIZE];
        if frame_count > 0 {
            curves[frame_count - 1] = STEPPED;
        }
        Self {
            frame_entries: frame_entries.max(1),
            frames: vec![0.0; frame_count * frame_entries.max(1)],
            curves,
        }
    }

    pub fn frame_entries(&self) -> usize {
        self.frame_entries
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len() / self.frame_entries
    }

    pub fn frames(&self) -> &[f32] {
        &self.frames
    }

    pub fn curves(&self) -> &[f32] {
        &self.curves
    }

    pub fn duration(&self) -> f32 {
        self.frames
            .len()
            .checked_sub(self.frame_entries)
            .map(|i| self.frames[i])
            .unwrap_or(0.0)
    }

    pub fn first_time(&self) -> f32 {
        self.frames.first().copied().unwrap_or(0.0)
    }

    /// Sets a frame's time and values. Extra values are ignored, missing ones keep their previous
    /// contents.
    pub fn set_frame(&mut self, frame: usize, time: f32, values: &[f32]) {
        let start = frame * self.frame_entries;
        self.frames[start] = time;
        for (slot, value) in self.frames[start + 1..start + self.frame_entries]
            .iter_mut()
            .zip(values)
        {
            *slot = *value;
        }
    }

    pub fn set_linear(&mut self, frame: usize) {
        self.curves[frame] = LINEAR;
    }

    pub fn set_stepped(&mut self, frame: usize) {
        self.curves[frame] = STEPPED;
    }

    /// Drops unused Bezier storage when fewer segments were set than allocated.
    pub fn shrink(&mut self, bezier_count: usize) {
        let size = self.frame_count() + bezier_count * BEZIER_SIZE;
        if self.curves.len() > size {
            self.curves.truncate(size);
        }
    }

    /// Expands one cubic Bezier segment into its forward-difference sample table.
    ///
    /// `bezier` is the segment's ordinal among all segments of this timeline; `value` is which of
    /// the frame's values the curve drives. Only value 0 writes the frame's curve descriptor, the
    /// tables for later values follow at consecutive `bezier` ordinals.
    #[allow(clippy::too_many_arguments)]
    pub fn set_bezier(
        &mut self,
        bezier: usize,
        frame: usize,
        value: usize,
        time1: f32,
        value1: f32,
        cx1: f32,
        cy1: f32,
        cx2: f32,
        cy2: f32,
        time2: f32,
        value2: f32,
    ) {
        let mut i = self.frame_count() + bezier * BEZIER_SIZE;
        if value == 0 {
            self.curves[frame] = BEZIER + i as f32;
        }
        let tmpx = (time1 - cx1 * 2.0 + cx2) * 0.03;
        let tmpy = (value1 - cy1 * 2.0 + cy2) * 0.03;
        let dddx = ((cx1 - cx2) * 3.0 - time1 + time2) * 0.006;
        let dddy = ((cy1 - cy2) * 3.0 - value1 + value2) * 0.006;
        let mut ddx = tmpx * 2.0 + dddx;
        let mut ddy = tmpy * 2.0 + dddy;
        let mut dx = (cx1 - time1) * 0.3 + tmpx + dddx * 0.16666667;
        let mut dy = (cy1 - value1) * 0.3 + tmpy + dddy * 0.16666667;
        let mut x = time1 + dx;
        let mut y = value1 + dy;
        let n = i + BEZIER_SIZE;
        while i < n {
            self.curves[i] = x;
            self.curves[i + 1] = y;
            dx += ddx;
            dy += ddy;
            ddx += dddx;
            ddy += dddy;
            x += dx;
            y += dy;
            i += 2;
        }
    }

    /// Evaluates a Bezier table at `time`. `frame_index` is the start of the segment's first
    /// frame in `frames`, `i` the start of the table in `curves`. Times outside the sampled range
    /// extrapolate linearly towards the surrounding keyframes.
    pub fn bezier_value(&self, time: f32, frame_index: usize, value_offset: usize, mut i: usize) -> f32 {
        let curves = &self.curves;
        let frames = &self.frames;
        if curves[i] > time {
            let x = frames[frame_index];
            let y = frames[frame_index + value_offset];
            return y + (time - x) / (curves[i] - x) * (curves[i + 1] - y);
        }
        let n = i + BEZIER_SIZE;
        i += 2;
        while i < n {
            if curves[i] >= time {
                let x = curves[i - 2];
                let y = curves[i - 1];
                return y + (time - x) / (curves[i] - x) * (curves[i + 1] - y);
            }
            i += 2;
        }
        let next = frame_index + self.frame_entries;
        let x = curves[n - 2];
        let y = curves[n - 1];
        y + (time - x) / (frames[next] - x) * (frames[next + value_offset] - y)
    }

    /// Interpolated value of a single-value timeline.
    pub fn curve_value(&self, time: f32) -> f32 {
        self.curve_values::<1>(time)[0]
    }

    /// Interpolates the first `N` values of the frame bracketing `time`.
    pub fn curve_values<const N: usize>(&self, time: f32) -> [f32; N] {
        let mut out = [0.0f32; N];
        if self.frames.is_empty() {
            return out;
        }
        let entries = self.frame_entries;
        let i = search(&self.frames, time, entries);
        let curve_type = self.curves[i / entries];
        if curve_type == LINEAR {
            let before = self.frames[i];
            let next = i + entries;
            let t = (time - before) / (self.frames[next] - before);
            for (k, value) in out.iter_mut().enumerate() {
                let v = self.frames[i + 1 + k];
                *value = v + (self.frames[next + 1 + k] - v) * t;
            }
        } else if curve_type == STEPPED {
            for (k, value) in out.iter_mut().enumerate() {
                *value = self.frames[i + 1 + k];
            }
        } else {
            let table = (curve_type - BEZIER) as usize;
            for (k, value) in out.iter_mut().enumerate() {
                *value = self.bezier_value(time, i, 1 + k, table + k * BEZIER_SIZE);
            }
        }
        out
    }

    /// Interpolation percent in `[0, 1]` between `frame` and the next one, for timelines whose
    /// frames hold only times (deform).
    pub fn curve_percent(&self, time: f32, frame: usize) -> f32 {
        let curves = &self.curves;
        let frames = &self.frames;
        let curve_type = curves[frame];
        let next = frame + self.frame_entries;
        if curve_type == LINEAR {
            let x = frames[frame];
            return (time - x) / (frames[next] - x);
        }
        if curve_type == STEPPED {
            return 0.0;
        }
        let mut i = (curve_type - BEZIER) as usize;
        if curves[i] > time {
            let x = frames[frame];
            return curves[i + 1] * (time - x) / (curves[i] - x);
        }
        let n = i + BEZIER_SIZE;
        i += 2;
        while i < n {
            if curves[i] >= time {
                let x = curves[i - 2];
                let y = curves[i - 1];
                return y + (time - x) / (curves[i] - x) * (curves[i + 1] - y);
            }
            i += 2;
        }
        let x = curves[n - 2];
        let y = curves[n - 1];
        y + (1.0 - y) * (time - x) / (frames[next] - x)
    }
}

#[derive(Clone, Debug)]
pub struct BoneTimeline {
    pub bone_index: usize,
    pub curve: CurveTimeline,
}

#[derive(Clone, Debug)]
pub struct SlotCurveTimeline {
    pub slot_index: usize,
    pub curve: CurveTimeline,
}

#[derive(Clone, Debug)]
pub struct ConstraintTimeline {
    pub constraint_index: usize,
    pub curve: CurveTimeline,
}

#[derive(Clone, Debug)]
pub struct AttachmentTimeline {
    pub slot_index: usize,
    pub frames: Vec<f32>,
    pub attachment_names: Vec<Option<String>>,
}

impl AttachmentTimeline {
    pub fn new(slot_index: usize, frame_count: usize) -> Self {
        Self {
            slot_index,
            frames: vec![0.0; frame_count],
            attachment_names: vec![None; frame_count],
        }
    }

    pub fn set_frame(&mut self, frame: usize, time: f32, attachment_name: Option<String>) {
        self.frames[frame] = time;
        self.attachment_names[frame] = attachment_name;
    }
}

#[derive(Clone, Debug)]
pub struct DeformTimeline {
    pub slot_index: usize,
    /// `VertexAttachment::timeline_attachment` value this timeline drives.
    pub attachment: u32,
    /// Times only, one entry per frame.
    pub curve: CurveTimeline,
    /// Per frame: absolute vertex positions for unweighted meshes, offsets per bone influence
    /// for weighted ones.
    pub vertices: Vec<Vec<f32>>,
}

impl DeformTimeline {
    pub fn new(slot_index: usize, attachment: u32, frame_count: usize, bezier_count: usize) -> Self {
        Self {
            slot_index,
            attachment,
            curve: CurveTimeline::new(frame_count, bezier_count, 1),
            vertices: vec![Vec::new(); frame_count],
        }
    }

    pub fn set_frame(&mut self, frame: usize, time: f32, vertices: Vec<f32>) {
        self.curve.set_frame(frame, time, &[]);
        self.vertices[frame] = vertices;
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.first().map(Vec::len).unwrap_or(0)
    }
}

#[derive(Clone, Debug)]
pub struct SequenceTimeline {
    pub slot_index: usize,
    /// Sequence of the keyed attachment; `sequence.id` gates which slot attachment is driven.
    pub sequence: Sequence,
    /// Set when the keyed attachment is a mesh, so linked meshes inheriting its timelines match.
    pub timeline_attachment: Option<u32>,
    /// `[time, mode | (index << 4), delay]` per frame.
    pub frames: Vec<f32>,
}

impl SequenceTimeline {
    pub fn new(
        slot_index: usize,
        sequence: Sequence,
        timeline_attachment: Option<u32>,
        frame_count: usize,
    ) -> Self {
        Self {
            slot_index,
            sequence,
            timeline_attachment,
            frames: vec![0.0; frame_count * SEQUENCE_ENTRIES],
        }
    }

    pub fn set_frame(
        &mut self,
        frame: usize,
        time: f32,
        mode: crate::SequenceMode,
        index: i32,
        delay: f32,
    ) {
        let i = frame * SEQUENCE_ENTRIES;
        self.frames[i] = time;
        self.frames[i + 1] = (mode.index() | (index << 4)) as f32;
        self.frames[i + 2] = delay;
    }
}

#[derive(Clone, Debug)]
pub struct EventTimeline {
    pub frames: Vec<f32>,
    pub events: Vec<Event>,
}

impl EventTimeline {
    /// Events must be sorted by time.
    pub fn new(events: Vec<Event>) -> Self {
        Self {
            frames: events.iter().map(|e| e.time).collect(),
            events,
        }
    }
}

#[derive(Clone, Debug)]
pub struct DrawOrderTimeline {
    pub frames: Vec<f32>,
    /// Per frame, the setup slot index for each draw position; `None` restores setup order.
    pub draw_orders: Vec<Option<Vec<usize>>>,
}

impl DrawOrderTimeline {
    pub fn new(frame_count: usize) -> Self {
        Self {
            frames: vec![0.0; frame_count],
            draw_orders: vec![None; frame_count],
        }
    }

    pub fn set_frame(&mut self, frame: usize, time: f32, draw_order: Option<Vec<usize>>) {
        self.frames[frame] = time;
        self.draw_orders[frame] = draw_order;
    }
}

#[derive(Clone, Debug)]
pub enum Timeline {
    Rotate(BoneTimeline),
    Translate(BoneTimeline),
    TranslateX(BoneTimeline),
    TranslateY(BoneTimeline),
    Scale(BoneTimeline),
    ScaleX(BoneTimeline),
    ScaleY(BoneTimeline),
    Shear(BoneTimeline),
    ShearX(BoneTimeline),
    ShearY(BoneTimeline),
    Rgba(SlotCurveTimeline),
    Rgb(SlotCurveTimeline),
    Alpha(SlotCurveTimeline),
    Rgba2(SlotCurveTimeline),
    Rgb2(SlotCurveTimeline),
    Attachment(AttachmentTimeline),
    Deform(DeformTimeline),
    Sequence(SequenceTimeline),
    Event(EventTimeline),
    DrawOrder(DrawOrderTimeline),
    IkConstraint(ConstraintTimeline),
    TransformConstraint(ConstraintTimeline),
    PathConstraintPosition(ConstraintTimeline),
    PathConstraintSpacing(ConstraintTimeline),
    PathConstraintMix(ConstraintTimeline),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
enum Property {
    Rotate = 0,
    X,
    Y,
    ScaleX,
    ScaleY,
    ShearX,
    ShearY,
    Rgb,
    Alpha,
    Rgb2,
    Attachment,
    Deform,
    Event,
    DrawOrder,
    IkConstraint,
    TransformConstraint,
    PathConstraintPosition,
    PathConstraintSpacing,
    PathConstraintMix,
    Sequence,
}

fn property_id(property: Property, index: usize, sub_id: u32) -> u64 {
    ((property as u64) << 56) | (((index as u64) & 0x00ff_ffff) << 32) | sub_id as u64
}

impl Timeline {
    /// Ids of every skeleton property this timeline writes; two timelines sharing an id fight
    /// over the same property when mixed.
    pub fn property_ids(&self) -> Vec<u64> {
        use Property as P;
        match self {
            Timeline::Rotate(t) => vec![property_id(P::Rotate, t.bone_index, 0)],
            Timeline::Translate(t) => vec![
                property_id(P::X, t.bone_index, 0),
                property_id(P::Y, t.bone_index, 0),
            ],
            Timeline::TranslateX(t) => vec![property_id(P::X, t.bone_index, 0)],
            Timeline::TranslateY(t) => vec![property_id(P::Y, t.bone_index, 0)],
            Timeline::Scale(t) => vec![
                property_id(P::ScaleX, t.bone_index, 0),
                property_id(P::ScaleY, t.bone_index, 0),
            ],
            Timeline::ScaleX(t) => vec![property_id(P::ScaleX, t.bone_index, 0)],
            Timeline::ScaleY(t) => vec![property_id(P::ScaleY, t.bone_index, 0)],
            Timeline::Shear(t) => vec![
                property_id(P::ShearX, t.bone_index, 0),
                property_id(P::ShearY, t.bone_index, 0),
            ],
            Timeline::ShearX(t) => vec![property_id(P::ShearX, t.bone_index, 0)],
            Timeline::ShearY(t) => vec![property_id(P::ShearY, t.bone_index, 0)],
            Timeline::Rgba(t) => vec![
                property_id(P::Rgb, t.slot_index, 0),
                property_id(P::Alpha, t.slot_index, 0),
            ],
            Timeline::Rgb(t) => vec![property_id(P::Rgb, t.slot_index, 0)],
            Timeline::Alpha(t) => vec![property_id(P::Alpha, t.slot_index, 0)],
            Timeline::Rgba2(t) => vec![
                property_id(P::Rgb, t.slot_index, 0),
                property_id(P::Alpha, t.slot_index, 0),
                property_id(P::Rgb2, t.slot_index, 0),
            ],
            Timeline::Rgb2(t) => vec![
                property_id(P::Rgb, t.slot_index, 0),
                property_id(P::Rgb2, t.slot_index, 0),
            ],
            Timeline::Attachment(t) => vec![property_id(P::Attachment, t.slot_index, 0)],
            Timeline::Deform(t) => vec![property_id(P::Deform, t.slot_index, t.attachment)],
            Timeline::Sequence(t) => {
                vec![property_id(P::Sequence, t.slot_index, t.sequence.id)]
            }
            Timeline::Event(_) => vec![property_id(P::Event, 0, 0)],
            Timeline::DrawOrder(_) => vec![property_id(P::DrawOrder, 0, 0)],
            Timeline::IkConstraint(t) => {
                vec![property_id(P::IkConstraint, t.constraint_index, 0)]
            }
            Timeline::TransformConstraint(t) => {
                vec![property_id(P::TransformConstraint, t.constraint_index, 0)]
            }
            Timeline::PathConstraintPosition(t) => {
                vec![property_id(P::PathConstraintPosition, t.constraint_index, 0)]
            }
            Timeline::PathConstraintSpacing(t) => {
                vec![property_id(P::PathConstraintSpacing, t.constraint_index, 0)]
            }
            Timeline::PathConstraintMix(t) => {
                vec![property_id(P::PathConstraintMix, t.constraint_index, 0)]
            }
        }
    }

    /// Times of every frame (the first entry of each frame for strided timelines).
    pub fn frames(&self) -> &[f32] {
        match self {
            Timeline::Rotate(t)
            | Timeline::Translate(t)
            | Timeline::TranslateX(t)
            | Timeline::TranslateY(t)
            | Timeline::Scale(t)
            | Timeline::ScaleX(t)
            | Timeline::ScaleY(t)
            | Timeline::Shear(t)
            | Timeline::ShearX(t)
            | Timeline::ShearY(t) => t.curve.frames(),
            Timeline::Rgba(t)
            | Timeline::Rgb(t)
            | Timeline::Alpha(t)
            | Timeline::Rgba2(t)
            | Timeline::Rgb2(t) => t.curve.frames(),
            Timeline::IkConstraint(t)
            | Timeline::TransformConstraint(t)
            | Timeline::PathConstraintPosition(t)
            | Timeline::PathConstraintSpacing(t)
            | Timeline::PathConstraintMix(t) => t.curve.frames(),
            Timeline::Deform(t) => t.curve.frames(),
            Timeline::Attachment(t) => &t.frames,
            Timeline::Sequence(t) => &t.frames,
            Timeline::Event(t) => &t.frames,
            Timeline::DrawOrder(t) => &t.frames,
        }
    }

    pub fn frame_entries(&self) -> usize {
        match self {
            Timeline::Rotate(t)
            | Timeline::Translate(t)
            | Timeline::TranslateX(t)
            | Timeline::TranslateY(t)
            | Timeline::Scale(t)
            | Timeline::ScaleX(t)
            | Timeline::ScaleY(t)
            | Timeline::Shear(t)
            | Timeline::ShearX(t)
            | Timeline::ShearY(t) => t.curve.frame_entries(),
            Timeline::Rgba(t)
            | Timeline::Rgb(t)
            | Timeline::Alpha(t)
            | Timeline::Rgba2(t)
            | Timeline::Rgb2(t) => t.curve.frame_entries(),
            Timeline::IkConstraint(t)
            | Timeline::TransformConstraint(t)
            | Timeline::PathConstraintPosition(t)
            | Timeline::PathConstraintSpacing(t)
            | Timeline::PathConstraintMix(t) => t.curve.frame_entries(),
            Timeline::Sequence(_) => SEQUENCE_ENTRIES,
            Timeline::Deform(_)
            | Timeline::Attachment(_)
            | Timeline::Event(_)
            | Timeline::DrawOrder(_) => 1,
        }
    }

    pub fn frame_count(&self) -> usize {
        self.frames().len() / self.frame_entries()
    }

    /// Time of the last frame.
    pub fn duration(&self) -> f32 {
        let frames = self.frames();
        frames
            .len()
            .checked_sub(self.frame_entries())
            .map(|i| frames[i])
            .unwrap_or(0.0)
    }
}

/// A named clip: timelines applied together, plus the set of property ids they key.
#[derive(Clone, Debug)]
pub struct Animation {
    pub name: String,
    pub duration: f32,
    pub timelines: Vec<Timeline>,
    property_ids: HashSet<u64>,
}

impl Animation {
    pub fn new(name: impl Into<String>, timelines: Vec<Timeline>, duration: f32) -> Self {
        let property_ids = timelines
            .iter()
            .flat_map(|t| t.property_ids())
            .collect::<HashSet<_>>();
        Self {
            name: name.into(),
            duration,
            timelines,
            property_ids,
        }
    }

    /// The empty animation used for mixing a track out to the setup pose.
    pub fn empty() -> Self {
        Self::new("<empty>", Vec::new(), 0.0)
    }

    /// True if any of `ids` is keyed by this animation.
    pub fn has_timeline(&self, ids: &[u64]) -> bool {
        ids.iter().any(|id| self.property_ids.contains(id))
    }
}
