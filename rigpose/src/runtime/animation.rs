use crate::runtime::{Bone, Skeleton, Slot};
use crate::timeline::{IK_ENTRIES, SEQUENCE_ENTRIES, search};
use crate::{
    Animation, Attachment, AttachmentTimeline, BoneData, BoneTimeline, ConstraintTimeline,
    DeformTimeline, DrawOrderTimeline, Event, EventTimeline, MeshVertices, SequenceMode,
    SequenceTimeline, SlotCurveTimeline, SlotData, Timeline,
};
use std::sync::Arc;

/// How a timeline's value combines with the current pose.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MixBlend {
    /// Mixes from the setup value; before the first key the setup value is restored.
    Setup,
    /// Mixes from the current value; before the first key it mixes back to the setup value.
    First,
    /// Mixes from the current value; before the first key nothing changes.
    Replace,
    /// Adds the keyed value relative to setup; before the first key nothing changes.
    Add,
}

/// Whether the animation is being mixed in or out. Out only matters for timelines that cannot
/// be interpolated (attachment, draw order) and for scale sign flips.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MixDirection {
    In,
    Out,
}

impl Animation {
    /// Applies every timeline at `time`. With `looped` both times wrap by the duration, and
    /// events between `last_time` and `time` are appended to `events`.
    #[allow(clippy::too_many_arguments)]
    pub fn apply(
        &self,
        skeleton: &mut Skeleton,
        mut last_time: f32,
        mut time: f32,
        looped: bool,
        mut events: Option<&mut Vec<Event>>,
        alpha: f32,
        blend: MixBlend,
        direction: MixDirection,
    ) {
        if looped && self.duration != 0.0 {
            time %= self.duration;
            if last_time > 0.0 {
                last_time %= self.duration;
            }
        }
        for timeline in &self.timelines {
            timeline.apply(
                skeleton,
                last_time,
                time,
                events.as_deref_mut(),
                alpha,
                blend,
                direction,
            );
        }
    }
}

impl Timeline {
    #[allow(clippy::too_many_arguments)]
    pub fn apply(
        &self,
        skeleton: &mut Skeleton,
        last_time: f32,
        time: f32,
        events: Option<&mut Vec<Event>>,
        alpha: f32,
        blend: MixBlend,
        direction: MixDirection,
    ) {
        match self {
            Timeline::Rotate(t) => apply_rotate(t, skeleton, time, alpha, blend),
            Timeline::Translate(t) => apply_translate(t, skeleton, time, alpha, blend),
            Timeline::TranslateX(t) => {
                apply_bone_value(t, skeleton, time, alpha, blend, BoneField::X)
            }
            Timeline::TranslateY(t) => {
                apply_bone_value(t, skeleton, time, alpha, blend, BoneField::Y)
            }
            Timeline::Scale(t) => apply_scale(t, skeleton, time, alpha, blend, direction),
            Timeline::ScaleX(t) => {
                apply_scale_axis(t, skeleton, time, alpha, blend, direction, BoneField::ScaleX)
            }
            Timeline::ScaleY(t) => {
                apply_scale_axis(t, skeleton, time, alpha, blend, direction, BoneField::ScaleY)
            }
            Timeline::Shear(t) => apply_shear(t, skeleton, time, alpha, blend),
            Timeline::ShearX(t) => {
                apply_bone_value(t, skeleton, time, alpha, blend, BoneField::ShearX)
            }
            Timeline::ShearY(t) => {
                apply_bone_value(t, skeleton, time, alpha, blend, BoneField::ShearY)
            }
            Timeline::Rgba(t) => apply_rgba(t, skeleton, time, alpha, blend),
            Timeline::Rgb(t) => apply_rgb(t, skeleton, time, alpha, blend),
            Timeline::Alpha(t) => apply_alpha(t, skeleton, time, alpha, blend),
            Timeline::Rgba2(t) => apply_rgba2(t, skeleton, time, alpha, blend),
            Timeline::Rgb2(t) => apply_rgb2(t, skeleton, time, alpha, blend),
            Timeline::Attachment(t) => apply_attachment(t, skeleton, time, blend, direction),
            Timeline::Deform(t) => apply_deform(t, skeleton, time, alpha, blend),
            Timeline::Sequence(t) => apply_sequence(t, skeleton, time, blend, direction),
            Timeline::Event(t) => {
                if let Some(events) = events {
                    collect_events(t, last_time, time, events);
                }
            }
            Timeline::DrawOrder(t) => apply_draw_order(t, skeleton, time, blend, direction),
            Timeline::IkConstraint(t) => {
                apply_ik_constraint(t, skeleton, time, alpha, blend, direction)
            }
            Timeline::TransformConstraint(t) => {
                apply_transform_constraint(t, skeleton, time, alpha, blend)
            }
            Timeline::PathConstraintPosition(t) => {
                apply_path_value(t, skeleton, time, alpha, blend, PathField::Position)
            }
            Timeline::PathConstraintSpacing(t) => {
                apply_path_value(t, skeleton, time, alpha, blend, PathField::Spacing)
            }
            Timeline::PathConstraintMix(t) => apply_path_mix(t, skeleton, time, alpha, blend),
        }
    }
}

fn active_bone(skeleton: &mut Skeleton, index: usize) -> Option<(&mut Bone, &BoneData)> {
    let setup = skeleton.data.bones.get(index)?;
    let bone = skeleton.bones.get_mut(index)?;
    bone.active.then_some((bone, setup))
}

fn active_slot(skeleton: &mut Skeleton, index: usize) -> Option<(&mut Slot, &SlotData)> {
    let slot = skeleton.slots.get_mut(index)?;
    if !skeleton.bones.get(slot.bone).is_some_and(|b| b.active) {
        return None;
    }
    let setup = skeleton.data.slots.get(index)?;
    Some((slot, setup))
}

fn signum(v: f32) -> f32 {
    if v > 0.0 {
        1.0
    } else if v < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// Before the first key: Setup restores the setup value, First mixes back toward it.
fn reset_value(current: &mut f32, setup: f32, alpha: f32, blend: MixBlend) {
    match blend {
        MixBlend::Setup => *current = setup,
        MixBlend::First => *current += (setup - *current) * alpha,
        MixBlend::Replace | MixBlend::Add => {}
    }
}

/// `value` is relative to `setup`.
fn mix_value(current: &mut f32, setup: f32, value: f32, alpha: f32, blend: MixBlend) {
    match blend {
        MixBlend::Setup => *current = setup + value * alpha,
        MixBlend::First | MixBlend::Replace => *current += (value + setup - *current) * alpha,
        MixBlend::Add => *current += value * alpha,
    }
}

/// `value` is absolute; constraint mixes and path values never add.
fn mix_absolute(current: &mut f32, setup: f32, value: f32, alpha: f32, blend: MixBlend) {
    if blend == MixBlend::Setup {
        *current = setup + (value - setup) * alpha;
    } else {
        *current += (value - *current) * alpha;
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum BoneField {
    X,
    Y,
    ScaleX,
    ScaleY,
    ShearX,
    ShearY,
}

impl BoneField {
    fn get(self, bone: &mut Bone) -> &mut f32 {
        match self {
            BoneField::X => &mut bone.x,
            BoneField::Y => &mut bone.y,
            BoneField::ScaleX => &mut bone.scale_x,
            BoneField::ScaleY => &mut bone.scale_y,
            BoneField::ShearX => &mut bone.shear_x,
            BoneField::ShearY => &mut bone.shear_y,
        }
    }

    fn setup(self, data: &BoneData) -> f32 {
        match self {
            BoneField::X => data.x,
            BoneField::Y => data.y,
            BoneField::ScaleX => data.scale_x,
            BoneField::ScaleY => data.scale_y,
            BoneField::ShearX => data.shear_x,
            BoneField::ShearY => data.shear_y,
        }
    }
}

pub(crate) fn apply_rotate(
    timeline: &BoneTimeline,
    skeleton: &mut Skeleton,
    time: f32,
    alpha: f32,
    blend: MixBlend,
) {
    let curve = &timeline.curve;
    if curve.frame_count() == 0 {
        return;
    }
    let Some((bone, setup)) = active_bone(skeleton, timeline.bone_index) else {
        return;
    };
    if time < curve.first_time() {
        reset_value(&mut bone.rotation, setup.rotation, alpha, blend);
        return;
    }
    let r = curve.curve_value(time);
    mix_value(&mut bone.rotation, setup.rotation, r, alpha, blend);
}

fn apply_translate(
    timeline: &BoneTimeline,
    skeleton: &mut Skeleton,
    time: f32,
    alpha: f32,
    blend: MixBlend,
) {
    let curve = &timeline.curve;
    if curve.frame_count() == 0 {
        return;
    }
    let Some((bone, setup)) = active_bone(skeleton, timeline.bone_index) else {
        return;
    };
    if time < curve.first_time() {
        reset_value(&mut bone.x, setup.x, alpha, blend);
        reset_value(&mut bone.y, setup.y, alpha, blend);
        return;
    }
    let [x, y] = curve.curve_values::<2>(time);
    mix_value(&mut bone.x, setup.x, x, alpha, blend);
    mix_value(&mut bone.y, setup.y, y, alpha, blend);
}

fn apply_shear(
    timeline: &BoneTimeline,
    skeleton: &mut Skeleton,
    time: f32,
    alpha: f32,
    blend: MixBlend,
) {
    let curve = &timeline.curve;
    if curve.frame_count() == 0 {
        return;
    }
    let Some((bone, setup)) = active_bone(skeleton, timeline.bone_index) else {
        return;
    };
    if time < curve.first_time() {
        reset_value(&mut bone.shear_x, setup.shear_x, alpha, blend);
        reset_value(&mut bone.shear_y, setup.shear_y, alpha, blend);
        return;
    }
    let [x, y] = curve.curve_values::<2>(time);
    mix_value(&mut bone.shear_x, setup.shear_x, x, alpha, blend);
    mix_value(&mut bone.shear_y, setup.shear_y, y, alpha, blend);
}

/// Single-axis translate and shear timelines.
fn apply_bone_value(
    timeline: &BoneTimeline,
    skeleton: &mut Skeleton,
    time: f32,
    alpha: f32,
    blend: MixBlend,
    field: BoneField,
) {
    let curve = &timeline.curve;
    if curve.frame_count() == 0 {
        return;
    }
    let Some((bone, setup)) = active_bone(skeleton, timeline.bone_index) else {
        return;
    };
    let setup = field.setup(setup);
    let current = field.get(bone);
    if time < curve.first_time() {
        reset_value(current, setup, alpha, blend);
        return;
    }
    mix_value(current, setup, curve.curve_value(time), alpha, blend);
}

/// Scale keys are multipliers of the setup scale. When mixing, the sign comes from the side
/// being mixed toward so a flip happens at once rather than passing through zero.
fn mix_scale(
    current: &mut f32,
    setup: f32,
    value: f32,
    alpha: f32,
    blend: MixBlend,
    direction: MixDirection,
) {
    let x = value * setup;
    if alpha == 1.0 {
        if blend == MixBlend::Add {
            *current += x - setup;
        } else {
            *current = x;
        }
        return;
    }
    match (blend, direction) {
        (MixBlend::Add, _) => *current += (x - setup) * alpha,
        (MixBlend::Setup, MixDirection::Out) => {
            *current = setup + (x.abs() * signum(setup) - setup) * alpha;
        }
        (MixBlend::First | MixBlend::Replace, MixDirection::Out) => {
            let b = *current;
            *current = b + (x.abs() * signum(b) - b) * alpha;
        }
        (MixBlend::Setup, MixDirection::In) => {
            let b = setup.abs() * signum(x);
            *current = b + (x - b) * alpha;
        }
        (MixBlend::First | MixBlend::Replace, MixDirection::In) => {
            let b = current.abs() * signum(x);
            *current = b + (x - b) * alpha;
        }
    }
}

fn apply_scale(
    timeline: &BoneTimeline,
    skeleton: &mut Skeleton,
    time: f32,
    alpha: f32,
    blend: MixBlend,
    direction: MixDirection,
) {
    let curve = &timeline.curve;
    if curve.frame_count() == 0 {
        return;
    }
    let Some((bone, setup)) = active_bone(skeleton, timeline.bone_index) else {
        return;
    };
    if time < curve.first_time() {
        reset_value(&mut bone.scale_x, setup.scale_x, alpha, blend);
        reset_value(&mut bone.scale_y, setup.scale_y, alpha, blend);
        return;
    }
    let [x, y] = curve.curve_values::<2>(time);
    mix_scale(&mut bone.scale_x, setup.scale_x, x, alpha, blend, direction);
    mix_scale(&mut bone.scale_y, setup.scale_y, y, alpha, blend, direction);
}

fn apply_scale_axis(
    timeline: &BoneTimeline,
    skeleton: &mut Skeleton,
    time: f32,
    alpha: f32,
    blend: MixBlend,
    direction: MixDirection,
    field: BoneField,
) {
    let curve = &timeline.curve;
    if curve.frame_count() == 0 {
        return;
    }
    let Some((bone, setup)) = active_bone(skeleton, timeline.bone_index) else {
        return;
    };
    let setup = field.setup(setup);
    let current = field.get(bone);
    if time < curve.first_time() {
        reset_value(current, setup, alpha, blend);
        return;
    }
    mix_scale(current, setup, curve.curve_value(time), alpha, blend, direction);
}

fn clamp_color(color: &mut [f32]) {
    for c in color {
        *c = c.clamp(0.0, 1.0);
    }
}

fn apply_rgba(
    timeline: &SlotCurveTimeline,
    skeleton: &mut Skeleton,
    time: f32,
    alpha: f32,
    blend: MixBlend,
) {
    let curve = &timeline.curve;
    if curve.frame_count() == 0 {
        return;
    }
    let Some((slot, setup)) = active_slot(skeleton, timeline.slot_index) else {
        return;
    };
    let color = &mut slot.color;
    if time < curve.first_time() {
        match blend {
            MixBlend::Setup => *color = setup.color,
            MixBlend::First => {
                for (c, s) in color.iter_mut().zip(setup.color) {
                    *c += (s - *c) * alpha;
                }
                clamp_color(color);
            }
            MixBlend::Replace | MixBlend::Add => {}
        }
        return;
    }
    let rgba = curve.curve_values::<4>(time);
    if alpha == 1.0 {
        *color = rgba;
    } else {
        if blend == MixBlend::Setup {
            *color = setup.color;
        }
        for (c, v) in color.iter_mut().zip(rgba) {
            *c += (v - *c) * alpha;
        }
    }
    clamp_color(color);
}

fn apply_rgb(
    timeline: &SlotCurveTimeline,
    skeleton: &mut Skeleton,
    time: f32,
    alpha: f32,
    blend: MixBlend,
) {
    let curve = &timeline.curve;
    if curve.frame_count() == 0 {
        return;
    }
    let Some((slot, setup)) = active_slot(skeleton, timeline.slot_index) else {
        return;
    };
    let color = &mut slot.color[..3];
    if time < curve.first_time() {
        match blend {
            MixBlend::Setup => color.copy_from_slice(&setup.color[..3]),
            MixBlend::First => {
                for (c, s) in color.iter_mut().zip(&setup.color[..3]) {
                    *c += (s - *c) * alpha;
                }
            }
            MixBlend::Replace | MixBlend::Add => {}
        }
        return;
    }
    let rgb = curve.curve_values::<3>(time);
    if alpha == 1.0 {
        color.copy_from_slice(&rgb);
    } else {
        if blend == MixBlend::Setup {
            color.copy_from_slice(&setup.color[..3]);
        }
        for (c, v) in color.iter_mut().zip(rgb) {
            *c += (v - *c) * alpha;
        }
    }
}

fn apply_alpha(
    timeline: &SlotCurveTimeline,
    skeleton: &mut Skeleton,
    time: f32,
    alpha: f32,
    blend: MixBlend,
) {
    let curve = &timeline.curve;
    if curve.frame_count() == 0 {
        return;
    }
    let Some((slot, setup)) = active_slot(skeleton, timeline.slot_index) else {
        return;
    };
    let a = &mut slot.color[3];
    if time < curve.first_time() {
        reset_value(a, setup.color[3], alpha, blend);
        return;
    }
    let value = curve.curve_value(time);
    if alpha == 1.0 {
        *a = value;
    } else {
        if blend == MixBlend::Setup {
            *a = setup.color[3];
        }
        *a += (value - *a) * alpha;
    }
}

fn apply_rgba2(
    timeline: &SlotCurveTimeline,
    skeleton: &mut Skeleton,
    time: f32,
    alpha: f32,
    blend: MixBlend,
) {
    let curve = &timeline.curve;
    if curve.frame_count() == 0 {
        return;
    }
    let Some((slot, setup)) = active_slot(skeleton, timeline.slot_index) else {
        return;
    };
    if time < curve.first_time() {
        match blend {
            MixBlend::Setup => {
                slot.color = setup.color;
                slot.dark_color = setup.dark_color;
            }
            MixBlend::First => {
                for (c, s) in slot.color.iter_mut().zip(setup.color) {
                    *c += (s - *c) * alpha;
                }
                clamp_color(&mut slot.color);
                for (c, s) in slot.dark_color.iter_mut().zip(setup.dark_color) {
                    *c += (s - *c) * alpha;
                }
            }
            MixBlend::Replace | MixBlend::Add => {}
        }
        return;
    }
    let [r, g, b, a, r2, g2, b2] = curve.curve_values::<7>(time);
    if alpha == 1.0 {
        slot.color = [r, g, b, a];
        slot.dark_color = [r2, g2, b2];
    } else {
        if blend == MixBlend::Setup {
            slot.color = setup.color;
            slot.dark_color = setup.dark_color;
        }
        for (c, v) in slot.color.iter_mut().zip([r, g, b, a]) {
            *c += (v - *c) * alpha;
        }
        for (c, v) in slot.dark_color.iter_mut().zip([r2, g2, b2]) {
            *c += (v - *c) * alpha;
        }
    }
    clamp_color(&mut slot.color);
}

fn apply_rgb2(
    timeline: &SlotCurveTimeline,
    skeleton: &mut Skeleton,
    time: f32,
    alpha: f32,
    blend: MixBlend,
) {
    let curve = &timeline.curve;
    if curve.frame_count() == 0 {
        return;
    }
    let Some((slot, setup)) = active_slot(skeleton, timeline.slot_index) else {
        return;
    };
    if time < curve.first_time() {
        match blend {
            MixBlend::Setup => {
                slot.color[..3].copy_from_slice(&setup.color[..3]);
                slot.dark_color = setup.dark_color;
            }
            MixBlend::First => {
                for (c, s) in slot.color[..3].iter_mut().zip(&setup.color[..3]) {
                    *c += (s - *c) * alpha;
                }
                for (c, s) in slot.dark_color.iter_mut().zip(setup.dark_color) {
                    *c += (s - *c) * alpha;
                }
            }
            MixBlend::Replace | MixBlend::Add => {}
        }
        return;
    }
    let [r, g, b, r2, g2, b2] = curve.curve_values::<6>(time);
    if alpha == 1.0 {
        slot.color[..3].copy_from_slice(&[r, g, b]);
        slot.dark_color = [r2, g2, b2];
    } else {
        if blend == MixBlend::Setup {
            slot.color[..3].copy_from_slice(&setup.color[..3]);
            slot.dark_color = setup.dark_color;
        }
        for (c, v) in slot.color[..3].iter_mut().zip([r, g, b]) {
            *c += (v - *c) * alpha;
        }
        for (c, v) in slot.dark_color.iter_mut().zip([r2, g2, b2]) {
            *c += (v - *c) * alpha;
        }
    }
}

/// Resolves `name` through the current and default skins and shows it on the slot. Names that
/// resolve nowhere clear the slot.
fn set_attachment_by_name(skeleton: &mut Skeleton, slot_index: usize, name: Option<&str>) {
    let key = name.and_then(|name| skeleton.attachment_key(slot_index, name));
    if name.is_some() && key.is_none() {
        log::warn!("attachment {name:?} not found for slot {slot_index}");
    }
    skeleton.set_slot_attachment(slot_index, key);
}

fn slot_bone_active(skeleton: &Skeleton, slot_index: usize) -> bool {
    skeleton
        .slots
        .get(slot_index)
        .and_then(|slot| skeleton.bones.get(slot.bone))
        .is_some_and(|bone| bone.active)
}

/// Attachment keyed at `time`; `None` in the outer option means `time` is before the first key.
fn keyed_attachment(timeline: &AttachmentTimeline, time: f32) -> Option<Option<&str>> {
    if timeline.frames.first().is_none_or(|&first| time < first) {
        return None;
    }
    let frame = search(&timeline.frames, time, 1);
    Some(timeline.attachment_names[frame].as_deref())
}

fn apply_attachment(
    timeline: &AttachmentTimeline,
    skeleton: &mut Skeleton,
    time: f32,
    blend: MixBlend,
    direction: MixDirection,
) {
    if !slot_bone_active(skeleton, timeline.slot_index) {
        return;
    }
    let setup_name = skeleton
        .data
        .slots
        .get(timeline.slot_index)
        .and_then(|s| s.attachment.clone());

    if direction == MixDirection::Out {
        if blend == MixBlend::Setup {
            set_attachment_by_name(skeleton, timeline.slot_index, setup_name.as_deref());
        }
        return;
    }
    match keyed_attachment(timeline, time) {
        None => {
            if matches!(blend, MixBlend::Setup | MixBlend::First) {
                set_attachment_by_name(skeleton, timeline.slot_index, setup_name.as_deref());
            }
        }
        Some(name) => set_attachment_by_name(skeleton, timeline.slot_index, name),
    }
}

/// Setup positions of an unweighted attachment, flattened. Weighted attachments key offsets
/// from zero and return `None`.
fn setup_vertices(vertices: &MeshVertices) -> Option<Vec<f32>> {
    match vertices {
        MeshVertices::Unweighted(v) => Some(v.iter().flat_map(|p| [p[0], p[1]]).collect()),
        MeshVertices::Weighted(_) => None,
    }
}

fn apply_deform(
    timeline: &DeformTimeline,
    skeleton: &mut Skeleton,
    time: f32,
    mut alpha: f32,
    mut blend: MixBlend,
) {
    let curve = &timeline.curve;
    let frames = curve.frames();
    if frames.is_empty() || !slot_bone_active(skeleton, timeline.slot_index) {
        return;
    }
    let data = Arc::clone(&skeleton.data);
    let Some(vertex) = skeleton
        .slots
        .get(timeline.slot_index)
        .and_then(|slot| slot.attachment_key())
        .and_then(|key| data.skins.get(key.skin)?.attachment(timeline.slot_index, &key.name))
        .and_then(Attachment::vertex_attachment)
    else {
        return;
    };
    if vertex.timeline_attachment != timeline.attachment {
        return;
    }
    let setup = setup_vertices(&vertex.vertices);
    let vertex_count = timeline.vertex_count();
    let slot = &mut skeleton.slots[timeline.slot_index];
    let deform = &mut slot.deform;
    if deform.is_empty() {
        blend = MixBlend::Setup;
    }

    if time < frames[0] {
        match blend {
            MixBlend::Setup => deform.clear(),
            MixBlend::First => {
                if alpha == 1.0 {
                    deform.clear();
                    return;
                }
                deform.resize(vertex_count, 0.0);
                match &setup {
                    Some(setup) => {
                        for (d, s) in deform.iter_mut().zip(setup) {
                            *d += (s - *d) * alpha;
                        }
                    }
                    None => {
                        alpha = 1.0 - alpha;
                        for d in deform.iter_mut() {
                            *d *= alpha;
                        }
                    }
                }
            }
            MixBlend::Replace | MixBlend::Add => {}
        }
        return;
    }

    deform.resize(vertex_count, 0.0);
    let last = frames.len() - 1;
    let (frame, percent) = if time >= frames[last] {
        (last, 0.0)
    } else {
        let frame = search(frames, time, 1);
        (frame, curve.curve_percent(time, frame))
    };
    let Some(prev) = timeline.vertices.get(frame) else {
        return;
    };
    let next = timeline.vertices.get(frame + 1).unwrap_or(prev);
    let keyed = |i: usize| {
        let p = prev.get(i).copied().unwrap_or(0.0);
        p + (next.get(i).copied().unwrap_or(0.0) - p) * percent
    };
    let setup_at = |i: usize| setup.as_ref().and_then(|s| s.get(i).copied());

    if alpha == 1.0 {
        if blend == MixBlend::Add {
            for (i, d) in deform.iter_mut().enumerate() {
                *d += keyed(i) - setup_at(i).unwrap_or(0.0);
            }
        } else {
            for (i, d) in deform.iter_mut().enumerate() {
                *d = keyed(i);
            }
        }
        return;
    }
    match blend {
        MixBlend::Setup => {
            for (i, d) in deform.iter_mut().enumerate() {
                *d = match setup_at(i) {
                    Some(s) => s + (keyed(i) - s) * alpha,
                    None => keyed(i) * alpha,
                };
            }
        }
        MixBlend::First | MixBlend::Replace => {
            for (i, d) in deform.iter_mut().enumerate() {
                *d += (keyed(i) - *d) * alpha;
            }
        }
        MixBlend::Add => {
            for (i, d) in deform.iter_mut().enumerate() {
                *d += (keyed(i) - setup_at(i).unwrap_or(0.0)) * alpha;
            }
        }
    }
}

/// Frame index of a sequence after `elapsed` seconds of playing from `index` in `mode`.
pub(crate) fn sequence_frame(mode: SequenceMode, index: i32, count: i32, elapsed: f32, delay: f32) -> i32 {
    if mode == SequenceMode::Hold {
        return index;
    }
    let mut index = index;
    if delay > 0.0 {
        index += (elapsed / delay + 0.00001) as i32;
    }
    let count = count.max(1);
    match mode {
        SequenceMode::Hold => index,
        SequenceMode::Once => index.min(count - 1),
        SequenceMode::Loop => index.rem_euclid(count),
        SequenceMode::PingPong => {
            let n = (count << 1) - 2;
            let index = if n == 0 { 0 } else { index.rem_euclid(n) };
            if index >= count { n - index } else { index }
        }
        SequenceMode::OnceReverse => (count - 1 - index).max(0),
        SequenceMode::LoopReverse => count - 1 - index.rem_euclid(count),
        SequenceMode::PingPongReverse => {
            let n = (count << 1) - 2;
            let index = if n == 0 {
                0
            } else {
                (index + count - 1).rem_euclid(n)
            };
            if index >= count { n - index } else { index }
        }
    }
}

fn apply_sequence(
    timeline: &SequenceTimeline,
    skeleton: &mut Skeleton,
    time: f32,
    blend: MixBlend,
    direction: MixDirection,
) {
    if timeline.frames.is_empty() || !slot_bone_active(skeleton, timeline.slot_index) {
        return;
    }
    let drives_slot = skeleton
        .slot_attachment(timeline.slot_index)
        .is_some_and(|attachment| {
            attachment
                .sequence()
                .is_some_and(|s| s.id == timeline.sequence.id)
                || attachment.vertex_attachment().is_some_and(|v| {
                    Some(v.timeline_attachment) == timeline.timeline_attachment
                })
        });
    if !drives_slot {
        return;
    }
    let slot = &mut skeleton.slots[timeline.slot_index];
    if direction == MixDirection::Out {
        if blend == MixBlend::Setup {
            slot.sequence_index = -1;
        }
        return;
    }
    let frames = &timeline.frames;
    if time < frames[0] {
        if matches!(blend, MixBlend::Setup | MixBlend::First) {
            slot.sequence_index = -1;
        }
        return;
    }
    let i = search(frames, time, SEQUENCE_ENTRIES);
    let mode_and_index = frames[i + 1] as i32;
    let delay = frames[i + 2];
    let mode = SequenceMode::from_index(mode_and_index & 0xf);
    slot.sequence_index = sequence_frame(
        mode,
        mode_and_index >> 4,
        timeline.sequence.count as i32,
        time - frames[i],
        delay,
    );
}

/// Appends events keyed in `(last_time, time]`. When `last_time > time` the animation wrapped,
/// so events after `last_time` fire first and the rest start from the beginning.
pub(crate) fn collect_events(
    timeline: &EventTimeline,
    mut last_time: f32,
    time: f32,
    fired: &mut Vec<Event>,
) {
    let frames = &timeline.frames;
    let Some(&last_frame) = frames.last() else {
        return;
    };
    if last_time > time {
        collect_events(timeline, last_time, f32::MAX, fired);
        last_time = -1.0;
    } else if last_time >= last_frame {
        return;
    }
    if time < frames[0] {
        return;
    }
    let mut i = if last_time < frames[0] {
        0
    } else {
        let mut i = search(frames, last_time, 1) + 1;
        let frame_time = frames[i];
        while i > 0 && frames[i - 1] == frame_time {
            i -= 1;
        }
        i
    };
    while i < frames.len() && time >= frames[i] {
        fired.push(timeline.events[i].clone());
        i += 1;
    }
}

fn apply_draw_order(
    timeline: &DrawOrderTimeline,
    skeleton: &mut Skeleton,
    time: f32,
    blend: MixBlend,
    direction: MixDirection,
) {
    let slot_count = skeleton.slots.len();
    let reset = |skeleton: &mut Skeleton| {
        skeleton.draw_order.clear();
        skeleton.draw_order.extend(0..slot_count);
    };
    if direction == MixDirection::Out {
        if blend == MixBlend::Setup {
            reset(skeleton);
        }
        return;
    }
    if timeline.frames.first().is_none_or(|&first| time < first) {
        if matches!(blend, MixBlend::Setup | MixBlend::First) {
            reset(skeleton);
        }
        return;
    }
    let frame = search(&timeline.frames, time, 1);
    match &timeline.draw_orders[frame] {
        Some(order) if order.len() == slot_count => skeleton.draw_order.clone_from(order),
        Some(order) => {
            log::warn!(
                "draw order key has {} slots, skeleton has {slot_count}",
                order.len()
            );
        }
        None => reset(skeleton),
    }
}

fn apply_ik_constraint(
    timeline: &ConstraintTimeline,
    skeleton: &mut Skeleton,
    time: f32,
    alpha: f32,
    blend: MixBlend,
    direction: MixDirection,
) {
    let curve = &timeline.curve;
    if curve.frame_count() == 0 {
        return;
    }
    let Some(constraint) = skeleton.ik_constraints.get_mut(timeline.constraint_index) else {
        return;
    };
    if !constraint.active {
        return;
    }
    let Some(data) = skeleton.data.ik_constraints.get(constraint.data_index()) else {
        return;
    };
    if time < curve.first_time() {
        match blend {
            MixBlend::Setup => {
                constraint.mix = data.mix;
                constraint.softness = data.softness;
            }
            MixBlend::First => {
                constraint.mix += (data.mix - constraint.mix) * alpha;
                constraint.softness += (data.softness - constraint.softness) * alpha;
            }
            MixBlend::Replace | MixBlend::Add => return,
        }
        constraint.bend_direction = data.bend_direction;
        constraint.compress = data.compress;
        constraint.stretch = data.stretch;
        return;
    }

    let [mix, softness] = curve.curve_values::<2>(time);
    let frames = curve.frames();
    let i = search(frames, time, IK_ENTRIES);
    mix_absolute(&mut constraint.mix, data.mix, mix, alpha, blend);
    mix_absolute(&mut constraint.softness, data.softness, softness, alpha, blend);
    if blend == MixBlend::Setup && direction == MixDirection::Out {
        constraint.bend_direction = data.bend_direction;
        constraint.compress = data.compress;
        constraint.stretch = data.stretch;
    } else if direction == MixDirection::In {
        constraint.bend_direction = frames[i + 3] as i32;
        constraint.compress = frames[i + 4] != 0.0;
        constraint.stretch = frames[i + 5] != 0.0;
    }
}

fn apply_transform_constraint(
    timeline: &ConstraintTimeline,
    skeleton: &mut Skeleton,
    time: f32,
    alpha: f32,
    blend: MixBlend,
) {
    let curve = &timeline.curve;
    if curve.frame_count() == 0 {
        return;
    }
    let Some(constraint) = skeleton
        .transform_constraints
        .get_mut(timeline.constraint_index)
    else {
        return;
    };
    if !constraint.active {
        return;
    }
    let Some(data) = skeleton
        .data
        .transform_constraints
        .get(constraint.data_index())
    else {
        return;
    };
    let mixes = [
        (&mut constraint.mix_rotate, data.mix_rotate),
        (&mut constraint.mix_x, data.mix_x),
        (&mut constraint.mix_y, data.mix_y),
        (&mut constraint.mix_scale_x, data.mix_scale_x),
        (&mut constraint.mix_scale_y, data.mix_scale_y),
        (&mut constraint.mix_shear_y, data.mix_shear_y),
    ];
    if time < curve.first_time() {
        for (current, setup) in mixes {
            reset_value(current, setup, alpha, blend);
        }
        return;
    }
    let values = curve.curve_values::<6>(time);
    for ((current, setup), value) in mixes.into_iter().zip(values) {
        mix_absolute(current, setup, value, alpha, blend);
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum PathField {
    Position,
    Spacing,
}

fn apply_path_value(
    timeline: &ConstraintTimeline,
    skeleton: &mut Skeleton,
    time: f32,
    alpha: f32,
    blend: MixBlend,
    field: PathField,
) {
    let curve = &timeline.curve;
    if curve.frame_count() == 0 {
        return;
    }
    let Some(constraint) = skeleton.path_constraints.get_mut(timeline.constraint_index) else {
        return;
    };
    if !constraint.active {
        return;
    }
    let Some(data) = skeleton.data.path_constraints.get(constraint.data_index()) else {
        return;
    };
    let (current, setup) = match field {
        PathField::Position => (&mut constraint.position, data.position),
        PathField::Spacing => (&mut constraint.spacing, data.spacing),
    };
    if time < curve.first_time() {
        reset_value(current, setup, alpha, blend);
        return;
    }
    mix_absolute(current, setup, curve.curve_value(time), alpha, blend);
}

fn apply_path_mix(
    timeline: &ConstraintTimeline,
    skeleton: &mut Skeleton,
    time: f32,
    alpha: f32,
    blend: MixBlend,
) {
    let curve = &timeline.curve;
    if curve.frame_count() == 0 {
        return;
    }
    let Some(constraint) = skeleton.path_constraints.get_mut(timeline.constraint_index) else {
        return;
    };
    if !constraint.active {
        return;
    }
    let Some(data) = skeleton.data.path_constraints.get(constraint.data_index()) else {
        return;
    };
    let mixes = [
        (&mut constraint.mix_rotate, data.mix_rotate),
        (&mut constraint.mix_x, data.mix_x),
        (&mut constraint.mix_y, data.mix_y),
    ];
    if time < curve.first_time() {
        for (current, setup) in mixes {
            reset_value(current, setup, alpha, blend);
        }
        return;
    }
    let values = curve.curve_values::<3>(time);
    for ((current, setup), value) in mixes.into_iter().zip(values) {
        mix_absolute(current, setup, value, alpha, blend);
    }
}

/// `Slot::attachment_state` offsets relative to the state's unkeyed counter.
pub(crate) const ATTACHMENT_SETUP: i32 = 1;
pub(crate) const ATTACHMENT_CURRENT: i32 = 2;

/// Attachment timeline as applied by a track. Slots left unkeyed this frame are marked so the
/// state can restore their setup attachment once every track has been applied.
pub(crate) fn apply_attachment_tracked(
    timeline: &AttachmentTimeline,
    skeleton: &mut Skeleton,
    time: f32,
    blend: MixBlend,
    attachments: bool,
    unkeyed_state: i32,
) {
    let slot_index = timeline.slot_index;
    if !slot_bone_active(skeleton, slot_index) {
        return;
    }
    let name = match keyed_attachment(timeline, time) {
        Some(name) => Some(name.map(str::to_owned)),
        None if matches!(blend, MixBlend::Setup | MixBlend::First) => {
            Some(skeleton.data.slots[slot_index].attachment.clone())
        }
        None => None,
    };
    if let Some(name) = name {
        set_attachment_by_name(skeleton, slot_index, name.as_deref());
        if attachments {
            skeleton.slots[slot_index].attachment_state = unkeyed_state + ATTACHMENT_CURRENT;
        }
    }
    let slot = &mut skeleton.slots[slot_index];
    if slot.attachment_state <= unkeyed_state {
        slot.attachment_state = unkeyed_state + ATTACHMENT_SETUP;
    }
}

/// Rotate timeline mixed along the shortest direction chosen on the first frame. `rotations`
/// holds `[total, last diff]` per timeline at `i`, so a mix that crosses 180 degrees keeps
/// turning the same way instead of snapping back.
#[allow(clippy::too_many_arguments)]
pub(crate) fn apply_rotate_mixed(
    timeline: &BoneTimeline,
    skeleton: &mut Skeleton,
    time: f32,
    alpha: f32,
    blend: MixBlend,
    rotations: &mut [f32],
    i: usize,
    first_frame: bool,
) {
    if first_frame {
        rotations[i] = 0.0;
    }
    if alpha == 1.0 {
        apply_rotate(timeline, skeleton, time, 1.0, blend);
        return;
    }
    let curve = &timeline.curve;
    if curve.frame_count() == 0 {
        return;
    }
    let Some((bone, setup)) = active_bone(skeleton, timeline.bone_index) else {
        return;
    };
    let (r1, r2) = if time < curve.first_time() {
        match blend {
            MixBlend::Setup => {
                bone.rotation = setup.rotation;
                return;
            }
            MixBlend::First => (bone.rotation, setup.rotation),
            MixBlend::Replace | MixBlend::Add => return,
        }
    } else {
        let r1 = if blend == MixBlend::Setup {
            setup.rotation
        } else {
            bone.rotation
        };
        (r1, setup.rotation + curve.curve_value(time))
    };

    let mut diff = r2 - r1;
    diff -= (16384 - (16384.499999999996 - f64::from(diff) / 360.0) as i32) as f32 * 360.0;
    let total = if diff == 0.0 {
        rotations[i]
    } else {
        let (mut last_total, last_diff) = if first_frame {
            (0.0, diff)
        } else {
            (rotations[i], rotations[i + 1])
        };
        let current = diff > 0.0;
        let mut dir = last_total >= 0.0;
        // A sign change near zero is a cross; one after a full turn is a loop.
        if signum(last_diff) != signum(diff) && last_diff.abs() <= 90.0 {
            if last_total.abs() > 180.0 {
                last_total += 360.0 * signum(last_total);
            }
            dir = current;
        }
        let mut total = diff + last_total - last_total % 360.0;
        if dir != current {
            total += 360.0 * signum(last_total);
        }
        rotations[i] = total;
        total
    };
    rotations[i + 1] = diff;
    bone.rotation = r1 + total * alpha;
}
