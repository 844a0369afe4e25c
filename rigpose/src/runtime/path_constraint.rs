use crate::runtime::Skeleton;
use crate::{
    Attachment, PathAttachment, PathConstraintData, PositionMode, RotateMode, SpacingMode,
};
use std::f32::consts::PI;
use std::sync::Arc;

const EPSILON: f32 = 1.0e-5;

#[derive(Clone, Debug)]
pub struct PathConstraint {
    data_index: usize,
    pub bones: Vec<usize>,
    /// Slot whose path attachment the bones follow.
    pub target: usize,
    pub position: f32,
    pub spacing: f32,
    pub mix_rotate: f32,
    pub mix_x: f32,
    pub mix_y: f32,
    pub active: bool,
    scratch: PathScratch,
}

#[derive(Clone, Debug, Default)]
struct PathScratch {
    spaces: Vec<f32>,
    lengths: Vec<f32>,
    positions: Vec<f32>,
    world: Vec<f32>,
    curves: Vec<f32>,
}

impl PathConstraint {
    pub(crate) fn new(data_index: usize, data: &PathConstraintData) -> Self {
        Self {
            data_index,
            bones: data.bones.clone(),
            target: data.target,
            position: data.position,
            spacing: data.spacing,
            mix_rotate: data.mix_rotate,
            mix_x: data.mix_x,
            mix_y: data.mix_y,
            active: true,
            scratch: PathScratch::default(),
        }
    }

    pub fn data_index(&self) -> usize {
        self.data_index
    }

    pub(crate) fn set_to_setup_pose(&mut self, data: &PathConstraintData) {
        self.position = data.position;
        self.spacing = data.spacing;
        self.mix_rotate = data.mix_rotate;
        self.mix_x = data.mix_x;
        self.mix_y = data.mix_y;
    }
}

impl Skeleton {
    pub(crate) fn apply_path_constraint(&mut self, constraint_index: usize) {
        let Some(c) = self.path_constraints.get(constraint_index) else {
            return;
        };
        let (mix_rotate, mix_x, mix_y) = (c.mix_rotate, c.mix_x, c.mix_y);
        if mix_rotate == 0.0 && mix_x == 0.0 && mix_y == 0.0 {
            return;
        }
        let (target, position, spacing) = (c.target, c.position, c.spacing);
        let shared = Arc::clone(&self.data);
        let Some(data) = shared.path_constraints.get(c.data_index) else {
            return;
        };
        let Some(key) = self.slots.get(target).and_then(|s| s.attachment_key()) else {
            return;
        };
        let Some(Attachment::Path(path)) = shared
            .skins
            .get(key.skin)
            .and_then(|skin| skin.attachment(target, &key.name))
        else {
            return;
        };

        let bones = std::mem::take(&mut self.path_constraints[constraint_index].bones);
        let mut scratch = std::mem::take(&mut self.path_constraints[constraint_index].scratch);
        self.solve_path(data, path, target, &bones, &mut scratch, position, spacing, mix_rotate, mix_x, mix_y);
        let c = &mut self.path_constraints[constraint_index];
        c.bones = bones;
        c.scratch = scratch;
    }

    #[allow(clippy::too_many_arguments)]
    fn solve_path(
        &mut self,
        data: &PathConstraintData,
        path: &PathAttachment,
        target: usize,
        bones: &[usize],
        scratch: &mut PathScratch,
        position: f32,
        spacing: f32,
        mix_rotate: f32,
        mix_x: f32,
        mix_y: f32,
    ) {
        let bone_count = bones.len();
        if bone_count == 0 {
            return;
        }
        let tangents = data.rotate_mode == RotateMode::Tangent;
        let scale = data.rotate_mode == RotateMode::ChainScale;
        let spaces_count = if tangents { bone_count } else { bone_count + 1 };

        scratch.spaces.clear();
        scratch.spaces.resize(spaces_count, 0.0);
        scratch.lengths.clear();
        if scale {
            scratch.lengths.resize(bone_count, 0.0);
        }
        let spaces = scratch.spaces.as_mut_slice();
        let lengths = scratch.lengths.as_mut_slice();
        let setup_length = |bone_index: usize| {
            self.data
                .bones
                .get(bone_index)
                .map(|b| b.length)
                .unwrap_or(0.0)
        };
        let world_length = |bone_index: usize, setup: f32| {
            let bone = &self.bones[bone_index];
            let x = setup * bone.a;
            let y = setup * bone.c;
            (x * x + y * y).sqrt()
        };

        match data.spacing_mode {
            SpacingMode::Percent => {
                if scale {
                    for i in 0..spaces_count - 1 {
                        let setup = setup_length(bones[i]);
                        lengths[i] = if setup < EPSILON {
                            0.0
                        } else {
                            world_length(bones[i], setup)
                        };
                    }
                }
                spaces[1..].fill(spacing);
            }
            SpacingMode::Proportional => {
                let mut sum = 0.0f32;
                for i in 0..spaces_count - 1 {
                    let setup = setup_length(bones[i]);
                    if setup < EPSILON {
                        if scale {
                            lengths[i] = 0.0;
                        }
                        spaces[i + 1] = spacing;
                    } else {
                        let length = world_length(bones[i], setup);
                        if scale {
                            lengths[i] = length;
                        }
                        spaces[i + 1] = length;
                        sum += length;
                    }
                }
                if sum > 0.0 {
                    let factor = spaces_count as f32 / sum * spacing;
                    for space in &mut spaces[1..] {
                        *space *= factor;
                    }
                }
            }
            mode => {
                let length_spacing = mode == SpacingMode::Length;
                for i in 0..spaces_count - 1 {
                    let setup = setup_length(bones[i]);
                    if setup < EPSILON {
                        if scale {
                            lengths[i] = 0.0;
                        }
                        spaces[i + 1] = spacing;
                    } else {
                        let length = world_length(bones[i], setup);
                        if scale {
                            lengths[i] = length;
                        }
                        let space = if length_spacing {
                            setup + spacing
                        } else {
                            spacing
                        };
                        spaces[i + 1] = space * length / setup;
                    }
                }
            }
        }

        compute_path_world_positions(
            self,
            &mut scratch.positions,
            &mut scratch.world,
            &mut scratch.curves,
            target,
            path,
            data.position_mode,
            data.spacing_mode,
            spaces,
            tangents,
            position,
        );
        let positions = scratch.positions.as_slice();
        if positions.len() < spaces_count * 3 + 2 {
            return;
        }

        let mut bone_x = positions[0];
        let mut bone_y = positions[1];
        let mut offset_rotation = data.offset_rotation;
        let tip = if offset_rotation == 0.0 {
            data.rotate_mode == RotateMode::Chain
        } else {
            let slot_bone = &self.bones[self.slots[target].bone];
            offset_rotation *= if slot_bone.a * slot_bone.d - slot_bone.b * slot_bone.c > 0.0 {
                PI / 180.0
            } else {
                -PI / 180.0
            };
            false
        };

        let mut p = 3usize;
        for (i, &bone_index) in bones.iter().enumerate() {
            let length = self.data.bones.get(bone_index).map(|b| b.length).unwrap_or(0.0);
            let Some(bone) = self.bones.get_mut(bone_index) else {
                p += 3;
                continue;
            };
            bone.world_x += (bone_x - bone.world_x) * mix_x;
            bone.world_y += (bone_y - bone.world_y) * mix_y;
            let x = positions[p];
            let y = positions[p + 1];
            let dx = x - bone_x;
            let dy = y - bone_y;
            if scale {
                let chain_length = lengths[i];
                if chain_length >= EPSILON {
                    let s = ((dx * dx + dy * dy).sqrt() / chain_length - 1.0) * mix_rotate + 1.0;
                    bone.a *= s;
                    bone.c *= s;
                }
            }
            bone_x = x;
            bone_y = y;
            if mix_rotate > 0.0 {
                let (a, b, c, d) = (bone.a, bone.b, bone.c, bone.d);
                let mut r = if tangents {
                    positions[p - 1]
                } else if spaces[i + 1] < EPSILON {
                    positions[p + 2]
                } else {
                    dy.atan2(dx)
                };
                r -= c.atan2(a);
                if tip {
                    let (sin, cos) = r.sin_cos();
                    bone_x += (length * (cos * a - sin * c) - dx) * mix_rotate;
                    bone_y += (length * (sin * a + cos * c) - dy) * mix_rotate;
                } else {
                    r += offset_rotation;
                }
                if r > PI {
                    r -= 2.0 * PI;
                } else if r < -PI {
                    r += 2.0 * PI;
                }
                r *= mix_rotate;
                let (sin, cos) = r.sin_cos();
                bone.a = cos * a - sin * c;
                bone.b = cos * b - sin * d;
                bone.c = sin * a + cos * c;
                bone.d = sin * b + cos * d;
            }
            self.update_applied_transform(bone_index);
            p += 3;
        }
    }
}

/// Fills `positions` with `[x, y, rotation]` per space along the path (plus a trailing pair),
/// walking `spaces` from `position`.
#[allow(clippy::too_many_arguments)]
fn compute_path_world_positions(
    skeleton: &Skeleton,
    positions: &mut Vec<f32>,
    world: &mut Vec<f32>,
    curves: &mut Vec<f32>,
    slot_index: usize,
    path: &PathAttachment,
    position_mode: PositionMode,
    spacing_mode: SpacingMode,
    spaces: &[f32],
    tangents: bool,
    mut position: f32,
) {
    const NONE: i32 = -1;
    const BEFORE: i32 = -2;
    const AFTER: i32 = -3;

    let spaces_count = spaces.len();
    let closed = path.closed;
    let mut vertices_length = path.vertex.world_vertices_length();
    positions.clear();
    if vertices_length < 6 || spaces_count == 0 {
        return;
    }
    positions.resize(spaces_count * 3 + 2, 0.0);
    let output = positions.as_mut_slice();

    if !path.constant_speed {
        let lengths = path.lengths.as_slice();
        let curve_count = (vertices_length / 6) as i32 - if closed { 1 } else { 2 };
        if curve_count < 0 || curve_count as usize >= lengths.len() {
            return;
        }
        let curve_count = curve_count as usize;
        let path_length = lengths[curve_count];
        if position_mode == PositionMode::Percent {
            position *= path_length;
        }
        let multiplier = match spacing_mode {
            SpacingMode::Percent => path_length,
            SpacingMode::Proportional => path_length / spaces_count as f32,
            _ => 1.0,
        };

        world.clear();
        world.resize(8, 0.0);
        let mut prev_curve = NONE;
        let mut curve = 0usize;
        for (i, &space) in spaces.iter().enumerate() {
            let space = space * multiplier;
            position += space;
            let mut p = position;

            if closed {
                p = p.rem_euclid(path_length);
                curve = 0;
            } else if p < 0.0 {
                if prev_curve != BEFORE {
                    prev_curve = BEFORE;
                    path.vertex
                        .compute_world_vertices(skeleton, slot_index, 2, 4, world, 0, 2);
                }
                add_before_position(p, world, 0, output, i * 3);
                continue;
            } else if p > path_length {
                if prev_curve != AFTER {
                    prev_curve = AFTER;
                    path.vertex.compute_world_vertices(
                        skeleton,
                        slot_index,
                        vertices_length - 6,
                        4,
                        world,
                        0,
                        2,
                    );
                }
                add_after_position(p - path_length, world, 0, output, i * 3);
                continue;
            }

            while curve < lengths.len() {
                let length = lengths[curve];
                if p > length {
                    curve += 1;
                    continue;
                }
                if curve == 0 {
                    p /= length.max(EPSILON);
                } else {
                    let prev = lengths[curve - 1];
                    p = (p - prev) / (length - prev).max(EPSILON);
                }
                break;
            }

            if curve as i32 != prev_curve {
                prev_curve = curve as i32;
                if closed && curve == curve_count {
                    path.vertex.compute_world_vertices(
                        skeleton,
                        slot_index,
                        vertices_length - 4,
                        4,
                        world,
                        0,
                        2,
                    );
                    path.vertex
                        .compute_world_vertices(skeleton, slot_index, 0, 4, world, 4, 2);
                } else {
                    path.vertex.compute_world_vertices(
                        skeleton,
                        slot_index,
                        curve * 6 + 2,
                        8,
                        world,
                        0,
                        2,
                    );
                }
            }

            let w = &world[..8];
            add_curve_position(
                p,
                [w[0], w[1], w[2], w[3], w[4], w[5], w[6], w[7]],
                output,
                i * 3,
                tangents || (i > 0 && space < EPSILON),
            );
        }
        return;
    }

    let curve_count;
    world.clear();
    if closed {
        vertices_length += 2;
        world.resize(vertices_length, 0.0);
        path.vertex.compute_world_vertices(
            skeleton,
            slot_index,
            2,
            vertices_length - 4,
            world,
            0,
            2,
        );
        path.vertex.compute_world_vertices(
            skeleton,
            slot_index,
            0,
            2,
            world,
            vertices_length - 4,
            2,
        );
        world[vertices_length - 2] = world[0];
        world[vertices_length - 1] = world[1];
        curve_count = (vertices_length - 2) / 6;
    } else {
        curve_count = vertices_length / 6 - 1;
        vertices_length -= 4;
        world.resize(vertices_length, 0.0);
        path.vertex
            .compute_world_vertices(skeleton, slot_index, 2, vertices_length, world, 0, 2);
    }

    // Arc length of each curve, approximated with four forward-difference segments.
    curves.clear();
    curves.resize(curve_count, 0.0);
    let mut path_length = 0.0f32;
    let mut x1 = world[0];
    let mut y1 = world[1];
    let mut w = 2usize;
    for curve in curves.iter_mut() {
        let (cx1, cy1, cx2, cy2) = (world[w], world[w + 1], world[w + 2], world[w + 3]);
        let (x2, y2) = (world[w + 4], world[w + 5]);
        let tmpx = (x1 - cx1 * 2.0 + cx2) * 0.1875;
        let tmpy = (y1 - cy1 * 2.0 + cy2) * 0.1875;
        let dddfx = ((cx1 - cx2) * 3.0 - x1 + x2) * 0.09375;
        let dddfy = ((cy1 - cy2) * 3.0 - y1 + y2) * 0.09375;
        let mut ddfx = tmpx * 2.0 + dddfx;
        let mut ddfy = tmpy * 2.0 + dddfy;
        let mut dfx = (cx1 - x1) * 0.75 + tmpx + dddfx * 0.16666667;
        let mut dfy = (cy1 - y1) * 0.75 + tmpy + dddfy * 0.16666667;
        path_length += (dfx * dfx + dfy * dfy).sqrt();
        dfx += ddfx;
        dfy += ddfy;
        ddfx += dddfx;
        ddfy += dddfy;
        path_length += (dfx * dfx + dfy * dfy).sqrt();
        dfx += ddfx;
        dfy += ddfy;
        path_length += (dfx * dfx + dfy * dfy).sqrt();
        dfx += ddfx + dddfx;
        dfy += ddfy + dddfy;
        path_length += (dfx * dfx + dfy * dfy).sqrt();
        *curve = path_length;
        x1 = x2;
        y1 = y2;
        w += 6;
    }

    if position_mode == PositionMode::Percent {
        position *= path_length;
    }
    let multiplier = match spacing_mode {
        SpacingMode::Percent => path_length,
        SpacingMode::Proportional => path_length / spaces_count as f32,
        _ => 1.0,
    };

    let mut segments = [0.0f32; 10];
    let mut curve_length = 0.0f32;
    let mut prev_curve = NONE;
    let mut curve = 0usize;
    let mut segment = 0usize;
    let mut points = [0.0f32; 8];

    for (i, &space) in spaces.iter().enumerate() {
        let space = space * multiplier;
        position += space;
        let mut p = position;

        if closed {
            p = p.rem_euclid(path_length);
            curve = 0;
        } else if p < 0.0 {
            add_before_position(p, world, 0, output, i * 3);
            continue;
        } else if p > path_length {
            add_after_position(p - path_length, world, vertices_length - 4, output, i * 3);
            continue;
        }

        while curve < curves.len() {
            let length = curves[curve];
            if p > length {
                curve += 1;
                continue;
            }
            if curve == 0 {
                p /= length.max(EPSILON);
            } else {
                let prev = curves[curve - 1];
                p = (p - prev) / (length - prev).max(EPSILON);
            }
            break;
        }

        if curve as i32 != prev_curve {
            prev_curve = curve as i32;
            let ii = curve * 6;
            points.copy_from_slice(&world[ii..ii + 8]);
            let [x1, y1, cx1, cy1, cx2, cy2, x2, y2] = points;
            let tmpx = (x1 - cx1 * 2.0 + cx2) * 0.03;
            let tmpy = (y1 - cy1 * 2.0 + cy2) * 0.03;
            let dddfx = ((cx1 - cx2) * 3.0 - x1 + x2) * 0.006;
            let dddfy = ((cy1 - cy2) * 3.0 - y1 + y2) * 0.006;
            let mut ddfx = tmpx * 2.0 + dddfx;
            let mut ddfy = tmpy * 2.0 + dddfy;
            let mut dfx = (cx1 - x1) * 0.3 + tmpx + dddfx * 0.16666667;
            let mut dfy = (cy1 - y1) * 0.3 + tmpy + dddfy * 0.16666667;
            curve_length = (dfx * dfx + dfy * dfy).sqrt();
            segments[0] = curve_length;
            for seg in &mut segments[1..8] {
                dfx += ddfx;
                dfy += ddfy;
                ddfx += dddfx;
                ddfy += dddfy;
                curve_length += (dfx * dfx + dfy * dfy).sqrt();
                *seg = curve_length;
            }
            dfx += ddfx;
            dfy += ddfy;
            curve_length += (dfx * dfx + dfy * dfy).sqrt();
            segments[8] = curve_length;
            dfx += ddfx + dddfx;
            dfy += ddfy + dddfy;
            curve_length += (dfx * dfx + dfy * dfy).sqrt();
            segments[9] = curve_length;
            segment = 0;
        }

        p *= curve_length;
        loop {
            let length = segments[segment];
            if p > length && segment < 9 {
                segment += 1;
                continue;
            }
            if segment == 0 {
                p /= length.max(EPSILON);
            } else {
                let prev = segments[segment - 1];
                p = segment as f32 + (p - prev) / (length - prev).max(EPSILON);
            }
            break;
        }

        add_curve_position(
            p * 0.1,
            points,
            output,
            i * 3,
            tangents || (i > 0 && space < EPSILON),
        );
    }
}

fn add_before_position(p: f32, temp: &[f32], i: usize, output: &mut [f32], o: usize) {
    let x1 = temp[i];
    let y1 = temp[i + 1];
    let r = (temp[i + 3] - y1).atan2(temp[i + 2] - x1);
    output[o] = x1 + p * r.cos();
    output[o + 1] = y1 + p * r.sin();
    output[o + 2] = r;
}

fn add_after_position(p: f32, temp: &[f32], i: usize, output: &mut [f32], o: usize) {
    let x1 = temp[i + 2];
    let y1 = temp[i + 3];
    let r = (y1 - temp[i + 1]).atan2(x1 - temp[i]);
    output[o] = x1 + p * r.cos();
    output[o + 1] = y1 + p * r.sin();
    output[o + 2] = r;
}

/// Point (and optionally tangent) at `p` in `[0, 1]` on a cubic Bezier given as
/// `[x1, y1, cx1, cy1, cx2, cy2, x2, y2]`.
fn add_curve_position(p: f32, curve: [f32; 8], output: &mut [f32], o: usize, tangents: bool) {
    let [x1, y1, cx1, cy1, cx2, cy2, x2, y2] = curve;
    if p < EPSILON || p.is_nan() {
        output[o] = x1;
        output[o + 1] = y1;
        output[o + 2] = (cy1 - y1).atan2(cx1 - x1);
        return;
    }
    let tt = p * p;
    let ttt = tt * p;
    let u = 1.0 - p;
    let uu = u * u;
    let uuu = uu * u;
    let ut = u * p;
    let ut3 = ut * 3.0;
    let uut3 = u * ut3;
    let utt3 = ut3 * p;
    let x = x1 * uuu + cx1 * uut3 + cx2 * utt3 + x2 * ttt;
    let y = y1 * uuu + cy1 * uut3 + cy2 * utt3 + y2 * ttt;
    output[o] = x;
    output[o + 1] = y;
    if tangents {
        output[o + 2] = if p < 0.001 {
            (cy1 - y1).atan2(cx1 - x1)
        } else {
            (y - (y1 * uu + cy1 * ut * 2.0 + cy2 * tt))
                .atan2(x - (x1 * uu + cx1 * ut * 2.0 + cx2 * tt))
        };
    }
}
