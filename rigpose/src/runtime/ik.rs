use crate::runtime::Skeleton;
use crate::TransformMode;

#[derive(Clone, Debug)]
pub struct IkConstraint {
    data_index: usize,
    /// One bone, or a parent and its child.
    pub bones: Vec<usize>,
    pub target: usize,
    pub mix: f32,
    pub softness: f32,
    pub bend_direction: i32,
    pub compress: bool,
    pub stretch: bool,
    pub active: bool,
}

impl IkConstraint {
    pub(crate) fn new(data_index: usize, data: &crate::IkConstraintData) -> Self {
        Self {
            data_index,
            bones: data.bones.clone(),
            target: data.target,
            mix: data.mix,
            softness: data.softness,
            bend_direction: data.bend_direction,
            compress: data.compress,
            stretch: data.stretch,
            active: true,
        }
    }

    pub fn data_index(&self) -> usize {
        self.data_index
    }

    pub(crate) fn set_to_setup_pose(&mut self, data: &crate::IkConstraintData) {
        self.mix = data.mix;
        self.softness = data.softness;
        self.bend_direction = data.bend_direction;
        self.compress = data.compress;
        self.stretch = data.stretch;
    }

    /// Rotates one bone so its x axis points at the target, optionally compressing or
    /// stretching it towards the target along its length.
    #[allow(clippy::too_many_arguments)]
    pub fn apply_one(
        skeleton: &mut Skeleton,
        bone_index: usize,
        target_x: f32,
        target_y: f32,
        compress: bool,
        stretch: bool,
        uniform: bool,
        alpha: f32,
    ) {
        let Some(bone) = skeleton.bones.get(bone_index) else {
            return;
        };
        let parent = skeleton.parent_transform(bone_index);
        let (pa, mut pb, pc, mut pd) = (parent.a, parent.b, parent.c, parent.d);
        let mode = bone.transform_mode;
        let length = skeleton
            .data
            .bones
            .get(bone.data_index())
            .map(|d| d.length)
            .unwrap_or(0.0);

        let mut rotation_ik = -bone.ashear_x - bone.arotation;
        let (mut tx, mut ty) = if mode == TransformMode::OnlyTranslation {
            (target_x - bone.world_x, target_y - bone.world_y)
        } else {
            if mode == TransformMode::NoRotationOrReflection {
                let s = (pa * pd - pb * pc).abs() / (pa * pa + pc * pc).max(1.0e-12);
                let sa = pa / skeleton.scale_x;
                let sc = pc / skeleton.scale_y;
                pb = -sc * s * skeleton.scale_x;
                pd = sa * s * skeleton.scale_y;
                rotation_ik += sc.atan2(sa).to_degrees();
            }
            let x = target_x - parent.world_x;
            let y = target_y - parent.world_y;
            let det = pa * pd - pb * pc;
            if det.abs() <= 1.0e-12 {
                (0.0, 0.0)
            } else {
                (
                    (x * pd - y * pb) / det - bone.ax,
                    (y * pa - x * pc) / det - bone.ay,
                )
            }
        };

        rotation_ik += ty.atan2(tx).to_degrees();
        if bone.ascale_x < 0.0 {
            rotation_ik += 180.0;
        }
        if rotation_ik > 180.0 {
            rotation_ik -= 360.0;
        } else if rotation_ik < -180.0 {
            rotation_ik += 360.0;
        }

        let mut sx = bone.ascale_x;
        let mut sy = bone.ascale_y;
        if compress || stretch {
            if matches!(
                mode,
                TransformMode::NoScale | TransformMode::NoScaleOrReflection
            ) {
                tx = target_x - bone.world_x;
                ty = target_y - bone.world_y;
            }
            let b = length * sx;
            let dd = (tx * tx + ty * ty).sqrt();
            if b > 1.0e-4 && ((compress && dd < b) || (stretch && dd > b)) {
                let s = (dd / b - 1.0) * alpha + 1.0;
                sx *= s;
                if uniform {
                    sy *= s;
                }
            }
        }

        let (x, y, rotation) = (bone.ax, bone.ay, bone.arotation);
        let (shear_x, shear_y) = (bone.ashear_x, bone.ashear_y);
        skeleton.update_bone_world_transform_with(
            bone_index,
            x,
            y,
            rotation + rotation_ik * alpha,
            sx,
            sy,
            shear_x,
            shear_y,
        );
    }

    /// Bends a parent and child bone so the child's tip reaches the target, choosing the elbow
    /// side by `bend_direction`. Softness eases the chain into full extension.
    #[allow(clippy::too_many_arguments)]
    pub fn apply_two(
        skeleton: &mut Skeleton,
        parent_index: usize,
        child_index: usize,
        target_x: f32,
        target_y: f32,
        bend_direction: i32,
        stretch: bool,
        uniform: bool,
        softness: f32,
        alpha: f32,
    ) {
        const PI: f32 = std::f32::consts::PI;

        let (Some(parent), Some(child)) = (
            skeleton.bones.get(parent_index),
            skeleton.bones.get(child_index),
        ) else {
            return;
        };
        let bend_dir = if bend_direction < 0 { -1.0f32 } else { 1.0 };

        let (px, py) = (parent.ax, parent.ay);
        let parent_rotation = parent.arotation;
        let mut psx = parent.ascale_x;
        let mut psy = parent.ascale_y;
        let mut sx = psx;
        let mut sy = psy;
        let mut csx = child.ascale_x;
        let (os1, mut s2) = if psx < 0.0 {
            psx = -psx;
            (180.0f32, -1.0f32)
        } else {
            (0.0, 1.0)
        };
        if psy < 0.0 {
            psy = -psy;
            s2 = -s2;
        }
        let os2 = if csx < 0.0 {
            csx = -csx;
            180.0f32
        } else {
            0.0
        };

        let cx = child.ax;
        let child_rotation = child.arotation;
        let (child_scale_x, child_scale_y) = (child.ascale_x, child.ascale_y);
        let (child_shear_x, child_shear_y) = (child.ashear_x, child.ashear_y);
        let child_length = skeleton
            .data
            .bones
            .get(child.data_index())
            .map(|d| d.length)
            .unwrap_or(0.0);

        let u = (psx - psy).abs() <= 1.0e-4;
        let (cy, cwx, cwy) = if !u || stretch {
            (0.0, parent.a * cx + parent.world_x, parent.c * cx + parent.world_y)
        } else {
            let cy = child.ay;
            (
                cy,
                parent.a * cx + parent.b * cy + parent.world_x,
                parent.c * cx + parent.d * cy + parent.world_y,
            )
        };

        let pp = skeleton.parent_transform(parent_index);
        let det = pp.a * pp.d - pp.b * pp.c;
        let id = if det.abs() <= 1.0e-12 { 0.0 } else { 1.0 / det };
        let x = cwx - pp.world_x;
        let y = cwy - pp.world_y;
        let dx = (x * pp.d - y * pp.b) * id - px;
        let dy = (y * pp.a - x * pp.c) * id - py;
        let l1 = (dx * dx + dy * dy).sqrt();
        let mut l2 = child_length * csx;

        if l1 < 1.0e-4 {
            Self::apply_one(skeleton, parent_index, target_x, target_y, false, stretch, false, alpha);
            skeleton.update_bone_world_transform_with(
                child_index,
                cx,
                cy,
                0.0,
                child_scale_x,
                child_scale_y,
                child_shear_x,
                child_shear_y,
            );
            return;
        }

        let x = target_x - pp.world_x;
        let y = target_y - pp.world_y;
        let mut tx = (x * pp.d - y * pp.b) * id - px;
        let mut ty = (y * pp.a - x * pp.c) * id - py;
        let mut dd = tx * tx + ty * ty;

        if softness != 0.0 {
            let softness = softness * psx * (csx + 1.0) * 0.5;
            let td = dd.sqrt();
            let sd = td - l1 - l2 * psx + softness;
            if sd > 0.0 {
                let mut p = (sd / (softness * 2.0)).min(1.0) - 1.0;
                p = (sd - softness * (1.0 - p * p)) / td;
                tx -= p * tx;
                ty -= p * ty;
                dd = tx * tx + ty * ty;
            }
        }

        let (a1, a2);
        if u {
            l2 *= psx;
            let mut cos = (dd - l1 * l1 - l2 * l2) / (2.0 * l1 * l2);
            let angle2;
            if cos < -1.0 {
                cos = -1.0;
                angle2 = PI * bend_dir;
            } else if cos > 1.0 {
                cos = 1.0;
                angle2 = 0.0;
                if stretch {
                    let s = (dd.sqrt() / (l1 + l2) - 1.0) * alpha + 1.0;
                    sx *= s;
                    if uniform {
                        sy *= s;
                    }
                }
            } else {
                angle2 = cos.acos() * bend_dir;
            }
            let a = l1 + l2 * cos;
            let b = l2 * angle2.sin();
            a1 = (ty * a - tx * b).atan2(tx * a + ty * b);
            a2 = angle2;
        } else {
            (a1, a2) = solve_non_uniform(l1, l2, psx, psy, tx, ty, dd, bend_dir);
        }

        let os = cy.atan2(cx) * s2;

        let mut a1 = (a1 - os).to_degrees() + os1 - parent_rotation;
        if a1 > 180.0 {
            a1 -= 360.0;
        } else if a1 < -180.0 {
            a1 += 360.0;
        }
        skeleton.update_bone_world_transform_with(
            parent_index,
            px,
            py,
            parent_rotation + a1 * alpha,
            sx,
            sy,
            0.0,
            0.0,
        );

        let mut a2 = ((a2 + os).to_degrees() - child_shear_x) * s2 + os2 - child_rotation;
        if a2 > 180.0 {
            a2 -= 360.0;
        } else if a2 < -180.0 {
            a2 += 360.0;
        }
        skeleton.update_bone_world_transform_with(
            child_index,
            cx,
            cy,
            child_rotation + a2 * alpha,
            child_scale_x,
            child_scale_y,
            child_shear_x,
            child_shear_y,
        );
    }
}

/// Two-bone solve when the parent scales x and y differently: the child's tip moves on an
/// ellipse. Falls back to the closest or farthest reachable point when there is no exact
/// solution.
#[allow(clippy::too_many_arguments)]
fn solve_non_uniform(
    l1: f32,
    l2: f32,
    psx: f32,
    psy: f32,
    tx: f32,
    ty: f32,
    dd: f32,
    bend_dir: f32,
) -> (f32, f32) {
    const PI: f32 = std::f32::consts::PI;

    let a = psx * l2;
    let b = psy * l2;
    let aa = a * a;
    let bb = b * b;
    let ta = ty.atan2(tx);
    let c = bb * l1 * l1 + aa * dd - aa * bb;
    let c1 = -2.0 * bb * l1;
    let c2 = bb - aa;
    let disc = c1 * c1 - 4.0 * c2 * c;
    if disc >= 0.0 {
        let mut q = disc.sqrt();
        if c1 < 0.0 {
            q = -q;
        }
        q = -(c1 + q) * 0.5;
        let r0 = q / c2;
        let r1 = c / q;
        let r = if r0.abs() < r1.abs() { r0 } else { r1 };
        if r * r <= dd {
            let y = (dd - r * r).sqrt() * bend_dir;
            return (ta - y.atan2(r), (y / psy).atan2((r - l1) / psx));
        }
    }

    let mut min_angle = PI;
    let mut min_x = l1 - a;
    let mut min_dist = min_x * min_x;
    let mut min_y = 0.0f32;
    let mut max_angle = 0.0f32;
    let mut max_x = l1 + a;
    let mut max_dist = max_x * max_x;
    let mut max_y = 0.0f32;
    let c = -a * l1 / (aa - bb);
    if (-1.0..=1.0).contains(&c) {
        let c = c.acos();
        let x = a * c.cos() + l1;
        let y = b * c.sin();
        let d = x * x + y * y;
        if d < min_dist {
            min_angle = c;
            min_dist = d;
            min_x = x;
            min_y = y;
        }
        if d > max_dist {
            max_angle = c;
            max_dist = d;
            max_x = x;
            max_y = y;
        }
    }
    if dd <= (min_dist + max_dist) * 0.5 {
        (ta - (min_y * bend_dir).atan2(min_x), min_angle * bend_dir)
    } else {
        (ta - (max_y * bend_dir).atan2(max_x), max_angle * bend_dir)
    }
}

impl Skeleton {
    pub(crate) fn apply_ik_constraint(&mut self, constraint_index: usize) {
        let Some(ik) = self.ik_constraints.get(constraint_index) else {
            return;
        };
        if ik.mix == 0.0 {
            return;
        }
        let Some(target) = self.bones.get(ik.target) else {
            return;
        };
        let (target_x, target_y) = (target.world_x, target.world_y);
        let uniform = self
            .data
            .ik_constraints
            .get(ik.data_index)
            .is_some_and(|d| d.uniform);
        let (mix, softness, bend_direction) = (ik.mix, ik.softness, ik.bend_direction);
        let (compress, stretch) = (ik.compress, ik.stretch);
        let bones = (ik.bones.len(), ik.bones.first().copied(), ik.bones.get(1).copied());

        match bones {
            (1, Some(bone), _) => IkConstraint::apply_one(
                self, bone, target_x, target_y, compress, stretch, uniform, mix,
            ),
            (2, Some(parent), Some(child)) => IkConstraint::apply_two(
                self,
                parent,
                child,
                target_x,
                target_y,
                bend_direction,
                stretch,
                uniform,
                softness,
                mix,
            ),
            (count, _, _) => {
                log::warn!("ik constraint {constraint_index} has {count} bones; expected 1 or 2")
            }
        }
    }
}
