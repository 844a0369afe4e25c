use crate::runtime::Skeleton;
use crate::runtime::skeleton::wrap_degrees;
use crate::TransformConstraintData;
use std::f32::consts::{FRAC_PI_2, PI};

#[derive(Clone, Debug)]
pub struct TransformConstraint {
    data_index: usize,
    pub bones: Vec<usize>,
    pub target: usize,
    pub mix_rotate: f32,
    pub mix_x: f32,
    pub mix_y: f32,
    pub mix_scale_x: f32,
    pub mix_scale_y: f32,
    pub mix_shear_y: f32,
    pub active: bool,
}

impl TransformConstraint {
    pub(crate) fn new(data_index: usize, data: &TransformConstraintData) -> Self {
        Self {
            data_index,
            bones: data.bones.clone(),
            target: data.target,
            mix_rotate: data.mix_rotate,
            mix_x: data.mix_x,
            mix_y: data.mix_y,
            mix_scale_x: data.mix_scale_x,
            mix_scale_y: data.mix_scale_y,
            mix_shear_y: data.mix_shear_y,
            active: true,
        }
    }

    pub fn data_index(&self) -> usize {
        self.data_index
    }

    pub(crate) fn set_to_setup_pose(&mut self, data: &TransformConstraintData) {
        self.mix_rotate = data.mix_rotate;
        self.mix_x = data.mix_x;
        self.mix_y = data.mix_y;
        self.mix_scale_x = data.mix_scale_x;
        self.mix_scale_y = data.mix_scale_y;
        self.mix_shear_y = data.mix_shear_y;
    }

    fn mixes(&self) -> Mixes {
        Mixes {
            rotate: self.mix_rotate,
            x: self.mix_x,
            y: self.mix_y,
            scale_x: self.mix_scale_x,
            scale_y: self.mix_scale_y,
            shear_y: self.mix_shear_y,
        }
    }
}

#[derive(Copy, Clone, Debug)]
struct Mixes {
    rotate: f32,
    x: f32,
    y: f32,
    scale_x: f32,
    scale_y: f32,
    shear_y: f32,
}

fn wrap_pi(mut radians: f32) -> f32 {
    if radians > PI {
        radians -= 2.0 * PI;
    } else if radians < -PI {
        radians += 2.0 * PI;
    }
    radians
}

impl Skeleton {
    pub(crate) fn apply_transform_constraint(&mut self, constraint_index: usize) {
        let Some(c) = self.transform_constraints.get(constraint_index) else {
            return;
        };
        let mix = c.mixes();
        if mix.rotate == 0.0
            && mix.x == 0.0
            && mix.y == 0.0
            && mix.scale_x == 0.0
            && mix.scale_y == 0.0
            && mix.shear_y == 0.0
        {
            return;
        }
        let target = c.target;
        let shared = std::sync::Arc::clone(&self.data);
        let Some(data) = shared.transform_constraints.get(c.data_index) else {
            return;
        };
        if self.bones.get(target).is_none() {
            return;
        }
        // Taken out for the duration of the solve so bones can be mutated.
        let bones = std::mem::take(&mut self.transform_constraints[constraint_index].bones);
        match (data.local, data.relative) {
            (false, false) => self.transform_absolute_world(data, target, &bones, mix),
            (false, true) => self.transform_relative_world(data, target, &bones, mix),
            (true, false) => self.transform_absolute_local(data, target, &bones, mix),
            (true, true) => self.transform_relative_local(data, target, &bones, mix),
        }
        self.transform_constraints[constraint_index].bones = bones;
    }

    fn transform_absolute_world(
        &mut self,
        data: &TransformConstraintData,
        target: usize,
        bones: &[usize],
        mix: Mixes,
    ) {
        let t = &self.bones[target];
        let (ta, tb, tc, td) = (t.a, t.b, t.c, t.d);
        let deg_rad_reflect = if ta * td - tb * tc > 0.0 {
            PI / 180.0
        } else {
            -PI / 180.0
        };
        let offset_rotation = data.offset_rotation * deg_rad_reflect;
        let offset_shear_y = data.offset_shear_y * deg_rad_reflect;
        let [offset_x, offset_y] = t.local_to_world(data.offset_x, data.offset_y);
        let translate = mix.x != 0.0 || mix.y != 0.0;

        for &bone_index in bones {
            let Some(bone) = self.bones.get_mut(bone_index) else {
                continue;
            };
            if mix.rotate != 0.0 {
                let (a, b, c, d) = (bone.a, bone.b, bone.c, bone.d);
                let r = wrap_pi(tc.atan2(ta) - c.atan2(a) + offset_rotation) * mix.rotate;
                let (sin, cos) = r.sin_cos();
                bone.a = cos * a - sin * c;
                bone.b = cos * b - sin * d;
                bone.c = sin * a + cos * c;
                bone.d = sin * b + cos * d;
            }
            if translate {
                bone.world_x += (offset_x - bone.world_x) * mix.x;
                bone.world_y += (offset_y - bone.world_y) * mix.y;
            }
            if mix.scale_x != 0.0 {
                let mut s = (bone.a * bone.a + bone.c * bone.c).sqrt();
                if s != 0.0 {
                    s = (s + ((ta * ta + tc * tc).sqrt() - s + data.offset_scale_x) * mix.scale_x)
                        / s;
                }
                bone.a *= s;
                bone.c *= s;
            }
            if mix.scale_y != 0.0 {
                let mut s = (bone.b * bone.b + bone.d * bone.d).sqrt();
                if s != 0.0 {
                    s = (s + ((tb * tb + td * td).sqrt() - s + data.offset_scale_y) * mix.scale_y)
                        / s;
                }
                bone.b *= s;
                bone.d *= s;
            }
            if mix.shear_y > 0.0 {
                let (b, d) = (bone.b, bone.d);
                let by = d.atan2(b);
                let r = wrap_pi(td.atan2(tb) - tc.atan2(ta) - (by - bone.c.atan2(bone.a)));
                let r = by + (r + offset_shear_y) * mix.shear_y;
                let s = (b * b + d * d).sqrt();
                bone.b = r.cos() * s;
                bone.d = r.sin() * s;
            }
            self.update_applied_transform(bone_index);
        }
    }

    fn transform_relative_world(
        &mut self,
        data: &TransformConstraintData,
        target: usize,
        bones: &[usize],
        mix: Mixes,
    ) {
        let t = &self.bones[target];
        let (ta, tb, tc, td) = (t.a, t.b, t.c, t.d);
        let deg_rad_reflect = if ta * td - tb * tc > 0.0 {
            PI / 180.0
        } else {
            -PI / 180.0
        };
        let offset_rotation = data.offset_rotation * deg_rad_reflect;
        let offset_shear_y = data.offset_shear_y * deg_rad_reflect;
        let [offset_x, offset_y] = t.local_to_world(data.offset_x, data.offset_y);
        let translate = mix.x != 0.0 || mix.y != 0.0;

        for &bone_index in bones {
            let Some(bone) = self.bones.get_mut(bone_index) else {
                continue;
            };
            if mix.rotate != 0.0 {
                let (a, b, c, d) = (bone.a, bone.b, bone.c, bone.d);
                let r = wrap_pi(tc.atan2(ta) + offset_rotation) * mix.rotate;
                let (sin, cos) = r.sin_cos();
                bone.a = cos * a - sin * c;
                bone.b = cos * b - sin * d;
                bone.c = sin * a + cos * c;
                bone.d = sin * b + cos * d;
            }
            if translate {
                bone.world_x += offset_x * mix.x;
                bone.world_y += offset_y * mix.y;
            }
            if mix.scale_x != 0.0 {
                let s = ((ta * ta + tc * tc).sqrt() - 1.0 + data.offset_scale_x) * mix.scale_x + 1.0;
                bone.a *= s;
                bone.c *= s;
            }
            if mix.scale_y != 0.0 {
                let s = ((tb * tb + td * td).sqrt() - 1.0 + data.offset_scale_y) * mix.scale_y + 1.0;
                bone.b *= s;
                bone.d *= s;
            }
            if mix.shear_y > 0.0 {
                let r = wrap_pi(td.atan2(tb) - tc.atan2(ta));
                let (b, d) = (bone.b, bone.d);
                let r = d.atan2(b) + (r - FRAC_PI_2 + offset_shear_y) * mix.shear_y;
                let s = (b * b + d * d).sqrt();
                bone.b = r.cos() * s;
                bone.d = r.sin() * s;
            }
            self.update_applied_transform(bone_index);
        }
    }

    fn transform_absolute_local(
        &mut self,
        data: &TransformConstraintData,
        target: usize,
        bones: &[usize],
        mix: Mixes,
    ) {
        let t = &self.bones[target];
        let (t_rotation, t_x, t_y) = (t.arotation, t.ax, t.ay);
        let (t_scale_x, t_scale_y, t_shear_y) = (t.ascale_x, t.ascale_y, t.ashear_y);

        for &bone_index in bones {
            let Some(bone) = self.bones.get(bone_index) else {
                continue;
            };
            let mut rotation = bone.arotation;
            if mix.rotate != 0.0 {
                let r = wrap_degrees(t_rotation - rotation + data.offset_rotation);
                rotation += r * mix.rotate;
            }
            let x = bone.ax + (t_x - bone.ax + data.offset_x) * mix.x;
            let y = bone.ay + (t_y - bone.ay + data.offset_y) * mix.y;
            let mut scale_x = bone.ascale_x;
            if mix.scale_x != 0.0 && scale_x != 0.0 {
                scale_x += (t_scale_x - scale_x + data.offset_scale_x) * mix.scale_x;
            }
            let mut scale_y = bone.ascale_y;
            if mix.scale_y != 0.0 && scale_y != 0.0 {
                scale_y += (t_scale_y - scale_y + data.offset_scale_y) * mix.scale_y;
            }
            let mut shear_y = bone.ashear_y;
            if mix.shear_y != 0.0 {
                let r = wrap_degrees(t_shear_y - shear_y + data.offset_shear_y);
                shear_y += r * mix.shear_y;
            }
            let shear_x = bone.ashear_x;
            self.update_bone_world_transform_with(
                bone_index, x, y, rotation, scale_x, scale_y, shear_x, shear_y,
            );
        }
    }

    fn transform_relative_local(
        &mut self,
        data: &TransformConstraintData,
        target: usize,
        bones: &[usize],
        mix: Mixes,
    ) {
        let t = &self.bones[target];
        let (t_rotation, t_x, t_y) = (t.arotation, t.ax, t.ay);
        let (t_scale_x, t_scale_y, t_shear_y) = (t.ascale_x, t.ascale_y, t.ashear_y);

        for &bone_index in bones {
            let Some(bone) = self.bones.get(bone_index) else {
                continue;
            };
            let rotation = bone.arotation + (t_rotation + data.offset_rotation) * mix.rotate;
            let x = bone.ax + (t_x + data.offset_x) * mix.x;
            let y = bone.ay + (t_y + data.offset_y) * mix.y;
            let scale_x =
                bone.ascale_x * ((t_scale_x - 1.0 + data.offset_scale_x) * mix.scale_x + 1.0);
            let scale_y =
                bone.ascale_y * ((t_scale_y - 1.0 + data.offset_scale_y) * mix.scale_y + 1.0);
            let shear_y = bone.ashear_y + (t_shear_y + data.offset_shear_y) * mix.shear_y;
            let shear_x = bone.ashear_x;
            self.update_bone_world_transform_with(
                bone_index, x, y, rotation, scale_x, scale_y, shear_x, shear_y,
            );
        }
    }
}
