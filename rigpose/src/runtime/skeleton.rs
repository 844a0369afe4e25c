use crate::runtime::{IkConstraint, PathConstraint, TransformConstraint};
use crate::{Attachment, SkeletonData, Skin, TransformMode};
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct Bone {
    data_index: usize,
    parent: Option<usize>,

    pub transform_mode: TransformMode,
    pub active: bool,

    pub x: f32,
    pub y: f32,
    pub rotation: f32,
    pub scale_x: f32,
    pub scale_y: f32,
    pub shear_x: f32,
    pub shear_y: f32,

    pub ax: f32,
    pub ay: f32,
    pub arotation: f32,
    pub ascale_x: f32,
    pub ascale_y: f32,
    pub ashear_x: f32,
    pub ashear_y: f32,

    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub world_x: f32,
    pub world_y: f32,
}

impl Bone {
    fn new(data_index: usize, data: &crate::BoneData) -> Self {
        Self {
            data_index,
            parent: data.parent,
            transform_mode: data.transform_mode,
            active: !data.skin_required,
            x: data.x,
            y: data.y,
            rotation: data.rotation,
            scale_x: data.scale_x,
            scale_y: data.scale_y,
            shear_x: data.shear_x,
            shear_y: data.shear_y,
            ax: data.x,
            ay: data.y,
            arotation: data.rotation,
            ascale_x: data.scale_x,
            ascale_y: data.scale_y,
            ashear_x: data.shear_x,
            ashear_y: data.shear_y,
            a: 1.0,
            b: 0.0,
            c: 0.0,
            d: 1.0,
            world_x: 0.0,
            world_y: 0.0,
        }
    }

    pub fn data_index(&self) -> usize {
        self.data_index
    }

    pub fn parent_index(&self) -> Option<usize> {
        self.parent
    }

    pub fn set_to_setup_pose(&mut self, data: &crate::BoneData) {
        self.x = data.x;
        self.y = data.y;
        self.rotation = data.rotation;
        self.scale_x = data.scale_x;
        self.scale_y = data.scale_y;
        self.shear_x = data.shear_x;
        self.shear_y = data.shear_y;
        self.transform_mode = data.transform_mode;
    }

    pub fn world_rotation_x(&self) -> f32 {
        self.c.atan2(self.a).to_degrees()
    }

    pub fn world_rotation_y(&self) -> f32 {
        self.d.atan2(self.b).to_degrees()
    }

    pub fn world_scale_x(&self) -> f32 {
        (self.a * self.a + self.c * self.c).sqrt()
    }

    pub fn world_scale_y(&self) -> f32 {
        (self.b * self.b + self.d * self.d).sqrt()
    }

    /// Transforms a world position into this bone's local coordinates.
    pub fn world_to_local(&self, world_x: f32, world_y: f32) -> [f32; 2] {
        let det = self.a * self.d - self.b * self.c;
        let inv_det = if det.abs() > 1.0e-12 { 1.0 / det } else { 0.0 };
        let x = world_x - self.world_x;
        let y = world_y - self.world_y;
        [
            x * self.d * inv_det - y * self.b * inv_det,
            y * self.a * inv_det - x * self.c * inv_det,
        ]
    }

    pub fn local_to_world(&self, local_x: f32, local_y: f32) -> [f32; 2] {
        [
            local_x * self.a + local_y * self.b + self.world_x,
            local_x * self.c + local_y * self.d + self.world_y,
        ]
    }

    pub fn world_to_local_rotation(&self, world_rotation: f32) -> f32 {
        let (sin, cos) = world_rotation.to_radians().sin_cos();
        (self.a * sin - self.c * cos)
            .atan2(self.d * cos - self.b * sin)
            .to_degrees()
            + self.rotation
            - self.shear_x
    }

    pub fn local_to_world_rotation(&self, local_rotation: f32) -> f32 {
        let local_rotation = local_rotation - (self.rotation - self.shear_x);
        let (sin, cos) = local_rotation.to_radians().sin_cos();
        (cos * self.c + sin * self.d)
            .atan2(cos * self.a + sin * self.b)
            .to_degrees()
    }

    /// Rotates the world matrix in place. The applied transform is left stale.
    pub fn rotate_world(&mut self, degrees: f32) {
        let (sin, cos) = degrees.to_radians().sin_cos();
        let (a, b, c, d) = (self.a, self.b, self.c, self.d);
        self.a = cos * a - sin * c;
        self.b = cos * b - sin * d;
        self.c = sin * a + cos * c;
        self.d = sin * b + cos * d;
    }

    #[cfg(feature = "glam")]
    pub fn world_affine(&self) -> glam::Affine2 {
        glam::Affine2::from_cols_array(&[
            self.a,
            self.c,
            self.b,
            self.d,
            self.world_x,
            self.world_y,
        ])
    }
}

/// World matrix a bone composes its local transform with: the parent bone's, or the skeleton
/// placement for the root.
#[derive(Copy, Clone, Debug)]
pub struct ParentTransform {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub world_x: f32,
    pub world_y: f32,
}

impl ParentTransform {
    fn of(bone: &Bone) -> Self {
        Self {
            a: bone.a,
            b: bone.b,
            c: bone.c,
            d: bone.d,
            world_x: bone.world_x,
            world_y: bone.world_y,
        }
    }
}

/// Identifies a slot's current attachment by the skin that holds it and its key in that skin.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct AttachmentKey {
    pub skin: usize,
    pub name: String,
}

#[derive(Clone, Debug)]
pub struct Slot {
    data_index: usize,
    pub bone: usize,
    attachment: Option<AttachmentKey>,
    pub(crate) attachment_state: i32,
    /// Region index for sequence attachments; `-1` means the sequence's setup index.
    pub sequence_index: i32,
    pub deform: Vec<f32>,
    pub color: [f32; 4],
    pub has_dark: bool,
    pub dark_color: [f32; 3],
}

impl Slot {
    pub fn data_index(&self) -> usize {
        self.data_index
    }

    pub fn attachment_key(&self) -> Option<&AttachmentKey> {
        self.attachment.as_ref()
    }

    pub fn attachment_name(&self) -> Option<&str> {
        self.attachment.as_ref().map(|k| k.name.as_str())
    }
}

/// Axis-aligned box around the visible region and mesh attachments.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Bounds {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum UpdateCacheItem {
    Bone(usize),
    Ik(usize),
    Transform(usize),
    Path(usize),
}

#[derive(Copy, Clone, Debug)]
enum ConstraintKind {
    Ik,
    Transform,
    Path,
}

#[derive(Clone, Debug)]
pub struct Skeleton {
    pub data: Arc<SkeletonData>,
    pub bones: Vec<Bone>,
    bone_children: Vec<Vec<usize>>,
    pub slots: Vec<Slot>,
    /// Slot indices in draw order.
    pub draw_order: Vec<usize>,
    skin: Option<usize>,
    pub ik_constraints: Vec<IkConstraint>,
    pub transform_constraints: Vec<TransformConstraint>,
    pub path_constraints: Vec<PathConstraint>,
    pub color: [f32; 4],
    pub x: f32,
    pub y: f32,
    pub scale_x: f32,
    pub scale_y: f32,
    pub time: f32,
    update_cache: Vec<UpdateCacheItem>,
}

impl Skeleton {
    pub fn new(data: Arc<SkeletonData>) -> Self {
        let bones = data
            .bones
            .iter()
            .enumerate()
            .map(|(data_index, bone)| Bone::new(data_index, bone))
            .collect::<Vec<_>>();
        let bone_children = build_bone_children_indices(&bones);

        let slots = data
            .slots
            .iter()
            .enumerate()
            .map(|(data_index, slot)| Slot {
                data_index,
                bone: slot.bone,
                attachment: None,
                attachment_state: 0,
                sequence_index: -1,
                deform: Vec::new(),
                color: slot.color,
                has_dark: slot.has_dark,
                dark_color: slot.dark_color,
            })
            .collect::<Vec<_>>();
        let draw_order = (0..slots.len()).collect::<Vec<_>>();

        let ik_constraints = data
            .ik_constraints
            .iter()
            .enumerate()
            .map(|(i, c)| IkConstraint::new(i, c))
            .collect();
        let transform_constraints = data
            .transform_constraints
            .iter()
            .enumerate()
            .map(|(i, c)| TransformConstraint::new(i, c))
            .collect();
        let path_constraints = data
            .path_constraints
            .iter()
            .enumerate()
            .map(|(i, c)| PathConstraint::new(i, c))
            .collect();

        let mut out = Self {
            data,
            bones,
            bone_children,
            slots,
            draw_order,
            skin: None,
            ik_constraints,
            transform_constraints,
            path_constraints,
            color: [1.0; 4],
            x: 0.0,
            y: 0.0,
            scale_x: 1.0,
            scale_y: 1.0,
            time: 0.0,
            update_cache: Vec::new(),
        };
        out.set_slots_to_setup_pose();
        out.update_cache();
        out
    }

    pub fn update(&mut self, delta: f32) {
        self.time += delta;
    }

    pub fn find_bone(&self, name: &str) -> Option<usize> {
        self.data.find_bone(name)
    }

    pub fn find_slot(&self, name: &str) -> Option<usize> {
        self.data.find_slot(name)
    }

    pub fn find_ik_constraint(&self, name: &str) -> Option<usize> {
        self.data.find_ik_constraint(name)
    }

    pub fn find_transform_constraint(&self, name: &str) -> Option<usize> {
        self.data.find_transform_constraint(name)
    }

    pub fn find_path_constraint(&self, name: &str) -> Option<usize> {
        self.data.find_path_constraint(name)
    }

    pub fn skin(&self) -> Option<usize> {
        self.skin
    }

    pub fn current_skin(&self) -> Option<&Skin> {
        self.skin.and_then(|i| self.data.skins.get(i))
    }

    /// Rebuilds the ordered list of bones and constraints `update_world_transform` runs, and
    /// recomputes which bones and constraints are active for the current skin.
    pub fn update_cache(&mut self) {
        let skin = self.skin.and_then(|i| self.data.skins.get(i));

        let mut sorted = vec![false; self.bones.len()];
        for (i, bone) in self.bones.iter_mut().enumerate() {
            let required = self.data.bones.get(i).is_some_and(|b| b.skin_required);
            sorted[i] = required;
            bone.active = !required;
        }
        if let Some(skin) = skin {
            for &bone_index in &skin.bones {
                let mut cur = Some(bone_index);
                while let Some(i) = cur {
                    let Some(bone) = self.bones.get_mut(i) else {
                        break;
                    };
                    sorted[i] = false;
                    bone.active = true;
                    cur = bone.parent;
                }
            }
        }

        for c in &mut self.ik_constraints {
            let skin_required = self
                .data
                .ik_constraints
                .get(c.data_index())
                .is_some_and(|d| d.skin_required);
            let in_skin = skin.is_some_and(|s| s.ik_constraints.contains(&c.data_index()));
            let target_active = self.bones.get(c.target).is_some_and(|b| b.active);
            c.active = target_active && (!skin_required || in_skin);
        }
        for c in &mut self.transform_constraints {
            let skin_required = self
                .data
                .transform_constraints
                .get(c.data_index())
                .is_some_and(|d| d.skin_required);
            let in_skin = skin.is_some_and(|s| s.transform_constraints.contains(&c.data_index()));
            let target_active = self.bones.get(c.target).is_some_and(|b| b.active);
            c.active = target_active && (!skin_required || in_skin);
        }
        for c in &mut self.path_constraints {
            let skin_required = self
                .data
                .path_constraints
                .get(c.data_index())
                .is_some_and(|d| d.skin_required);
            let in_skin = skin.is_some_and(|s| s.path_constraints.contains(&c.data_index()));
            let target_active = self
                .slots
                .get(c.target)
                .and_then(|s| self.bones.get(s.bone))
                .is_some_and(|b| b.active);
            c.active = target_active && (!skin_required || in_skin);
        }

        let mut ordered = Vec::with_capacity(
            self.ik_constraints.len()
                + self.transform_constraints.len()
                + self.path_constraints.len(),
        );
        for (index, c) in self.ik_constraints.iter().enumerate() {
            if let Some(data) = self.data.ik_constraints.get(c.data_index()) {
                ordered.push((data.order, ConstraintKind::Ik, index));
            }
        }
        for (index, c) in self.transform_constraints.iter().enumerate() {
            if let Some(data) = self.data.transform_constraints.get(c.data_index()) {
                ordered.push((data.order, ConstraintKind::Transform, index));
            }
        }
        for (index, c) in self.path_constraints.iter().enumerate() {
            if let Some(data) = self.data.path_constraints.get(c.data_index()) {
                ordered.push((data.order, ConstraintKind::Path, index));
            }
        }
        // Stable: ties keep IK, then transform, then path.
        ordered.sort_by_key(|&(order, _, _)| order);

        let mut out = Vec::<UpdateCacheItem>::new();
        for (_, kind, index) in ordered {
            match kind {
                ConstraintKind::Ik => self.sort_ik_constraint(index, &mut sorted, &mut out),
                ConstraintKind::Transform => {
                    self.sort_transform_constraint(index, &mut sorted, &mut out)
                }
                ConstraintKind::Path => self.sort_path_constraint(index, &mut sorted, &mut out),
            }
        }
        for bone_index in 0..self.bones.len() {
            self.sort_bone(bone_index, &mut sorted, &mut out);
        }

        log::debug!(
            "update cache rebuilt: {} bones, {} constraints",
            out.iter()
                .filter(|i| matches!(i, UpdateCacheItem::Bone(_)))
                .count(),
            out.iter()
                .filter(|i| !matches!(i, UpdateCacheItem::Bone(_)))
                .count()
        );
        self.update_cache = out;
    }

    fn sort_ik_constraint(
        &self,
        index: usize,
        sorted: &mut [bool],
        out: &mut Vec<UpdateCacheItem>,
    ) {
        let c = &self.ik_constraints[index];
        if !c.active {
            return;
        }
        self.sort_bone(c.target, sorted, out);
        let Some(&parent) = c.bones.first() else {
            return;
        };
        self.sort_bone(parent, sorted, out);
        if c.bones.len() == 1 {
            out.push(UpdateCacheItem::Ik(index));
            self.sort_reset_children(parent, sorted);
        } else {
            let child = c.bones[c.bones.len() - 1];
            self.sort_bone(child, sorted, out);
            out.push(UpdateCacheItem::Ik(index));
            self.sort_reset_children(parent, sorted);
            if let Some(s) = sorted.get_mut(child) {
                *s = true;
            }
        }
    }

    fn sort_transform_constraint(
        &self,
        index: usize,
        sorted: &mut [bool],
        out: &mut Vec<UpdateCacheItem>,
    ) {
        let c = &self.transform_constraints[index];
        if !c.active {
            return;
        }
        let local = self
            .data
            .transform_constraints
            .get(c.data_index())
            .is_some_and(|d| d.local);
        self.sort_bone(c.target, sorted, out);
        for &bone_index in &c.bones {
            if local {
                if let Some(parent) = self.bones.get(bone_index).and_then(|b| b.parent) {
                    self.sort_bone(parent, sorted, out);
                }
            }
            self.sort_bone(bone_index, sorted, out);
        }
        out.push(UpdateCacheItem::Transform(index));
        for &bone_index in &c.bones {
            self.sort_reset_children(bone_index, sorted);
        }
        for &bone_index in &c.bones {
            if let Some(s) = sorted.get_mut(bone_index) {
                *s = true;
            }
        }
    }

    fn sort_path_constraint(
        &self,
        index: usize,
        sorted: &mut [bool],
        out: &mut Vec<UpdateCacheItem>,
    ) {
        let c = &self.path_constraints[index];
        if !c.active {
            return;
        }
        let slot_index = c.target;
        let Some(slot) = self.slots.get(slot_index) else {
            return;
        };
        let slot_bone = slot.bone;

        if let Some(skin) = self.current_skin() {
            self.sort_path_skin(skin, slot_index, slot_bone, sorted, out);
        }
        if let Some(default_skin) = self.data.default_skin {
            if Some(default_skin) != self.skin {
                if let Some(skin) = self.data.skins.get(default_skin) {
                    self.sort_path_skin(skin, slot_index, slot_bone, sorted, out);
                }
            }
        }
        for skin in &self.data.skins {
            self.sort_path_skin(skin, slot_index, slot_bone, sorted, out);
        }
        if let Some(attachment) = self.slot_attachment(slot_index) {
            self.sort_path_attachment(attachment, slot_bone, sorted, out);
        }

        for &bone_index in &c.bones {
            self.sort_bone(bone_index, sorted, out);
        }
        out.push(UpdateCacheItem::Path(index));
        for &bone_index in &c.bones {
            self.sort_reset_children(bone_index, sorted);
        }
        for &bone_index in &c.bones {
            if let Some(s) = sorted.get_mut(bone_index) {
                *s = true;
            }
        }
    }

    fn sort_path_skin(
        &self,
        skin: &Skin,
        slot_index: usize,
        slot_bone: usize,
        sorted: &mut [bool],
        out: &mut Vec<UpdateCacheItem>,
    ) {
        for (_, attachment) in skin.slot_attachments(slot_index) {
            self.sort_path_attachment(attachment, slot_bone, sorted, out);
        }
    }

    fn sort_path_attachment(
        &self,
        attachment: &Attachment,
        slot_bone: usize,
        sorted: &mut [bool],
        out: &mut Vec<UpdateCacheItem>,
    ) {
        let Attachment::Path(path) = attachment else {
            return;
        };
        match &path.vertex.vertices {
            crate::MeshVertices::Unweighted(_) => self.sort_bone(slot_bone, sorted, out),
            crate::MeshVertices::Weighted(vertices) => {
                for weights in vertices {
                    for w in weights {
                        self.sort_bone(w.bone, sorted, out);
                    }
                }
            }
        }
    }

    fn sort_bone(&self, bone_index: usize, sorted: &mut [bool], out: &mut Vec<UpdateCacheItem>) {
        if sorted.get(bone_index).copied().unwrap_or(true) {
            return;
        }
        if let Some(parent) = self.bones[bone_index].parent {
            self.sort_bone(parent, sorted, out);
        }
        sorted[bone_index] = true;
        out.push(UpdateCacheItem::Bone(bone_index));
    }

    fn sort_reset_children(&self, bone_index: usize, sorted: &mut [bool]) {
        let Some(children) = self.bone_children.get(bone_index) else {
            return;
        };
        for &child in children {
            if !self.bones[child].active {
                continue;
            }
            if sorted[child] {
                self.sort_reset_children(child, sorted);
            }
            sorted[child] = false;
        }
    }

    /// Resets applied transforms to the local ones, then runs the update cache.
    pub fn update_world_transform(&mut self) {
        for bone in &mut self.bones {
            bone.ax = bone.x;
            bone.ay = bone.y;
            bone.arotation = bone.rotation;
            bone.ascale_x = bone.scale_x;
            bone.ascale_y = bone.scale_y;
            bone.ashear_x = bone.shear_x;
            bone.ashear_y = bone.shear_y;
        }

        let cache = std::mem::take(&mut self.update_cache);
        for item in &cache {
            match *item {
                UpdateCacheItem::Bone(i) => self.update_bone_world_transform(i),
                UpdateCacheItem::Ik(i) => self.apply_ik_constraint(i),
                UpdateCacheItem::Transform(i) => self.apply_transform_constraint(i),
                UpdateCacheItem::Path(i) => self.apply_path_constraint(i),
            }
        }
        self.update_cache = cache;
    }

    fn update_bone_world_transform(&mut self, bone_index: usize) {
        let Some(bone) = self.bones.get(bone_index) else {
            return;
        };
        let (x, y, rotation) = (bone.ax, bone.ay, bone.arotation);
        let (scale_x, scale_y) = (bone.ascale_x, bone.ascale_y);
        let (shear_x, shear_y) = (bone.ashear_x, bone.ashear_y);
        self.update_bone_world_transform_with(
            bone_index, x, y, rotation, scale_x, scale_y, shear_x, shear_y,
        );
    }

    /// Stores the given values as the bone's applied transform and computes its world matrix
    /// from its parent's (or the skeleton placement for the root).
    #[allow(clippy::too_many_arguments)]
    pub fn update_bone_world_transform_with(
        &mut self,
        bone_index: usize,
        x: f32,
        y: f32,
        rotation: f32,
        scale_x: f32,
        scale_y: f32,
        shear_x: f32,
        shear_y: f32,
    ) {
        let parent = self
            .bones
            .get(bone_index)
            .and_then(|b| b.parent)
            .and_then(|p| self.bones.get(p))
            .map(ParentTransform::of);
        let (skeleton_x, skeleton_y) = (self.x, self.y);
        let (skeleton_scale_x, skeleton_scale_y) = (self.scale_x, self.scale_y);
        let Some(bone) = self.bones.get_mut(bone_index) else {
            return;
        };
        bone.ax = x;
        bone.ay = y;
        bone.arotation = rotation;
        bone.ascale_x = scale_x;
        bone.ascale_y = scale_y;
        bone.ashear_x = shear_x;
        bone.ashear_y = shear_y;

        match parent {
            None => update_world_transform_root(
                bone,
                skeleton_x,
                skeleton_y,
                skeleton_scale_x,
                skeleton_scale_y,
            ),
            Some(parent) => {
                update_world_transform_child(bone, skeleton_scale_x, skeleton_scale_y, &parent)
            }
        }
    }

    /// World matrix of the bone's parent; for the root, the skeleton's own placement.
    pub fn parent_transform(&self, bone_index: usize) -> ParentTransform {
        match self
            .bones
            .get(bone_index)
            .and_then(|b| b.parent)
            .and_then(|p| self.bones.get(p))
        {
            Some(parent) => ParentTransform::of(parent),
            None => ParentTransform {
                a: self.scale_x,
                b: 0.0,
                c: 0.0,
                d: self.scale_y,
                world_x: self.x,
                world_y: self.y,
            },
        }
    }

    /// Derives the bone's applied transform from its current world matrix, so that recomputing
    /// the world transform from the applied values reproduces the same matrix. Used after a
    /// constraint writes the world matrix directly.
    pub fn update_applied_transform(&mut self, bone_index: usize) {
        let Some(applied) = self.applied_from_world(bone_index) else {
            return;
        };
        let bone = &mut self.bones[bone_index];
        [
            bone.ax,
            bone.ay,
            bone.arotation,
            bone.ascale_x,
            bone.ascale_y,
            bone.ashear_x,
            bone.ashear_y,
        ] = applied;
    }

    fn applied_from_world(&self, bone_index: usize) -> Option<[f32; 7]> {
        let bone = self.bones.get(bone_index)?;
        let world = [bone.a, bone.b, bone.c, bone.d];
        let inv_sx = inverse_scale(self.scale_x);
        let inv_sy = inverse_scale(self.scale_y);
        let unscaled = [world[0] * inv_sx, world[1] * inv_sx, world[2] * inv_sy, world[3] * inv_sy];

        let Some(parent) = bone.parent.and_then(|p| self.bones.get(p)) else {
            let local = decompose(unscaled);
            return Some([
                (bone.world_x - self.x) * inv_sx,
                (bone.world_y - self.y) * inv_sy,
                local.angle0,
                local.scale_x,
                local.scale_y,
                0.0,
                wrap_degrees(local.angle1 - local.angle0 - 90.0),
            ]);
        };

        let p = [parent.a, parent.b, parent.c, parent.d];
        let p_inv = invert(p)?;
        let dx = bone.world_x - parent.world_x;
        let dy = bone.world_y - parent.world_y;
        let ax = p_inv[0] * dx + p_inv[1] * dy;
        let ay = p_inv[2] * dx + p_inv[3] * dy;

        let standard = |m: [f32; 4], rotation_offset: f32| {
            let local = decompose(m);
            [
                ax,
                ay,
                local.angle0 + rotation_offset,
                local.scale_x,
                local.scale_y,
                0.0,
                wrap_degrees(local.angle1 - local.angle0 - 90.0),
            ]
        };

        match bone.transform_mode {
            TransformMode::Normal => Some(standard(mul(p_inv, world), 0.0)),
            TransformMode::OnlyTranslation => Some(standard(unscaled, 0.0)),
            TransformMode::NoRotationOrReflection => {
                let (m, prx) = no_rotation_parent(p, self.scale_x, self.scale_y);
                let m_inv = invert(m)?;
                Some(standard(mul(m_inv, unscaled), prx))
            }
            TransformMode::NoScale | TransformMode::NoScaleOrReflection => {
                let len = (unscaled[0] * unscaled[0] + unscaled[2] * unscaled[2]).sqrt();
                let rotation = if len > 1.0e-4 {
                    let zx = self.scale_x * unscaled[0] / len;
                    let zy = self.scale_y * unscaled[2] / len;
                    let vx = p_inv[0] * zx + p_inv[1] * zy;
                    let vy = p_inv[2] * zx + p_inv[3] * zy;
                    vy.atan2(vx).to_degrees()
                } else {
                    bone.arotation
                };
                let z = no_scale_basis(
                    p,
                    rotation,
                    self.scale_x,
                    self.scale_y,
                    bone.transform_mode == TransformMode::NoScale,
                );
                let shear = decompose(mul(invert(z)?, unscaled));
                Some([
                    ax,
                    ay,
                    rotation,
                    shear.scale_x,
                    shear.scale_y,
                    shear.angle0,
                    wrap_degrees(shear.angle1 - 90.0),
                ])
            }
        }
    }

    pub fn set_to_setup_pose(&mut self) {
        self.set_bones_to_setup_pose();
        self.set_slots_to_setup_pose();
    }

    /// Resets bones and constraint instances to the setup pose.
    pub fn set_bones_to_setup_pose(&mut self) {
        let data = Arc::clone(&self.data);
        for (bone, bone_data) in self.bones.iter_mut().zip(&data.bones) {
            bone.set_to_setup_pose(bone_data);
        }
        for c in &mut self.ik_constraints {
            if let Some(d) = data.ik_constraints.get(c.data_index()) {
                c.set_to_setup_pose(d);
            }
        }
        for c in &mut self.transform_constraints {
            if let Some(d) = data.transform_constraints.get(c.data_index()) {
                c.set_to_setup_pose(d);
            }
        }
        for c in &mut self.path_constraints {
            if let Some(d) = data.path_constraints.get(c.data_index()) {
                c.set_to_setup_pose(d);
            }
        }
    }

    /// Resets slot colors, attachments and draw order to the setup pose.
    pub fn set_slots_to_setup_pose(&mut self) {
        self.draw_order = (0..self.slots.len()).collect();
        for slot_index in 0..self.slots.len() {
            self.set_slot_to_setup_pose(slot_index);
        }
    }

    pub fn set_slot_to_setup_pose(&mut self, slot_index: usize) {
        let data = Arc::clone(&self.data);
        let Some(slot_data) = data.slots.get(slot_index) else {
            return;
        };
        let key = slot_data
            .attachment
            .as_deref()
            .and_then(|name| self.attachment_key(slot_index, name));
        let slot = &mut self.slots[slot_index];
        slot.color = slot_data.color;
        slot.has_dark = slot_data.has_dark;
        slot.dark_color = slot_data.dark_color;
        if slot_data.attachment.is_some() {
            // A re-resolved setup attachment always resets deform and sequence state.
            slot.attachment = None;
        }
        self.set_slot_attachment(slot_index, key);
    }

    /// Switches skins. From one skin to another, attachments that came from the old skin are
    /// replaced by the new skin's entries with the same key; from no skin, setup attachments are
    /// resolved in the new skin.
    pub fn set_skin(&mut self, skin: Option<usize>) -> Result<(), crate::Error> {
        if let Some(index) = skin {
            if index >= self.data.skins.len() {
                return Err(crate::Error::InvalidValue {
                    message: format!("skin index {index} out of range"),
                });
            }
        }
        if skin == self.skin {
            return Ok(());
        }
        let data = Arc::clone(&self.data);
        if let Some(new_index) = skin {
            let new_skin = &data.skins[new_index];
            match self.skin {
                Some(old_index) => {
                    for slot_index in 0..self.slots.len() {
                        let Some(key) = self.slots[slot_index].attachment.clone() else {
                            continue;
                        };
                        if key.skin != old_index {
                            continue;
                        }
                        if new_skin.attachment(slot_index, &key.name).is_some() {
                            self.set_slot_attachment(
                                slot_index,
                                Some(AttachmentKey {
                                    skin: new_index,
                                    name: key.name,
                                }),
                            );
                        }
                    }
                }
                None => {
                    for (slot_index, slot_data) in data.slots.iter().enumerate() {
                        let Some(name) = slot_data.attachment.as_deref() else {
                            continue;
                        };
                        if new_skin.attachment(slot_index, name).is_some() {
                            self.set_slot_attachment(
                                slot_index,
                                Some(AttachmentKey {
                                    skin: new_index,
                                    name: name.to_string(),
                                }),
                            );
                        }
                    }
                }
            }
        }
        self.skin = skin;
        self.update_cache();
        Ok(())
    }

    pub fn set_skin_by_name(&mut self, name: &str) -> Result<(), crate::Error> {
        let index = self
            .data
            .find_skin(name)
            .ok_or_else(|| crate::Error::UnknownSkin {
                name: name.to_string(),
            })?;
        self.set_skin(Some(index))
    }

    /// Looks `name` up in the current skin, then in the default skin.
    pub fn attachment_key(&self, slot_index: usize, name: &str) -> Option<AttachmentKey> {
        let lookup = |skin: Option<usize>| {
            let index = skin?;
            self.data
                .skins
                .get(index)?
                .attachment(slot_index, name)
                .map(|_| AttachmentKey {
                    skin: index,
                    name: name.to_string(),
                })
        };
        lookup(self.skin).or_else(|| lookup(self.data.default_skin))
    }

    pub fn attachment(&self, slot_index: usize, name: &str) -> Option<&Attachment> {
        let key = self.attachment_key(slot_index, name)?;
        self.data.skins[key.skin].attachment(slot_index, &key.name)
    }

    /// The attachment currently shown by a slot.
    pub fn slot_attachment(&self, slot_index: usize) -> Option<&Attachment> {
        let key = self.slots.get(slot_index)?.attachment.as_ref()?;
        self.data
            .skins
            .get(key.skin)?
            .attachment(slot_index, &key.name)
    }

    /// Sets a slot's attachment by name, looked up through the current and default skins.
    pub fn set_attachment(
        &mut self,
        slot_name: &str,
        attachment_name: Option<&str>,
    ) -> Result<(), crate::Error> {
        let slot_index = self
            .data
            .find_slot(slot_name)
            .ok_or_else(|| crate::Error::UnknownSlot {
                name: slot_name.to_string(),
            })?;
        let key = match attachment_name {
            None => None,
            Some(name) => Some(self.attachment_key(slot_index, name).ok_or_else(|| {
                crate::Error::UnknownAttachment {
                    slot: slot_name.to_string(),
                    attachment: name.to_string(),
                }
            })?),
        };
        self.set_slot_attachment(slot_index, key);
        Ok(())
    }

    /// Changes a slot's attachment. Deform is kept only when both the old and the new
    /// attachment are vertex attachments driven by the same timeline attachment.
    pub fn set_slot_attachment(&mut self, slot_index: usize, key: Option<AttachmentKey>) {
        let Some(slot) = self.slots.get(slot_index) else {
            return;
        };
        if slot.attachment == key {
            return;
        }
        let timeline_of = |key: Option<&AttachmentKey>| {
            let key = key?;
            self.data
                .skins
                .get(key.skin)?
                .attachment(slot_index, &key.name)?
                .vertex_attachment()
                .map(|v| v.timeline_attachment)
        };
        let old_timeline = timeline_of(slot.attachment.as_ref());
        let new_timeline = timeline_of(key.as_ref());
        let keep_deform = matches!((old_timeline, new_timeline), (Some(a), Some(b)) if a == b);

        let slot = &mut self.slots[slot_index];
        if !keep_deform {
            slot.deform.clear();
        }
        slot.attachment = key;
        slot.sequence_index = -1;
    }

    /// Bounds of every region and mesh attachment on an active bone, in draw order. Empty
    /// skeletons report a zero box at the origin.
    pub fn bounds(&self) -> Bounds {
        let mut min_x = f32::MAX;
        let mut min_y = f32::MAX;
        let mut max_x = f32::MIN;
        let mut max_y = f32::MIN;
        let mut any = false;
        let mut vertices = Vec::<f32>::new();

        for &slot_index in &self.draw_order {
            let Some(slot) = self.slots.get(slot_index) else {
                continue;
            };
            if !self.bones.get(slot.bone).is_some_and(|b| b.active) {
                continue;
            }
            match self.slot_attachment(slot_index) {
                Some(Attachment::Region(region)) => {
                    vertices.clear();
                    vertices.resize(8, 0.0);
                    region.compute_world_vertices(&self.bones[slot.bone], &mut vertices, 0, 2);
                }
                Some(Attachment::Mesh(mesh)) => {
                    let length = mesh.vertex.world_vertices_length();
                    vertices.clear();
                    vertices.resize(length, 0.0);
                    mesh.vertex
                        .compute_world_vertices(self, slot_index, 0, length, &mut vertices, 0, 2);
                }
                _ => continue,
            }
            for point in vertices.chunks_exact(2) {
                min_x = min_x.min(point[0]);
                min_y = min_y.min(point[1]);
                max_x = max_x.max(point[0]);
                max_y = max_y.max(point[1]);
                any = true;
            }
        }

        if !any {
            return Bounds::default();
        }
        Bounds {
            x: min_x,
            y: min_y,
            width: max_x - min_x,
            height: max_y - min_y,
        }
    }
}

impl crate::VertexAttachment {
    /// Writes world positions of vertices `start / 2 .. (start + count) / 2` into
    /// `world_vertices`, `stride` floats apart starting at `offset`. Uses the slot's deform
    /// when it is populated.
    #[allow(clippy::too_many_arguments)]
    pub fn compute_world_vertices(
        &self,
        skeleton: &Skeleton,
        slot_index: usize,
        start: usize,
        count: usize,
        world_vertices: &mut Vec<f32>,
        offset: usize,
        stride: usize,
    ) {
        let Some(slot) = skeleton.slots.get(slot_index) else {
            return;
        };
        let Some(bone) = skeleton.bones.get(slot.bone) else {
            return;
        };

        let start_vertex = start / 2;
        let vertex_count = count / 2;
        let out_end = offset + vertex_count * stride;
        if world_vertices.len() < out_end {
            world_vertices.resize(out_end, 0.0);
        }
        let deform = slot.deform.as_slice();

        match &self.vertices {
            crate::MeshVertices::Unweighted(v) => {
                let n = vertex_count.min(v.len().saturating_sub(start_vertex));
                let use_deform = deform.len() >= v.len() * 2 && !deform.is_empty();
                for i in 0..n {
                    let vi = start_vertex + i;
                    let (vx, vy) = if use_deform {
                        (deform[vi * 2], deform[vi * 2 + 1])
                    } else {
                        (v[vi][0], v[vi][1])
                    };
                    let w = offset + i * stride;
                    world_vertices[w] = vx * bone.a + vy * bone.b + bone.world_x;
                    world_vertices[w + 1] = vx * bone.c + vy * bone.d + bone.world_y;
                }
            }
            crate::MeshVertices::Weighted(v) => {
                let n = vertex_count.min(v.len().saturating_sub(start_vertex));
                let mut f = v.iter().take(start_vertex).map(|w| w.len()).sum::<usize>() * 2;
                for i in 0..n {
                    let mut wx = 0.0f32;
                    let mut wy = 0.0f32;
                    for weight in &v[start_vertex + i] {
                        let dx = deform.get(f).copied().unwrap_or(0.0);
                        let dy = deform.get(f + 1).copied().unwrap_or(0.0);
                        f += 2;
                        let Some(b) = skeleton.bones.get(weight.bone) else {
                            continue;
                        };
                        let vx = weight.x + dx;
                        let vy = weight.y + dy;
                        wx += (vx * b.a + vy * b.b + b.world_x) * weight.weight;
                        wy += (vx * b.c + vy * b.d + b.world_y) * weight.weight;
                    }
                    let w = offset + i * stride;
                    world_vertices[w] = wx;
                    world_vertices[w + 1] = wy;
                }
            }
        }
    }
}

impl crate::RegionAttachment {
    /// Writes the four world corners in the order BR, BL, UL, UR.
    pub fn compute_world_vertices(
        &self,
        bone: &Bone,
        world_vertices: &mut [f32],
        offset: usize,
        stride: usize,
    ) {
        let corners = [6usize, 0, 2, 4];
        for (i, &o) in corners.iter().enumerate() {
            let (ox, oy) = (self.offset[o], self.offset[o + 1]);
            let w = offset + i * stride;
            world_vertices[w] = ox * bone.a + oy * bone.b + bone.world_x;
            world_vertices[w + 1] = ox * bone.c + oy * bone.d + bone.world_y;
        }
    }
}

impl crate::PointAttachment {
    pub fn compute_world_position(&self, bone: &Bone) -> [f32; 2] {
        bone.local_to_world(self.x, self.y)
    }

    pub fn compute_world_rotation(&self, bone: &Bone) -> f32 {
        let (sin, cos) = self.rotation.to_radians().sin_cos();
        let x = cos * bone.a + sin * bone.b;
        let y = cos * bone.c + sin * bone.d;
        y.atan2(x).to_degrees()
    }
}

fn local_matrix(rotation_x: f32, rotation_y: f32, scale_x: f32, scale_y: f32) -> [f32; 4] {
    let (sin_x, cos_x) = rotation_x.to_radians().sin_cos();
    let (sin_y, cos_y) = rotation_y.to_radians().sin_cos();
    [cos_x * scale_x, cos_y * scale_y, sin_x * scale_x, sin_y * scale_y]
}

fn update_world_transform_root(bone: &mut Bone, x: f32, y: f32, scale_x: f32, scale_y: f32) {
    let [la, lb, lc, ld] = local_matrix(
        bone.arotation + bone.ashear_x,
        bone.arotation + 90.0 + bone.ashear_y,
        bone.ascale_x,
        bone.ascale_y,
    );
    bone.a = la * scale_x;
    bone.b = lb * scale_x;
    bone.c = lc * scale_y;
    bone.d = ld * scale_y;
    bone.world_x = bone.ax * scale_x + x;
    bone.world_y = bone.ay * scale_y + y;
}

fn update_world_transform_child(
    bone: &mut Bone,
    skeleton_scale_x: f32,
    skeleton_scale_y: f32,
    parent: &ParentTransform,
) {
    let p = [parent.a, parent.b, parent.c, parent.d];
    bone.world_x = parent.a * bone.ax + parent.b * bone.ay + parent.world_x;
    bone.world_y = parent.c * bone.ax + parent.d * bone.ay + parent.world_y;

    let m = match bone.transform_mode {
        TransformMode::Normal => {
            let l = local_matrix(
                bone.arotation + bone.ashear_x,
                bone.arotation + 90.0 + bone.ashear_y,
                bone.ascale_x,
                bone.ascale_y,
            );
            [bone.a, bone.b, bone.c, bone.d] = mul(p, l);
            return;
        }
        TransformMode::OnlyTranslation => local_matrix(
            bone.arotation + bone.ashear_x,
            bone.arotation + 90.0 + bone.ashear_y,
            bone.ascale_x,
            bone.ascale_y,
        ),
        TransformMode::NoRotationOrReflection => {
            let (m, prx) = no_rotation_parent(p, skeleton_scale_x, skeleton_scale_y);
            let l = local_matrix(
                bone.arotation + bone.ashear_x - prx,
                bone.arotation + bone.ashear_y - prx + 90.0,
                bone.ascale_x,
                bone.ascale_y,
            );
            mul(m, l)
        }
        TransformMode::NoScale | TransformMode::NoScaleOrReflection => {
            let z = no_scale_basis(
                p,
                bone.arotation,
                skeleton_scale_x,
                skeleton_scale_y,
                bone.transform_mode == TransformMode::NoScale,
            );
            let l = local_matrix(
                bone.ashear_x,
                90.0 + bone.ashear_y,
                bone.ascale_x,
                bone.ascale_y,
            );
            mul(z, l)
        }
    };
    bone.a = m[0] * skeleton_scale_x;
    bone.b = m[1] * skeleton_scale_x;
    bone.c = m[2] * skeleton_scale_y;
    bone.d = m[3] * skeleton_scale_y;
}

/// Parent basis with rotation and reflection removed, plus the removed rotation in degrees.
fn no_rotation_parent(p: [f32; 4], skeleton_scale_x: f32, skeleton_scale_y: f32) -> ([f32; 4], f32) {
    let [pa, pb, pc, pd] = p;
    let s = pa * pa + pc * pc;
    if s > 1.0e-4 {
        let s = (pa * pd - pb * pc).abs() / s;
        let pa = pa * inverse_scale(skeleton_scale_x);
        let pc = pc * inverse_scale(skeleton_scale_y);
        let pb = pc * s;
        let pd = pa * s;
        ([pa, -pb, pc, pd], pc.atan2(pa).to_degrees())
    } else {
        ([0.0, -pb, 0.0, pd], 90.0 - pd.atan2(pb).to_degrees())
    }
}

/// Unit basis following the parent's direction at `rotation` without its scale. `keep_reflection`
/// flips the second axis when the parent is reflected relative to the skeleton.
fn no_scale_basis(
    p: [f32; 4],
    rotation: f32,
    skeleton_scale_x: f32,
    skeleton_scale_y: f32,
    keep_reflection: bool,
) -> [f32; 4] {
    let [pa, pb, pc, pd] = p;
    let (sin, cos) = rotation.to_radians().sin_cos();
    let mut za = (pa * cos + pb * sin) * inverse_scale(skeleton_scale_x);
    let mut zc = (pc * cos + pd * sin) * inverse_scale(skeleton_scale_y);
    let mut s = (za * za + zc * zc).sqrt();
    if s > 1.0e-5 {
        s = 1.0 / s;
    }
    za *= s;
    zc *= s;
    s = (za * za + zc * zc).sqrt();
    if keep_reflection
        && (pa * pd - pb * pc < 0.0) != ((skeleton_scale_x < 0.0) != (skeleton_scale_y < 0.0))
    {
        s = -s;
    }
    let r = std::f32::consts::FRAC_PI_2 + zc.atan2(za);
    [za, r.cos() * s, zc, r.sin() * s]
}

struct Decomposed {
    /// Direction of the first column, degrees.
    angle0: f32,
    /// Direction of the second column divided by `scale_y`, degrees.
    angle1: f32,
    scale_x: f32,
    scale_y: f32,
}

/// Splits a 2x2 matrix into column directions and signed lengths. A negative determinant is
/// carried by `scale_y`.
fn decompose(m: [f32; 4]) -> Decomposed {
    let [ra, rb, rc, rd] = m;
    let scale_x = (ra * ra + rc * rc).sqrt();
    let det = ra * rd - rb * rc;
    let length_y = (rb * rb + rd * rd).sqrt();
    let (scale_y, angle1) = if det < 0.0 {
        (-length_y, (-rd).atan2(-rb).to_degrees())
    } else {
        (length_y, rd.atan2(rb).to_degrees())
    };
    if scale_x > 1.0e-4 {
        Decomposed {
            angle0: rc.atan2(ra).to_degrees(),
            angle1,
            scale_x,
            scale_y,
        }
    } else {
        Decomposed {
            angle0: angle1 - 90.0,
            angle1,
            scale_x: 0.0,
            scale_y,
        }
    }
}

fn mul(m: [f32; 4], n: [f32; 4]) -> [f32; 4] {
    [
        m[0] * n[0] + m[1] * n[2],
        m[0] * n[1] + m[1] * n[3],
        m[2] * n[0] + m[3] * n[2],
        m[2] * n[1] + m[3] * n[3],
    ]
}

fn invert(m: [f32; 4]) -> Option<[f32; 4]> {
    let det = m[0] * m[3] - m[1] * m[2];
    if det.abs() < 1.0e-12 {
        return None;
    }
    let inv = 1.0 / det;
    Some([m[3] * inv, -m[1] * inv, -m[2] * inv, m[0] * inv])
}

fn inverse_scale(scale: f32) -> f32 {
    if scale.abs() > 1.0e-12 { 1.0 / scale } else { 0.0 }
}

/// Wraps degrees into `[-180, 180]`.
pub(crate) fn wrap_degrees(degrees: f32) -> f32 {
    degrees - (degrees / 360.0).round() * 360.0
}

fn build_bone_children_indices(bones: &[Bone]) -> Vec<Vec<usize>> {
    let mut children = vec![Vec::<usize>::new(); bones.len()];
    for (index, bone) in bones.iter().enumerate() {
        if let Some(parent) = bone.parent {
            if parent < children.len() {
                children[parent].push(index);
            }
        }
    }
    children
}
