use crate::Animation;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct BoneData {
    pub name: String,
    /// Always lower than this bone's own index.
    pub parent: Option<usize>,
    pub length: f32,
    pub x: f32,
    pub y: f32,
    pub rotation: f32,
    pub scale_x: f32,
    pub scale_y: f32,
    pub shear_x: f32,
    pub shear_y: f32,
    pub transform_mode: TransformMode,
    pub skin_required: bool,
}

impl BoneData {
    pub fn new(name: impl Into<String>, parent: Option<usize>) -> Self {
        Self {
            name: name.into(),
            parent,
            length: 0.0,
            x: 0.0,
            y: 0.0,
            rotation: 0.0,
            scale_x: 1.0,
            scale_y: 1.0,
            shear_x: 0.0,
            shear_y: 0.0,
            transform_mode: TransformMode::Normal,
            skin_required: false,
        }
    }
}

/// How much of the parent's world transform a bone inherits.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum TransformMode {
    #[default]
    Normal,
    OnlyTranslation,
    NoRotationOrReflection,
    NoScale,
    NoScaleOrReflection,
}

#[derive(Clone, Debug)]
pub struct SlotData {
    pub name: String,
    pub bone: usize,
    pub attachment: Option<String>,
    pub color: [f32; 4],
    pub has_dark: bool,
    pub dark_color: [f32; 3],
    pub blend: BlendMode,
}

impl SlotData {
    pub fn new(name: impl Into<String>, bone: usize) -> Self {
        Self {
            name: name.into(),
            bone,
            attachment: None,
            color: [1.0; 4],
            has_dark: false,
            dark_color: [0.0; 3],
            blend: BlendMode::Normal,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum BlendMode {
    #[default]
    Normal,
    Additive,
    Multiply,
    Screen,
}

#[derive(Clone, Debug)]
pub struct IkConstraintData {
    pub name: String,
    pub order: usize,
    pub skin_required: bool,
    /// One or two bones; for two, the second must be a child of the first.
    pub bones: Vec<usize>,
    pub target: usize,
    pub mix: f32,
    pub softness: f32,
    pub bend_direction: i32,
    pub compress: bool,
    pub stretch: bool,
    pub uniform: bool,
}

#[derive(Clone, Debug)]
pub struct TransformConstraintData {
    pub name: String,
    pub order: usize,
    pub skin_required: bool,
    pub bones: Vec<usize>,
    pub target: usize,
    pub local: bool,
    pub relative: bool,

    pub offset_rotation: f32,
    pub offset_x: f32,
    pub offset_y: f32,
    pub offset_scale_x: f32,
    pub offset_scale_y: f32,
    pub offset_shear_y: f32,

    pub mix_rotate: f32,
    pub mix_x: f32,
    pub mix_y: f32,
    pub mix_scale_x: f32,
    pub mix_scale_y: f32,
    pub mix_shear_y: f32,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum PositionMode {
    Fixed,
    #[default]
    Percent,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum SpacingMode {
    #[default]
    Length,
    Fixed,
    Percent,
    Proportional,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum RotateMode {
    #[default]
    Tangent,
    Chain,
    ChainScale,
}

#[derive(Clone, Debug)]
pub struct PathConstraintData {
    pub name: String,
    pub order: usize,
    pub skin_required: bool,
    pub bones: Vec<usize>,
    /// Slot index whose path attachment is followed.
    pub target: usize,
    pub position_mode: PositionMode,
    pub spacing_mode: SpacingMode,
    pub rotate_mode: RotateMode,
    pub offset_rotation: f32,
    pub position: f32,
    pub spacing: f32,
    pub mix_rotate: f32,
    pub mix_x: f32,
    pub mix_y: f32,
}

#[derive(Clone, Debug)]
pub struct VertexWeight {
    pub bone: usize,
    pub x: f32,
    pub y: f32,
    pub weight: f32,
}

#[derive(Clone, Debug)]
pub enum MeshVertices {
    Unweighted(Vec<[f32; 2]>),
    Weighted(Vec<Vec<VertexWeight>>),
}

impl MeshVertices {
    pub fn vertex_count(&self) -> usize {
        match self {
            MeshVertices::Unweighted(v) => v.len(),
            MeshVertices::Weighted(v) => v.len(),
        }
    }

    /// Number of floats a deform buffer holds for these vertices: one pair per vertex when
    /// unweighted, one pair per bone influence when weighted.
    pub fn deform_length(&self) -> usize {
        match self {
            MeshVertices::Unweighted(v) => v.len() * 2,
            MeshVertices::Weighted(v) => v.iter().map(|w| w.len() * 2).sum(),
        }
    }

    pub fn is_weighted(&self) -> bool {
        matches!(self, MeshVertices::Weighted(_))
    }
}

/// Shared vertex payload of mesh, path, bounding box and clipping attachments.
#[derive(Clone, Debug)]
pub struct VertexAttachment {
    pub id: u32,
    pub vertices: MeshVertices,
    /// Id of the attachment whose deform and sequence timelines drive this one. Equal to `id`
    /// except for linked meshes that inherit their parent's timelines.
    pub timeline_attachment: u32,
}

impl VertexAttachment {
    pub fn new(id: u32, vertices: MeshVertices) -> Self {
        Self {
            id,
            vertices,
            timeline_attachment: id,
        }
    }

    pub fn world_vertices_length(&self) -> usize {
        self.vertices.vertex_count() * 2
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum SequenceMode {
    #[default]
    Hold,
    Once,
    Loop,
    PingPong,
    OnceReverse,
    LoopReverse,
    PingPongReverse,
}

impl SequenceMode {
    pub(crate) fn from_index(index: i32) -> Self {
        match index {
            1 => Self::Once,
            2 => Self::Loop,
            3 => Self::PingPong,
            4 => Self::OnceReverse,
            5 => Self::LoopReverse,
            6 => Self::PingPongReverse,
            _ => Self::Hold,
        }
    }

    pub(crate) fn index(self) -> i32 {
        match self {
            Self::Hold => 0,
            Self::Once => 1,
            Self::Loop => 2,
            Self::PingPong => 3,
            Self::OnceReverse => 4,
            Self::LoopReverse => 5,
            Self::PingPongReverse => 6,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Sequence {
    pub id: u32,
    pub count: usize,
    pub start: i32,
    pub digits: usize,
    pub setup_index: i32,
}

impl Sequence {
    /// Region index for a slot's `sequence_index` (`-1` selects the setup index).
    pub fn resolve_index(&self, sequence_index: i32) -> usize {
        let index = if sequence_index == -1 {
            self.setup_index
        } else {
            sequence_index
        };
        (index.max(0) as usize).min(self.count.saturating_sub(1))
    }

    /// Texture path of a sequence frame, e.g. `run` + index 3 with 2 digits → `run03`.
    pub fn path(&self, base_path: &str, index: usize) -> String {
        let frame = self.start + index as i32;
        format!("{base_path}{frame:0width$}", width = self.digits)
    }
}

#[derive(Clone, Debug)]
pub struct RegionAttachment {
    pub name: String,
    pub path: String,
    pub color: [f32; 4],
    pub x: f32,
    pub y: f32,
    pub rotation: f32,
    pub scale_x: f32,
    pub scale_y: f32,
    pub width: f32,
    pub height: f32,
    pub sequence: Option<Sequence>,
    /// Local corner positions: BL, UL, UR, BR.
    pub offset: [f32; 8],
    pub uvs: [f32; 8],
}

impl RegionAttachment {
    pub fn new(name: impl Into<String>, width: f32, height: f32) -> Self {
        let name = name.into();
        let mut region = Self {
            path: name.clone(),
            name,
            color: [1.0; 4],
            x: 0.0,
            y: 0.0,
            rotation: 0.0,
            scale_x: 1.0,
            scale_y: 1.0,
            width,
            height,
            sequence: None,
            offset: [0.0; 8],
            uvs: [0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 1.0, 1.0],
        };
        region.update_region();
        region
    }

    /// Recomputes `offset` from the placement fields, treating the texture region as the full
    /// untrimmed image.
    pub fn update_region(&mut self) {
        let local_x = -self.width / 2.0 * self.scale_x;
        let local_y = -self.height / 2.0 * self.scale_y;
        let local_x2 = self.width / 2.0 * self.scale_x;
        let local_y2 = self.height / 2.0 * self.scale_y;
        let (sin, cos) = self.rotation.to_radians().sin_cos();
        let x = self.x;
        let y = self.y;
        let local_x_cos = local_x * cos + x;
        let local_x_sin = local_x * sin;
        let local_y_cos = local_y * cos + y;
        let local_y_sin = local_y * sin;
        let local_x2_cos = local_x2 * cos + x;
        let local_x2_sin = local_x2 * sin;
        let local_y2_cos = local_y2 * cos + y;
        let local_y2_sin = local_y2 * sin;

        self.offset = [
            local_x_cos - local_y_sin,
            local_y_cos + local_x_sin,
            local_x_cos - local_y2_sin,
            local_y2_cos + local_x_sin,
            local_x2_cos - local_y2_sin,
            local_y2_cos + local_x2_sin,
            local_x2_cos - local_y_sin,
            local_y_cos + local_x2_sin,
        ];
    }
}

#[derive(Clone, Debug)]
pub struct MeshAttachment {
    pub name: String,
    pub path: String,
    pub color: [f32; 4],
    pub vertex: VertexAttachment,
    pub uvs: Vec<[f32; 2]>,
    pub triangles: Vec<u16>,
    pub hull_length: usize,
    pub edges: Vec<u16>,
    pub width: f32,
    pub height: f32,
    pub sequence: Option<Sequence>,
    /// Name of the mesh this one was linked from, if any.
    pub parent_mesh: Option<String>,
}

#[derive(Clone, Debug)]
pub struct BoundingBoxAttachment {
    pub name: String,
    pub vertex: VertexAttachment,
    pub color: [f32; 4],
}

#[derive(Clone, Debug)]
pub struct PathAttachment {
    pub name: String,
    pub vertex: VertexAttachment,
    /// Cumulative length at the end of each curve.
    pub lengths: Vec<f32>,
    pub closed: bool,
    pub constant_speed: bool,
    pub color: [f32; 4],
}

#[derive(Clone, Debug)]
pub struct PointAttachment {
    pub name: String,
    pub x: f32,
    pub y: f32,
    pub rotation: f32,
    pub color: [f32; 4],
}

#[derive(Clone, Debug)]
pub struct ClippingAttachment {
    pub name: String,
    pub vertex: VertexAttachment,
    /// Slot index after which clipping stops; `None` clips to the end of the draw order.
    pub end_slot: Option<usize>,
    pub color: [f32; 4],
}

#[derive(Clone, Debug)]
pub enum Attachment {
    Region(RegionAttachment),
    Mesh(MeshAttachment),
    BoundingBox(BoundingBoxAttachment),
    Path(PathAttachment),
    Point(PointAttachment),
    Clipping(ClippingAttachment),
}

impl Attachment {
    pub fn name(&self) -> &str {
        match self {
            Attachment::Region(a) => a.name.as_str(),
            Attachment::Mesh(a) => a.name.as_str(),
            Attachment::BoundingBox(a) => a.name.as_str(),
            Attachment::Path(a) => a.name.as_str(),
            Attachment::Point(a) => a.name.as_str(),
            Attachment::Clipping(a) => a.name.as_str(),
        }
    }

    pub fn vertex_attachment(&self) -> Option<&VertexAttachment> {
        match self {
            Attachment::Mesh(a) => Some(&a.vertex),
            Attachment::BoundingBox(a) => Some(&a.vertex),
            Attachment::Path(a) => Some(&a.vertex),
            Attachment::Clipping(a) => Some(&a.vertex),
            Attachment::Region(_) | Attachment::Point(_) => None,
        }
    }

    pub fn sequence(&self) -> Option<&Sequence> {
        match self {
            Attachment::Region(a) => a.sequence.as_ref(),
            Attachment::Mesh(a) => a.sequence.as_ref(),
            _ => None,
        }
    }
}

/// Sparse `(slot index, attachment name) → attachment` map plus the bones and constraints
/// that only exist while the skin is active.
#[derive(Clone, Debug, Default)]
pub struct Skin {
    pub name: String,
    pub attachments: Vec<HashMap<String, Attachment>>,
    pub bones: Vec<usize>,
    pub ik_constraints: Vec<usize>,
    pub transform_constraints: Vec<usize>,
    pub path_constraints: Vec<usize>,
}

impl Skin {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn attachment(&self, slot_index: usize, name: &str) -> Option<&Attachment> {
        self.attachments
            .get(slot_index)
            .and_then(|slot_map| slot_map.get(name))
    }

    pub fn set_attachment(&mut self, slot_index: usize, name: impl Into<String>, attachment: Attachment) {
        if self.attachments.len() <= slot_index {
            self.attachments.resize_with(slot_index + 1, HashMap::new);
        }
        self.attachments[slot_index].insert(name.into(), attachment);
    }

    /// Attachments registered for one slot, keyed by their skin placeholder name.
    pub fn slot_attachments(&self, slot_index: usize) -> impl Iterator<Item = (&str, &Attachment)> {
        self.attachments
            .get(slot_index)
            .into_iter()
            .flat_map(|slot_map| slot_map.iter().map(|(k, v)| (k.as_str(), v)))
    }
}

#[derive(Clone, Debug)]
pub struct EventData {
    pub name: String,
    pub int_value: i32,
    pub float_value: f32,
    pub string: String,
    pub audio_path: String,
    pub volume: f32,
    pub balance: f32,
}

impl EventData {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            int_value: 0,
            float_value: 0.0,
            string: String::new(),
            audio_path: String::new(),
            volume: 1.0,
            balance: 0.0,
        }
    }
}

/// A fired event: a keyed instance of an [`EventData`], with per-key overrides.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    pub data: usize,
    pub name: String,
    pub time: f32,
    pub int_value: i32,
    pub float_value: f32,
    pub string: String,
    pub volume: f32,
    pub balance: f32,
}

impl Event {
    pub fn new(data_index: usize, data: &EventData, time: f32) -> Self {
        Self {
            data: data_index,
            name: data.name.clone(),
            time,
            int_value: data.int_value,
            float_value: data.float_value,
            string: data.string.clone(),
            volume: data.volume,
            balance: data.balance,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct SkeletonData {
    pub name: Option<String>,
    pub version: Option<String>,
    pub hash: Option<String>,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub fps: f32,
    pub images_path: Option<String>,
    pub audio_path: Option<String>,
    pub bones: Vec<BoneData>,
    pub slots: Vec<SlotData>,
    pub skins: Vec<Skin>,
    pub default_skin: Option<usize>,
    pub events: Vec<EventData>,
    pub animations: Vec<Arc<Animation>>,
    pub ik_constraints: Vec<IkConstraintData>,
    pub transform_constraints: Vec<TransformConstraintData>,
    pub path_constraints: Vec<PathConstraintData>,
}

impl SkeletonData {
    pub fn find_bone(&self, name: &str) -> Option<usize> {
        self.bones.iter().position(|b| b.name == name)
    }

    pub fn find_slot(&self, name: &str) -> Option<usize> {
        self.slots.iter().position(|s| s.name == name)
    }

    pub fn find_skin(&self, name: &str) -> Option<usize> {
        self.skins.iter().position(|s| s.name == name)
    }

    pub fn find_event(&self, name: &str) -> Option<usize> {
        self.events.iter().position(|e| e.name == name)
    }

    pub fn find_animation(&self, name: &str) -> Option<&Arc<Animation>> {
        self.animations.iter().find(|a| a.name == name)
    }

    pub fn find_ik_constraint(&self, name: &str) -> Option<usize> {
        self.ik_constraints.iter().position(|c| c.name == name)
    }

    pub fn find_transform_constraint(&self, name: &str) -> Option<usize> {
        self.transform_constraints.iter().position(|c| c.name == name)
    }

    pub fn find_path_constraint(&self, name: &str) -> Option<usize> {
        self.path_constraints.iter().position(|c| c.name == name)
    }

    pub fn skin(&self, index: usize) -> Option<&Skin> {
        self.skins.get(index)
    }

    pub fn default_skin(&self) -> Option<&Skin> {
        self.default_skin.and_then(|i| self.skins.get(i))
    }
}
