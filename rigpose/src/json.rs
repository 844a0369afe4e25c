use crate::{
    ALPHA_ENTRIES, Animation, Attachment, AttachmentTimeline, BONE1_ENTRIES, BONE2_ENTRIES,
    BlendMode, BoneData, BoneTimeline, BoundingBoxAttachment, ClippingAttachment,
    ConstraintTimeline, CurveTimeline, DeformTimeline, DrawOrderTimeline, Error, Event, EventData,
    EventTimeline, IK_ENTRIES, IdAllocator, IkConstraintData, MeshAttachment, MeshVertices,
    PATH_MIX_ENTRIES, PATH_VALUE_ENTRIES, PathAttachment, PathConstraintData, PointAttachment,
    PositionMode, RGB_ENTRIES, RGB2_ENTRIES, RGBA_ENTRIES, RGBA2_ENTRIES, RegionAttachment,
    RotateMode, Sequence, SequenceMode, SequenceTimeline, SkeletonData, Skin, SlotCurveTimeline,
    SlotData, SpacingMode, TRANSFORM_ENTRIES, Timeline, TransformConstraintData, TransformMode,
    VertexAttachment, VertexWeight,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct Root {
    skeleton: Option<SkeletonHeader>,
    #[serde(default)]
    bones: Vec<BoneDef>,
    #[serde(default)]
    slots: Vec<SlotDef>,
    #[serde(default)]
    ik: Vec<IkConstraintDef>,
    #[serde(default)]
    transform: Vec<TransformConstraintDef>,
    #[serde(default)]
    path: Vec<PathConstraintDef>,
    skins: Option<SkinsDef>,
    #[serde(default)]
    events: BTreeMap<String, EventDef>,
    #[serde(default)]
    animations: BTreeMap<String, AnimationDef>,
}

#[derive(Debug, Deserialize)]
struct SkeletonHeader {
    #[serde(default)]
    hash: Option<String>,
    #[serde(default)]
    spine: Option<String>,
    #[serde(default)]
    x: f32,
    #[serde(default)]
    y: f32,
    #[serde(default)]
    width: f32,
    #[serde(default)]
    height: f32,
    #[serde(default)]
    fps: Option<f32>,
    #[serde(default)]
    images: Option<String>,
    #[serde(default)]
    audio: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BoneDef {
    name: String,
    #[serde(default)]
    parent: Option<String>,
    #[serde(default)]
    length: f32,
    #[serde(default)]
    x: f32,
    #[serde(default)]
    y: f32,
    #[serde(default)]
    rotation: f32,
    #[serde(default = "default_one", rename = "scaleX")]
    scale_x: f32,
    #[serde(default = "default_one", rename = "scaleY")]
    scale_y: f32,
    #[serde(default, rename = "shearX")]
    shear_x: f32,
    #[serde(default, rename = "shearY")]
    shear_y: f32,
    #[serde(default)]
    transform: Option<String>,
    #[serde(default, rename = "skin")]
    skin_required: bool,
}

#[derive(Debug, Deserialize)]
struct SlotDef {
    name: String,
    bone: String,
    #[serde(default)]
    attachment: Option<String>,
    #[serde(default)]
    color: Option<String>,
    #[serde(default)]
    dark: Option<String>,
    #[serde(default)]
    blend: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IkConstraintDef {
    name: String,
    #[serde(default)]
    order: i32,
    #[serde(default, rename = "skin")]
    skin_required: bool,
    bones: Vec<String>,
    target: String,
    #[serde(default = "default_one")]
    mix: f32,
    #[serde(default)]
    softness: f32,
    #[serde(default = "default_true", rename = "bendPositive")]
    bend_positive: bool,
    #[serde(default)]
    compress: bool,
    #[serde(default)]
    stretch: bool,
    #[serde(default)]
    uniform: bool,
}

#[derive(Debug, Deserialize)]
struct TransformConstraintDef {
    name: String,
    #[serde(default)]
    order: i32,
    #[serde(default, rename = "skin")]
    skin_required: bool,
    bones: Vec<String>,
    target: String,
    #[serde(default)]
    local: bool,
    #[serde(default)]
    relative: bool,
    #[serde(default)]
    rotation: f32,
    #[serde(default)]
    x: f32,
    #[serde(default)]
    y: f32,
    #[serde(default, rename = "scaleX")]
    scale_x: f32,
    #[serde(default, rename = "scaleY")]
    scale_y: f32,
    #[serde(default, rename = "shearY")]
    shear_y: f32,
    #[serde(default, rename = "mixRotate")]
    mix_rotate: Option<f32>,
    #[serde(default, rename = "mixX")]
    mix_x: Option<f32>,
    #[serde(default, rename = "mixY")]
    mix_y: Option<f32>,
    #[serde(default, rename = "mixScaleX")]
    mix_scale_x: Option<f32>,
    #[serde(default, rename = "mixScaleY")]
    mix_scale_y: Option<f32>,
    #[serde(default, rename = "mixShearY")]
    mix_shear_y: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct PathConstraintDef {
    name: String,
    #[serde(default)]
    order: i32,
    #[serde(default, rename = "skin")]
    skin_required: bool,
    bones: Vec<String>,
    target: String,
    #[serde(default, rename = "positionMode")]
    position_mode: Option<String>,
    #[serde(default, rename = "spacingMode")]
    spacing_mode: Option<String>,
    #[serde(default, rename = "rotateMode")]
    rotate_mode: Option<String>,
    #[serde(default)]
    rotation: f32,
    #[serde(default)]
    position: f32,
    #[serde(default)]
    spacing: f32,
    #[serde(default, rename = "mixRotate")]
    mix_rotate: Option<f32>,
    #[serde(default, rename = "mixX")]
    mix_x: Option<f32>,
    #[serde(default, rename = "mixY")]
    mix_y: Option<f32>,
}

fn default_event_volume() -> f32 {
    1.0
}

#[derive(Debug, Deserialize, Default)]
struct EventDef {
    #[serde(default, rename = "int")]
    int_value: i32,
    #[serde(default, rename = "float")]
    float_value: f32,
    #[serde(default, rename = "string")]
    string_value: String,
    #[serde(default, rename = "audio")]
    audio_path: String,
    #[serde(default = "default_event_volume")]
    volume: f32,
    #[serde(default)]
    balance: f32,
}

type SkinAttachmentsDef = BTreeMap<String, BTreeMap<String, AttachmentDef>>;

/// 4.x exports write skins as an array; older 3.x-style exports use a name-keyed map.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SkinsDef {
    Array(Vec<SkinDef>),
    Map(BTreeMap<String, SkinAttachmentsDef>),
}

#[derive(Debug, Deserialize)]
struct SkinDef {
    name: String,
    #[serde(default)]
    attachments: SkinAttachmentsDef,
    #[serde(default)]
    bones: Vec<String>,
    #[serde(default)]
    ik: Vec<String>,
    #[serde(default)]
    transform: Vec<String>,
    #[serde(default)]
    path: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AttachmentDef {
    #[serde(default, rename = "type")]
    attachment_type: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    color: Option<String>,
    #[serde(default)]
    x: f32,
    #[serde(default)]
    y: f32,
    #[serde(default)]
    rotation: f32,
    #[serde(default = "default_one", rename = "scaleX")]
    scale_x: f32,
    #[serde(default = "default_one", rename = "scaleY")]
    scale_y: f32,
    #[serde(default)]
    width: f32,
    #[serde(default)]
    height: f32,
    #[serde(default)]
    sequence: Option<SequenceDef>,

    #[serde(default)]
    uvs: Option<Vec<f32>>,
    #[serde(default)]
    vertices: Option<Vec<f32>>,
    #[serde(default)]
    triangles: Option<Vec<u32>>,
    #[serde(default)]
    hull: usize,
    #[serde(default)]
    edges: Vec<u32>,
    #[serde(default, rename = "vertexCount")]
    vertex_count: usize,

    #[serde(default)]
    parent: Option<String>,
    #[serde(default)]
    skin: Option<String>,
    /// 4.1 name of the linked-mesh flag; 4.0 exports call it `deform`.
    #[serde(default, alias = "deform")]
    timelines: Option<bool>,

    #[serde(default)]
    closed: bool,
    #[serde(default = "default_true", rename = "constantSpeed")]
    constant_speed: bool,
    #[serde(default)]
    lengths: Vec<f32>,

    #[serde(default)]
    end: Option<String>,
}

fn default_one_i32() -> i32 {
    1
}

#[derive(Debug, Deserialize)]
struct SequenceDef {
    count: usize,
    #[serde(default = "default_one_i32")]
    start: i32,
    #[serde(default)]
    digits: usize,
    #[serde(default, rename = "setup")]
    setup_index: i32,
}

type AttachmentAnimsBySkin = BTreeMap<String, BTreeMap<String, BTreeMap<String, AttachmentAnimDef>>>;
type DeformBySkin = BTreeMap<String, BTreeMap<String, BTreeMap<String, Vec<DeformKey>>>>;

#[derive(Debug, Deserialize)]
struct AnimationDef {
    #[serde(default)]
    bones: BTreeMap<String, BoneAnimDef>,
    #[serde(default)]
    slots: BTreeMap<String, SlotAnimDef>,
    #[serde(default)]
    ik: BTreeMap<String, Vec<IkKey>>,
    #[serde(default)]
    transform: BTreeMap<String, Vec<TransformKey>>,
    #[serde(default)]
    path: BTreeMap<String, PathAnimDef>,
    /// 4.1 layout: deform and sequence timelines grouped per attachment.
    #[serde(default)]
    attachments: AttachmentAnimsBySkin,
    /// 4.0 layout: deform timelines only.
    #[serde(default)]
    deform: DeformBySkin,
    #[serde(default, rename = "drawOrder", alias = "draworder")]
    draw_order: Option<Vec<DrawOrderKey>>,
    #[serde(default)]
    events: Vec<EventKey>,
}

#[derive(Debug, Deserialize)]
struct BoneAnimDef {
    #[serde(default)]
    rotate: Vec<FloatKey>,
    #[serde(default)]
    translate: Vec<Vec2Key>,
    #[serde(default, rename = "translatex")]
    translate_x: Vec<FloatKey>,
    #[serde(default, rename = "translatey")]
    translate_y: Vec<FloatKey>,
    #[serde(default)]
    scale: Vec<Vec2Key>,
    #[serde(default, rename = "scalex")]
    scale_x: Vec<FloatKey>,
    #[serde(default, rename = "scaley")]
    scale_y: Vec<FloatKey>,
    #[serde(default)]
    shear: Vec<Vec2Key>,
    #[serde(default, rename = "shearx")]
    shear_x: Vec<FloatKey>,
    #[serde(default, rename = "sheary")]
    shear_y: Vec<FloatKey>,
}

#[derive(Debug, Deserialize)]
struct FloatKey {
    #[serde(default)]
    time: f32,
    #[serde(default, alias = "angle")]
    value: Option<f32>,
    #[serde(default)]
    curve: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Vec2Key {
    #[serde(default)]
    time: f32,
    #[serde(default)]
    x: Option<f32>,
    #[serde(default)]
    y: Option<f32>,
    #[serde(default)]
    curve: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct SlotAnimDef {
    #[serde(default)]
    attachment: Vec<AttachmentKey>,
    #[serde(default, alias = "color")]
    rgba: Vec<ColorKey>,
    #[serde(default)]
    rgb: Vec<ColorKey>,
    #[serde(default)]
    alpha: Vec<FloatKey>,
    #[serde(default, alias = "twoColor")]
    rgba2: Vec<TwoColorKey>,
    #[serde(default)]
    rgb2: Vec<TwoColorKey>,
}

#[derive(Debug, Deserialize)]
struct AttachmentKey {
    #[serde(default)]
    time: f32,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ColorKey {
    #[serde(default)]
    time: f32,
    color: String,
    #[serde(default)]
    curve: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct TwoColorKey {
    #[serde(default)]
    time: f32,
    light: String,
    dark: String,
    #[serde(default)]
    curve: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct IkKey {
    #[serde(default)]
    time: f32,
    #[serde(default)]
    mix: Option<f32>,
    #[serde(default)]
    softness: Option<f32>,
    #[serde(default, rename = "bendPositive")]
    bend_positive: Option<bool>,
    #[serde(default)]
    compress: bool,
    #[serde(default)]
    stretch: bool,
    #[serde(default)]
    curve: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct TransformKey {
    #[serde(default)]
    time: f32,
    #[serde(default, rename = "mixRotate")]
    mix_rotate: Option<f32>,
    #[serde(default, rename = "mixX")]
    mix_x: Option<f32>,
    #[serde(default, rename = "mixY")]
    mix_y: Option<f32>,
    #[serde(default, rename = "mixScaleX")]
    mix_scale_x: Option<f32>,
    #[serde(default, rename = "mixScaleY")]
    mix_scale_y: Option<f32>,
    #[serde(default, rename = "mixShearY")]
    mix_shear_y: Option<f32>,
    #[serde(default)]
    curve: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct PathAnimDef {
    #[serde(default)]
    position: Vec<FloatKey>,
    #[serde(default)]
    spacing: Vec<FloatKey>,
    #[serde(default)]
    mix: Vec<PathMixKey>,
}

#[derive(Debug, Deserialize)]
struct PathMixKey {
    #[serde(default)]
    time: f32,
    #[serde(default, rename = "mixRotate")]
    mix_rotate: Option<f32>,
    #[serde(default, rename = "mixX")]
    mix_x: Option<f32>,
    #[serde(default, rename = "mixY")]
    mix_y: Option<f32>,
    #[serde(default)]
    curve: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct AttachmentAnimDef {
    #[serde(default)]
    deform: Vec<DeformKey>,
    #[serde(default)]
    sequence: Vec<SequenceKey>,
}

#[derive(Debug, Deserialize)]
struct DeformKey {
    #[serde(default)]
    time: f32,
    #[serde(default)]
    offset: usize,
    #[serde(default)]
    vertices: Option<Vec<f32>>,
    #[serde(default)]
    curve: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct SequenceKey {
    #[serde(default)]
    time: f32,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    index: i32,
    #[serde(default)]
    delay: f32,
}

#[derive(Debug, Deserialize)]
struct DrawOrderKey {
    #[serde(default)]
    time: f32,
    #[serde(default)]
    offsets: Option<Vec<DrawOrderOffset>>,
}

#[derive(Debug, Deserialize)]
struct DrawOrderOffset {
    slot: String,
    #[serde(default)]
    offset: i32,
}

#[derive(Debug, Deserialize)]
struct EventKey {
    #[serde(default)]
    time: f32,
    name: String,
    #[serde(default, rename = "int")]
    int_value: Option<i32>,
    #[serde(default, rename = "float")]
    float_value: Option<f32>,
    #[serde(default, rename = "string")]
    string_value: Option<String>,
    #[serde(default)]
    volume: Option<f32>,
    #[serde(default)]
    balance: Option<f32>,
}

/// Loads Spine 4.0/4.1 JSON exports into [`SkeletonData`].
///
/// The loader owns the [`IdAllocator`] that numbers vertex attachments and sequences, so several
/// skeletons read by one loader never share ids.
#[derive(Clone, Debug)]
pub struct SkeletonJson {
    /// Uniform factor applied to every length, position and translation keyed in the file.
    pub scale: f32,
    ids: IdAllocator,
}

impl Default for SkeletonJson {
    fn default() -> Self {
        Self::new()
    }
}

impl SkeletonJson {
    pub fn new() -> Self {
        Self::with_scale(1.0)
    }

    pub fn with_scale(scale: f32) -> Self {
        Self {
            scale,
            ids: IdAllocator::new(),
        }
    }

    /// Uses an existing allocator, e.g. to keep ids unique across data built by hand.
    pub fn with_ids(scale: f32, ids: IdAllocator) -> Self {
        Self { scale, ids }
    }

    pub fn ids(&self) -> &IdAllocator {
        &self.ids
    }

    pub fn read_skeleton_data(&mut self, input: &str) -> Result<Arc<SkeletonData>, Error> {
        let root: Root = serde_json::from_str(input).map_err(|e| Error::JsonParse {
            message: e.to_string(),
        })?;
        let scale = if self.scale.is_finite() { self.scale } else { 1.0 };
        let mut reader = Reader {
            scale,
            ids: &mut self.ids,
            data: SkeletonData::default(),
            bone_index: HashMap::new(),
            slot_index: HashMap::new(),
            linked_meshes: Vec::new(),
        };
        reader.read(root)?;
        log::debug!(
            "loaded skeleton: {} bones, {} slots, {} skins, {} animations",
            reader.data.bones.len(),
            reader.data.slots.len(),
            reader.data.skins.len(),
            reader.data.animations.len()
        );
        Ok(Arc::new(reader.data))
    }
}

impl SkeletonData {
    pub fn from_json_str(input: &str) -> Result<Arc<Self>, Error> {
        Self::from_json_str_with_scale(input, 1.0)
    }

    pub fn from_json_str_with_scale(input: &str, scale: f32) -> Result<Arc<Self>, Error> {
        SkeletonJson::with_scale(scale).read_skeleton_data(input)
    }
}

struct LinkedMesh {
    skin: usize,
    slot: usize,
    placeholder: String,
    parent: String,
    parent_skin: Option<String>,
    inherit_timelines: bool,
}

/// Names an attachment inside its skin for error messages.
struct AttachmentRef<'s> {
    skin: &'s str,
    slot: &'s str,
    attachment: &'s str,
}

impl AttachmentRef<'_> {
    fn invalid(&self, message: impl Into<String>) -> Error {
        Error::JsonInvalidVertices {
            skin: self.skin.to_string(),
            slot: self.slot.to_string(),
            attachment: self.attachment.to_string(),
            message: message.into(),
        }
    }
}

struct Reader<'a> {
    scale: f32,
    ids: &'a mut IdAllocator,
    data: SkeletonData,
    bone_index: HashMap<String, usize>,
    slot_index: HashMap<String, usize>,
    linked_meshes: Vec<LinkedMesh>,
}

impl Reader<'_> {
    fn read(&mut self, root: Root) -> Result<(), Error> {
        if let Some(header) = root.skeleton {
            if let Some(version) = header.spine.as_deref() {
                validate_spine_version(version)?;
            }
            self.data.hash = header.hash;
            self.data.version = header.spine;
            self.data.x = header.x;
            self.data.y = header.y;
            self.data.width = header.width;
            self.data.height = header.height;
            self.data.fps = header.fps.unwrap_or(30.0);
            self.data.images_path = header.images;
            self.data.audio_path = header.audio;
        }

        self.read_bones(root.bones)?;
        self.read_slots(root.slots)?;
        self.read_ik_constraints(root.ik)?;
        self.read_transform_constraints(root.transform)?;
        self.read_path_constraints(root.path)?;
        if let Some(skins) = root.skins {
            self.read_skins(skins)?;
        }
        self.link_meshes()?;
        self.data.default_skin = self.data.find_skin("default");
        self.read_events(root.events);

        for (name, def) in root.animations {
            let animation = self.read_animation(&name, def)?;
            self.data.animations.push(Arc::new(animation));
        }
        Ok(())
    }

    fn bone(&self, name: &str, context: &str) -> Result<usize, Error> {
        self.bone_index
            .get(name)
            .copied()
            .ok_or_else(|| unknown("bone", name, context))
    }

    fn slot(&self, name: &str, context: &str) -> Result<usize, Error> {
        self.slot_index
            .get(name)
            .copied()
            .ok_or_else(|| unknown("slot", name, context))
    }

    fn bones(&self, names: &[String], context: &str) -> Result<Vec<usize>, Error> {
        names.iter().map(|name| self.bone(name, context)).collect()
    }

    fn read_bones(&mut self, defs: Vec<BoneDef>) -> Result<(), Error> {
        for def in defs {
            let parent = match def.parent.as_deref() {
                None => None,
                Some(parent) => Some(self.bone_index.get(parent).copied().ok_or_else(|| {
                    Error::JsonUnknownBoneParent {
                        bone: def.name.clone(),
                        parent: parent.to_string(),
                    }
                })?),
            };
            let transform_mode = match def.transform.as_deref().unwrap_or("normal") {
                "normal" => TransformMode::Normal,
                "onlyTranslation" => TransformMode::OnlyTranslation,
                "noRotationOrReflection" => TransformMode::NoRotationOrReflection,
                "noScale" => TransformMode::NoScale,
                "noScaleOrReflection" => TransformMode::NoScaleOrReflection,
                other => {
                    return Err(Error::JsonUnsupportedValue {
                        field: "transform",
                        value: other.to_string(),
                        context: format!("bone '{}'", def.name),
                    });
                }
            };

            let mut bone = BoneData::new(def.name, parent);
            bone.length = def.length * self.scale;
            bone.x = def.x * self.scale;
            bone.y = def.y * self.scale;
            bone.rotation = def.rotation;
            bone.scale_x = def.scale_x;
            bone.scale_y = def.scale_y;
            bone.shear_x = def.shear_x;
            bone.shear_y = def.shear_y;
            bone.transform_mode = transform_mode;
            bone.skin_required = def.skin_required;

            self.bone_index.insert(bone.name.clone(), self.data.bones.len());
            self.data.bones.push(bone);
        }
        Ok(())
    }

    fn read_slots(&mut self, defs: Vec<SlotDef>) -> Result<(), Error> {
        for def in defs {
            let context = format!("slot '{}'", def.name);
            let bone = self.bone(&def.bone, &context)?;
            let mut slot = SlotData::new(def.name, bone);
            slot.attachment = def.attachment;
            if let Some(color) = def.color.as_deref() {
                slot.color = parse_hex_color_rgba(color, &context)?;
            }
            if let Some(dark) = def.dark.as_deref() {
                slot.has_dark = true;
                slot.dark_color = parse_hex_color_rgb(dark, &context)?;
            }
            slot.blend = parse_blend_mode(def.blend.as_deref(), &context)?;

            self.slot_index.insert(slot.name.clone(), self.data.slots.len());
            self.data.slots.push(slot);
        }
        Ok(())
    }

    fn read_ik_constraints(&mut self, defs: Vec<IkConstraintDef>) -> Result<(), Error> {
        for def in defs {
            let context = format!("ik constraint '{}'", def.name);
            let bones = self.bones(&def.bones, &context)?;
            if bones.is_empty() || bones.len() > 2 {
                return Err(Error::JsonUnsupportedValue {
                    field: "bone count",
                    value: bones.len().to_string(),
                    context,
                });
            }
            let target = self.bone(&def.target, &context)?;
            self.data.ik_constraints.push(IkConstraintData {
                name: def.name,
                order: def.order.max(0) as usize,
                skin_required: def.skin_required,
                bones,
                target,
                mix: def.mix,
                softness: def.softness * self.scale,
                bend_direction: if def.bend_positive { 1 } else { -1 },
                compress: def.compress,
                stretch: def.stretch,
                uniform: def.uniform,
            });
        }
        Ok(())
    }

    fn read_transform_constraints(&mut self, defs: Vec<TransformConstraintDef>) -> Result<(), Error> {
        for def in defs {
            let context = format!("transform constraint '{}'", def.name);
            let bones = self.bones(&def.bones, &context)?;
            let target = self.bone(&def.target, &context)?;
            let mix_x = def.mix_x.unwrap_or(1.0);
            let mix_scale_x = def.mix_scale_x.unwrap_or(1.0);
            self.data.transform_constraints.push(TransformConstraintData {
                name: def.name,
                order: def.order.max(0) as usize,
                skin_required: def.skin_required,
                bones,
                target,
                local: def.local,
                relative: def.relative,
                offset_rotation: def.rotation,
                offset_x: def.x * self.scale,
                offset_y: def.y * self.scale,
                offset_scale_x: def.scale_x,
                offset_scale_y: def.scale_y,
                offset_shear_y: def.shear_y,
                mix_rotate: def.mix_rotate.unwrap_or(1.0),
                mix_x,
                mix_y: def.mix_y.unwrap_or(mix_x),
                mix_scale_x,
                mix_scale_y: def.mix_scale_y.unwrap_or(mix_scale_x),
                mix_shear_y: def.mix_shear_y.unwrap_or(1.0),
            });
        }
        Ok(())
    }

    fn read_path_constraints(&mut self, defs: Vec<PathConstraintDef>) -> Result<(), Error> {
        for def in defs {
            let context = format!("path constraint '{}'", def.name);
            let bones = self.bones(&def.bones, &context)?;
            let target = self.slot(&def.target, &context)?;

            let position_mode = match def.position_mode.as_deref().unwrap_or("percent") {
                "fixed" => PositionMode::Fixed,
                "percent" => PositionMode::Percent,
                other => return Err(unsupported("positionMode", other, &context)),
            };
            let spacing_mode = match def.spacing_mode.as_deref().unwrap_or("length") {
                "length" => SpacingMode::Length,
                "fixed" => SpacingMode::Fixed,
                "percent" => SpacingMode::Percent,
                "proportional" => SpacingMode::Proportional,
                other => return Err(unsupported("spacingMode", other, &context)),
            };
            let rotate_mode = match def.rotate_mode.as_deref().unwrap_or("tangent") {
                "tangent" => RotateMode::Tangent,
                "chain" => RotateMode::Chain,
                "chainScale" => RotateMode::ChainScale,
                other => return Err(unsupported("rotateMode", other, &context)),
            };

            let mix_x = def.mix_x.unwrap_or(1.0);
            self.data.path_constraints.push(PathConstraintData {
                name: def.name,
                order: def.order.max(0) as usize,
                skin_required: def.skin_required,
                bones,
                target,
                position_mode,
                spacing_mode,
                rotate_mode,
                offset_rotation: def.rotation,
                position: def.position * position_scale(position_mode, self.scale),
                spacing: def.spacing * spacing_scale(spacing_mode, self.scale),
                mix_rotate: def.mix_rotate.unwrap_or(1.0),
                mix_x,
                mix_y: def.mix_y.unwrap_or(mix_x),
            });
        }
        Ok(())
    }

    fn read_skins(&mut self, skins: SkinsDef) -> Result<(), Error> {
        match skins {
            SkinsDef::Array(defs) => {
                for def in defs {
                    self.read_skin(def)?;
                }
            }
            SkinsDef::Map(map) => {
                for (name, attachments) in map {
                    self.read_skin(SkinDef {
                        name,
                        attachments,
                        bones: Vec::new(),
                        ik: Vec::new(),
                        transform: Vec::new(),
                        path: Vec::new(),
                    })?;
                }
            }
        }
        Ok(())
    }

    fn read_skin(&mut self, def: SkinDef) -> Result<(), Error> {
        let context = format!("skin '{}'", def.name);
        let skin_index = self.data.skins.len();
        let mut skin = Skin::new(def.name);
        skin.attachments = vec![HashMap::new(); self.data.slots.len()];
        skin.bones = self.bones(&def.bones, &context)?;
        for name in &def.ik {
            let index = self
                .data
                .find_ik_constraint(name)
                .ok_or_else(|| unknown("ik constraint", name, &context))?;
            skin.ik_constraints.push(index);
        }
        for name in &def.transform {
            let index = self
                .data
                .find_transform_constraint(name)
                .ok_or_else(|| unknown("transform constraint", name, &context))?;
            skin.transform_constraints.push(index);
        }
        for name in &def.path {
            let index = self
                .data
                .find_path_constraint(name)
                .ok_or_else(|| unknown("path constraint", name, &context))?;
            skin.path_constraints.push(index);
        }

        for (slot_name, attachments) in def.attachments {
            let slot_index = self.slot(&slot_name, &context)?;
            for (placeholder, attachment_def) in attachments {
                let at = AttachmentRef {
                    skin: &skin.name,
                    slot: &slot_name,
                    attachment: &placeholder,
                };
                let attachment =
                    self.read_attachment(attachment_def, &at, skin_index, slot_index)?;
                skin.set_attachment(slot_index, placeholder, attachment);
            }
        }
        self.data.skins.push(skin);
        Ok(())
    }

    fn read_attachment(
        &mut self,
        def: AttachmentDef,
        at: &AttachmentRef<'_>,
        skin_index: usize,
        slot_index: usize,
    ) -> Result<Attachment, Error> {
        let scale = self.scale;
        let context = format!(
            "attachment '{}' (skin '{}', slot '{}')",
            at.attachment, at.skin, at.slot
        );
        let name = def.name.clone().unwrap_or_else(|| at.attachment.to_string());
        let color = match def.color.as_deref() {
            Some(color) => parse_hex_color_rgba(color, &context)?,
            None => [1.0; 4],
        };
        let sequence = def.sequence.as_ref().map(|s| Sequence {
            id: self.ids.next_sequence_id(),
            count: s.count,
            start: s.start,
            digits: s.digits,
            setup_index: s.setup_index,
        });

        let attachment_type = def.attachment_type.as_deref().unwrap_or("region");
        let attachment = match attachment_type {
            "region" => {
                let mut region = RegionAttachment::new(name, def.width * scale, def.height * scale);
                if let Some(path) = def.path {
                    region.path = path;
                }
                region.color = color;
                region.x = def.x * scale;
                region.y = def.y * scale;
                region.rotation = def.rotation;
                region.scale_x = def.scale_x;
                region.scale_y = def.scale_y;
                region.sequence = sequence;
                region.update_region();
                Attachment::Region(region)
            }
            "mesh" | "linkedmesh" => {
                let path = def.path.clone().unwrap_or_else(|| name.clone());
                let id = self.ids.next_vertex_id();
                let mut mesh = MeshAttachment {
                    name,
                    path,
                    color,
                    vertex: VertexAttachment::new(id, MeshVertices::Unweighted(Vec::new())),
                    uvs: Vec::new(),
                    triangles: Vec::new(),
                    hull_length: def.hull * 2,
                    edges: Vec::new(),
                    width: def.width * scale,
                    height: def.height * scale,
                    sequence,
                    parent_mesh: None,
                };
                if attachment_type == "linkedmesh" {
                    let parent = def
                        .parent
                        .ok_or_else(|| at.invalid("linked mesh without 'parent'"))?;
                    mesh.parent_mesh = Some(parent.clone());
                    self.linked_meshes.push(LinkedMesh {
                        skin: skin_index,
                        slot: slot_index,
                        placeholder: at.attachment.to_string(),
                        parent,
                        parent_skin: def.skin,
                        inherit_timelines: def.timelines.unwrap_or(true),
                    });
                    return Ok(Attachment::Mesh(mesh));
                }

                let uvs = def.uvs.ok_or_else(|| at.invalid("missing 'uvs'"))?;
                if uvs.len() % 2 != 0 {
                    return Err(at.invalid("uvs length must be even"));
                }
                let vertex_count = uvs.len() / 2;
                let raw = def
                    .vertices
                    .ok_or_else(|| at.invalid("missing 'vertices'"))?;
                mesh.vertex.vertices = self.read_vertices(&raw, vertex_count, at)?;
                mesh.uvs = uvs.chunks_exact(2).map(|uv| [uv[0], uv[1]]).collect();
                let triangles = def
                    .triangles
                    .ok_or_else(|| at.invalid("missing 'triangles'"))?;
                mesh.triangles = read_indices(&triangles, vertex_count, at)?;
                mesh.edges = def
                    .edges
                    .iter()
                    .map(|&e| u16::try_from(e).map_err(|_| at.invalid("edge index out of range")))
                    .collect::<Result<_, _>>()?;
                Attachment::Mesh(mesh)
            }
            "boundingbox" => {
                let vertex = self.read_vertex_attachment(&def, at)?;
                Attachment::BoundingBox(BoundingBoxAttachment {
                    name,
                    vertex,
                    color,
                })
            }
            "path" => {
                let vertex = self.read_vertex_attachment(&def, at)?;
                if def.lengths.len() != def.vertex_count / 3 {
                    return Err(at.invalid(format!(
                        "expected {} path lengths, got {}",
                        def.vertex_count / 3,
                        def.lengths.len()
                    )));
                }
                Attachment::Path(PathAttachment {
                    name,
                    vertex,
                    lengths: def.lengths.iter().map(|l| l * scale).collect(),
                    closed: def.closed,
                    constant_speed: def.constant_speed,
                    color,
                })
            }
            "point" => Attachment::Point(PointAttachment {
                name,
                x: def.x * scale,
                y: def.y * scale,
                rotation: def.rotation,
                color,
            }),
            "clipping" => {
                let vertex = self.read_vertex_attachment(&def, at)?;
                let end_slot = def
                    .end
                    .as_deref()
                    .map(|end| self.slot(end, &context))
                    .transpose()?;
                Attachment::Clipping(ClippingAttachment {
                    name,
                    vertex,
                    end_slot,
                    color,
                })
            }
            other => return Err(unsupported("attachment type", other, &context)),
        };
        Ok(attachment)
    }

    fn read_vertex_attachment(
        &mut self,
        def: &AttachmentDef,
        at: &AttachmentRef<'_>,
    ) -> Result<VertexAttachment, Error> {
        let raw = def.vertices.as_deref().unwrap_or(&[]);
        let vertices = self.read_vertices(raw, def.vertex_count, at)?;
        Ok(VertexAttachment::new(self.ids.next_vertex_id(), vertices))
    }

    /// Unweighted when `raw` holds exactly one position per vertex, otherwise
    /// `[bone count, (bone, x, y, weight) * count]` per vertex.
    fn read_vertices(
        &self,
        raw: &[f32],
        vertex_count: usize,
        at: &AttachmentRef<'_>,
    ) -> Result<MeshVertices, Error> {
        let scale = self.scale;
        if raw.len() == vertex_count * 2 {
            return Ok(MeshVertices::Unweighted(
                raw.chunks_exact(2)
                    .map(|p| [p[0] * scale, p[1] * scale])
                    .collect(),
            ));
        }

        fn as_index(value: f32) -> Option<usize> {
            let rounded = value.round();
            (value.is_finite() && rounded >= 0.0 && (value - rounded).abs() <= 1.0e-4)
                .then_some(rounded as usize)
        }

        let bone_count = self.data.bones.len();
        let mut cursor = 0usize;
        let mut out = Vec::with_capacity(vertex_count);
        for _ in 0..vertex_count {
            let count = raw
                .get(cursor)
                .copied()
                .and_then(as_index)
                .ok_or_else(|| at.invalid("invalid bone count in weighted vertices"))?;
            cursor += 1;
            let mut weights = Vec::with_capacity(count);
            for _ in 0..count {
                let entry = raw
                    .get(cursor..cursor + 4)
                    .ok_or_else(|| at.invalid("unexpected end of weighted vertices"))?;
                cursor += 4;
                let bone = as_index(entry[0])
                    .filter(|&b| b < bone_count)
                    .ok_or_else(|| at.invalid("bone index out of range in weighted vertices"))?;
                weights.push(VertexWeight {
                    bone,
                    x: entry[1] * scale,
                    y: entry[2] * scale,
                    weight: entry[3],
                });
            }
            out.push(weights);
        }
        if cursor != raw.len() {
            return Err(at.invalid("unexpected extra data in weighted vertices"));
        }
        Ok(MeshVertices::Weighted(out))
    }

    /// Copies parent geometry into every linked mesh once all skins are known.
    fn link_meshes(&mut self) -> Result<(), Error> {
        for linked in std::mem::take(&mut self.linked_meshes) {
            let parent_skin_name = linked.parent_skin.as_deref().unwrap_or("default");
            let skin_name = self.data.skins[linked.skin].name.clone();
            let missing_parent = || Error::JsonUnknownLinkedMeshParent {
                skin: skin_name.clone(),
                attachment: linked.placeholder.clone(),
                parent: linked.parent.clone(),
            };
            let parent = self
                .data
                .find_skin(parent_skin_name)
                .and_then(|skin| self.data.skins[skin].attachment(linked.slot, &linked.parent))
                .and_then(|attachment| match attachment {
                    Attachment::Mesh(mesh) => Some(mesh.clone()),
                    _ => None,
                })
                .ok_or_else(missing_parent)?;

            let Some(Attachment::Mesh(mesh)) = self.data.skins[linked.skin]
                .attachments
                .get_mut(linked.slot)
                .and_then(|slot_map| slot_map.get_mut(&linked.placeholder))
            else {
                return Err(missing_parent());
            };
            mesh.vertex.vertices = parent.vertex.vertices;
            mesh.vertex.timeline_attachment = if linked.inherit_timelines {
                parent.vertex.id
            } else {
                mesh.vertex.id
            };
            mesh.uvs = parent.uvs;
            mesh.triangles = parent.triangles;
            mesh.hull_length = parent.hull_length;
            mesh.edges = parent.edges;
            mesh.width = parent.width;
            mesh.height = parent.height;
        }
        Ok(())
    }

    fn read_events(&mut self, defs: BTreeMap<String, EventDef>) {
        for (name, def) in defs {
            let mut event = EventData::new(name);
            event.int_value = def.int_value;
            event.float_value = def.float_value;
            event.string = def.string_value;
            event.audio_path = def.audio_path;
            if !event.audio_path.is_empty() {
                event.volume = def.volume;
                event.balance = def.balance;
            }
            self.data.events.push(event);
        }
    }

    fn read_animation(&self, name: &str, def: AnimationDef) -> Result<Animation, Error> {
        let scale = self.scale;
        let mut timelines = Vec::new();

        for (slot_name, slot_def) in &def.slots {
            let context = format!("animation '{name}' slot '{slot_name}'");
            let slot_index = self.slot(slot_name, &context)?;
            self.read_slot_timelines(slot_index, slot_def, &context, &mut timelines)?;
        }

        for (bone_name, bone_def) in &def.bones {
            let context = format!("animation '{name}' bone '{bone_name}'");
            let bone_index = self.bone(bone_name, &context)?;
            read_bone_timelines(bone_index, bone_def, scale, &context, &mut timelines)?;
        }

        for (constraint_name, keys) in &def.ik {
            let context = format!("animation '{name}' ik '{constraint_name}'");
            let index = self
                .data
                .find_ik_constraint(constraint_name)
                .ok_or_else(|| unknown("ik constraint", constraint_name, &context))?;
            if keys.is_empty() {
                continue;
            }
            let frames = keys
                .iter()
                .map(|k| KeyFrame {
                    time: k.time,
                    values: vec![
                        k.mix.unwrap_or(1.0),
                        k.softness.unwrap_or(0.0) * scale,
                        if k.bend_positive.unwrap_or(true) { 1.0 } else { -1.0 },
                        if k.compress { 1.0 } else { 0.0 },
                        if k.stretch { 1.0 } else { 0.0 },
                    ],
                    curve: k.curve.as_ref(),
                })
                .collect::<Vec<_>>();
            timelines.push(Timeline::IkConstraint(ConstraintTimeline {
                constraint_index: index,
                curve: read_curve_timeline(&frames, IK_ENTRIES, &[1.0, scale], &context)?,
            }));
        }

        for (constraint_name, keys) in &def.transform {
            let context = format!("animation '{name}' transform '{constraint_name}'");
            let index = self
                .data
                .find_transform_constraint(constraint_name)
                .ok_or_else(|| unknown("transform constraint", constraint_name, &context))?;
            if keys.is_empty() {
                continue;
            }
            let frames = keys
                .iter()
                .map(|k| {
                    let mix_x = k.mix_x.unwrap_or(1.0);
                    let mix_scale_x = k.mix_scale_x.unwrap_or(1.0);
                    KeyFrame {
                        time: k.time,
                        values: vec![
                            k.mix_rotate.unwrap_or(1.0),
                            mix_x,
                            k.mix_y.unwrap_or(mix_x),
                            mix_scale_x,
                            k.mix_scale_y.unwrap_or(mix_scale_x),
                            k.mix_shear_y.unwrap_or(1.0),
                        ],
                        curve: k.curve.as_ref(),
                    }
                })
                .collect::<Vec<_>>();
            timelines.push(Timeline::TransformConstraint(ConstraintTimeline {
                constraint_index: index,
                curve: read_curve_timeline(&frames, TRANSFORM_ENTRIES, &[1.0; 6], &context)?,
            }));
        }

        for (constraint_name, path_def) in &def.path {
            let context = format!("animation '{name}' path '{constraint_name}'");
            let index = self
                .data
                .find_path_constraint(constraint_name)
                .ok_or_else(|| unknown("path constraint", constraint_name, &context))?;
            let data = &self.data.path_constraints[index];
            if !path_def.position.is_empty() {
                let value_scale = position_scale(data.position_mode, scale);
                let frames = float_frames(&path_def.position, 0.0, value_scale);
                timelines.push(Timeline::PathConstraintPosition(ConstraintTimeline {
                    constraint_index: index,
                    curve: read_curve_timeline(
                        &frames,
                        PATH_VALUE_ENTRIES,
                        &[value_scale],
                        &context,
                    )?,
                }));
            }
            if !path_def.spacing.is_empty() {
                let value_scale = spacing_scale(data.spacing_mode, scale);
                let frames = float_frames(&path_def.spacing, 0.0, value_scale);
                timelines.push(Timeline::PathConstraintSpacing(ConstraintTimeline {
                    constraint_index: index,
                    curve: read_curve_timeline(
                        &frames,
                        PATH_VALUE_ENTRIES,
                        &[value_scale],
                        &context,
                    )?,
                }));
            }
            if !path_def.mix.is_empty() {
                let frames = path_def
                    .mix
                    .iter()
                    .map(|k| {
                        let mix_x = k.mix_x.unwrap_or(1.0);
                        KeyFrame {
                            time: k.time,
                            values: vec![k.mix_rotate.unwrap_or(1.0), mix_x, k.mix_y.unwrap_or(mix_x)],
                            curve: k.curve.as_ref(),
                        }
                    })
                    .collect::<Vec<_>>();
                timelines.push(Timeline::PathConstraintMix(ConstraintTimeline {
                    constraint_index: index,
                    curve: read_curve_timeline(&frames, PATH_MIX_ENTRIES, &[1.0; 3], &context)?,
                }));
            }
        }

        for (skin_name, slots) in &def.attachments {
            for (slot_name, attachments) in slots {
                for (attachment_name, anim) in attachments {
                    let keyed = self.keyed_attachment(name, skin_name, slot_name, attachment_name)?;
                    if !anim.deform.is_empty() {
                        timelines.push(self.read_deform_timeline(name, &keyed, &anim.deform)?);
                    }
                    if !anim.sequence.is_empty() {
                        if let Some(timeline) = read_sequence_timeline(name, &keyed, &anim.sequence)? {
                            timelines.push(timeline);
                        }
                    }
                }
            }
        }
        for (skin_name, slots) in &def.deform {
            for (slot_name, attachments) in slots {
                for (attachment_name, keys) in attachments {
                    if keys.is_empty() {
                        continue;
                    }
                    let keyed = self.keyed_attachment(name, skin_name, slot_name, attachment_name)?;
                    timelines.push(self.read_deform_timeline(name, &keyed, keys)?);
                }
            }
        }

        if let Some(keys) = def.draw_order.as_deref().filter(|k| !k.is_empty()) {
            let mut timeline = DrawOrderTimeline::new(keys.len());
            for (frame, key) in keys.iter().enumerate() {
                let draw_order = key
                    .offsets
                    .as_deref()
                    .map(|offsets| self.read_draw_order(offsets, name))
                    .transpose()?;
                timeline.set_frame(frame, key.time, draw_order);
            }
            timelines.push(Timeline::DrawOrder(timeline));
        }

        if !def.events.is_empty() {
            let mut events = Vec::with_capacity(def.events.len());
            for key in &def.events {
                let context = format!("animation '{name}'");
                let index = self
                    .data
                    .find_event(&key.name)
                    .ok_or_else(|| unknown("event", &key.name, &context))?;
                let data = &self.data.events[index];
                let mut event = Event::new(index, data, key.time);
                if let Some(value) = key.int_value {
                    event.int_value = value;
                }
                if let Some(value) = key.float_value {
                    event.float_value = value;
                }
                if let Some(value) = &key.string_value {
                    event.string = value.clone();
                }
                if !data.audio_path.is_empty() {
                    event.volume = key.volume.unwrap_or(data.volume);
                    event.balance = key.balance.unwrap_or(data.balance);
                }
                events.push(event);
            }
            events.sort_by(|a, b| a.time.total_cmp(&b.time));
            timelines.push(Timeline::Event(EventTimeline::new(events)));
        }

        let duration = timelines
            .iter()
            .map(Timeline::duration)
            .fold(0.0f32, f32::max);
        Ok(Animation::new(name, timelines, duration))
    }

    fn read_slot_timelines(
        &self,
        slot_index: usize,
        def: &SlotAnimDef,
        context: &str,
        timelines: &mut Vec<Timeline>,
    ) -> Result<(), Error> {
        if !def.attachment.is_empty() {
            let mut timeline = AttachmentTimeline::new(slot_index, def.attachment.len());
            for (frame, key) in def.attachment.iter().enumerate() {
                timeline.set_frame(frame, key.time, key.name.clone());
            }
            timelines.push(Timeline::Attachment(timeline));
        }

        let slot_timeline = |curve| SlotCurveTimeline { slot_index, curve };

        if !def.rgba.is_empty() {
            let frames = def
                .rgba
                .iter()
                .map(|k| {
                    Ok(KeyFrame {
                        time: k.time,
                        values: parse_hex_color_rgba(&k.color, context)?.to_vec(),
                        curve: k.curve.as_ref(),
                    })
                })
                .collect::<Result<Vec<_>, Error>>()?;
            let curve = read_curve_timeline(&frames, RGBA_ENTRIES, &[1.0; 4], context)?;
            timelines.push(Timeline::Rgba(slot_timeline(curve)));
        }
        if !def.rgb.is_empty() {
            let frames = def
                .rgb
                .iter()
                .map(|k| {
                    Ok(KeyFrame {
                        time: k.time,
                        values: parse_hex_color_rgb(&k.color, context)?.to_vec(),
                        curve: k.curve.as_ref(),
                    })
                })
                .collect::<Result<Vec<_>, Error>>()?;
            let curve = read_curve_timeline(&frames, RGB_ENTRIES, &[1.0; 3], context)?;
            timelines.push(Timeline::Rgb(slot_timeline(curve)));
        }
        if !def.alpha.is_empty() {
            let frames = float_frames(&def.alpha, 0.0, 1.0);
            let curve = read_curve_timeline(&frames, ALPHA_ENTRIES, &[1.0], context)?;
            timelines.push(Timeline::Alpha(slot_timeline(curve)));
        }
        if !def.rgba2.is_empty() {
            let frames = def
                .rgba2
                .iter()
                .map(|k| {
                    let mut values = parse_hex_color_rgba(&k.light, context)?.to_vec();
                    values.extend(parse_hex_color_rgb(&k.dark, context)?);
                    Ok(KeyFrame {
                        time: k.time,
                        values,
                        curve: k.curve.as_ref(),
                    })
                })
                .collect::<Result<Vec<_>, Error>>()?;
            let curve = read_curve_timeline(&frames, RGBA2_ENTRIES, &[1.0; 7], context)?;
            timelines.push(Timeline::Rgba2(slot_timeline(curve)));
        }
        if !def.rgb2.is_empty() {
            let frames = def
                .rgb2
                .iter()
                .map(|k| {
                    let mut values = parse_hex_color_rgb(&k.light, context)?.to_vec();
                    values.extend(parse_hex_color_rgb(&k.dark, context)?);
                    Ok(KeyFrame {
                        time: k.time,
                        values,
                        curve: k.curve.as_ref(),
                    })
                })
                .collect::<Result<Vec<_>, Error>>()?;
            let curve = read_curve_timeline(&frames, RGB2_ENTRIES, &[1.0; 6], context)?;
            timelines.push(Timeline::Rgb2(slot_timeline(curve)));
        }
        Ok(())
    }

    fn keyed_attachment(
        &self,
        animation: &str,
        skin_name: &str,
        slot_name: &str,
        attachment_name: &str,
    ) -> Result<KeyedAttachment<'_>, Error> {
        let context = format!("animation '{animation}'");
        let skin = self
            .data
            .find_skin(skin_name)
            .ok_or_else(|| unknown("skin", skin_name, &context))?;
        let slot = self.slot(slot_name, &context)?;
        let attachment = self.data.skins[skin]
            .attachment(slot, attachment_name)
            .ok_or_else(|| unknown("attachment", attachment_name, &context))?;
        Ok(KeyedAttachment {
            skin: skin_name.to_string(),
            slot_name: slot_name.to_string(),
            slot,
            name: attachment_name.to_string(),
            attachment,
        })
    }

    fn read_deform_timeline(
        &self,
        animation: &str,
        keyed: &KeyedAttachment<'_>,
        keys: &[DeformKey],
    ) -> Result<Timeline, Error> {
        let at = AttachmentRef {
            skin: &keyed.skin,
            slot: &keyed.slot_name,
            attachment: &keyed.name,
        };
        let context = format!("animation '{animation}' deform '{}'", keyed.name);
        let Some(vertex) = keyed.attachment.vertex_attachment() else {
            return Err(at.invalid(format!(
                "deform keyed in animation '{animation}' on an attachment without vertices"
            )));
        };
        let setup = match &vertex.vertices {
            MeshVertices::Unweighted(v) => Some(v.iter().flatten().copied().collect::<Vec<_>>()),
            MeshVertices::Weighted(_) => None,
        };
        let length = vertex.vertices.deform_length();

        let frame_count = keys.len();
        let bezier_count = keys[..frame_count - 1]
            .iter()
            .filter(|k| k.curve.as_ref().is_some_and(serde_json::Value::is_array))
            .count();
        let mut timeline = DeformTimeline::new(keyed.slot, vertex.id, frame_count, bezier_count);
        let mut bezier = 0;
        for (frame, key) in keys.iter().enumerate() {
            let mut deform = match (&key.vertices, &setup) {
                (None, Some(setup)) => setup.clone(),
                (None, None) => vec![0.0; length],
                (Some(values), _) => {
                    if key.offset + values.len() > length {
                        return Err(at.invalid(format!(
                            "deform in animation '{animation}' out of range (offset {}, len {}, max {length})",
                            key.offset,
                            values.len()
                        )));
                    }
                    let mut deform = vec![0.0; length];
                    for (d, v) in deform[key.offset..].iter_mut().zip(values) {
                        *d = v * self.scale;
                    }
                    if let Some(setup) = &setup {
                        for (d, s) in deform.iter_mut().zip(setup) {
                            *d += s;
                        }
                    }
                    deform
                }
            };
            deform.resize(length, 0.0);
            timeline.set_frame(frame, key.time, deform);

            let (Some(next), Some(curve)) = (keys.get(frame + 1), key.curve.as_ref()) else {
                continue;
            };
            if is_stepped(curve, &context)? {
                timeline.curve.set_stepped(frame);
                continue;
            }
            read_bezier(
                &mut timeline.curve,
                curve,
                &mut bezier,
                frame,
                0,
                [key.time, next.time],
                [0.0, 1.0],
                1.0,
                &context,
            )?;
        }
        timeline.curve.shrink(bezier);
        Ok(Timeline::Deform(timeline))
    }

    /// Setup slot index for every draw position after applying `offsets`.
    fn read_draw_order(&self, offsets: &[DrawOrderOffset], animation: &str) -> Result<Vec<usize>, Error> {
        let invalid = |message: String| Error::JsonInvalidDrawOrder {
            animation: animation.to_string(),
            message,
        };
        let slot_count = self.data.slots.len();
        let mut draw_order: Vec<Option<usize>> = vec![None; slot_count];
        let mut unchanged = Vec::with_capacity(slot_count.saturating_sub(offsets.len()));
        let mut original = 0usize;
        for offset in offsets {
            let slot = self
                .slot_index
                .get(&offset.slot)
                .copied()
                .ok_or_else(|| invalid(format!("unknown slot '{}'", offset.slot)))?;
            if slot < original {
                return Err(invalid(format!("offsets out of slot order at '{}'", offset.slot)));
            }
            unchanged.extend(original..slot);
            original = slot;
            let target = original as i64 + offset.offset as i64;
            let target = usize::try_from(target)
                .ok()
                .filter(|&t| t < slot_count)
                .ok_or_else(|| invalid(format!("offset {} out of range for '{}'", offset.offset, offset.slot)))?;
            if draw_order[target].replace(original).is_some() {
                return Err(invalid(format!("two slots moved to position {target}")));
            }
            original += 1;
        }
        unchanged.extend(original..slot_count);
        for position in draw_order.iter_mut().rev() {
            if position.is_none() {
                *position = unchanged.pop();
            }
        }
        draw_order
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| invalid("draw order left positions unfilled".to_string()))
    }
}

struct KeyedAttachment<'d> {
    skin: String,
    slot_name: String,
    slot: usize,
    name: String,
    attachment: &'d Attachment,
}

fn read_sequence_timeline(
    animation: &str,
    keyed: &KeyedAttachment<'_>,
    keys: &[SequenceKey],
) -> Result<Option<Timeline>, Error> {
    let Some(sequence) = keyed.attachment.sequence() else {
        log::warn!(
            "animation '{animation}' keys a sequence on '{}' which has none; skipped",
            keyed.name
        );
        return Ok(None);
    };
    let context = format!("animation '{animation}' sequence '{}'", keyed.name);
    let timeline_attachment = match keyed.attachment {
        Attachment::Mesh(mesh) => Some(mesh.vertex.id),
        _ => None,
    };
    let mut timeline =
        SequenceTimeline::new(keyed.slot, sequence.clone(), timeline_attachment, keys.len());
    for (frame, key) in keys.iter().enumerate() {
        let mode = match key.mode.as_deref().unwrap_or("hold") {
            "hold" => SequenceMode::Hold,
            "once" => SequenceMode::Once,
            "loop" => SequenceMode::Loop,
            "pingpong" => SequenceMode::PingPong,
            "onceReverse" => SequenceMode::OnceReverse,
            "loopReverse" => SequenceMode::LoopReverse,
            "pingpongReverse" => SequenceMode::PingPongReverse,
            other => return Err(unsupported("sequence mode", other, &context)),
        };
        timeline.set_frame(frame, key.time, mode, key.index, key.delay);
    }
    Ok(Some(Timeline::Sequence(timeline)))
}

fn read_bone_timelines(
    bone_index: usize,
    def: &BoneAnimDef,
    scale: f32,
    context: &str,
    timelines: &mut Vec<Timeline>,
) -> Result<(), Error> {
    let bone_timeline = |frames: &[KeyFrame<'_>], entries: usize, scales: &[f32]| {
        read_curve_timeline(frames, entries, scales, context)
            .map(|curve| BoneTimeline { bone_index, curve })
    };

    if !def.rotate.is_empty() {
        let frames = float_frames(&def.rotate, 0.0, 1.0);
        timelines.push(Timeline::Rotate(bone_timeline(&frames, BONE1_ENTRIES, &[1.0])?));
    }

    let pairs: [(&Vec<Vec2Key>, f32, f32, fn(BoneTimeline) -> Timeline); 3] = [
        (&def.translate, 0.0, scale, Timeline::Translate),
        (&def.scale, 1.0, 1.0, Timeline::Scale),
        (&def.shear, 0.0, 1.0, Timeline::Shear),
    ];
    for (keys, default, value_scale, wrap) in pairs {
        if keys.is_empty() {
            continue;
        }
        let frames = keys
            .iter()
            .map(|k| KeyFrame {
                time: k.time,
                values: vec![
                    k.x.unwrap_or(default) * value_scale,
                    k.y.unwrap_or(default) * value_scale,
                ],
                curve: k.curve.as_ref(),
            })
            .collect::<Vec<_>>();
        timelines.push(wrap(bone_timeline(
            &frames,
            BONE2_ENTRIES,
            &[value_scale, value_scale],
        )?));
    }

    let singles: [(&Vec<FloatKey>, f32, f32, fn(BoneTimeline) -> Timeline); 6] = [
        (&def.translate_x, 0.0, scale, Timeline::TranslateX),
        (&def.translate_y, 0.0, scale, Timeline::TranslateY),
        (&def.scale_x, 1.0, 1.0, Timeline::ScaleX),
        (&def.scale_y, 1.0, 1.0, Timeline::ScaleY),
        (&def.shear_x, 0.0, 1.0, Timeline::ShearX),
        (&def.shear_y, 0.0, 1.0, Timeline::ShearY),
    ];
    for (keys, default, value_scale, wrap) in singles {
        if keys.is_empty() {
            continue;
        }
        let frames = float_frames(keys, default, value_scale);
        timelines.push(wrap(bone_timeline(&frames, BONE1_ENTRIES, &[value_scale])?));
    }
    Ok(())
}

/// A parsed key: its time, every value stored in the frame, and the curve towards the next key.
struct KeyFrame<'a> {
    time: f32,
    values: Vec<f32>,
    curve: Option<&'a serde_json::Value>,
}

fn float_frames(keys: &[FloatKey], default: f32, scale: f32) -> Vec<KeyFrame<'_>> {
    keys.iter()
        .map(|k| KeyFrame {
            time: k.time,
            values: vec![k.value.unwrap_or(default) * scale],
            curve: k.curve.as_ref(),
        })
        .collect()
}

/// Builds a curve timeline whose first `scales.len()` values are interpolated; later values in
/// each frame (IK bend direction, compress, stretch) are stored as-is.
fn read_curve_timeline(
    frames: &[KeyFrame<'_>],
    frame_entries: usize,
    scales: &[f32],
    context: &str,
) -> Result<CurveTimeline, Error> {
    let curved = scales.len();
    let bezier_count = frames
        .iter()
        .take(frames.len().saturating_sub(1))
        .filter(|f| f.curve.is_some_and(serde_json::Value::is_array))
        .count()
        * curved;
    let mut timeline = CurveTimeline::new(frames.len(), bezier_count, frame_entries);
    let mut bezier = 0;
    for (frame, key) in frames.iter().enumerate() {
        timeline.set_frame(frame, key.time, &key.values);
        let (Some(next), Some(curve)) = (frames.get(frame + 1), key.curve) else {
            continue;
        };
        if is_stepped(curve, context)? {
            timeline.set_stepped(frame);
            continue;
        }
        for (value, &scale) in scales.iter().enumerate() {
            read_bezier(
                &mut timeline,
                curve,
                &mut bezier,
                frame,
                value,
                [key.time, next.time],
                [key.values[value], next.values[value]],
                scale,
                context,
            )?;
        }
    }
    timeline.shrink(bezier);
    Ok(timeline)
}

fn is_stepped(curve: &serde_json::Value, context: &str) -> Result<bool, Error> {
    match curve {
        serde_json::Value::String(s) if s == "stepped" => Ok(true),
        serde_json::Value::Array(_) => Ok(false),
        other => Err(Error::JsonInvalidCurve {
            context: context.to_string(),
            message: format!("expected \"stepped\" or an array, got {other}"),
        }),
    }
}

/// Reads the four control-point numbers for `value` from a Bezier curve array.
#[allow(clippy::too_many_arguments)]
fn read_bezier(
    timeline: &mut CurveTimeline,
    curve: &serde_json::Value,
    bezier: &mut usize,
    frame: usize,
    value: usize,
    times: [f32; 2],
    values: [f32; 2],
    scale: f32,
    context: &str,
) -> Result<(), Error> {
    let numbers = curve.as_array().map(Vec::as_slice).unwrap_or(&[]);
    let base = value * 4;
    let number = |i: usize| {
        numbers
            .get(base + i)
            .and_then(serde_json::Value::as_f64)
            .map(|n| n as f32)
            .ok_or_else(|| Error::JsonInvalidCurve {
                context: context.to_string(),
                message: format!("curve[{}] missing or not a number", base + i),
            })
    };
    let cx1 = number(0)?;
    let cy1 = number(1)? * scale;
    let cx2 = number(2)?;
    let cy2 = number(3)? * scale;
    timeline.set_bezier(
        *bezier, frame, value, times[0], values[0], cx1, cy1, cx2, cy2, times[1], values[1],
    );
    *bezier += 1;
    Ok(())
}

fn read_indices(raw: &[u32], vertex_count: usize, at: &AttachmentRef<'_>) -> Result<Vec<u16>, Error> {
    if raw.len() % 3 != 0 {
        return Err(at.invalid("triangle index count must be a multiple of 3"));
    }
    raw.iter()
        .map(|&i| {
            u16::try_from(i)
                .ok()
                .filter(|&i| (i as usize) < vertex_count)
                .ok_or_else(|| at.invalid(format!("triangle index {i} out of range")))
        })
        .collect()
}

fn position_scale(mode: PositionMode, scale: f32) -> f32 {
    if mode == PositionMode::Fixed { scale } else { 1.0 }
}

fn spacing_scale(mode: SpacingMode, scale: f32) -> f32 {
    if matches!(mode, SpacingMode::Length | SpacingMode::Fixed) {
        scale
    } else {
        1.0
    }
}

fn unknown(kind: &'static str, name: &str, context: &str) -> Error {
    Error::JsonUnknownReference {
        kind,
        name: name.to_string(),
        context: context.to_string(),
    }
}

fn unsupported(field: &'static str, value: &str, context: &str) -> Error {
    Error::JsonUnsupportedValue {
        field,
        value: value.to_string(),
        context: context.to_string(),
    }
}

fn default_one() -> f32 {
    1.0
}

fn default_true() -> bool {
    true
}

fn parse_hex_color_rgba(input: &str, context: &str) -> Result<[f32; 4], Error> {
    let invalid = || Error::JsonInvalidColor {
        context: context.to_string(),
        value: input.to_string(),
    };
    if input.len() != 6 && input.len() != 8 {
        return Err(invalid());
    }
    let channel = |i: usize| -> Result<f32, Error> {
        let hex = input.get(i * 2..i * 2 + 2).ok_or_else(invalid)?;
        let byte = u8::from_str_radix(hex, 16).map_err(|_| invalid())?;
        Ok(byte as f32 / 255.0)
    };
    let alpha = if input.len() == 8 { channel(3)? } else { 1.0 };
    Ok([channel(0)?, channel(1)?, channel(2)?, alpha])
}

fn parse_hex_color_rgb(input: &str, context: &str) -> Result<[f32; 3], Error> {
    let [r, g, b, _] = parse_hex_color_rgba(input, context)?;
    Ok([r, g, b])
}

fn parse_blend_mode(value: Option<&str>, context: &str) -> Result<BlendMode, Error> {
    match value.unwrap_or("normal") {
        "normal" => Ok(BlendMode::Normal),
        "additive" => Ok(BlendMode::Additive),
        "multiply" => Ok(BlendMode::Multiply),
        "screen" => Ok(BlendMode::Screen),
        other => Err(unsupported("blend", other, context)),
    }
}

/// Accepts 4.0 and 4.1 exports; later 4.x releases changed the bone and constraint layout.
fn validate_spine_version(value: &str) -> Result<(), Error> {
    let mut parts = value.split('.');
    let major = parts.next().and_then(|p| p.parse::<u32>().ok());
    let minor = parts.next().and_then(|p| p.parse::<u32>().ok());
    match (major, minor) {
        (Some(4), Some(0 | 1)) => Ok(()),
        _ => Err(Error::JsonVersion {
            value: value.to_string(),
        }),
    }
}
