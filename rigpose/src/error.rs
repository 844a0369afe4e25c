use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown animation: {name}")]
    UnknownAnimation { name: String },

    #[error("unknown skin: {name}")]
    UnknownSkin { name: String },

    #[error("unknown bone: {name}")]
    UnknownBone { name: String },

    #[error("unknown slot: {name}")]
    UnknownSlot { name: String },

    #[error("unknown attachment '{attachment}' for slot '{slot}'")]
    UnknownAttachment { slot: String, attachment: String },

    #[error("unknown {kind} constraint: {name}")]
    UnknownConstraint { kind: String, name: String },

    #[error("invalid track index: {index}")]
    InvalidTrackIndex { index: usize },

    #[error("invalid value: {message}")]
    InvalidValue { message: String },

    #[cfg(feature = "json")]
    #[error("failed to parse skeleton JSON: {message}")]
    JsonParse { message: String },

    #[cfg(feature = "json")]
    #[error("invalid color '{value}' for {context}")]
    JsonInvalidColor { context: String, value: String },

    #[cfg(feature = "json")]
    #[error("invalid curve for {context}: {message}")]
    JsonInvalidCurve { context: String, message: String },

    #[cfg(feature = "json")]
    #[error("unsupported or invalid skeleton version string: {value}")]
    JsonVersion { value: String },

    #[cfg(feature = "json")]
    #[error("unknown parent bone '{parent}' for bone '{bone}'")]
    JsonUnknownBoneParent { bone: String, parent: String },

    #[cfg(feature = "json")]
    #[error("unknown {kind} '{name}' referenced by {context}")]
    JsonUnknownReference {
        kind: &'static str,
        name: String,
        context: String,
    },

    #[cfg(feature = "json")]
    #[error("unsupported {field} '{value}' for {context}")]
    JsonUnsupportedValue {
        field: &'static str,
        value: String,
        context: String,
    },

    #[cfg(feature = "json")]
    #[error(
        "invalid vertex data for skin '{skin}', slot '{slot}', attachment '{attachment}': {message}"
    )]
    JsonInvalidVertices {
        skin: String,
        slot: String,
        attachment: String,
        message: String,
    },

    #[cfg(feature = "json")]
    #[error("unknown parent mesh '{parent}' for linked mesh '{attachment}' in skin '{skin}'")]
    JsonUnknownLinkedMeshParent {
        skin: String,
        attachment: String,
        parent: String,
    },

    #[cfg(feature = "json")]
    #[error("invalid drawOrder data for animation '{animation}': {message}")]
    JsonInvalidDrawOrder { animation: String, message: String },
}
