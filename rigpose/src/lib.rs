//! Pose solver for 2D skeletal animation rigs exported by Spine 4.0/4.1.
//!
//! Given immutable rig data ([`SkeletonData`]) this crate computes bone world transforms, solves
//! IK, transform and path constraints, evaluates keyframed animations, mixes them across tracks
//! with [`AnimationState`], and clips attachment triangles against clipping polygons. It never
//! touches a GPU: renderers consume the posed [`Skeleton`] and the output of
//! [`SkeletonClipping`].

#![forbid(unsafe_code)]

mod error;
mod geometry;
mod ids;
mod model;
mod runtime;
mod timeline;

#[cfg(feature = "json")]
pub mod json;

pub use error::*;
pub use geometry::*;
pub use ids::*;
pub use model::*;
pub use runtime::*;
pub use timeline::*;


#[cfg(test)]
mod timeline_tests;

#[cfg(all(test, feature = "json"))]
mod json_tests;
