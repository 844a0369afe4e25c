mod animation;
mod animation_state;
mod ik;
mod path_constraint;
mod skeleton;
mod transform_constraint;

pub use animation::*;
pub use animation_state::*;
pub use ik::*;
pub use path_constraint::*;
pub use skeleton::*;
pub use transform_constraint::*;

#[cfg(test)]
mod skeleton_tests;

#[cfg(all(test, feature = "json"))]
mod ik_tests;

#[cfg(all(test, feature = "json"))]
mod transform_constraint_tests;

#[cfg(all(test, feature = "json"))]
mod path_constraint_tests;

#[cfg(all(test, feature = "json"))]
mod animation_tests;

#[cfg(all(test, feature = "json"))]
mod animation_state_tests;
