//! Progressive CPU path-tracing core for an interactive renderer.
//!
//! The crate owns the hard parts of light transport — a binned-SAH BVH,
//! mirror/dielectric/GGX BSDFs, next-event estimation with multiple
//! importance sampling over area lights, a point light, a sun disk and an
//! environment map — plus the progressive-accumulation frame driver that
//! decides when a scene change invalidates the running mean.
//!
//! Windowing, UI, mesh import and texture decoding live in the embedding
//! application; they feed [`driver::FrameDriver`] through
//! [`scene::SubMesh`] batches and per-frame [`driver::SceneState`]
//! snapshots, and read back the tone-mapped frame from
//! [`driver::FrameOutput`].

pub mod aabb;
pub mod bsdf;
pub mod bvh;
pub mod camera;
pub mod driver;
pub mod environment;
pub mod intersection;
pub mod light_pick;
pub mod rng;
pub mod scene;
pub mod texture;
pub mod trace;
pub mod util;

pub use camera::OrbitCamera;
pub use driver::{
    DriverError, EnvironmentSource, FrameDriver, FrameOutput, PointLight, RenderSettings,
    SceneState, SunLight,
};
pub use scene::{Material, MaterialKind, SubMesh, Triangle, Vertex};
pub use texture::Texture;
pub use trace::PathTracer;
