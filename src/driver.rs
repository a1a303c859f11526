use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use glam::{Mat4, Vec3};
use parking_lot::RwLock;
use thiserror::Error;

use crate::camera::OrbitCamera;
use crate::environment::EnvironmentMap;
use crate::scene::{build_triangles, GeometryError, SubMesh, Triangle};
use crate::texture::Texture;
use crate::trace::PathTracer;

/// Progress callback invoked between stages of a structural rebuild.
pub type ProgressFn<'a> = &'a mut dyn FnMut(&str, f32);

#[derive(Clone, Copy, PartialEq, Debug)]
pub struct PointLight {
    pub position: Vec3,
    pub color: Vec3,
    pub intensity: f32,
    pub enabled: bool,
}

impl Default for PointLight {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 2.0, 0.0),
            color: Vec3::ONE,
            intensity: 1.0,
            enabled: false,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Debug)]
pub struct SunLight {
    /// Direction of travel of the light.
    pub direction: Vec3,
    pub color: Vec3,
    pub intensity: f32,
    /// Half-angle of the visible disk in radians (~0.5° for the real sun).
    pub angular_radius: f32,
    pub enabled: bool,
}

impl Default for SunLight {
    fn default() -> Self {
        Self {
            direction: Vec3::new(0.0, -1.0, 0.0),
            color: Vec3::ONE,
            intensity: 1.0,
            angular_radius: 0.00873,
            enabled: false,
        }
    }
}

/// Where the sky comes from. Presets resolve to bundled HDR files.
#[derive(Clone, PartialEq, Debug)]
pub enum EnvironmentSource {
    Solid(Vec3),
    Preset(String),
    File(PathBuf),
}

impl Default for EnvironmentSource {
    fn default() -> Self {
        EnvironmentSource::Solid(Vec3::ZERO)
    }
}

/// Scene-level state the embedding editor hands the driver every frame.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct SceneState {
    pub camera: OrbitCamera,
    pub point_light: PointLight,
    pub sun: SunLight,
    pub environment: EnvironmentSource,
}

/// Integrator and display settings. Everything that changes the integrand
/// resets accumulation when it changes; exposure/gamma/ACES only affect the
/// tone-mapping step.
#[derive(Clone, PartialEq, Debug)]
pub struct RenderSettings {
    pub max_depth: u32,
    pub enable_nee: bool,
    pub enable_aa: bool,
    pub enable_firefly_clamp: bool,
    pub enable_russian_roulette: bool,
    pub enable_normal_mapping: bool,
    pub enable_emissive: bool,
    pub enable_environment: bool,
    pub env_light_multiplier: f32,
    pub flat_shading: bool,
    pub ray_eps: f32,
    pub exposure: f32,
    pub gamma: f32,
    pub enable_aces: bool,
    /// Stop dispatching samples past this count; 0 means unlimited.
    pub max_samples: u32,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            max_depth: 5,
            enable_nee: true,
            enable_aa: true,
            enable_firefly_clamp: true,
            enable_russian_roulette: true,
            enable_normal_mapping: true,
            enable_emissive: true,
            enable_environment: false,
            env_light_multiplier: 1.0,
            flat_shading: false,
            ray_eps: 1e-4,
            exposure: 0.0,
            gamma: 2.2,
            enable_aces: true,
            max_samples: 0,
        }
    }
}

/// Tone-mapped frame published for the embedding UI thread. The driver
/// writes it after every sample; readers never block the render loop for
/// long since the write is a buffer copy.
#[derive(Default)]
pub struct FrameOutput {
    pub pixels: RwLock<Vec<u8>>,
    pub width: AtomicU32,
    pub height: AtomicU32,
    pub samples: AtomicU32,
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    #[error("failed to read environment map {path}: {source}")]
    Environment {
        path: PathBuf,
        source: image::ImageError,
    },
}

/// Owns the tracer plus per-field snapshots of everything that should reset
/// accumulation when it changes. Call `render_frame` once per display frame.
pub struct FrameDriver {
    tracer: PathTracer,
    output: Arc<FrameOutput>,

    prev_camera_pos: Option<Vec3>,
    prev_view: Option<Mat4>,
    prev_point_light: Option<PointLight>,
    prev_sun: Option<SunLight>,
    prev_environment: Option<EnvironmentSource>,
}

impl Default for FrameDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDriver {
    pub fn new() -> Self {
        Self {
            tracer: PathTracer::new(),
            output: Arc::new(FrameOutput::default()),
            prev_camera_pos: None,
            prev_view: None,
            prev_point_light: None,
            prev_sun: None,
            prev_environment: None,
        }
    }

    pub fn tracer(&self) -> &PathTracer {
        &self.tracer
    }

    pub fn tracer_mut(&mut self) -> &mut PathTracer {
        &mut self.tracer
    }

    /// Shared handle to the latest tone-mapped frame.
    pub fn output(&self) -> Arc<FrameOutput> {
        self.output.clone()
    }

    pub fn sample_count(&self) -> u32 {
        self.tracer.sample_count()
    }

    /// Installs new geometry, reporting progress between stages. On error
    /// the previous scene stays installed.
    pub fn load_geometry(
        &mut self,
        submeshes: &[SubMesh],
        textures: Vec<Texture>,
        progress: ProgressFn,
    ) -> Result<(), DriverError> {
        progress("triangulate", 0.0);
        let triangles = match build_triangles(submeshes) {
            Ok(t) => t,
            Err(err) => {
                log::error!("scene load failed: {err}");
                return Err(err.into());
            }
        };
        progress("accelerate", 0.4);
        self.tracer.set_geometry(triangles, textures);
        progress("done", 1.0);
        Ok(())
    }

    /// Patches material scalars without a geometry rebuild.
    pub fn update_materials(&mut self, triangles: &[Triangle]) {
        self.tracer.update_materials(triangles);
    }

    /// One frame: apply pending state, detect changes, dispatch at most one
    /// sample and publish the display buffer.
    pub fn render_frame(
        &mut self,
        scene: &SceneState,
        settings: &RenderSettings,
        width: u32,
        height: u32,
    ) {
        self.tracer.resize(width, height);

        self.apply_settings(settings);
        self.apply_environment(&scene.environment);
        self.apply_lights(scene);
        self.apply_camera(&scene.camera, width, height);

        if settings.max_samples == 0 || self.tracer.sample_count() < settings.max_samples {
            self.tracer.trace_sample();
        }

        self.publish();
    }

    fn apply_settings(&mut self, settings: &RenderSettings) {
        // Each setter resets accumulation only when the value changed.
        self.tracer.set_max_depth(settings.max_depth);
        self.tracer.set_enable_nee(settings.enable_nee);
        self.tracer.set_enable_aa(settings.enable_aa);
        self.tracer
            .set_enable_firefly_clamp(settings.enable_firefly_clamp);
        self.tracer.set_enable_rr(settings.enable_russian_roulette);
        self.tracer
            .set_enable_normal_mapping(settings.enable_normal_mapping);
        self.tracer.set_enable_emissive(settings.enable_emissive);
        self.tracer
            .set_enable_environment(settings.enable_environment);
        self.tracer
            .set_env_light_multiplier(settings.env_light_multiplier);
        self.tracer.set_flat_shading(settings.flat_shading);
        self.tracer.set_ray_eps(settings.ray_eps.clamp(1e-5, 1e-1));

        // Display-only: applied at tone mapping, never resets
        self.tracer.set_exposure(settings.exposure);
        self.tracer.set_gamma(settings.gamma);
        self.tracer.set_enable_aces(settings.enable_aces);
    }

    fn preset_path(name: &str) -> PathBuf {
        Path::new("assets/envmaps").join(format!("{name}.hdr"))
    }

    fn load_environment(path: &Path) -> Result<EnvironmentMap, DriverError> {
        let img = image::open(path).map_err(|source| DriverError::Environment {
            path: path.to_path_buf(),
            source,
        })?;
        let rgb = img.into_rgb32f();
        let (w, h) = (rgb.width() as usize, rgb.height() as usize);
        Ok(EnvironmentMap::new(w, h, rgb.into_raw()))
    }

    fn apply_environment(&mut self, source: &EnvironmentSource) {
        if self.prev_environment.as_ref() == Some(source) {
            return;
        }
        // Snapshot before loading so a bad file isn't retried every frame.
        self.prev_environment = Some(source.clone());

        match source {
            EnvironmentSource::Solid(color) => {
                self.tracer.clear_environment_map();
                self.tracer.set_environment_color(*color);
                self.tracer.reset();
            }
            EnvironmentSource::Preset(name) => {
                self.install_environment_file(&Self::preset_path(name));
            }
            EnvironmentSource::File(path) => {
                self.install_environment_file(path);
            }
        }
    }

    fn install_environment_file(&mut self, path: &Path) {
        match Self::load_environment(path) {
            Ok(map) => {
                self.tracer.set_environment_map(map);
                self.tracer.reset();
            }
            Err(err) => {
                // Previous environment stays installed.
                log::error!("{err}");
            }
        }
    }

    fn apply_lights(&mut self, scene: &SceneState) {
        if self.prev_point_light != Some(scene.point_light) {
            let light = &scene.point_light;
            self.tracer
                .set_point_light(light.position, light.color * light.intensity, light.enabled);
            self.tracer.reset();
            self.prev_point_light = Some(scene.point_light);
        }

        if self.prev_sun != Some(scene.sun) {
            let sun = &scene.sun;
            self.tracer.set_directional_light(
                sun.direction,
                sun.color * sun.intensity,
                sun.angular_radius,
                sun.enabled,
            );
            self.tracer.reset();
            self.prev_sun = Some(scene.sun);
        }
    }

    fn apply_camera(&mut self, camera: &OrbitCamera, width: u32, height: u32) {
        let aspect = width as f32 / height.max(1) as f32;
        let view = camera.view_matrix();
        let proj = camera.projection_matrix(aspect);
        let position = camera.position();

        if self.prev_camera_pos != Some(position) || self.prev_view != Some(view) {
            self.tracer.reset();
            self.prev_camera_pos = Some(position);
            self.prev_view = Some(view);
        }

        self.tracer.set_camera(position, (proj * view).inverse());

        // Camera basis for the thin lens, from the view matrix rows
        let right = Vec3::new(view.x_axis.x, view.y_axis.x, view.z_axis.x);
        let up = Vec3::new(view.x_axis.y, view.y_axis.y, view.z_axis.y);
        self.tracer
            .set_dof(camera.aperture, camera.focus_distance, right, up);
    }

    fn publish(&self) {
        {
            let mut pixels = self.output.pixels.write();
            pixels.clear();
            pixels.extend_from_slice(self.tracer.pixel_buffer());
        }
        self.output.width.store(self.tracer.width(), Ordering::Relaxed);
        self.output
            .height
            .store(self.tracer.height(), Ordering::Relaxed);
        self.output
            .samples
            .store(self.tracer.sample_count(), Ordering::Relaxed);
    }
}
