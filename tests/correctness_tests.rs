use glam::{Mat4, Vec2, Vec3};
use std::f32::consts::PI;

use lucent::driver::{EnvironmentSource, FrameDriver, RenderSettings, SceneState};
use lucent::scene::{build_triangles, Material, MaterialKind, SubMesh, Vertex};
use lucent::trace::PathTracer;

fn vertex(position: Vec3, normal: Vec3, color: Vec3, emissive: Vec3) -> Vertex {
    Vertex {
        position,
        normal,
        color,
        emissive,
        uv: Vec2::ZERO,
    }
}

/// Horizontal quad at `y` spanning ±half in x/z, facing +Y.
fn ground_quad(y: f32, half: f32, color: Vec3, material: Material) -> SubMesh {
    let n = Vec3::Y;
    SubMesh {
        vertices: vec![
            vertex(Vec3::new(-half, y, -half), n, color, Vec3::ZERO),
            vertex(Vec3::new(-half, y, half), n, color, Vec3::ZERO),
            vertex(Vec3::new(half, y, half), n, color, Vec3::ZERO),
            vertex(Vec3::new(half, y, -half), n, color, Vec3::ZERO),
        ],
        indices: vec![0, 1, 2, 0, 2, 3],
        material,
    }
}

fn uv_sphere(center: Vec3, radius: f32, stacks: u32, slices: u32, color: Vec3, material: Material) -> SubMesh {
    let mut vertices = Vec::new();
    for i in 0..=stacks {
        let theta = PI * i as f32 / stacks as f32;
        for j in 0..=slices {
            let phi = 2.0 * PI * j as f32 / slices as f32;
            let n = Vec3::new(theta.sin() * phi.cos(), theta.cos(), theta.sin() * phi.sin());
            vertices.push(Vertex {
                position: center + n * radius,
                normal: n,
                color,
                emissive: Vec3::ZERO,
                uv: Vec2::new(j as f32 / slices as f32, i as f32 / stacks as f32),
            });
        }
    }
    let mut indices = Vec::new();
    for i in 0..stacks {
        for j in 0..slices {
            let a = i * (slices + 1) + j;
            let b = a + slices + 1;
            indices.extend_from_slice(&[a, a + 1, b, a + 1, b + 1, b]);
        }
    }
    SubMesh {
        vertices,
        indices,
        material,
    }
}

fn set_look_at(tracer: &mut PathTracer, eye: Vec3, target: Vec3, width: u32, height: u32) {
    let view = Mat4::look_at_rh(eye, target, Vec3::Y);
    let proj = Mat4::perspective_rh(
        45f32.to_radians(),
        width as f32 / height as f32,
        0.01,
        1000.0,
    );
    tracer.set_camera(eye, (proj * view).inverse());
}

/// Deterministic baseline: no jitter, no stochastic termination, no clamp,
/// linear output.
fn deterministic_settings(tracer: &mut PathTracer) {
    tracer.set_enable_aa(false);
    tracer.set_enable_rr(false);
    tracer.set_enable_firefly_clamp(false);
    tracer.set_enable_aces(false);
    tracer.set_gamma(1.0);
}

fn pixel(tracer: &PathTracer, x: u32, y: u32) -> [u8; 4] {
    let idx = ((y * tracer.width() + x) * 4) as usize;
    let px = tracer.pixel_buffer();
    [px[idx], px[idx + 1], px[idx + 2], px[idx + 3]]
}

#[test]
fn empty_scene_shows_solid_environment() {
    let sky = Vec3::new(0.86, 0.64, 0.40);
    let mut tracer = PathTracer::new();
    tracer.resize(8, 8);
    deterministic_settings(&mut tracer);
    tracer.set_gamma(2.2);
    tracer.set_environment_color(sky);
    set_look_at(&mut tracer, Vec3::new(0.0, 0.0, 4.0), Vec3::ZERO, 8, 8);

    tracer.trace_sample();
    assert_eq!(tracer.sample_count(), 1);

    let expected = [
        (sky.x.powf(1.0 / 2.2) * 255.0) as u8,
        (sky.y.powf(1.0 / 2.2) * 255.0) as u8,
        (sky.z.powf(1.0 / 2.2) * 255.0) as u8,
        255,
    ];
    for y in 0..8 {
        for x in 0..8 {
            assert_eq!(pixel(&tracer, x, y), expected);
        }
    }
}

#[test]
fn aces_is_display_only() {
    let sky = Vec3::splat(2.0);
    let mut tracer = PathTracer::new();
    tracer.resize(4, 4);
    deterministic_settings(&mut tracer);
    tracer.set_environment_color(sky);
    set_look_at(&mut tracer, Vec3::new(0.0, 0.0, 4.0), Vec3::ZERO, 4, 4);
    tracer.trace_sample();

    // Toggling ACES must not reset accumulation, only remap the display.
    tracer.set_enable_aces(true);
    tracer.trace_sample();
    assert_eq!(tracer.sample_count(), 2);

    let c = 2.0f32;
    let aces = ((c * (c * 2.51 + 0.03)) / (c * (c * 2.43 + 0.59) + 0.14)).clamp(0.0, 1.0);
    let expected = (aces * 255.0) as u8;
    let px = pixel(&tracer, 2, 2);
    assert!((px[0] as i32 - expected as i32).abs() <= 1, "{px:?}");
}

#[test]
fn mirror_reflects_uniform_environment() {
    let mirror = Material {
        kind: MaterialKind::Mirror,
        ..Material::default()
    };
    let submeshes = [ground_quad(0.0, 10.0, Vec3::ONE, mirror)];
    let triangles = build_triangles(&submeshes).unwrap();

    let mut tracer = PathTracer::new();
    tracer.resize(16, 16);
    deterministic_settings(&mut tracer);
    tracer.set_geometry(triangles, Vec::new());
    tracer.set_environment_color(Vec3::ONE);
    tracer.set_enable_environment(true);
    set_look_at(&mut tracer, Vec3::new(1.0, 4.0, 1.0), Vec3::ZERO, 16, 16);

    tracer.trace_sample();

    // Every ray hits the mirror, reflects and picks up the white sky.
    assert_eq!(pixel(&tracer, 8, 8), [255, 255, 255, 255]);
}

#[test]
fn furnace_white_sphere_conserves_energy() {
    let diffuse = Material {
        kind: MaterialKind::Microfacet,
        roughness: 1.0,
        metallic: 0.0,
        ..Material::default()
    };
    let sphere = uv_sphere(Vec3::ZERO, 1.0, 16, 32, Vec3::ONE, diffuse);
    let triangles = build_triangles(&[sphere]).unwrap();

    // Outward-facing winding, otherwise the camera would see straight
    // through the back faces. Degenerate pole triangles carry the fallback
    // normal and are skipped.
    for tri in triangles.iter().filter(|t| t.area > 1e-6) {
        let centroid = (tri.v0 + tri.v1 + tri.v2) / 3.0;
        assert!(tri.geometric_normal.dot(centroid) > 0.0);
    }

    let mut tracer = PathTracer::new();
    tracer.resize(32, 32);
    deterministic_settings(&mut tracer);
    tracer.set_enable_aa(true); // jitter averages out surface discretisation
    tracer.set_max_depth(8);
    tracer.set_geometry(triangles, Vec::new());
    tracer.set_environment_color(Vec3::ONE);
    tracer.set_enable_environment(true);
    set_look_at(&mut tracer, Vec3::new(0.0, 0.0, 3.0), Vec3::ZERO, 32, 32);

    for _ in 0..32 {
        tracer.trace_sample();
    }

    // A white rough sphere under a uniform white sky must stay white.
    let px = pixel(&tracer, 16, 16);
    assert!(
        (px[0] as f32 / 255.0 - 1.0).abs() < 0.08,
        "center pixel {px:?}"
    );
}

#[test]
fn emissive_triangle_direct_lighting_matches_analytic_value() {
    let side = 0.5f32.sqrt(); // legs of a right triangle with area 0.25
    let receiver = ground_quad(
        0.0,
        0.5,
        Vec3::splat(0.7),
        Material {
            kind: MaterialKind::Microfacet,
            roughness: 1.0,
            metallic: 0.0,
            ..Material::default()
        },
    );
    let emitter = SubMesh {
        vertices: vec![
            vertex(Vec3::new(0.3, 2.0, 0.3), -Vec3::Y, Vec3::ZERO, Vec3::splat(10.0)),
            vertex(Vec3::new(0.3 + side, 2.0, 0.3), -Vec3::Y, Vec3::ZERO, Vec3::splat(10.0)),
            vertex(Vec3::new(0.3, 2.0, 0.3 + side), -Vec3::Y, Vec3::ZERO, Vec3::splat(10.0)),
        ],
        indices: vec![0, 1, 2],
        material: Material::default(),
    };
    let triangles = build_triangles(&[receiver, emitter]).unwrap();
    let light_area: f32 = triangles
        .iter()
        .filter(|t| t.emissive.length() > 0.0)
        .map(|t| t.area)
        .sum();
    assert!((light_area - 0.25).abs() < 1e-4);

    let eye = Vec3::new(0.0, 3.0, -1.2);
    let mut tracer = PathTracer::new();
    tracer.resize(32, 32);
    deterministic_settings(&mut tracer);
    tracer.set_max_depth(4);
    tracer.set_geometry(triangles, Vec::new());
    set_look_at(&mut tracer, eye, Vec3::ZERO, 32, 32);

    let samples = 400;
    for _ in 0..samples {
        tracer.trace_sample();
    }

    // Direct illumination at the receiver point under the small-emitter
    // approximation: albedo/π · E · cosS · cosL · A / d²
    let light_centroid = Vec3::new(0.3 + side / 3.0, 2.0, 0.3 + side / 3.0);
    let to_light = light_centroid;
    let d = to_light.length();
    let cos_s = (to_light / d).y;
    let cos_l = cos_s; // light faces straight down
    let expected = 0.7 / PI * 10.0 * cos_s * cos_l * 0.25 / (d * d);

    let center = (16 * tracer.width() + 16) as usize;
    let measured = tracer.accumulation()[center].x / tracer.sample_count() as f32;
    assert!(
        (measured - expected).abs() < 0.25 * expected,
        "measured {measured}, expected {expected}"
    );
}

#[test]
fn accumulation_advances_and_resets() {
    let mut tracer = PathTracer::new();
    tracer.resize(8, 8);
    deterministic_settings(&mut tracer);
    tracer.set_environment_color(Vec3::splat(0.5));
    set_look_at(&mut tracer, Vec3::new(0.0, 0.0, 4.0), Vec3::ZERO, 8, 8);

    tracer.trace_sample();
    assert_eq!(tracer.sample_count(), 1);
    let first = tracer.pixel_buffer().to_vec();

    // Without jitter every sample is identical, so the mean is stable.
    tracer.trace_sample();
    assert_eq!(tracer.sample_count(), 2);
    assert_eq!(tracer.pixel_buffer(), &first[..]);

    // An integrator setting change restarts accumulation.
    tracer.set_max_depth(3);
    assert_eq!(tracer.sample_count(), 0);
    tracer.trace_sample();
    assert_eq!(tracer.sample_count(), 1);
}

#[test]
fn fixed_seeds_make_samples_reproducible() {
    let build = || {
        let mirror = Material {
            kind: MaterialKind::Mirror,
            ..Material::default()
        };
        let submeshes = [ground_quad(0.0, 10.0, Vec3::new(0.9, 0.8, 0.7), mirror)];
        let triangles = build_triangles(&submeshes).unwrap();

        let mut tracer = PathTracer::new();
        tracer.resize(24, 24);
        tracer.set_geometry(triangles, Vec::new());
        tracer.set_environment_color(Vec3::new(0.3, 0.5, 0.9));
        tracer.set_enable_environment(true);
        set_look_at(&mut tracer, Vec3::new(2.0, 3.0, 2.0), Vec3::ZERO, 24, 24);
        tracer
    };

    let mut a = build();
    let mut b = build();
    for _ in 0..3 {
        a.trace_sample();
        b.trace_sample();
    }
    assert_eq!(a.pixel_buffer(), b.pixel_buffer());
}

#[test]
fn driver_change_detection() {
    let mut driver = FrameDriver::new();
    let mut scene = SceneState {
        environment: EnvironmentSource::Solid(Vec3::splat(0.2)),
        ..SceneState::default()
    };
    let mut settings = RenderSettings::default();

    driver.render_frame(&scene, &settings, 16, 16);
    driver.render_frame(&scene, &settings, 16, 16);
    assert_eq!(driver.sample_count(), 2);

    // Camera motion resets
    scene.camera.yaw += 0.1;
    driver.render_frame(&scene, &settings, 16, 16);
    assert_eq!(driver.sample_count(), 1);

    // Integrator settings reset
    settings.max_depth = 3;
    driver.render_frame(&scene, &settings, 16, 16);
    assert_eq!(driver.sample_count(), 1);

    // Display settings do not
    settings.exposure = 1.0;
    driver.render_frame(&scene, &settings, 16, 16);
    assert_eq!(driver.sample_count(), 2);

    // Light state resets
    scene.point_light.enabled = true;
    driver.render_frame(&scene, &settings, 16, 16);
    assert_eq!(driver.sample_count(), 1);

    let output = driver.output();
    assert_eq!(
        output.samples.load(std::sync::atomic::Ordering::Relaxed),
        driver.sample_count()
    );
    assert_eq!(output.pixels.read().len(), 16 * 16 * 4);
}

#[test]
fn geometry_load_reports_progress_stages() {
    let mut driver = FrameDriver::new();
    let quad = ground_quad(0.0, 1.0, Vec3::splat(0.7), Material::default());

    let mut stages: Vec<(String, f32)> = Vec::new();
    driver
        .load_geometry(&[quad], Vec::new(), &mut |stage, fraction| {
            stages.push((stage.to_string(), fraction))
        })
        .unwrap();

    assert!(stages.len() >= 2);
    assert_eq!(stages.first().unwrap().1, 0.0);
    assert_eq!(stages.last().unwrap().1, 1.0);
    assert_eq!(driver.tracer().bvh_node_count(), 1); // two triangles, one leaf
}

#[test]
fn driver_honors_sample_limit() {
    let mut driver = FrameDriver::new();
    let scene = SceneState {
        environment: EnvironmentSource::Solid(Vec3::splat(0.4)),
        ..SceneState::default()
    };
    let settings = RenderSettings {
        max_samples: 2,
        ..RenderSettings::default()
    };

    for _ in 0..5 {
        driver.render_frame(&scene, &settings, 8, 8);
    }
    assert_eq!(driver.sample_count(), 2);
}

#[test]
fn viewport_resize_restarts_accumulation() {
    let mut driver = FrameDriver::new();
    let scene = SceneState {
        environment: EnvironmentSource::Solid(Vec3::splat(0.4)),
        ..SceneState::default()
    };
    let settings = RenderSettings::default();

    driver.render_frame(&scene, &settings, 16, 16);
    driver.render_frame(&scene, &settings, 16, 16);
    driver.render_frame(&scene, &settings, 32, 16);
    assert_eq!(driver.sample_count(), 1);
    assert_eq!(driver.tracer().pixel_buffer().len(), 32 * 16 * 4);
}
