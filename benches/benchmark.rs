// This file contains benchmarks for the purpose of guarding against
// performance regressions. To run them, use `cargo bench`.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use glam::{Mat4, Vec2, Vec3};
use std::f32::consts::PI;

use lucent::aabb::Aabb;
use lucent::bvh::Bvh;
use lucent::scene::{build_triangles, Material, MaterialKind, SubMesh, Vertex};
use lucent::trace::PathTracer;

fn uv_sphere(center: Vec3, radius: f32, stacks: u32, slices: u32) -> SubMesh {
    let mut vertices = Vec::new();
    for i in 0..=stacks {
        let theta = PI * i as f32 / stacks as f32;
        for j in 0..=slices {
            let phi = 2.0 * PI * j as f32 / slices as f32;
            let n = Vec3::new(theta.sin() * phi.cos(), theta.cos(), theta.sin() * phi.sin());
            vertices.push(Vertex {
                position: center + n * radius,
                normal: n,
                color: Vec3::splat(0.7),
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
        material: Material {
            kind: MaterialKind::Microfacet,
            roughness: 0.8,
            ..Material::default()
        },
    }
}

fn sphere_tracer(width: u32, height: u32) -> PathTracer {
    let triangles = build_triangles(&[uv_sphere(Vec3::ZERO, 1.0, 48, 96)]).unwrap();

    let mut tracer = PathTracer::new();
    tracer.resize(width, height);
    tracer.set_geometry(triangles, Vec::new());
    tracer.set_environment_color(Vec3::ONE);
    tracer.set_enable_environment(true);

    let eye = Vec3::new(0.0, 1.0, 3.0);
    let view = Mat4::look_at_rh(eye, Vec3::ZERO, Vec3::Y);
    let proj = Mat4::perspective_rh(
        45f32.to_radians(),
        width as f32 / height as f32,
        0.01,
        1000.0,
    );
    tracer.set_camera(eye, (proj * view).inverse());
    tracer
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("Performance regression tests");
    group.sample_size(10);

    let triangles = build_triangles(&[uv_sphere(Vec3::ZERO, 1.0, 64, 128)]).unwrap();
    let bounds: Vec<Aabb> = triangles
        .iter()
        .map(|t| Aabb::from_points(&[t.v0, t.v1, t.v2]))
        .collect();
    group.bench_function("BVH build (16k triangles)", |b| {
        b.iter(|| Bvh::build(black_box(&bounds)))
    });

    group.bench_function("one sample 256x256", |b| {
        let mut tracer = sphere_tracer(256, 256);
        b.iter(|| tracer.trace_sample())
    });

    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
