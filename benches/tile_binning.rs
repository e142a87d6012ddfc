use criterion::{criterion_group, criterion_main, Criterion, black_box};

use claybrush::brush::bake::bake_shape;
use claybrush::brush::shape::Shape;
use claybrush::math::Aabb;
use claybrush::sdf::sweep::propagate;
use claybrush::sim::QuantaField;
use claybrush::tile::reference::{sort_boxes, sort_points, TileGrid};
use claybrush::volume::LevelGrid;

use glam::Vec3;

fn bench_sort_points_64k(c: &mut Criterion) {
    let world = LevelGrid::new(64, 16.0);
    let grid = TileGrid::new(&world, 8);
    let field = QuantaField::seeded([16, 16, 8], 65_536);
    let points: Vec<Vec3> = field.quanta.iter().map(|q| Vec3::from_slice(&q.position[..3])).collect();

    c.bench_function("sort_points_64k", |b| {
        b.iter(|| sort_points(black_box(&grid), black_box(&points)));
    });
}

fn bench_sort_boxes_256(c: &mut Criterion) {
    let world = LevelGrid::new(64, 16.0);
    let grid = TileGrid::new(&world, 8);
    let boxes: Vec<Option<Aabb>> = (0..256)
        .map(|i| {
            let t = i as f32 / 256.0;
            let center = Vec3::new((t * 37.0).sin(), (t * 11.0).cos(), (t * 5.0).sin()) * 6.0;
            (i % 17 != 0).then(|| Aabb::from_center_half_extent(center, Vec3::splat(0.5 + t)))
        })
        .collect();

    c.bench_function("sort_boxes_256", |b| {
        b.iter(|| sort_boxes(black_box(&grid), black_box(&boxes)));
    });
}

fn bench_propagate_32(c: &mut Criterion) {
    let grid = LevelGrid::new(32, 32.0);
    let mut seed = vec![None; grid.voxel_count() as usize];
    seed[grid.index(16, 16, 16)] = Some(0.0);
    seed[grid.index(4, 20, 9)] = Some(-0.5);

    c.bench_function("propagate_32", |b| {
        b.iter(|| propagate(black_box(&grid), black_box(&seed), 1, 8));
    });
}

fn bench_bake_sphere_32(c: &mut Criterion) {
    let shape = Shape::Sphere { radius: 0.8 };

    c.bench_function("bake_sphere_32", |b| {
        b.iter(|| bake_shape(black_box(&shape), 32));
    });
}

criterion_group!(
    benches,
    bench_sort_points_64k,
    bench_sort_boxes_256,
    bench_propagate_32,
    bench_bake_sphere_32,
);
criterion_main!(benches);
