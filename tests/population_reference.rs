use glam::Vec3;
use meadow::config::{GrassConfig, TerrainConfig};
use meadow::population::reference_populate;
use meadow::terrain::{Terrain, TerrainSampler};

/// Flat meadow with grass on the negative-x half only.
struct HalfField;

impl TerrainSampler for HalfField {
    fn ground_height(&self, x: f32, z: f32) -> Option<f32> {
        (x.abs() <= 600.0 && z.abs() <= 600.0).then_some(4.0)
    }

    fn ground_normal(&self, _x: f32, _z: f32) -> Vec3 {
        Vec3::Y
    }

    fn grass_weight(&self, x: f32, _z: f32) -> f32 {
        if x < 0.0 {
            1.0
        } else {
            0.0
        }
    }
}

fn test_grass() -> GrassConfig {
    let mut grass = GrassConfig::default();
    grass.cell_size = 128.0;
    grass.sub_cell_size = 32.0;
    grass.instances_per_cell = 4096;
    grass
}

#[test]
fn ranges_partition_the_instance_buffer() {
    let grass = test_grass();
    let result = reference_populate(Vec3::ZERO, 11, &grass, &HalfField);
    let mut expected_start = 0u32;
    for sub_cell in &result.sub_cells {
        assert_eq!(sub_cell.instance_start, expected_start);
        expected_start += sub_cell.instance_count;
    }
    assert_eq!(expected_start as usize, result.transforms.len());
    assert!(!result.transforms.is_empty(), "half the field carries grass");
}

#[test]
fn placement_is_deterministic_per_seed() {
    let grass = test_grass();
    let a = reference_populate(Vec3::ZERO, 11, &grass, &HalfField);
    let b = reference_populate(Vec3::ZERO, 11, &grass, &HalfField);
    assert_eq!(a.transforms.len(), b.transforms.len());
    for (ta, tb) in a.transforms.iter().zip(&b.transforms) {
        assert_eq!(ta.to_cols_array(), tb.to_cols_array());
    }

    let other = reference_populate(Vec3::ZERO, 12, &grass, &HalfField);
    let identical = a.transforms.len() == other.transforms.len()
        && a.transforms
            .iter()
            .zip(&other.transforms)
            .all(|(ta, tb)| ta.to_cols_array() == tb.to_cols_array());
    assert!(!identical, "changing the seed must move the grass");
}

#[test]
fn splat_decides_where_grass_grows() {
    let grass = test_grass();
    let result = reference_populate(Vec3::ZERO, 11, &grass, &HalfField);
    for trs in &result.transforms {
        let x = trs.w_axis.x;
        assert!(x < 0.0, "instance landed on bare ground at x = {x}");
    }
}

#[test]
fn off_field_cells_stay_barren() {
    let grass = test_grass();
    let result = reference_populate(Vec3::new(10_000.0, 0.0, 10_000.0), 11, &grass, &HalfField);
    assert!(result.transforms.is_empty());
    assert!(result.sub_cells.iter().all(|sc| sc.instance_count == 0));
}

#[test]
fn blades_sit_half_a_scale_above_real_terrain() {
    let terrain_cfg = TerrainConfig {
        size: [512.0, 60.0, 512.0],
        resolution: 65,
        seed: 21,
        heightmap: None,
    };
    let terrain = Terrain::generate(&terrain_cfg);
    let mut grass = GrassConfig::default();
    grass.cell_size = 128.0;
    grass.sub_cell_size = 32.0;
    grass.instances_per_cell = 2048;
    grass.grass_threshold = 0.1;
    grass.min_grass_height = 0.0;

    let result = reference_populate(Vec3::ZERO, 5, &grass, &terrain);
    assert!(!result.transforms.is_empty(), "lenient thresholds should place something");
    for trs in &result.transforms {
        let (scale, _rotation, translation) = trs.to_scale_rotation_translation();
        let ground = terrain
            .ground_height(translation.x, translation.z)
            .expect("placed instance must sit on the field");
        assert!(
            (translation.y - (ground + scale.y * 0.5)).abs() < 1e-3,
            "blade root must rest on the ground"
        );
        assert!(scale.x >= grass.scale_min[0] && scale.x <= grass.scale_max[0]);
        assert!(scale.y >= grass.scale_min[1] && scale.y <= grass.scale_max[1]);
    }
}
