use glam::Vec3;
use meadow::cell::CellState;
use meadow::config::{GrassConfig, TerrainConfig};
use meadow::grid::Grid;
use meadow::terrain::Terrain;

fn small_field() -> (Terrain, GrassConfig) {
    let terrain_cfg = TerrainConfig {
        size: [1024.0, 50.0, 1024.0],
        resolution: 65,
        seed: 3,
        heightmap: None,
    };
    let terrain = Terrain::generate(&terrain_cfg);
    let mut grass = GrassConfig::default();
    grass.cell_size = 512.0;
    grass.sub_cell_size = 32.0;
    (terrain, grass)
}

#[test]
fn lattice_covers_the_field() {
    let (terrain, grass) = small_field();
    let grid = Grid::build(&terrain, &grass, 3);
    assert_eq!(grid.dims(), (2, 2));
    assert_eq!(grid.len(), 4);
    for cell in grid.cells() {
        let p = cell.position();
        assert_eq!(p.x.abs(), 256.0);
        assert_eq!(p.z.abs(), 256.0);
        assert!(p.y.abs() <= 50.0, "cell anchored to terrain height, got {}", p.y);
    }
}

#[test]
fn camera_entry_activates_the_neighbourhood() {
    let (terrain, grass) = small_field();
    let mut grid = Grid::build(&terrain, &grass, 3);
    assert!(grid.camera_cell().is_none());
    assert!(!grid.has_pending_population());

    grid.update_camera(Vec3::new(-256.0, 10.0, -256.0));
    let camera_cell = grid.camera_cell().unwrap();
    assert_eq!(grid.cell(camera_cell).position().x, -256.0);
    assert_eq!(grid.cell(camera_cell).position().z, -256.0);
    assert!(grid.cell(camera_cell).is_camera_cell);

    // On a 2x2 lattice every cell sits within the render band.
    for cell in grid.cells() {
        assert_eq!(cell.state(), CellState::Render, "cell {} should render", cell.id());
    }
    assert!(grid.has_pending_population());
}

#[test]
fn standing_still_queues_nothing_twice() {
    let (terrain, grass) = small_field();
    let mut grid = Grid::build(&terrain, &grass, 3);
    let eye = Vec3::new(100.0, 8.0, 100.0);
    grid.update_camera(eye);
    let queued = grid.pending_cells().len();
    assert!(queued > 0);

    grid.update_camera(eye);
    grid.update_camera(eye + Vec3::new(1.0, 0.0, 1.0));
    assert_eq!(grid.pending_cells().len(), queued, "same-cell movement must not requeue");
}

#[test]
fn crossing_a_cell_border_rebands() {
    let terrain_cfg = TerrainConfig {
        size: [2048.0, 80.0, 2048.0],
        resolution: 65,
        seed: 9,
        heightmap: None,
    };
    let terrain = Terrain::generate(&terrain_cfg);
    let mut grass = GrassConfig::default();
    grass.cell_size = 512.0;
    let mut grid = Grid::build(&terrain, &grass, 9);
    assert_eq!(grid.dims(), (4, 4));

    grid.update_camera(Vec3::new(-768.0, 10.0, -768.0));
    let first = grid.camera_cell().unwrap();
    grid.update_camera(Vec3::new(-256.0, 10.0, -768.0));
    let second = grid.camera_cell().unwrap();
    assert_ne!(first, second);
    assert!(!grid.cell(first).is_camera_cell);
    assert!(grid.cell(second).is_camera_cell);

    // The far corner is out of both bands once the camera parks near an edge.
    let far_corner = grid
        .cells()
        .iter()
        .map(|cell| (cell.id(), cell.position().distance(grid.cell(second).position())))
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(id, _)| id)
        .unwrap();
    assert_eq!(grid.cell(far_corner).state(), CellState::Idle);
}

#[test]
fn leaving_the_field_releases_everything() {
    let (terrain, grass) = small_field();
    let mut grid = Grid::build(&terrain, &grass, 3);
    grid.update_camera(Vec3::new(0.0, 10.0, 0.0));
    assert!(grid.camera_cell().is_some());

    grid.update_camera(Vec3::new(9000.0, 10.0, 9000.0));
    assert!(grid.camera_cell().is_none());
    assert!(!grid.has_pending_population());
    for cell in grid.cells() {
        assert_eq!(cell.state(), CellState::Idle);
        assert!(!cell.is_camera_cell);
    }
}
