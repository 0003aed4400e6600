use glam::Vec3;
use meadow::cell::CellState;
use meadow::config::{GrassConfig, TerrainConfig};
use meadow::grid::Grid;
use meadow::terrain::Terrain;

fn single_cell_world() -> (Terrain, GrassConfig) {
    let terrain_cfg = TerrainConfig {
        size: [512.0, 40.0, 512.0],
        resolution: 33,
        seed: 17,
        heightmap: None,
    };
    let terrain = Terrain::generate(&terrain_cfg);
    let mut grass = GrassConfig::default();
    grass.cell_size = 512.0;
    (terrain, grass)
}

#[test]
fn entry_queues_population_exactly_once() {
    let (terrain, grass) = single_cell_world();
    let mut grid = Grid::build(&terrain, &grass, 17);
    assert_eq!(grid.len(), 1);

    grid.update_camera(Vec3::new(0.0, 20.0, 0.0));
    assert_eq!(grid.cell(0).state(), CellState::Render);
    assert_eq!(grid.pending_cells(), &[0]);

    // Wander within the cell; the queue must not grow.
    grid.update_camera(Vec3::new(50.0, 20.0, -30.0));
    assert_eq!(grid.pending_cells(), &[0]);
}

#[test]
fn leaving_and_returning_requeues_population() {
    let (terrain, grass) = single_cell_world();
    let mut grid = Grid::build(&terrain, &grass, 17);

    grid.update_camera(Vec3::new(0.0, 20.0, 0.0));
    assert!(grid.has_pending_population());

    grid.update_camera(Vec3::new(5000.0, 20.0, 0.0));
    assert_eq!(grid.cell(0).state(), CellState::Idle);
    assert!(!grid.has_pending_population(), "release clears the queue");

    grid.update_camera(Vec3::new(0.0, 20.0, 0.0));
    assert_eq!(grid.cell(0).state(), CellState::Render);
    assert!(grid.has_pending_population(), "a released cell repopulates on return");
}

#[test]
fn empty_cells_never_requeue() {
    let (terrain, grass) = single_cell_world();
    let mut grid = Grid::build(&terrain, &grass, 17);

    grid.update_camera(Vec3::new(0.0, 20.0, 0.0));
    grid.cell_mut(0).mark_empty();
    assert_eq!(grid.cell(0).state(), CellState::Empty);

    grid.update_camera(Vec3::new(5000.0, 20.0, 0.0));
    assert_eq!(grid.cell(0).state(), CellState::Empty, "release must not revive a barren cell");

    grid.update_camera(Vec3::new(0.0, 20.0, 0.0));
    assert_eq!(grid.cell(0).state(), CellState::Empty);
    assert!(!grid.has_pending_population(), "barren cells are parked for good");
}

#[test]
fn unpopulated_cells_do_not_render() {
    let (terrain, grass) = single_cell_world();
    let mut grid = Grid::build(&terrain, &grass, 17);

    grid.update_camera(Vec3::new(0.0, 20.0, 0.0));
    assert_eq!(grid.cell(0).state(), CellState::Render);
    // Population has not run; the cell owns no buffers yet.
    assert!(!grid.cell(0).can_render());
    assert!(grid.renderable_cells().is_empty());
}
