use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub vsync: bool,
    pub fullscreen: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self { title: "Meadow".to_string(), width: 1280, height: 720, vsync: true, fullscreen: false }
    }
}

/// Grass placement and rendering knobs. Scale bounds are per axis; LOD and
/// fade thresholds are fractions of `max_view_distance`.
#[derive(Debug, Clone, Deserialize)]
pub struct GrassConfig {
    #[serde(default = "GrassConfig::default_instances_per_cell")]
    pub instances_per_cell: u32,
    #[serde(default = "GrassConfig::default_cell_size")]
    pub cell_size: f32,
    #[serde(default = "GrassConfig::default_sub_cell_size")]
    pub sub_cell_size: f32,
    #[serde(default = "GrassConfig::default_scale_min")]
    pub scale_min: [f32; 3],
    #[serde(default = "GrassConfig::default_scale_max")]
    pub scale_max: [f32; 3],
    #[serde(default = "GrassConfig::default_min_grass_height")]
    pub min_grass_height: f32,
    #[serde(default = "GrassConfig::default_scale_noise_scale")]
    pub scale_noise_scale: f32,
    #[serde(default = "GrassConfig::default_grass_threshold")]
    pub grass_threshold: f32,
    #[serde(default = "GrassConfig::default_slope_threshold")]
    pub slope_threshold: f32,
    #[serde(default = "GrassConfig::default_rotate_to_ground_normal")]
    pub rotate_to_ground_normal: bool,
    #[serde(default = "GrassConfig::default_random_y_rotation")]
    pub random_y_rotation: bool,
    #[serde(default = "GrassConfig::default_max_y_rotation_degrees")]
    pub max_y_rotation_degrees: f32,
    #[serde(default = "GrassConfig::default_lod_threshold_1")]
    pub lod_threshold_1: f32,
    #[serde(default = "GrassConfig::default_lod_threshold_2")]
    pub lod_threshold_2: f32,
    #[serde(default = "GrassConfig::default_max_view_distance")]
    pub max_view_distance: f32,
    #[serde(default = "GrassConfig::default_depth_bias")]
    pub depth_bias: f32,
    #[serde(default = "GrassConfig::default_fade_start")]
    pub fade_start: f32,
    #[serde(default = "GrassConfig::default_fade_end")]
    pub fade_end: f32,
    #[serde(default = "GrassConfig::default_cast_shadows")]
    pub cast_shadows: bool,
    #[serde(default = "GrassConfig::default_tint")]
    pub tint: [f32; 4],
    #[serde(default = "GrassConfig::default_ao_color")]
    pub ao_color: [f32; 4],
    #[serde(default = "GrassConfig::default_wind_noise_scale")]
    pub wind_noise_scale: f32,
    #[serde(default = "GrassConfig::default_wind_strength")]
    pub wind_strength: f32,
    #[serde(default = "GrassConfig::default_wind_speed")]
    pub wind_speed: [f32; 2],
    #[serde(default = "GrassConfig::default_mesh_deformation_limit_low")]
    pub mesh_deformation_limit_low: f32,
    #[serde(default = "GrassConfig::default_mesh_deformation_limit_top")]
    pub mesh_deformation_limit_top: f32,
}

impl GrassConfig {
    const fn default_instances_per_cell() -> u32 {
        524_288
    }

    const fn default_cell_size() -> f32 {
        512.0
    }

    const fn default_sub_cell_size() -> f32 {
        32.0
    }

    const fn default_scale_min() -> [f32; 3] {
        [1.0, 1.0, 1.0]
    }

    const fn default_scale_max() -> [f32; 3] {
        [1.0, 1.0, 1.0]
    }

    const fn default_min_grass_height() -> f32 {
        0.15
    }

    const fn default_scale_noise_scale() -> f32 {
        128.0
    }

    const fn default_grass_threshold() -> f32 {
        0.5
    }

    const fn default_slope_threshold() -> f32 {
        0.0
    }

    const fn default_rotate_to_ground_normal() -> bool {
        false
    }

    const fn default_random_y_rotation() -> bool {
        true
    }

    const fn default_max_y_rotation_degrees() -> f32 {
        90.0
    }

    const fn default_lod_threshold_1() -> f32 {
        0.25
    }

    const fn default_lod_threshold_2() -> f32 {
        0.5
    }

    const fn default_max_view_distance() -> f32 {
        256.0
    }

    const fn default_depth_bias() -> f32 {
        0.0001
    }

    const fn default_fade_start() -> f32 {
        0.4
    }

    const fn default_fade_end() -> f32 {
        1.0
    }

    const fn default_cast_shadows() -> bool {
        false
    }

    const fn default_tint() -> [f32; 4] {
        [0.41, 0.56, 0.18, 1.0]
    }

    const fn default_ao_color() -> [f32; 4] {
        [0.22, 0.26, 0.09, 1.0]
    }

    const fn default_wind_noise_scale() -> f32 {
        0.78
    }

    const fn default_wind_strength() -> f32 {
        10.0
    }

    const fn default_wind_speed() -> [f32; 2] {
        [-9.84, 6.0]
    }

    const fn default_mesh_deformation_limit_low() -> f32 {
        0.0
    }

    const fn default_mesh_deformation_limit_top() -> f32 {
        3.37
    }

    pub fn max_y_rotation_radians(&self) -> f32 {
        self.max_y_rotation_degrees.to_radians()
    }

    /// Candidate budget per sub-cell. The division truncates, so up to
    /// `num_sub_cells - 1` instances of the configured budget are never
    /// attempted; that rounding is part of the contract and tested.
    pub fn candidates_per_sub_cell(&self, num_sub_cells: u32) -> u32 {
        if num_sub_cells == 0 {
            0
        } else {
            self.instances_per_cell / num_sub_cells
        }
    }
}

impl Default for GrassConfig {
    fn default() -> Self {
        Self {
            instances_per_cell: Self::default_instances_per_cell(),
            cell_size: Self::default_cell_size(),
            sub_cell_size: Self::default_sub_cell_size(),
            scale_min: Self::default_scale_min(),
            scale_max: Self::default_scale_max(),
            min_grass_height: Self::default_min_grass_height(),
            scale_noise_scale: Self::default_scale_noise_scale(),
            grass_threshold: Self::default_grass_threshold(),
            slope_threshold: Self::default_slope_threshold(),
            rotate_to_ground_normal: Self::default_rotate_to_ground_normal(),
            random_y_rotation: Self::default_random_y_rotation(),
            max_y_rotation_degrees: Self::default_max_y_rotation_degrees(),
            lod_threshold_1: Self::default_lod_threshold_1(),
            lod_threshold_2: Self::default_lod_threshold_2(),
            max_view_distance: Self::default_max_view_distance(),
            depth_bias: Self::default_depth_bias(),
            fade_start: Self::default_fade_start(),
            fade_end: Self::default_fade_end(),
            cast_shadows: Self::default_cast_shadows(),
            tint: Self::default_tint(),
            ao_color: Self::default_ao_color(),
            wind_noise_scale: Self::default_wind_noise_scale(),
            wind_strength: Self::default_wind_strength(),
            wind_speed: Self::default_wind_speed(),
            mesh_deformation_limit_low: Self::default_mesh_deformation_limit_low(),
            mesh_deformation_limit_top: Self::default_mesh_deformation_limit_top(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TerrainConfig {
    #[serde(default = "TerrainConfig::default_size")]
    pub size: [f32; 3],
    #[serde(default = "TerrainConfig::default_resolution")]
    pub resolution: u32,
    #[serde(default = "TerrainConfig::default_seed")]
    pub seed: u32,
    #[serde(default)]
    pub heightmap: Option<String>,
}

impl TerrainConfig {
    const fn default_size() -> [f32; 3] {
        [2048.0, 160.0, 2048.0]
    }

    const fn default_resolution() -> u32 {
        513
    }

    const fn default_seed() -> u32 {
        7
    }
}

impl Default for TerrainConfig {
    fn default() -> Self {
        Self {
            size: Self::default_size(),
            resolution: Self::default_resolution(),
            seed: Self::default_seed(),
            heightmap: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub grass: GrassConfig,
    #[serde(default)]
    pub terrain: TerrainConfig,
}

#[derive(Debug, Clone, Default)]
pub struct AppConfigOverrides {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub vsync: Option<bool>,
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes =
            fs::read(path).with_context(|| format!("Failed to read config file {}", path.display()))?;
        let cfg = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(cfg)
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                eprintln!("[config] load error: {err:?}. Falling back to defaults.");
                Self::default()
            }
        }
    }

    pub fn apply_overrides(&mut self, overrides: &AppConfigOverrides) {
        if let Some(width) = overrides.width {
            self.window.width = width;
        }
        if let Some(height) = overrides.height {
            self.window.height = height;
        }
        if let Some(vsync) = overrides.vsync {
            self.window.vsync = vsync;
        }
    }
}

impl AppConfigOverrides {
    pub fn is_empty(&self) -> bool {
        self.width.is_none() && self.height.is_none() && self.vsync.is_none()
    }
}
