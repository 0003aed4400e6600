use crate::camera3d::FlyCamera;
use crate::config::{AppConfig, AppConfigOverrides};
use crate::grid::Grid;
use crate::input::{Input, InputEvent};
use crate::renderer::Renderer;
use crate::terrain::Terrain;
use crate::time::Time;
use anyhow::{Context, Result};
use glam::{Vec2, Vec3};
use std::sync::Arc;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{DeviceEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::window::{Fullscreen, Window};

const FOV_Y_DEGREES: f32 = 60.0;
const NEAR_PLANE: f32 = 0.25;
const FAR_PLANE: f32 = 4096.0;
const EYE_HEIGHT: f32 = 2.0;
const FLY_SPEED: f32 = 24.0;
const LOOK_SENSITIVITY: f32 = 0.0025;

pub fn run(config_path: &str, overrides: AppConfigOverrides) -> Result<()> {
    let mut config = AppConfig::load_or_default(config_path);
    config.apply_overrides(&overrides);
    let event_loop = EventLoop::new().context("Failed to create winit event loop")?;
    let mut app = App::new(config)?;
    event_loop.run_app(&mut app).context("Event loop execution failed")?;
    Ok(())
}

pub struct App {
    config: AppConfig,
    terrain: Terrain,
    window: Option<Arc<Window>>,
    renderer: Option<Renderer>,
    grid: Option<Grid>,
    fly: FlyCamera,
    input: Input,
    time: Time,
    should_close: bool,
}

impl App {
    pub fn new(config: AppConfig) -> Result<Self> {
        let terrain = match config.terrain.heightmap.clone() {
            Some(path) => Terrain::from_heightmap_png(&path, &config.terrain)
                .with_context(|| format!("Failed to load heightmap {path}"))?,
            None => Terrain::generate(&config.terrain),
        };
        let ground = terrain.height_at(0.0, 0.0).unwrap_or(0.0);
        let fly = FlyCamera::new(Vec3::new(0.0, ground + EYE_HEIGHT, 0.0), FLY_SPEED);
        Ok(Self {
            config,
            terrain,
            window: None,
            renderer: None,
            grid: None,
            fly,
            input: Input::new(),
            time: Time::new(),
            should_close: false,
        })
    }

    fn frame(&mut self) {
        self.time.tick();
        let dt = self.time.delta_seconds();

        if self.input.look_held() {
            let (dx, dy) = self.input.mouse_delta;
            self.fly.look(Vec2::new(dx, dy) * LOOK_SENSITIVITY);
        }
        self.fly.advance(self.input.axes(), dt, self.input.boost());
        self.input.clear_frame();

        let (Some(renderer), Some(grid)) = (self.renderer.as_mut(), self.grid.as_mut()) else {
            return;
        };
        grid.update_camera(self.fly.position);
        renderer.populate_cells(grid, &self.config.grass);
        let camera =
            self.fly.to_camera(FOV_Y_DEGREES.to_radians(), NEAR_PLANE, FAR_PLANE);
        if let Err(err) =
            renderer.render(grid, &camera, &self.config.grass, self.time.elapsed_seconds())
        {
            eprintln!("[app] render error: {err:?}");
            self.should_close = true;
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let mut attributes = Window::default_attributes()
            .with_title(self.config.window.title.clone())
            .with_inner_size(PhysicalSize::new(self.config.window.width, self.config.window.height));
        if self.config.window.fullscreen {
            attributes = attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }
        let window = match event_loop.create_window(attributes) {
            Ok(window) => Arc::new(window),
            Err(err) => {
                eprintln!("[app] window creation failed: {err:?}");
                self.should_close = true;
                return;
            }
        };
        let renderer = match Renderer::new(window.clone(), &self.config, &self.terrain) {
            Ok(renderer) => renderer,
            Err(err) => {
                eprintln!("[app] renderer initialization failed: {err:?}");
                self.should_close = true;
                return;
            }
        };
        let grid = Grid::build(&self.terrain, &self.config.grass, self.config.terrain.seed);
        self.window = Some(window);
        self.renderer = Some(renderer);
        self.grid = Some(grid);
    }

    fn window_event(
        &mut self,
        _el: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match &event {
            WindowEvent::CloseRequested => self.should_close = true,
            WindowEvent::Resized(size) => {
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.resize(*size);
                }
            }
            _ => self.input.push(InputEvent::from_window_event(&event)),
        }
    }

    fn device_event(&mut self, _e: &ActiveEventLoop, _dev: winit::event::DeviceId, ev: DeviceEvent) {
        self.input.push(InputEvent::from_device_event(&ev));
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.should_close || self.input.take_quit() {
            event_loop.exit();
            return;
        }
        self.frame();
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}
