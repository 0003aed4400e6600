pub mod app;
pub mod camera3d;
pub mod cell;
pub mod cli;
pub mod config;
pub mod draw;
pub mod events;
pub mod frustum;
pub mod grid;
pub mod input;
pub mod instancer;
pub mod mesh;
pub mod population;
pub mod renderer;
pub mod terrain;
pub mod time;
pub mod visibility;

pub use app::{run, App};
