#![allow(non_snake_case)]

mod engine;
mod midi_exporter;
mod model;
mod player;
mod resolver;
mod util;

pub use engine::*;
pub use midi_exporter::*;
pub use model::config::*;
pub use model::duration::*;
pub use model::edit;
pub use model::song::*;
pub use player::*;
pub use resolver::*;
pub use util::*;
