//! Engine of a system tray host: decides which tray applets exist, starting them either because
//! the user allowed them or because a bus service they belong to is alive, and recycling their
//! configuration across restarts.

pub mod error;
pub use error::*;

pub mod menu;

mod activation;
pub use activation::*;

mod allow_list;
pub use allow_list::*;

mod applet;
pub use applet::*;

mod bus;
pub use bus::*;

mod catalog;
pub use catalog::*;

mod descriptor;
pub use descriptor::*;

mod engine;
pub use engine::*;

mod pattern;
pub use pattern::*;

mod registry;
pub use registry::*;
