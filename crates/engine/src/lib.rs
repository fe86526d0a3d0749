//! Alert handling around the delivery queue: which rooms track which projects,
//! how alerts are rendered, and how chat commands change the tracking.

pub mod commands;
pub mod dispatcher;
pub mod render;
pub mod rooms;
pub mod store;
