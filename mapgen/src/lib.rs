//! Deterministic procedural map generation.
//!
//! Everything here is a pure function of the room seed. Clients run the
//! same closed forms to render the island without ever receiving geometry,
//! so the formulae must match byte-for-byte across implementations. Keep
//! any change in lockstep with the client's port and the fixed-seed tests.

mod island;
mod layout;
mod noise;
mod rng;

pub use island::{is_on_island, RANGE};
pub use layout::{chest_position, generate_resources, RESOURCE_COUNT};
pub use rng::Mulberry32;
