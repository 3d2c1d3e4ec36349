// Filesystem primitives shared by the bundle fetch and secret extraction

pub mod common;

pub use common::{atomic_write, atomic_write_stream, modified_time};
