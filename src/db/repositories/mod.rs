pub mod stats;
pub mod wakes;
