pub mod action;
pub mod bitset;
pub mod config;
pub mod genetics;
pub mod grid;
pub mod observation;
pub mod reward;
pub mod sim;
pub mod slots;
pub mod snapshot;
pub mod stats;
pub mod terrain;
