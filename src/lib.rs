//! Mutation grouping, sequence windowing and pair sampling for protein thermostability prediction in Rust

pub mod alphabet;
pub mod dataset;
pub mod error;
pub mod grouping;
pub mod pairs;
pub mod split;
pub mod stats;
pub mod tokenizer;
pub mod types;
pub mod window;
