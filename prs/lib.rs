#![deny(unused_variables)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

pub mod blocks;
pub mod config;
pub mod elnet;
pub mod genotype;
pub mod io;
pub mod lfdr;
pub mod matching;
pub mod pipeline;
pub mod regression;
pub mod select;
pub mod stats;
pub mod types;
pub mod validate;
