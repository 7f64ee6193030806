#![deny(dead_code)]
#![deny(unused_imports)]

pub mod assemble;
pub mod augment;
pub mod config;
pub mod cv;
pub mod dataset;
pub mod io;
pub mod model;
pub mod pipeline;
pub mod similarity;
pub mod transfer;
