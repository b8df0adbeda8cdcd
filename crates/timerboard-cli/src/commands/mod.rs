pub mod config;
pub mod run;
pub mod timer;
pub mod universe;
