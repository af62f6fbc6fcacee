#[macro_use]
extern crate log;
#[macro_use]
extern crate derive_builder;
#[macro_use]
extern crate lazy_static;

pub mod browser_controller;
pub mod engine;
pub mod layout;
pub mod materializer;
pub mod navigator;
pub mod progress;
pub mod runner;
pub mod types;
pub mod utils;
pub mod walker;
