pub mod battery;
pub mod cancel;
pub mod config;
pub mod error;
pub mod flight;
pub mod geo;
pub mod manifest;
pub mod route;
pub mod safety;
pub mod supervisor;
pub mod vehicle;

pub mod iot;
pub mod mav_server;
pub mod services;
pub mod sim;

pub mod util;
