pub mod data_routes;

pub use data_routes::*;
