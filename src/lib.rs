pub mod audit;
pub mod contract;
pub mod error;
pub mod hashing;
pub mod links;
pub mod render;
pub mod service;
pub mod state;
pub mod store;
pub mod utils;
pub mod validation;
pub mod verify;
