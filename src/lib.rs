pub mod bench;
pub mod config;
pub mod ds_impl;
