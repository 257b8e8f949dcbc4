// Library exports for the CLI and integration tests

pub mod catalog;
pub mod cloud_storage;
pub mod config;
pub mod db;
pub mod import;
