pub mod auth;
pub mod config;
pub mod db;
pub mod engine;
pub mod web;

#[cfg(test)]
mod test_support;
