pub mod cache;
pub mod exec;
pub mod project;
