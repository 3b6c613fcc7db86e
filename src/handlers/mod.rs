pub mod file_handlers;
pub mod health_handlers;
pub mod maintenance_handlers;
pub mod pages;
