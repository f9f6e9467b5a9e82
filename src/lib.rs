pub mod application;
pub mod domain;
pub mod http_service;
pub mod infrastructure;
