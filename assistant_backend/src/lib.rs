pub mod agent;
pub mod assistant;
pub mod config;
pub mod http_client;
pub mod plugin;
pub mod runtime;
pub mod server;
pub mod skills;
pub mod tools;
