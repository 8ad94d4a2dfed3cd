pub mod broadcast;
pub mod commands;
pub mod config;
pub mod environment;
pub mod errors;
pub mod profiles;
pub mod protocol;
pub mod security;
pub mod worker;
