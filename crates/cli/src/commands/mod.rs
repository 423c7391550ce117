pub mod archive;
pub mod chat;
pub mod config_cmd;
pub mod startup;
pub mod tools;
