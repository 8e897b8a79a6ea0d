pub mod app;
pub mod config;
pub mod dictionary;
pub mod domain;
pub mod error;
pub mod fs_util;
pub mod indexd;
pub mod manifest;
pub mod migration;
pub mod order;
pub mod output;
pub mod response;
pub mod sheepdog;
pub mod submitter;
pub mod table;
