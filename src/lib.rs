pub mod config;
pub mod discord;
pub mod storage;
pub mod voice;
pub mod web;
