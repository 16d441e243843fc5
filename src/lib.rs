pub mod backend;
pub mod cli;
pub mod config;
pub mod extract;
pub mod publish;
pub mod storage;
pub mod sync;
pub mod whitelist;
