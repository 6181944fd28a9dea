//! Configuration store: repository contract and the store built on it

pub mod config_store;
pub mod repository;

pub use config_store::ConfigStore;
pub use repository::{
    ActiveSwap, ConfigRepository, Page, PageCursor, PageRequest, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE,
};
