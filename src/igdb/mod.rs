pub mod fetcher;
pub mod kinds;
pub mod models;
pub mod transport;
