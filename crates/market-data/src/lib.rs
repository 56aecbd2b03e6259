//! # oflow-market-data
//!
//! Binance USDⓈ-M futures depth synchronization: the websocket diff stream,
//! the REST snapshot source, the order book, and the manager that keeps the
//! book byte-equivalent to the exchange's view across gaps, reordering, and
//! latency spikes.

pub mod binance;
pub mod manager;
pub mod orderbook;
pub mod ratelimiter;
