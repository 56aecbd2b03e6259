//! Binance USDⓈ-M futures wire formats and the websocket depth stream.

pub mod stream;
pub mod types;

pub use stream::DepthStream;
pub use types::{DepthDiff, DepthSnapshot};
