//! L2 order book with tick-bucket volume queries.
//!
//! The book holds price levels for both sides of one symbol. Bids are stored
//! with [`std::cmp::Reverse`] keys so that iteration over the underlying
//! [`BTreeMap`] yields prices in descending order (highest bid first); asks
//! use natural ordering (lowest ask first). Keys are
//! [`OrderedFloat`] because level prices arrive as decimal strings and live
//! their whole life as `f64`.

use std::cmp::Reverse;
use std::collections::BTreeMap;

use ordered_float::OrderedFloat;

/// L2 order book: two ordered price→quantity maps and a tick size used for
/// OFI bucket rounding.
///
/// A single `Mutex` around the whole book (held by the caller) protects both
/// sides; nothing here locks internally.
pub struct OrderBook {
    /// Bid levels: Reverse(price) → quantity. Highest bid first in iteration.
    bids: BTreeMap<Reverse<OrderedFloat<f64>>, f64>,
    /// Ask levels: price → quantity. Lowest ask first in iteration.
    asks: BTreeMap<OrderedFloat<f64>, f64>,
    /// Price bucket width for [`round_down_tick`](Self::round_down_tick) /
    /// [`round_up_tick`](Self::round_up_tick).
    tick_size: f64,
}

impl OrderBook {
    /// Create an empty book.
    ///
    /// `tick_size` must be positive; it is only used as a rounding bucket,
    /// not validated against exchange filters.
    pub fn new(tick_size: f64) -> Self {
        debug_assert!(tick_size > 0.0);
        Self {
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            tick_size,
        }
    }

    /// Upsert a bid level. A zero quantity removes the level.
    pub fn add_bid(&mut self, price: f64, quantity: f64) {
        if quantity == 0.0 {
            self.remove_bid(price);
        } else {
            self.bids.insert(Reverse(OrderedFloat(price)), quantity);
        }
    }

    /// Upsert an ask level. A zero quantity removes the level.
    pub fn add_ask(&mut self, price: f64, quantity: f64) {
        if quantity == 0.0 {
            self.remove_ask(price);
        } else {
            self.asks.insert(OrderedFloat(price), quantity);
        }
    }

    /// Delete a bid level if present.
    pub fn remove_bid(&mut self, price: f64) {
        self.bids.remove(&Reverse(OrderedFloat(price)));
    }

    /// Delete an ask level if present.
    pub fn remove_ask(&mut self, price: f64) {
        self.asks.remove(&OrderedFloat(price));
    }

    /// Highest bid as `(price, quantity)`, or `None` when the side is empty.
    pub fn best_bid(&self) -> Option<(f64, f64)> {
        self.bids
            .iter()
            .next()
            .map(|(Reverse(price), qty)| (price.0, *qty))
    }

    /// Lowest ask as `(price, quantity)`, or `None` when the side is empty.
    pub fn best_ask(&self) -> Option<(f64, f64)> {
        self.asks.iter().next().map(|(price, qty)| (price.0, *qty))
    }

    /// Total bid quantity at all levels with price `>= price`.
    ///
    /// Returns `None` when the side is empty or `price` lies above the best
    /// bid (no levels can match).
    pub fn bid_volume(&self, price: f64) -> Option<f64> {
        let (best, _) = self.best_bid()?;
        if price > best {
            return None;
        }
        Some(
            self.bids
                .iter()
                .take_while(|(Reverse(p), _)| p.0 >= price)
                .map(|(_, qty)| qty)
                .sum(),
        )
    }

    /// Total ask quantity at all levels with price `<= price`.
    ///
    /// Returns `None` when the side is empty or `price` lies below the best
    /// ask.
    pub fn ask_volume(&self, price: f64) -> Option<f64> {
        let (best, _) = self.best_ask()?;
        if price < best {
            return None;
        }
        Some(
            self.asks
                .iter()
                .take_while(|(p, _)| p.0 <= price)
                .map(|(_, qty)| qty)
                .sum(),
        )
    }

    /// Round a price down to the nearest tick multiple.
    pub fn round_down_tick(&self, price: f64) -> f64 {
        (price / self.tick_size).floor() * self.tick_size
    }

    /// Round a price up to the nearest tick multiple.
    pub fn round_up_tick(&self, price: f64) -> f64 {
        (price / self.tick_size).ceil() * self.tick_size
    }

    /// Remove all levels on both sides.
    pub fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
    }

    /// `true` when the best bid is strictly above the best ask.
    ///
    /// Transient crossings can appear mid-sync; callers log them and move on.
    pub fn is_crossed(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some((bid, _)), Some((ask, _))) => bid > ask,
            _ => false,
        }
    }

    /// `(bid_level_count, ask_level_count)`.
    pub fn level_count(&self) -> (usize, usize) {
        (self.bids.len(), self.asks.len())
    }
}
