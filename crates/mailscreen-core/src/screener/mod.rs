//! Screener scheduling and storage.

mod model;
mod repository;
mod schedule;

pub use model::{Screener, ScreenerStatus};
pub use repository::ScreenerRepository;
pub use schedule::{ScreenerTimings, next_screener_timings, validate_daily_time};
