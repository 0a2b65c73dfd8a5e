//! User accounts, OAuth token bookkeeping, and the history watermark.

mod model;
mod repository;

pub use model::{User, UserId};
pub use repository::UserRepository;
