//! Limbo staging: messages held out of the inbox pending a screening
//! decision.

mod model;
mod repository;

pub use model::{LimboDecision, LimboMessage, SenderGroup, group_by_sender};
pub use repository::LimboRepository;
