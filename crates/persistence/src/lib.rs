//! Session persistence capability
//!
//! The core consumes sessions through the [`SessionStore`] trait; the
//! in-memory backend is the default. Distributed backends implement the
//! same trait without touching the core.

pub mod store;

pub use store::{
    FeedbackQuery, InMemorySessionStore, SessionQuery, SessionStore, SessionUpdate, StoredFeedback,
};
