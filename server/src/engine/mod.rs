pub mod chat_engine;
pub mod error;
pub mod events;
pub mod moderation;
pub mod pipeline;
pub mod presence;
pub mod rate_limiter;
pub mod registry;
pub mod rooms;
pub mod session;
pub mod validation;
