pub mod context;
pub mod jwt;

// Re-export commonly used items
pub use context::Identity;
pub use jwt::{SessionAuthenticator, load_public_key};
