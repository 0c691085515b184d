pub mod api;

pub use api::{RedditClient, RedditCredentials};
