//! Feed acquisition — polling the receiver's aircraft JSON endpoint.

mod feed_client;

pub use feed_client::{FeedClient, FeedError};
