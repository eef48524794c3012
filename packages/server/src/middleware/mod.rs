mod cors;
mod rate_limit;

pub use cors::create_cors_layer;
pub use rate_limit::{RateLimitService, room_rate_limit_middleware, message_rate_limit_middleware};
