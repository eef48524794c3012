//! Durable-tier repositories, one struct per collection.

mod error;
mod message;
mod room;
mod session;
mod user;

pub use error::RepositoryError;
pub use message::{MessageRepository, RoomPage};
pub use room::{RoomListFilter, RoomRepository, RoomSort};
pub use session::SessionRepository;
pub use user::UserRepository;

use mongodb::Database;

/// Opens the durable-tier connection. The database name comes from the URI
/// path, falling back to `parlay`.
pub async fn connect(uri: &str) -> Result<Database, RepositoryError> {
    let client = mongodb::Client::with_uri_str(uri).await?;
    Ok(client.default_database().unwrap_or_else(|| client.database("parlay")))
}
