//! Demo chat server backed by the in-memory collaborators.
//!
//! ```text
//! PARLEY_BIND=0.0.0.0:8080 RUST_LOG=parley=debug chat-server
//! ```
//!
//! Connect with `ws://HOST/ws?userId=alice&username=Alice&roomId=lobby`.

use parley::prelude::*;

const DEFAULT_BIND: &str = "127.0.0.1:8080";

/// Rooms the demo starts with: `(id, name, participants)`.
const SEED_ROOMS: &[(&str, &str, &[&str])] = &[
    ("lobby", "Lobby", &["alice", "bob", "carol"]),
    ("alice-bob", "alice & bob", &["alice", "bob"]),
];

async fn seed_directory() -> Result<InMemoryRoomDirectory, ParleyError> {
    let directory = InMemoryRoomDirectory::new();
    for (room, name, members) in SEED_ROOMS {
        let participants = members
            .iter()
            .map(|m| UserId::parse(*m))
            .collect::<Result<Vec<_>, _>>()?;
        directory
            .upsert_room(RoomId::parse(*room)?, *name, participants)
            .await;
    }
    Ok(directory)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    parley::init_tracing("chat_server=info,parley=info");

    let bind = std::env::var("PARLEY_BIND").unwrap_or_else(|_| DEFAULT_BIND.to_string());
    let directory = seed_directory().await?;

    let server = ParleyServerBuilder::new()
        .bind(&bind)
        .build(directory, InMemoryMessageStore::new())
        .await?;

    tracing::info!(addr = %server.local_addr()?, rooms = SEED_ROOMS.len(), "chat server ready");

    server.run().await?;
    Ok(())
}
