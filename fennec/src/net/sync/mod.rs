//! The client sync protocol: JSON messages exchanged between the client
//! engine and the view syncer.

pub mod poke;
pub mod push;
pub mod queries;

pub use poke::{MutationPatchOp, PokeEnd, PokePart, PokeStart, RowPatchOp, SchemaVersions};
pub use push::{
    Mutation, MutationId, MutationResponse, MutationResult, PushError, PushRequest, PushResponse,
    PUSH_VERSION,
};
pub use queries::QueriesPatchOp;

use serde::{Deserialize, Serialize};

/// Client → server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    ChangeDesiredQueries {
        desired_queries_patch: Vec<QueriesPatchOp>,
    },
    Push(PushRequest),
    Ack {
        watermark: String,
    },
}

/// Server → client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    PokeStart(PokeStart),
    PokePart(PokePart),
    PokeEnd(PokeEnd),
    PushResponse(PushResponse),
    #[serde(rename_all = "camelCase")]
    Error {
        kind: String,
        message: String,
    },
}
