//! Server poke handling: assembly, merge, and frame-paced application to
//! the local store and mutation tracker.

pub mod apply;
pub mod handler;

pub use handler::PokeHandler;

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum Error {
    #[error("poke part for \"{got}\" while assembling \"{expected}\"")]
    UnexpectedPart { expected: String, got: String },

    #[error("poke part \"{0}\" without a poke start")]
    PartWithoutStart(String),

    #[error("poke end for \"{got}\" while assembling \"{expected}\"")]
    UnexpectedEnd { expected: String, got: String },

    #[error("unexpected cookie gap: expected base {expected:?}, got {got:?}")]
    CookieGap {
        expected: Option<String>,
        got: Option<String>,
    },

    #[error("poke references unknown table \"{0}\"")]
    UnknownTable(String),

    #[error("mutation tracker: {0}")]
    Mutations(#[from] crate::mutations::Error),
}
