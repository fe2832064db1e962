//! annotok - schema-driven XML corpus tokenization with a relational
//! annotation store
//!
//! A document is decomposed into tokens by a schema-provided selector, each
//! token's properties are persisted with a full append-only edit history, and
//! the document can be reconstituted with edits applied in place or with an
//! audit trail appended, leaving untouched content byte-for-byte intact.

pub mod cli;
pub mod collection;
pub mod document;
pub mod export;
pub mod iterator;
pub mod schema;
pub mod store;
pub mod token;
pub mod users;
pub mod xml;
