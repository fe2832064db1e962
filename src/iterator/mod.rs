//! Token iterator strategies
//!
//! Three interchangeable ways to walk a document's tokens, with different
//! memory/capability trade-offs:
//!
//! - [`StreamIterator`]: constant memory, selectors of the form `//name`
//!   only, byte-verbatim re-emission of everything between tokens.
//! - [`TreeIterator`]: whole document in memory, any selector the evaluator
//!   accepts. The general-purpose fallback.
//! - [`StoreIterator`]: token extraction pushed into the store through the
//!   `xml_tokens` SQL function. Import only.
//!
//! Capability negotiation happens at construction and fails fast; the only
//! silent fallback is [`open`] with no pinned strategy, which tries streaming
//! first and drops to the whole-tree strategy when the selector is too
//! complicated.

mod errors;
mod store;
mod stream;
mod tree;

pub use errors::{IterResult, IteratorError};
pub use store::StoreIterator;
pub use stream::StreamIterator;
pub use tree::TreeIterator;

use std::path::Path;
use std::rc::Rc;

use crate::schema::Schema;
use crate::store::StoreSession;
use crate::token::Token;

/// Prolog written by every export path, regardless of what the source
/// document declared.
pub(crate) const XML_PROLOG: &str =
    "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"no\"?>\n";

/// Forward cursor over a document's tokens
pub trait TokenIterator {
    /// Re-initializes the cursor from the start of the document.
    fn rewind(&mut self) -> IterResult<()>;

    /// Yields the next token, or `None` once the document is exhausted.
    fn advance(&mut self) -> IterResult<Option<Token>>;

    /// Substitutes the (edited) token for the one at the cursor.
    fn replace_token(&mut self, token: &Token) -> IterResult<()>;

    /// Finalizes and emits the reconstructed document: written to `path` when
    /// given, returned as a string otherwise.
    fn export(&mut self, path: Option<&Path>) -> IterResult<Option<String>>;
}

/// Iterator strategy, where `None` at [`open`] means negotiate automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Stream,
    Tree,
    Store,
}

/// Opens an iterator over the document at `path`. A pinned strategy
/// propagates its construction error; automatic selection tries streaming
/// and falls back to the whole-tree strategy on an unsupported selector.
pub fn open(
    path: &Path,
    schema: Rc<Schema>,
    store: Rc<StoreSession>,
    strategy: Option<Strategy>,
    export: bool,
) -> IterResult<Box<dyn TokenIterator>> {
    match strategy {
        Some(Strategy::Stream) => Ok(Box::new(StreamIterator::new(path, schema, export)?)),
        Some(Strategy::Tree) => Ok(Box::new(TreeIterator::new(path, schema)?)),
        Some(Strategy::Store) => Ok(Box::new(StoreIterator::new(path, schema, store)?)),
        None => match StreamIterator::new(path, schema.clone(), export) {
            Ok(it) => Ok(Box::new(it)),
            Err(IteratorError::UnsupportedSelector(selector)) => {
                tracing::debug!(%selector, "selector not streamable, using whole-tree strategy");
                Ok(Box::new(TreeIterator::new(path, schema)?))
            }
            Err(e) => Err(e),
        },
    }
}
