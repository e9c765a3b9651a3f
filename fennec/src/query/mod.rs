//! The query AST and its stable content hashes.

pub mod ast;
pub mod hash;

pub use ast::{Ast, Bound, Condition, Direction, Ordering, RelatedLink, SimpleOperator, SubQuery};
pub use hash::{hash_of_ast, hash_of_name_and_args};
