//! PDF object model, syntax and file structure

mod dict;
pub mod filter;
pub mod graph;
pub mod lexer;
mod object;
pub mod parser;
mod stream;
mod trailer;
pub mod xref;

pub use dict::Dictionary;
pub use graph::{ObjectAllocator, ObjectGraph, Slot};
pub use object::{IndirectObject, Object, ObjectId, StringFormat};
pub use parser::PDFParser;
pub use stream::Stream;
pub use trailer::Trailer;
pub use xref::{EntryKind, XRefEntry, XRefTable};
