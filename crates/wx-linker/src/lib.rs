//! Librarian and linker.
//!
//! The librarian bundles compiled sections into a library without touching
//! references. The linker takes objects and libraries, picks the entry
//! section, resolves every reference against visibility-scoped symbols,
//! prunes unreachable sections and flattens the rest into an `Output`.

mod complex;
mod diagnostics;
mod librarian;
mod linker;
mod symbols;

pub use diagnostics::LinkError;
pub use librarian::create_library;
pub use linker::{link, LinkOptions};
pub use symbols::is_accessible;
