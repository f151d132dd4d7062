//! Document loading for sources: directory walks and pasted text.

pub mod walk;

pub use walk::{resolve_dir, text_document, walk_documents, LoadedDocument};
