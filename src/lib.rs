//! File placeholders for a rich-text document model.
//!
//! Selecting or pasting files inserts a placeholder element per file, uploads
//! the bytes in the background and stamps the returned path onto the
//! placeholder. Edits that remove a placeholder abort its upload; edits that
//! only move it (cut and paste, undo, redo) keep the upload running.

pub mod config;
pub mod document;
pub mod error;
pub mod notify;
pub mod upload;
pub mod utils;
pub mod view;
