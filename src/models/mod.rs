//! Data carried through the upload pipeline.
//!
//! `upload` describes multipart parts as they land on disk; `flipbook`
//! describes the assembled result and its JSON envelope.

pub mod flipbook;
pub mod upload;
