//! Chunkstream-Common: shared types and errors.
//!
//! This crate provides the vocabulary used across chunkstream:
//!
//! - **Typed IDs**: [`StreamId`] for HTTP streaming sessions, [`HandleId`] for
//!   pooled backend connections
//! - **Data model**: [`StreamObject`], [`FetchDescriptor`], [`FetchResult`],
//!   [`ByteWindow`]
//! - **Error Handling**: the common [`Error`] type and result alias
//!
//! # Examples
//!
//! ```
//! use chunkstream_common::{ByteWindow, Error, Result, StreamObject};
//!
//! let object = StreamObject::new("backend-file-1", 10_000_000, 1_048_576);
//! let window = ByteWindow::new(2_000_000, 2_999_999);
//! assert_eq!(window.len(), 1_000_000);
//!
//! fn example(object: &StreamObject) -> Result<()> {
//!     Err(Error::range_not_satisfiable(object.size))
//! }
//! assert_eq!(example(&object).unwrap_err().http_status(), 416);
//! ```

pub mod error;
pub mod ids;
pub mod types;

pub use error::{Error, Result};
pub use ids::*;
pub use types::*;
