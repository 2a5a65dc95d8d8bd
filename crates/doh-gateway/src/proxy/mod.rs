//! Upstream fanout, response selection, and diagnostic annotation.

pub mod diagnostics;
pub mod fanout;
pub mod select;
