//! DNS specifics: inbound question extraction and upstream answer
//! classification.

pub mod classify;
pub mod question;
