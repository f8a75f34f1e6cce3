//! Message parsing: header decoding, charset detection, MIME navigation, and body cleanup.

pub mod charset;
pub mod cleaner;
pub mod header;
pub mod mime;
pub mod normalize;
pub mod transfer;
