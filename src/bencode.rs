//! Bencode encoding and decoding ([BEP-3]).
//!
//! Bencode carries `.torrent` metadata and HTTP tracker responses. Four
//! types exist:
//!
//! | Type | Format | Example |
//! |------|--------|---------|
//! | Integer | `i<number>e` | `i42e` |
//! | Byte string | `<length>:<data>` | `4:spam` |
//! | List | `l<items>e` | `l4:spami42ee` |
//! | Dictionary | `d<key><value>...e` | `d3:foo3:bare` |
//!
//! ```
//! use rswarm::bencode::{decode, encode};
//!
//! let value = decode(b"d8:intervali1800e5:peers0:e").unwrap();
//! assert_eq!(value.get_int(b"interval"), Some(1800));
//! assert_eq!(encode(&value), b"d8:intervali1800e5:peers0:e");
//! ```
//!
//! [BEP-3]: http://bittorrent.org/beps/bep_0003.html

mod decode;
mod encode;
mod error;
mod value;

pub use decode::{decode, decode_prefix};
pub use encode::encode;
pub use error::BencodeError;
pub use value::Value;

#[cfg(test)]
mod tests;
