//! BUFR/CREX weather bulletin decoder and encoder core.

pub mod bitmap;
pub mod bits;
pub mod bufr;
pub mod bulletin;
pub mod error;
pub mod interpreter;
pub mod subset;
pub mod table;
pub mod var;
pub mod varcode;
pub mod varinfo;

pub use bulletin::{Bulletin, Identification};
pub use error::{Error, Result};
pub use subset::Subset;
pub use var::Var;
pub use varcode::Varcode;
pub use varinfo::Varinfo;
