//! Package implement a rank indexed btree, in memory and over
//! record storage.
//!
//! The same btree core is offered through two flavours:
//!
//! * [mem::Index], keeps the entire tree in memory, nodes are owned
//!   by the index and elements are parametrised over type `T`.
//! * [dbt::Index], keeps every node as a fixed-length record inside
//!   a record-store, accessed via a small bounded cache of node
//!   buffers.
//!
//! Both flavours maintain, along with every child link, the count of
//! elements in the child's subtree and the running rank-offset of the
//! subtree's first element within its node. This makes three access
//! styles equally cheap, O(log n) each:
//!
//! * key ordered lookup, through an application supplied comparator.
//! * positional lookup, by rank of the element.
//! * bidirectional iteration, through a stable cursor.
//!
//! Duplicate keys, grouped comparators (compare only a prefix of a
//! composite key), replace-in-place and positional mutation are
//! supported through construction options. Refer to [mem] and [dbt]
//! module documentation for the complete feature inventory.

use std::{error as std_error, fmt, result};

/// Short form to compose Error values.
///
/// Here are few possible ways:
///
/// ```ignore
/// use crate::Error;
/// err_at!(InvalidInput, msg: "bad order {}", order)
/// ```
///
/// ```ignore
/// use crate::Error;
/// err_at!(IOError, fd.read(&mut buf))
/// ```
///
/// ```ignore
/// use crate::Error;
/// err_at!(IOError, fd.read(&mut buf), "reading {:?}", file)
/// ```
#[macro_export]
macro_rules! err_at {
    ($v:ident, msg: $($arg:expr),+) => {{
        let prefix = format!("{}:{}", file!(), line!());
        Err($crate::Error::$v(prefix, format!($($arg),+)))
    }};
    ($v:ident, $e:expr) => {{
        match $e {
            Ok(val) => Ok(val),
            Err(err) => {
                let prefix = format!("{}:{}", file!(), line!());
                Err($crate::Error::$v(prefix, format!("{}", err)))
            }
        }
    }};
    ($v:ident, $e:expr, $($arg:expr),+) => {{
        match $e {
            Ok(val) => Ok(val),
            Err(err) => {
                let prefix = format!("{}:{}", file!(), line!());
                let msg = format!($($arg),+);
                Err($crate::Error::$v(prefix, format!("{} {}", err, msg)))
            }
        }
    }};
}

mod error;
pub(crate) mod opts;

pub mod dbt;
pub mod mem;

pub use crate::error::Error;

/// Type alias for Result return type, used by this package.
pub type Result<T> = result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        use Error::*;

        match self {
            Fatal(p, m) => write!(f, "Fatal:{} {}", p, m),
            InvalidInput(p, m) => write!(f, "InvalidInput:{} {}", p, m),
            InvalidFile(p, m) => write!(f, "InvalidFile:{} {}", p, m),
            KeyNotFound(p, m) => write!(f, "KeyNotFound:{} {}", p, m),
            KeyExists(p, m) => write!(f, "KeyExists:{} {}", p, m),
            OutOfBound(p, m) => write!(f, "OutOfBound:{} {}", p, m),
            CacheExhausted(p, m) => write!(f, "CacheExhausted:{} {}", p, m),
            IOError(p, m) => write!(f, "IOError:{} {}", p, m),
            ReadOnly(p, m) => write!(f, "ReadOnly:{} {}", p, m),
            Finalized(p, m) => write!(f, "Finalized:{} {}", p, m),
        }
    }
}

impl std_error::Error for Error {}
