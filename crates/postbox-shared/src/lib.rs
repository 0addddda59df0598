//! # postbox-shared
//!
//! Plain types shared by every Postbox crate: user identities, the
//! destination classifier used by the compose path, and the opaque cursor
//! token handed out by inbox pagination.

pub mod constants;
pub mod cursor;
pub mod destination;
pub mod error;
pub mod time;
pub mod types;

pub use cursor::PageCursor;
pub use destination::{AddressSeparatorPolicy, Destination, DestinationPolicy};
pub use error::{CursorError, IdentityError};
pub use types::UserRef;
