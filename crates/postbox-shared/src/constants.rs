/// Group every identity belongs to, regardless of stored membership.
pub const ALL_GROUP: &str = "all";

/// Character that marks a destination as an individual address.
pub const ADDRESS_SEPARATOR: char = '@';

/// Inbox page size used when the caller does not ask for one.
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Upper bound on a single inbox page.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Unread counts stop at this value ("99+").
pub const DEFAULT_UNREAD_LIMIT: u32 = 99;

/// Number of broadcasts fetched per round trip while fanning out.
pub const DEFAULT_FANOUT_BATCH: u32 = 64;

/// Version byte prefixed to every encoded page cursor.
pub const CURSOR_VERSION: u8 = 1;
