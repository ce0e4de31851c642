//! Configuration keys.
//!
//! All configuration lives in the store's key-value config space; the
//! constants here name the keys the core itself reads and writes.  Login
//! parameters used by the transport are stored under the `configured_`
//! prefix and are opaque to the core.

/// Set to `1` once the account is fully configured.
pub const CONFIGURED: &str = "configured";

/// The address the account is configured for.
pub const CONFIGURED_ADDR: &str = "configured_addr";

/// Display name of the local user.
pub const DISPLAYNAME: &str = "displayname";

/// Whether end-to-end encryption is enabled.
pub const E2EE_ENABLED: &str = "e2ee_enabled";

/// Whether read receipts are sent and honored.
pub const MDNS_ENABLED: &str = "mdns_enabled";

/// Whether deaddrop messages are announced as incoming messages.
pub const SHOW_DEADDROP: &str = "show_deaddrop";

/// Schema version of the store.
pub const DBVERSION: &str = "dbversion";

pub const E2EE_DEFAULT_ENABLED: i32 = 1;
pub const MDNS_DEFAULT_ENABLED: i32 = 1;
