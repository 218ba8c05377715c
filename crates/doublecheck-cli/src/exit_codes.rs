//! Process exit codes.

pub const SUCCESS: i32 = 0;
pub const CONFIG_ERROR: i32 = 2; // Unreadable or invalid configuration, or other fatal setup failure
