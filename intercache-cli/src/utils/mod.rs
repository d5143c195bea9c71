mod headers;
mod time;

// Export utility functions
pub use self::headers::parse_headers;
pub use self::time::parse_duration;
