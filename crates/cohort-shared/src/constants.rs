/// Application name
pub const APP_NAME: &str = "Cohort";

/// Length of a room invite code
pub const ROOM_CODE_LEN: usize = 8;

/// Alphabet room codes are sampled from
pub const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Default room capacity when the creator does not pick one
pub const DEFAULT_MAX_PARTICIPANTS: u32 = 50;

/// Default session length in minutes
pub const DEFAULT_SESSION_MINUTES: u32 = 60;

/// Trailing window a member counts as present after their last activity
pub const PRESENCE_WINDOW_SECS: i64 = 300;

/// Rows returned by a quiz leaderboard
pub const LEADERBOARD_LIMIT: u32 = 50;

/// Chat messages returned by a history fetch when no limit is given
pub const CHAT_HISTORY_LIMIT: u32 = 50;

/// Look-ahead for upcoming-session reminders
pub const UPCOMING_HOURS: i64 = 24;

/// Upper bound on a single chat message, in bytes
pub const MAX_CHAT_MESSAGE_LEN: usize = 4_000;

/// Default HTTP API port
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Channel key prefixes
pub const ROOM_CHANNEL_PREFIX: &str = "room_";
pub const SESSION_CHANNEL_PREFIX: &str = "session_";
