/// Application name
pub const APP_NAME: &str = "Parlor";

/// Channel every participant is subscribed to and cannot leave
pub const DEFAULT_CHANNEL: &str = "general";

/// Maximum chat message length, in characters
pub const MAX_MESSAGE_CHARS: usize = 200;

/// Maximum channel name length, in characters
pub const MAX_CHANNEL_NAME_LEN: usize = 32;

/// Minimum spacing between two accepted messages from one identity
pub const MESSAGE_COOLDOWN_MS: u64 = 3_000;

/// Maximum length of an authenticated identity handed over by the auth layer
pub const MAX_IDENTITY_LEN: usize = 64;

/// Prefix of generated guest labels
pub const GUEST_PREFIX: &str = "guest-";

/// Default HTTP / WebSocket port
pub const DEFAULT_HTTP_PORT: u16 = 3000;
