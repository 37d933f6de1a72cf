//! Session configuration.

use std::time::Duration;

use crate::{
    link::SimulatedLink,
    retry::{DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_BASE_DELAY},
};

/// Interval between simulated disconnection checks.
pub const DEFAULT_DISCONNECT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Delay before reconnecting after the link drops.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Sender id stamped on locally sent messages.
pub const LOCAL_SENDER_ID: &str = "currentUser";

/// Sender name stamped on locally sent messages.
pub const LOCAL_SENDER_NAME: &str = "You";

/// Sender id stamped on system notices.
pub const SYSTEM_SENDER_ID: &str = "system";

/// Sender name stamped on system notices.
pub const SYSTEM_SENDER_NAME: &str = "System";

/// Session configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Automatic retries before giving up (manual reconnect required).
    pub max_attempts: u32,
    /// First retry delay; the n-th retry waits `n * retry_base_delay`.
    pub retry_base_delay: Duration,
    /// Interval of the periodic disconnection check.
    pub disconnect_check_interval: Duration,
    /// Delay before reconnecting after the link drops.
    pub reconnect_delay: Duration,
    /// Simulated link. The session only uses its disconnect probability;
    /// transports use the rest.
    pub link: SimulatedLink,
    /// Placeholder presence list.
    pub online_users: Vec<String>,
    /// Sender id for locally sent messages.
    pub local_sender_id: String,
    /// Sender name for locally sent messages.
    pub local_sender_name: String,
    /// Simulated peer replies. `None` disables them.
    pub peer_replies: Option<PeerReplyConfig>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
            disconnect_check_interval: DEFAULT_DISCONNECT_CHECK_INTERVAL,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            link: SimulatedLink::default(),
            online_users: ["user1", "user2", "user3"].map(String::from).to_vec(),
            local_sender_id: LOCAL_SENDER_ID.to_string(),
            local_sender_name: LOCAL_SENDER_NAME.to_string(),
            peer_replies: None,
        }
    }
}

impl SessionConfig {
    /// Enable simulated peer replies with default timing and responses.
    #[must_use]
    pub fn with_peer_replies(mut self) -> Self {
        self.peer_replies = Some(PeerReplyConfig::default());
        self
    }

    /// Replace the simulated link.
    #[must_use]
    pub fn with_link(mut self, link: SimulatedLink) -> Self {
        self.link = link;
        self
    }
}

/// Simulated peer reply behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerReplyConfig {
    /// Reply delay lower bound (inclusive).
    pub delay_min: Duration,
    /// Reply delay upper bound (exclusive).
    pub delay_max: Duration,
    /// Canned responses; one is picked at random per reply.
    pub responses: Vec<String>,
}

impl Default for PeerReplyConfig {
    fn default() -> Self {
        Self {
            delay_min: Duration::from_millis(1500),
            delay_max: Duration::from_millis(3500),
            responses: [
                "That's a great point!",
                "I agree, let's move forward with that approach.",
                "Interesting idea. Let me think about it.",
                "Perfect! I'll start working on that.",
                "Thanks for the suggestion!",
                "Could you elaborate on that?",
                "I have some experience with that. Happy to help!",
                "When would be a good time to discuss this further?",
            ]
            .map(String::from)
            .to_vec(),
        }
    }
}
