//! AoE2 Wager — Match Feed
//!
//! Co dělá:
//!   1. Stahuje parsované zápasy z replay parser služby (`/api/game_stats`)
//!   2. Normalizuje volně typované záznamy (players/map občas jako JSON string)
//!   3. Klasifikuje zápas: Valid / InvalidRefundable (out-of-sync, nesmyslná délka)
//!   4. Hlásí jen skutečně nový "latest match" (replay hash), ne každý poll

pub mod dedup;
pub mod normalize;
pub mod record;
pub mod source;
pub mod validate;

pub use dedup::{pick_newest, MatchFeedDeduplicator, NewLatestMatch};
pub use normalize::{clean_game_type, clean_game_version, decode_loose, normalize, normalize_batch, normalize_value};
pub use record::{Loose, MapInfo, MatchRecord, PlayerResult, RawMatchRecord};
pub use source::{fetch_with_timeout, FeedMode, HttpMatchFeed, MatchFeedPoller, MatchFeedSource};
pub use validate::{
    classify, describe_duration, format_duration, sanitize_duration, Classification, InvalidReason,
    ValidatedMatch, MAX_DURATION_SECS, MIN_DURATION_SECS,
};

/// Lowercase alphanumeric form of a player name, for matching bet participants.
pub fn normalize_name(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
