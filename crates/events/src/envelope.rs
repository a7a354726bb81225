//! Event envelopes and their wire encoding.
//!
//! On the wire an event is a flat string-keyed field map: an `event` field
//! naming the fact plus kind-specific fields (`user_id`, `post_id`, `url`).
//! Inside the process every fact is a [`CascadeEvent`] variant with a typed
//! payload. Decoding happens once, at the consumer loop boundary.

use std::collections::BTreeMap;
use std::str::FromStr;

use thiserror::Error;

use ripple_core::{PostId, UserId};

/// Flat field map as stored in a stream entry.
pub type WireFields = BTreeMap<String, String>;

/// Name of the field carrying the event kind.
pub const EVENT_FIELD: &str = "event";

/// Logical streams the services talk over.
pub mod topics {
    /// Facts emitted by the user service.
    pub const USER_EVENTS: &str = "user-events";
    /// Facts emitted by the post service.
    pub const POST_EVENTS: &str = "post-events";
    /// Facts emitted by the media service.
    pub const MEDIA_EVENTS: &str = "media-events";
}

/// Position of an entry in a stream, assigned at append time.
///
/// Uses the `<millis>-<seq>` shape of Redis stream ids so both transports share
/// one type. Ordering is by `millis`, then `seq`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct EntryId {
    millis: u64,
    seq: u64,
}

impl EntryId {
    /// The position before any entry.
    pub const ZERO: EntryId = EntryId { millis: 0, seq: 0 };

    pub const fn new(millis: u64, seq: u64) -> Self {
        Self { millis, seq }
    }

    pub const fn millis(&self) -> u64 {
        self.millis
    }

    pub const fn seq(&self) -> u64 {
        self.seq
    }

    /// Next id strictly greater than `self`, using `now_millis` when the clock
    /// has moved forward.
    pub fn successor(&self, now_millis: u64) -> Self {
        if now_millis > self.millis {
            Self::new(now_millis, 0)
        } else {
            Self::new(self.millis, self.seq + 1)
        }
    }
}

impl core::fmt::Display for EntryId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}-{}", self.millis, self.seq)
    }
}

impl FromStr for EntryId {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DecodeError::InvalidEntryId(s.to_string());
        let (millis, seq) = match s.split_once('-') {
            Some((millis, seq)) => (millis, seq),
            None => (s, "0"),
        };
        Ok(Self {
            millis: millis.parse().map_err(|_| invalid())?,
            seq: seq.parse().map_err(|_| invalid())?,
        })
    }
}

/// Kinds of facts the cascade engine understands.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    UserCreated,
    UserDeleted,
    PostDeleted,
    AvatarUpdated,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::UserCreated,
        EventKind::UserDeleted,
        EventKind::PostDeleted,
        EventKind::AvatarUpdated,
    ];

    /// Value of the `event` field on the wire.
    pub const fn wire_name(&self) -> &'static str {
        match self {
            EventKind::UserCreated => "user_created",
            EventKind::UserDeleted => "user_deleted",
            EventKind::PostDeleted => "post_deleted",
            EventKind::AvatarUpdated => "avatar_updated",
        }
    }

    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.wire_name() == name)
    }

    /// Stream this kind of fact is appended to.
    pub const fn topic(&self) -> &'static str {
        match self {
            EventKind::UserCreated | EventKind::UserDeleted => topics::USER_EVENTS,
            EventKind::PostDeleted => topics::POST_EVENTS,
            EventKind::AvatarUpdated => topics::MEDIA_EVENTS,
        }
    }
}

impl core::fmt::Display for EventKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// A user account was created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserCreated {
    pub user_id: UserId,
}

/// A user account was deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserDeleted {
    pub user_id: UserId,
}

/// A post was deleted (directly, or as part of deleting its owner).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostDeleted {
    pub post_id: PostId,
}

/// A user's avatar now lives at `url`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvatarUpdated {
    pub user_id: UserId,
    pub url: String,
}

/// A fact with its statically-typed payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CascadeEvent {
    UserCreated(UserCreated),
    UserDeleted(UserDeleted),
    PostDeleted(PostDeleted),
    AvatarUpdated(AvatarUpdated),
}

/// Result of decoding a wire field map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Known(CascadeEvent),
    /// The `event` field names a kind this build does not know.
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("entry has no `event` field")]
    MissingKind,

    #[error("{kind} entry is missing field `{field}`")]
    MissingField { kind: EventKind, field: &'static str },

    #[error("{kind} entry has invalid `{field}`: {reason}")]
    InvalidField {
        kind: EventKind,
        field: &'static str,
        reason: String,
    },

    #[error("invalid entry id: {0:?}")]
    InvalidEntryId(String),
}

impl CascadeEvent {
    pub fn user_created(user_id: UserId) -> Self {
        Self::UserCreated(UserCreated { user_id })
    }

    pub fn user_deleted(user_id: UserId) -> Self {
        Self::UserDeleted(UserDeleted { user_id })
    }

    pub fn post_deleted(post_id: PostId) -> Self {
        Self::PostDeleted(PostDeleted { post_id })
    }

    pub fn avatar_updated(user_id: UserId, url: impl Into<String>) -> Self {
        Self::AvatarUpdated(AvatarUpdated {
            user_id,
            url: url.into(),
        })
    }

    pub fn kind(&self) -> EventKind {
        match self {
            CascadeEvent::UserCreated(_) => EventKind::UserCreated,
            CascadeEvent::UserDeleted(_) => EventKind::UserDeleted,
            CascadeEvent::PostDeleted(_) => EventKind::PostDeleted,
            CascadeEvent::AvatarUpdated(_) => EventKind::AvatarUpdated,
        }
    }

    pub fn topic(&self) -> &'static str {
        self.kind().topic()
    }

    /// Flat wire form of this event.
    pub fn encode(&self) -> WireFields {
        let mut fields = WireFields::new();
        fields.insert(EVENT_FIELD.to_string(), self.kind().wire_name().to_string());
        match self {
            CascadeEvent::UserCreated(UserCreated { user_id })
            | CascadeEvent::UserDeleted(UserDeleted { user_id }) => {
                fields.insert("user_id".to_string(), user_id.to_string());
            }
            CascadeEvent::PostDeleted(PostDeleted { post_id }) => {
                fields.insert("post_id".to_string(), post_id.to_string());
            }
            CascadeEvent::AvatarUpdated(AvatarUpdated { user_id, url }) => {
                fields.insert("user_id".to_string(), user_id.to_string());
                fields.insert("url".to_string(), url.clone());
            }
        }
        fields
    }

    /// Decode a wire field map. Extra fields are ignored.
    pub fn decode(fields: &WireFields) -> Result<Decoded, DecodeError> {
        let name = fields.get(EVENT_FIELD).ok_or(DecodeError::MissingKind)?;
        let Some(kind) = EventKind::from_wire(name) else {
            return Ok(Decoded::Unknown(name.clone()));
        };

        let event = match kind {
            EventKind::UserCreated => Self::user_created(parse_field(fields, kind, "user_id")?),
            EventKind::UserDeleted => Self::user_deleted(parse_field(fields, kind, "user_id")?),
            EventKind::PostDeleted => Self::post_deleted(parse_field(fields, kind, "post_id")?),
            EventKind::AvatarUpdated => Self::avatar_updated(
                parse_field(fields, kind, "user_id")?,
                required(fields, kind, "url")?,
            ),
        };
        Ok(Decoded::Known(event))
    }
}

fn required<'a>(
    fields: &'a WireFields,
    kind: EventKind,
    field: &'static str,
) -> Result<&'a str, DecodeError> {
    fields
        .get(field)
        .map(String::as_str)
        .ok_or(DecodeError::MissingField { kind, field })
}

fn parse_field<T>(fields: &WireFields, kind: EventKind, field: &'static str) -> Result<T, DecodeError>
where
    T: FromStr,
    T::Err: core::fmt::Display,
{
    required(fields, kind, field)?
        .parse()
        .map_err(|e: T::Err| DecodeError::InvalidField {
            kind,
            field,
            reason: e.to_string(),
        })
}

/// A decoded fact together with where it was read from.
///
/// Immutable once built; the entry id is the durable offset, not a dedup key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventEnvelope {
    topic: String,
    entry_id: EntryId,
    event: CascadeEvent,
}

impl EventEnvelope {
    pub fn new(topic: impl Into<String>, entry_id: EntryId, event: CascadeEvent) -> Self {
        Self {
            topic: topic.into(),
            entry_id,
            event,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn entry_id(&self) -> EntryId {
        self.entry_id
    }

    pub fn kind(&self) -> EventKind {
        self.event.kind()
    }

    pub fn event(&self) -> &CascadeEvent {
        &self.event
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> WireFields {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn user_deleted_encodes_to_flat_string_fields() {
        let encoded = CascadeEvent::user_deleted(UserId::new(42)).encode();
        assert_eq!(encoded, fields(&[("event", "user_deleted"), ("user_id", "42")]));
    }

    #[test]
    fn avatar_updated_decodes_with_url() {
        let decoded = CascadeEvent::decode(&fields(&[
            ("event", "avatar_updated"),
            ("user_id", "7"),
            ("url", "3f2a.png"),
        ]))
        .unwrap();
        assert_eq!(
            decoded,
            Decoded::Known(CascadeEvent::avatar_updated(UserId::new(7), "3f2a.png"))
        );
    }

    #[test]
    fn unknown_kind_is_not_an_error() {
        let decoded = CascadeEvent::decode(&fields(&[("event", "user_renamed"), ("user_id", "1")])).unwrap();
        assert_eq!(decoded, Decoded::Unknown("user_renamed".to_string()));
    }

    #[test]
    fn missing_and_malformed_fields_are_reported() {
        let missing = CascadeEvent::decode(&fields(&[("event", "post_deleted")])).unwrap_err();
        assert_eq!(
            missing,
            DecodeError::MissingField {
                kind: EventKind::PostDeleted,
                field: "post_id"
            }
        );

        let malformed =
            CascadeEvent::decode(&fields(&[("event", "user_created"), ("user_id", "x1")])).unwrap_err();
        assert!(matches!(
            malformed,
            DecodeError::InvalidField { kind: EventKind::UserCreated, field: "user_id", .. }
        ));

        assert_eq!(CascadeEvent::decode(&WireFields::new()).unwrap_err(), DecodeError::MissingKind);
    }

    #[test]
    fn kinds_route_to_their_topics() {
        assert_eq!(EventKind::UserCreated.topic(), topics::USER_EVENTS);
        assert_eq!(EventKind::UserDeleted.topic(), topics::USER_EVENTS);
        assert_eq!(EventKind::PostDeleted.topic(), topics::POST_EVENTS);
        assert_eq!(EventKind::AvatarUpdated.topic(), topics::MEDIA_EVENTS);
    }

    #[test]
    fn entry_ids_order_and_parse() {
        let a: EntryId = "1700000000000-0".parse().unwrap();
        let b: EntryId = "1700000000000-1".parse().unwrap();
        let c: EntryId = "1700000000001".parse().unwrap();
        assert!(a < b && b < c);
        assert_eq!(b.to_string(), "1700000000000-1");
        assert!("12-x".parse::<EntryId>().is_err());
    }

    #[test]
    fn successor_is_strictly_increasing_even_if_clock_goes_back() {
        let id = EntryId::new(100, 3);
        assert_eq!(id.successor(50), EntryId::new(100, 4));
        assert_eq!(id.successor(100), EntryId::new(100, 4));
        assert_eq!(id.successor(101), EntryId::new(101, 0));
    }
}
