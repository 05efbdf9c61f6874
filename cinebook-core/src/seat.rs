use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

const KEY_PREFIX: &str = "screening:";
const KEY_INFIX: &str = ":seat:";
const MAX_LABEL_LEN: usize = 16;

const AVAILABLE: &str = "AVAILABLE";
const HELD_PREFIX: &str = "HELD:";
const RESERVED_PREFIX: &str = "RESERVED:";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SeatKeyError {
    #[error("Seat label must not be empty")]
    EmptyLabel,
    #[error("Seat label too long: {0}")]
    LabelTooLong(String),
    #[error("Seat label contains invalid characters: {0}")]
    InvalidLabel(String),
    #[error("Seat label requested twice: {0}")]
    DuplicateLabel(String),
    #[error("Not a seat key: {0}")]
    MalformedKey(String),
}

/// Addressable identity of one seat within one screening.
///
/// Renders as `screening:{screening_id}:seat:{seat_label}`, the scheme shared
/// with seeding and inspection tooling.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SeatKey {
    screening_id: Uuid,
    seat_label: String,
}

impl SeatKey {
    pub fn new(screening_id: Uuid, seat_label: impl Into<String>) -> Result<Self, SeatKeyError> {
        let seat_label = seat_label.into();
        validate_label(&seat_label)?;
        Ok(Self { screening_id, seat_label })
    }

    /// Builds the ordered key set for a screening, rejecting duplicate labels.
    pub fn for_labels<S: AsRef<str>>(screening_id: Uuid, labels: &[S]) -> Result<Vec<Self>, SeatKeyError> {
        let mut keys: Vec<Self> = Vec::with_capacity(labels.len());
        for label in labels {
            let key = Self::new(screening_id, label.as_ref())?;
            if keys.contains(&key) {
                return Err(SeatKeyError::DuplicateLabel(key.seat_label));
            }
            keys.push(key);
        }
        Ok(keys)
    }

    pub fn screening_id(&self) -> Uuid {
        self.screening_id
    }

    pub fn seat_label(&self) -> &str {
        &self.seat_label
    }

    pub fn to_store_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for SeatKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}{}", KEY_PREFIX, self.screening_id, KEY_INFIX, self.seat_label)
    }
}

impl FromStr for SeatKey {
    type Err = SeatKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix(KEY_PREFIX)
            .ok_or_else(|| SeatKeyError::MalformedKey(s.to_string()))?;
        let (screening, label) = rest
            .split_once(KEY_INFIX)
            .ok_or_else(|| SeatKeyError::MalformedKey(s.to_string()))?;
        let screening_id = Uuid::parse_str(screening).map_err(|_| SeatKeyError::MalformedKey(s.to_string()))?;
        Self::new(screening_id, label)
    }
}

impl TryFrom<String> for SeatKey {
    type Error = SeatKeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SeatKey> for String {
    fn from(key: SeatKey) -> Self {
        key.to_string()
    }
}

fn validate_label(label: &str) -> Result<(), SeatKeyError> {
    if label.is_empty() {
        return Err(SeatKeyError::EmptyLabel);
    }
    if label.len() > MAX_LABEL_LEN {
        return Err(SeatKeyError::LabelTooLong(label.to_string()));
    }
    if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(SeatKeyError::InvalidLabel(label.to_string()));
    }
    Ok(())
}

/// Value held by a seat key in the coordination store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeatState {
    Available,
    Held { hold_id: Uuid, owner_id: Uuid },
    Reserved { booking_id: Uuid },
}

impl SeatState {
    /// Decodes a raw store value. An absent key is `Available`: TTL expiry
    /// removes the key rather than rewriting it.
    pub fn decode(raw: Option<&str>) -> Option<Self> {
        let raw = match raw {
            None => return Some(SeatState::Available),
            Some(v) => v,
        };
        if raw == AVAILABLE {
            return Some(SeatState::Available);
        }
        if let Some(rest) = raw.strip_prefix(HELD_PREFIX) {
            let (hold, owner) = rest.split_once(':')?;
            return Some(SeatState::Held {
                hold_id: Uuid::parse_str(hold).ok()?,
                owner_id: Uuid::parse_str(owner).ok()?,
            });
        }
        if let Some(booking) = raw.strip_prefix(RESERVED_PREFIX) {
            return Some(SeatState::Reserved {
                booking_id: Uuid::parse_str(booking).ok()?,
            });
        }
        None
    }

    pub fn encode(&self) -> String {
        match self {
            SeatState::Available => AVAILABLE.to_string(),
            SeatState::Held { hold_id, owner_id } => format!("{}{}:{}", HELD_PREFIX, hold_id, owner_id),
            SeatState::Reserved { booking_id } => format!("{}{}", RESERVED_PREFIX, booking_id),
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, SeatState::Available)
    }

    /// True when this is the hold identified by `hold_id` and owned by `owner_id`.
    pub fn is_held_by(&self, hold_id: Uuid, owner_id: Uuid) -> bool {
        matches!(self, SeatState::Held { hold_id: h, owner_id: o } if *h == hold_id && *o == owner_id)
    }

    pub fn is_reserved_for(&self, booking_id: Uuid) -> bool {
        matches!(self, SeatState::Reserved { booking_id: b } if *b == booking_id)
    }
}
