use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod contracts;

pub use contracts::{
    Ballot, BatchEntry, BatchReport, CastVoteResponse, MyVotesResponse, RemoveVotesResponse,
    Requester,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "public" => Some(Visibility::Public),
            "private" => Some(Visibility::Private),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Poll {
    pub id: String,
    pub creator_id: String,
    pub title: String,
    pub visibility: Visibility,
    pub multiple_votes_allowed: bool,
    pub anonymous_allowed: bool,
    pub options: Vec<PollOption>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollOption {
    pub id: String,
    pub poll_id: String,
    pub ordinal: i64,
    pub text: String,
}

impl Poll {
    /// A public, single-vote poll that accepts anonymous voters and never expires.
    pub fn new(creator_id: String, title: String, options: Vec<String>) -> Self {
        let id = Uuid::new_v4().to_string();

        let options = options
            .into_iter()
            .enumerate()
            .map(|(ordinal, text)| PollOption {
                id: Uuid::new_v4().to_string(),
                poll_id: id.clone(),
                ordinal: ordinal as i64,
                text,
            })
            .collect();

        Self {
            id,
            creator_id,
            title,
            visibility: Visibility::Public,
            multiple_votes_allowed: false,
            anonymous_allowed: true,
            options,
            created_at: Utc::now(),
            expires_at: None,
        }
    }

    pub fn allow_multiple_votes(mut self) -> Self {
        self.multiple_votes_allowed = true;
        self
    }

    pub fn private(mut self) -> Self {
        self.visibility = Visibility::Private;
        self
    }

    pub fn authenticated_only(mut self) -> Self {
        self.anonymous_allowed = false;
        self
    }

    pub fn expiring_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn option_id(&self, ordinal: usize) -> Option<&str> {
        self.options.get(ordinal).map(|option| option.id.as_str())
    }
}

/// Who cast a vote. Fingerprints are client supplied and only used for
/// deduplication, never for authorization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum VoterIdentity {
    Authenticated(String),
    Anonymous(String),
}

impl VoterIdentity {
    pub fn user_id(&self) -> Option<&str> {
        match self {
            VoterIdentity::Authenticated(user_id) => Some(user_id),
            VoterIdentity::Anonymous(_) => None,
        }
    }

    pub fn fingerprint(&self) -> Option<&str> {
        match self {
            VoterIdentity::Authenticated(_) => None,
            VoterIdentity::Anonymous(fingerprint) => Some(fingerprint),
        }
    }

    // Namespaced so a user id can never collide with a fingerprint.
    pub fn key(&self) -> String {
        match self {
            VoterIdentity::Authenticated(user_id) => format!("user:{}", user_id),
            VoterIdentity::Anonymous(fingerprint) => format!("anon:{}", fingerprint),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub id: String,
    pub poll_id: String,
    pub option_id: String,
    pub identity: VoterIdentity,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The voting-policy subset of a poll, as held in the poll cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollSnapshot {
    pub poll_id: String,
    pub creator_id: String,
    pub visibility: Visibility,
    pub multiple_votes_allowed: bool,
    pub anonymous_allowed: bool,
    pub expires_at: Option<DateTime<Utc>>,
    /// Option ids in ordinal order.
    pub option_ids: Vec<String>,
}

impl PollSnapshot {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    pub fn has_option(&self, option_id: &str) -> bool {
        self.option_ids.iter().any(|id| id == option_id)
    }

    pub fn is_creator(&self, identity: &VoterIdentity) -> bool {
        identity.user_id() == Some(self.creator_id.as_str())
    }
}

impl From<&Poll> for PollSnapshot {
    fn from(poll: &Poll) -> Self {
        let mut options: Vec<&PollOption> = poll.options.iter().collect();
        options.sort_by_key(|option| option.ordinal);

        Self {
            poll_id: poll.id.clone(),
            creator_id: poll.creator_id.clone(),
            visibility: poll.visibility,
            multiple_votes_allowed: poll.multiple_votes_allowed,
            anonymous_allowed: poll.anonymous_allowed,
            expires_at: poll.expires_at,
            option_ids: options.into_iter().map(|option| option.id.clone()).collect(),
        }
    }
}

/// One row of a poll's results. Derived on demand, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultRow {
    pub option_id: String,
    pub vote_count: u64,
    pub percentage: f64,
}
