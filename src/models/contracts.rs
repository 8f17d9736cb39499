// Request/response shapes for the four vote operations. Everything here is
// validated before it reaches the coordinator.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{ResultRow, Vote, VoterIdentity};
use crate::error::VoteError;

lazy_static! {
    static ref FINGERPRINT: Regex = Regex::new(r"^[A-Za-z0-9_.:-]{8,128}$").unwrap();
}

/// The caller as seen by the core: an id from the authentication provider,
/// a client fingerprint, both or neither.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Requester {
    pub user_id: Option<String>,
    pub fingerprint: Option<String>,
}

impl Requester {
    pub fn new(user_id: Option<String>, fingerprint: Option<String>) -> Result<Self, VoteError> {
        let user_id = user_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty());
        let fingerprint = fingerprint
            .map(|fp| fp.trim().to_string())
            .filter(|fp| !fp.is_empty());

        if let Some(fp) = &fingerprint {
            if !FINGERPRINT.is_match(fp) {
                return Err(VoteError::Validation("Malformed voter fingerprint".into()));
            }
        }

        Ok(Self { user_id, fingerprint })
    }

    pub fn authenticated(user_id: &str) -> Self {
        Self {
            user_id: Some(user_id.to_string()),
            fingerprint: None,
        }
    }

    pub fn anonymous(fingerprint: &str) -> Self {
        Self {
            user_id: None,
            fingerprint: Some(fingerprint.to_string()),
        }
    }
}

/// The option selections of one cast. Non-empty, no duplicates, order kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ballot {
    option_ids: Vec<String>,
}

impl Ballot {
    pub fn new(option_ids: Vec<String>) -> Result<Self, VoteError> {
        if option_ids.is_empty() {
            return Err(VoteError::Validation("Select at least one option".into()));
        }

        let mut seen = std::collections::HashSet::new();
        for id in &option_ids {
            if id.trim().is_empty() {
                return Err(VoteError::Validation("Option ids must not be blank".into()));
            }
            if !seen.insert(id.as_str()) {
                return Err(VoteError::Validation(format!("Option {} selected more than once", id)));
            }
        }

        Ok(Self { option_ids })
    }

    pub fn single(option_id: &str) -> Self {
        Self {
            option_ids: vec![option_id.to_string()],
        }
    }

    pub fn option_ids(&self) -> &[String] {
        &self.option_ids
    }

    pub fn len(&self) -> usize {
        self.option_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.option_ids.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CastVoteResponse {
    pub success: bool,
    pub votes: Vec<Vote>,
    pub results: Vec<ResultRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MyVotesResponse {
    pub votes: Vec<Vote>,
    pub has_voted: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RemoveVotesResponse {
    pub success: bool,
    pub removed: u64,
    pub results: Vec<ResultRow>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchEntry {
    pub option_id: String,
    pub identity: VoterIdentity,
}

impl BatchEntry {
    /// Holds imported identities to the same rules as interactive voters, so
    /// every imported row can later be found by its voter.
    pub fn validate(&self) -> Result<(), VoteError> {
        if self.option_id.trim().is_empty() {
            return Err(VoteError::Validation("Missing option id".into()));
        }

        match &self.identity {
            VoterIdentity::Authenticated(user_id)
                if user_id.is_empty() || user_id.trim() != user_id.as_str() =>
            {
                Err(VoteError::Validation("Malformed user id".into()))
            }
            VoterIdentity::Anonymous(fingerprint) if !FINGERPRINT.is_match(fingerprint) => {
                Err(VoteError::Validation("Malformed voter fingerprint".into()))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub processed: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}
