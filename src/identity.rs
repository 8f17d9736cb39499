use crate::error::VoteError;
use crate::models::VoterIdentity;

/// Picks the identity a vote is recorded under. An authenticated id always
/// wins; a fingerprint is only accepted when the poll allows anonymous votes.
pub fn resolve(
    authenticated_user_id: Option<&str>,
    client_fingerprint: Option<&str>,
    poll_allows_anonymous: bool,
) -> Result<VoterIdentity, VoteError> {
    if let Some(user_id) = authenticated_user_id.filter(|id| !id.is_empty()) {
        return Ok(VoterIdentity::Authenticated(user_id.to_string()));
    }

    if !poll_allows_anonymous {
        return Err(VoteError::AccessDenied(
            "You must be signed in to vote in this poll".into(),
        ));
    }

    match client_fingerprint.filter(|fp| !fp.is_empty()) {
        Some(fingerprint) => Ok(VoterIdentity::Anonymous(fingerprint.to_string())),
        None => Err(VoteError::AccessDenied(
            "Sign in or provide a voter fingerprint".into(),
        )),
    }
}
