//! Scope request validation: `openid` is mandatory,
//! duplicates are rejected, and `audience:server:client_id:<peer>`
//! atoms are only honored when the requesting client is in the peer's
//! `trusted_peers` list.

use std::collections::HashSet;

use idbroker_types::{Client, ScopeAtom};

use crate::error::ApiError;

/// Parses and validates a raw space-delimited scope string against
/// the requesting client's trust relationships. Returns the parsed,
/// deduplication-checked atoms in request order.
pub fn validate(raw_scope: &str, client: &Client, clients: &[Client]) -> Result<Vec<ScopeAtom>, ApiError> {
    let mut seen = HashSet::new();
    let mut atoms = Vec::new();

    for word in raw_scope.split_whitespace() {
        let atom = ScopeAtom::parse(word)
            .ok_or_else(|| ApiError::InvalidScope(format!("unrecognized scope atom `{word}`")))?;
        if !seen.insert(atom.as_str()) {
            return Err(ApiError::InvalidScope(format!("duplicate scope atom `{word}`")));
        }
        atoms.push(atom);
    }

    if !atoms.contains(&ScopeAtom::OpenId) {
        return Err(ApiError::InvalidScope("openid scope is required".to_string()));
    }

    for atom in &atoms {
        if let ScopeAtom::CrossClientAudience(peer_id) = atom {
            let peer = clients
                .iter()
                .find(|c| &c.id == peer_id)
                .ok_or_else(|| ApiError::InvalidScope(format!("unknown peer client `{peer_id}`")))?;
            if peer_id != &client.id && !peer.trusts(&client.id) {
                return Err(ApiError::InvalidScope(format!(
                    "client `{}` is not trusted by peer `{peer_id}`",
                    client.id
                )));
            }
        }
    }

    Ok(atoms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    fn client(id: &str, trusted_peers: Vec<String>) -> Client {
        Client {
            id: id.to_string(),
            secret: "secret".to_string(),
            redirect_uris: vec!["https://example.com/cb".to_string()],
            trusted_peers,
            public: false,
            name: id.to_string(),
            logo_url: None,
            created_at: OffsetDateTime::now_utc(),
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn requires_openid() {
        let c = client("web", vec![]);
        let err = validate("profile email", &c, &[c.clone()]).unwrap_err();
        assert!(matches!(err, ApiError::InvalidScope(_)));
    }

    #[test]
    fn rejects_duplicate_atoms() {
        let c = client("web", vec![]);
        let err = validate("openid openid", &c, &[c.clone()]).unwrap_err();
        assert!(matches!(err, ApiError::InvalidScope(_)));
    }

    #[test]
    fn cross_client_audience_requires_trust() {
        let requester = client("web", vec![]);
        let peer = client("api", vec![]);
        let err = validate(
            "openid audience:server:client_id:api",
            &requester,
            &[requester.clone(), peer],
        )
        .unwrap_err();
        assert!(matches!(err, ApiError::InvalidScope(_)));
    }

    #[test]
    fn cross_client_audience_succeeds_for_self() {
        let requester = client("web", vec![]);
        let atoms = validate(
            "openid audience:server:client_id:web",
            &requester,
            &[requester.clone()],
        )
        .unwrap();
        assert!(atoms.contains(&ScopeAtom::OpenId));
    }

    #[test]
    fn cross_client_audience_succeeds_when_trusted() {
        let requester = client("web", vec![]);
        let peer = client("api", vec!["web".to_string()]);
        let atoms = validate(
            "openid audience:server:client_id:api",
            &requester,
            &[requester.clone(), peer],
        )
        .unwrap();
        assert!(atoms.contains(&ScopeAtom::OpenId));
    }
}
