use serde::{Deserialize, Serialize};

/// One parsed scope atom from an `/auth` or `/token` request.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ScopeAtom {
    OpenId,
    Profile,
    Email,
    Groups,
    OfflineAccess,
    FederatedId,
    /// `audience:server:client_id:<peer>`
    CrossClientAudience(String),
}

impl ScopeAtom {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "openid" => Some(Self::OpenId),
            "profile" => Some(Self::Profile),
            "email" => Some(Self::Email),
            "groups" => Some(Self::Groups),
            "offline_access" => Some(Self::OfflineAccess),
            "federated:id" => Some(Self::FederatedId),
            _ => raw
                .strip_prefix("audience:server:client_id:")
                .filter(|peer| !peer.is_empty())
                .map(|peer| Self::CrossClientAudience(peer.to_string())),
        }
    }

    pub fn as_str(&self) -> String {
        match self {
            Self::OpenId => "openid".to_string(),
            Self::Profile => "profile".to_string(),
            Self::Email => "email".to_string(),
            Self::Groups => "groups".to_string(),
            Self::OfflineAccess => "offline_access".to_string(),
            Self::FederatedId => "federated:id".to_string(),
            Self::CrossClientAudience(peer) => format!("audience:server:client_id:{peer}"),
        }
    }
}
