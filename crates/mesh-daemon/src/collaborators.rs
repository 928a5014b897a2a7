//! Default collaborators for a standalone daemon.
//!
//! - `ApiKeyAuth` - REGISTER tokens are API keys from the config
//! - `StaticGroups` - groups listed in the config
//! - `UnconfiguredProvider` - no completion backend; every request fails

use crate::config::ApiKey;
use async_trait::async_trait;
use mesh_core::ClientId;
use mesh_core::collaborators::{
    AuthRejected, AuthValidator, CompletionOutput, CompletionProvider, CompletionRequest,
    GroupResolver, Principal, ProviderError,
};
use std::collections::{BTreeMap, HashSet};

pub struct ApiKeyAuth {
    keys: Vec<ApiKey>,
}

impl ApiKeyAuth {
    pub fn new(keys: Vec<ApiKey>) -> Self {
        if keys.iter().all(|k| !k.active) {
            tracing::warn!("No active API keys configured; every registration will be rejected");
        }
        Self { keys }
    }
}

#[async_trait]
impl AuthValidator for ApiKeyAuth {
    async fn validate(&self, token: &str) -> Result<Principal, AuthRejected> {
        self.keys
            .iter()
            .find(|k| k.active && k.key == token)
            .map(|k| Principal {
                subject: k.name.clone(),
                client_id: k.client_id.clone(),
            })
            .ok_or_else(|| AuthRejected("invalid API key".into()))
    }
}

pub struct StaticGroups {
    groups: BTreeMap<String, HashSet<ClientId>>,
}

impl StaticGroups {
    pub fn new(groups: BTreeMap<String, Vec<ClientId>>) -> Self {
        Self {
            groups: groups
                .into_iter()
                .map(|(name, members)| (name, members.into_iter().collect()))
                .collect(),
        }
    }
}

#[async_trait]
impl GroupResolver for StaticGroups {
    async fn members(&self, group: &str) -> Option<HashSet<ClientId>> {
        self.groups.get(group).cloned()
    }
}

/// Stand-in until a completion backend is wired in.
pub struct UnconfiguredProvider;

#[async_trait]
impl CompletionProvider for UnconfiguredProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionOutput, ProviderError> {
        Err(ProviderError::Unavailable(format!(
            "no completion provider configured (requested {})",
            request.provider.as_deref().unwrap_or("default")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(key: &str, name: &str, active: bool, client: Option<&str>) -> ApiKey {
        ApiKey {
            key: key.into(),
            name: name.into(),
            active,
            client_id: client.map(|c| c.parse().unwrap()),
        }
    }

    #[tokio::test]
    async fn test_api_key_auth() {
        let auth = ApiKeyAuth::new(vec![
            key("k1", "laptop", true, None),
            key("k2", "retired", false, None),
            key("k3", "phone", true, Some("phone-1")),
        ]);

        let principal = auth.validate("k1").await.unwrap();
        assert_eq!(principal.subject, "laptop");
        assert_eq!(principal.client_id, None);

        assert!(auth.validate("k2").await.is_err());
        assert!(auth.validate("nope").await.is_err());

        let bound = auth.validate("k3").await.unwrap();
        assert_eq!(bound.client_id.unwrap().as_str(), "phone-1");
    }

    #[tokio::test]
    async fn test_static_groups() {
        let groups = StaticGroups::new(
            [(
                "team".to_string(),
                vec!["a".parse().unwrap(), "b".parse().unwrap(), "a".parse().unwrap()],
            )]
            .into_iter()
            .collect(),
        );
        assert_eq!(groups.members("team").await.unwrap().len(), 2);
        assert!(groups.members("other").await.is_none());
    }

    #[tokio::test]
    async fn test_unconfigured_provider() {
        let request = CompletionRequest {
            client_id: "a".parse().unwrap(),
            content: json!("hi"),
            provider: Some("openai".into()),
            model: None,
        };
        let err = UnconfiguredProvider.complete(request).await.unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable(m) if m.contains("openai")));
    }
}
