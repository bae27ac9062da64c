//! Role resolution
//!
//! A role is a case-insensitive substring of the server nickname, so a
//! "Logging" role matches "Logging with rsyslog - 12H1". Results are sorted
//! by identity so "the first server of a role" is the same on every run.

use super::{Deployment, ServerHandle};
use crate::common::{Error, Result};

/// Resolves role patterns against one deployment
pub struct ServerRoleResolver<'a> {
    deployment: &'a dyn Deployment,
}

impl<'a> ServerRoleResolver<'a> {
    pub fn new(deployment: &'a dyn Deployment) -> Self {
        Self { deployment }
    }

    /// All servers whose identity matches `pattern`, sorted by identity
    ///
    /// Membership is queried on every call. An empty match is a topology
    /// problem and fails with `Error::EmptyRoleSet`.
    pub async fn resolve(&self, pattern: &str) -> Result<Vec<ServerHandle>> {
        let needle = pattern.to_lowercase();
        let mut matched: Vec<ServerHandle> = self
            .deployment
            .servers()
            .await?
            .into_iter()
            .filter(|server| server.id().to_lowercase().contains(&needle))
            .collect();

        if matched.is_empty() {
            return Err(Error::EmptyRoleSet {
                pattern: pattern.to_string(),
            });
        }

        matched.sort_by(|a, b| a.id().cmp(b.id()));
        tracing::debug!(
            pattern,
            servers = ?matched.iter().map(|s| s.id()).collect::<Vec<_>>(),
            "Resolved role"
        );
        Ok(matched)
    }

    /// First server of a role in resolution order
    pub async fn first(&self, pattern: &str) -> Result<ServerHandle> {
        let mut servers = self.resolve(pattern).await?;
        Ok(servers.swap_remove(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deployment::{MockDeployment, MockServer};

    fn deployment() -> MockDeployment {
        MockDeployment::new("resolver")
            .with_server(MockServer::new("Base Server 2"))
            .with_server(MockServer::new("Logging with rsyslog"))
            .with_server(MockServer::new("base server 1"))
    }

    #[tokio::test]
    async fn test_resolve_is_case_insensitive_and_sorted() {
        let deployment = deployment();
        let resolver = ServerRoleResolver::new(&deployment);

        let servers = resolver.resolve("BASE").await.unwrap();
        let ids: Vec<&str> = servers.iter().map(|s| s.id()).collect();
        assert_eq!(ids, vec!["Base Server 2", "base server 1"]);
    }

    #[tokio::test]
    async fn test_first_is_deterministic() {
        let deployment = deployment();
        let resolver = ServerRoleResolver::new(&deployment);

        let a = resolver.first("logging").await.unwrap();
        let b = resolver.first("logging").await.unwrap();
        assert_eq!(a.id(), "Logging with rsyslog");
        assert_eq!(a.id(), b.id());
    }

    #[tokio::test]
    async fn test_empty_role_set() {
        let deployment = deployment();
        let resolver = ServerRoleResolver::new(&deployment);

        let err = resolver.resolve("Database").await.unwrap_err();
        assert!(matches!(err, Error::EmptyRoleSet { ref pattern } if pattern == "Database"));
    }

    #[tokio::test]
    async fn test_membership_is_not_cached() {
        let deployment = MockDeployment::new("growing");
        let resolver = ServerRoleResolver::new(&deployment);

        assert!(resolver.resolve("Base").await.is_err());
        deployment.add_server(MockServer::new("Base"));
        assert_eq!(resolver.resolve("Base").await.unwrap().len(), 1);
    }
}
