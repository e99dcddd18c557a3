use anyhow::Context;

use crate::session::{Auth, Connector, RemoteSession};

/// One open session per configured endpoint, looked up by endpoint name
///
/// The map is built once and never changes afterwards, so it is shared between pipelines
/// without any locking.
#[derive(Debug)]
pub struct SessionPool<S> {
    sessions: std::collections::HashMap<String, std::sync::Arc<S>>,
}

impl<S: RemoteSession> SessionPool<S> {
    /// Open a session to every endpoint at the same time and wait for all of them
    ///
    /// Any failure fails the whole pool: the sessions that did open are closed again and the
    /// first error (in endpoint order) is returned.
    pub async fn connect<C>(endpoints: &[common::Endpoint], connector: &C) -> anyhow::Result<Self>
    where
        C: Connector<Session = S>,
    {
        tracing::info!("Connecting to {} adaptors", endpoints.len());
        let attempts = endpoints.iter().map(|endpoint| async move {
            let auth = Auth::from_credential(&endpoint.credential)
                .with_context(|| format!("adaptor {}", endpoint.name))?;
            tracing::trace!("Establishing connection for {}", endpoint.name);
            let session = connector.connect(endpoint, auth).await.with_context(|| {
                format!(
                    "failed to connect adaptor {} ({}:{})",
                    endpoint.name,
                    endpoint.address(),
                    endpoint.port
                )
            })?;
            tracing::trace!("Connected to {}", endpoint.name);
            Ok::<_, anyhow::Error>((endpoint.name.clone(), session))
        });
        let results = futures::future::join_all(attempts).await;
        let mut sessions = std::collections::HashMap::new();
        let mut first_error = None;
        for result in results {
            match result {
                Ok((name, session)) => {
                    sessions.insert(name, std::sync::Arc::new(session));
                }
                Err(error) => {
                    tracing::error!("{:#}", error);
                    first_error.get_or_insert(error);
                }
            }
        }
        let pool = Self { sessions };
        if let Some(error) = first_error {
            pool.shutdown().await;
            return Err(error);
        }
        Ok(pool)
    }

    /// Build a pool from sessions that are already open
    pub fn from_sessions(sessions: impl IntoIterator<Item = (String, S)>) -> Self {
        Self {
            sessions: sessions
                .into_iter()
                .map(|(name, session)| (name, std::sync::Arc::new(session)))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<std::sync::Arc<S>> {
        self.sessions.get(name).cloned()
    }

    /// Endpoint names in sorted order
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.sessions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Close every session; failures are logged and otherwise ignored
    pub async fn shutdown(&self) {
        tracing::info!("Closing SSH connections");
        for name in self.names() {
            let session = &self.sessions[name];
            match session.close().await {
                Ok(()) => tracing::trace!("Adaptor {} connection closed", name),
                Err(error) => {
                    tracing::warn!("Adaptor {} connection didn't close well: {:#}", name, error)
                }
            }
        }
    }
}
