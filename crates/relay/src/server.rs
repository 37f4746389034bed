//! Top-level relay coordinator
//!
//! Builds one link per (topic, source) pair from configuration and manages
//! aggregate start/stop. `run` adds fail-fast supervision: the first link
//! fault or an external cancellation signal, whichever is observed first,
//! shuts the whole relay down.

use std::sync::Arc;

use contracts::{Fabric, RelayConfig, RelayError};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::link::{DestinationFactory, Link, SourceRole};

type ServerLink<F> = Link<<F as Fabric>::Connection, DestinationFactory<F>>;

pub struct Server<F: Fabric + 'static> {
    fabric: Arc<F>,
    config: RelayConfig,
    inner: Mutex<Inner<F>>,
}

struct Inner<F: Fabric + 'static> {
    links: Vec<Arc<ServerLink<F>>>,
}

impl<F: Fabric + 'static> Server<F> {
    pub fn new(fabric: Arc<F>, config: RelayConfig) -> Self {
        Self {
            fabric,
            config,
            inner: Mutex::new(Inner { links: Vec::new() }),
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub async fn link_count(&self) -> usize {
        self.inner.lock().await.links.len()
    }

    /// Build and subscribe one link per (topic, source) pair. Any subscribe
    /// failure aborts startup, tears down every link already opened, and
    /// returns the first error.
    pub async fn start(&self) -> Result<(), RelayError> {
        let mut inner = self.inner.lock().await;
        if !inner.links.is_empty() {
            return Ok(());
        }

        let mut sources = vec![(SourceRole::Primary, self.config.primary.clone())];
        if let Some(secondary) = &self.config.secondary {
            sources.push((SourceRole::Secondary, secondary.clone()));
        }

        let mut links: Vec<Arc<ServerLink<F>>> = Vec::new();
        for (pattern, topic_config) in &self.config.topics {
            for (role, url) in &sources {
                let link = match self.open_link(*role, url, pattern, *topic_config).await {
                    Ok(link) => link,
                    Err(e) => {
                        error!(role = %role, topic = %pattern, error = %e, "link startup failed");
                        teardown(&links).await;
                        return Err(e);
                    }
                };
                links.push(link);
            }
        }

        info!(links = links.len(), topics = self.config.topics.len(), "relay started");
        inner.links = links;
        Ok(())
    }

    async fn open_link(
        &self,
        role: SourceRole,
        url: &str,
        pattern: &str,
        topic_config: contracts::TopicConfig,
    ) -> Result<Arc<ServerLink<F>>, RelayError> {
        let source = Arc::new(self.fabric.connect(url).await?);
        // Deterministic group name: concurrent relay instances with the same
        // configuration join one queue group and load-share the topic.
        let group = format!("{pattern}-{role}");
        let link = Arc::new(Link::new(
            role,
            pattern,
            group,
            topic_config,
            source,
            DestinationFactory::new(Arc::clone(&self.fabric), self.config.destination.clone()),
        ));
        link.subscribe().await?;
        Ok(link)
    }

    /// Close every tracked link, best-effort. Returns the first error, or an
    /// aggregate when more than one link failed to close.
    pub async fn stop(&self) -> Result<(), RelayError> {
        let mut inner = self.inner.lock().await;
        let links: Vec<_> = inner.links.drain(..).collect();

        let mut first_err = None;
        let mut failed = 0;
        for link in links {
            if let Err(e) = link.close().await {
                warn!(role = %link.role(), topic = %link.topic(), error = %e, "link close failed");
                failed += 1;
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        info!("relay stopped");
        match first_err {
            None => Ok(()),
            Some(e) if failed == 1 => Err(e),
            Some(e) => Err(RelayError::AggregateShutdown {
                failed,
                first: Box::new(e),
            }),
        }
    }

    /// Start, then supervise: wait for the first link fault or for `cancel`
    /// to fire, shut everything down, and surface the originating error.
    pub async fn run(&self, mut cancel: watch::Receiver<bool>) -> Result<(), RelayError> {
        self.start().await?;

        let links = { self.inner.lock().await.links.clone() };
        let mut faults = JoinSet::new();
        for link in links {
            faults.spawn(async move { link.fault().await });
        }

        let fault = tokio::select! {
            _ = cancel.changed() => {
                info!("shutdown signal received");
                None
            }
            Some(joined) = faults.join_next() => joined.ok(),
        };
        faults.abort_all();

        let stop_result = self.stop().await;
        match fault {
            Some(e) => {
                error!(error = %e, "link fault, relay shut down");
                Err(e)
            }
            None => stop_result,
        }
    }
}

/// Best-effort close of links opened before a startup abort.
async fn teardown<F: Fabric + 'static>(links: &[Arc<ServerLink<F>>]) {
    for link in links {
        if let Err(e) = link.close().await {
            warn!(topic = %link.topic(), error = %e, "link close failed during startup abort");
        }
    }
}
