//! Registry of services offered and consumed by connected peers

use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

use super::Mode;
use crate::models::{Link, ServiceType};

type ServiceLinks = HashMap<ServiceType, HashSet<Link>>;

#[derive(Debug, Default)]
struct Inner {
    client: ServiceLinks,
    server: ServiceLinks,
}

/// Maps each service to the links that declared it.
///
/// Readers iterating with [`ServicesMap::for_each_peer`] hold the same lock
/// that [`ServicesMap::remove_peer`] takes, so a removed link is never
/// visited afterwards.
#[derive(Debug, Default)]
pub struct ServicesMap {
    inner: RwLock<Inner>,
}

impl ServicesMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the services a peer consumes and provides
    pub fn register_peer_services(
        &self,
        link: &Link,
        client_services: &[ServiceType],
        server_services: &[ServiceType],
    ) {
        let mut inner = self.inner.write();

        for service in client_services {
            inner.client.entry(*service).or_default().insert(link.clone());
        }

        for service in server_services {
            inner.server.entry(*service).or_default().insert(link.clone());
        }
    }

    /// Remove a peer from every service
    pub fn remove_peer(&self, link: &Link) {
        let mut guard = self.inner.write();
        let inner = &mut *guard;

        for links in inner.client.values_mut().chain(inner.server.values_mut()) {
            links.remove(link);
        }

        inner.client.retain(|_, links| !links.is_empty());
        inner.server.retain(|_, links| !links.is_empty());
    }

    /// Snapshot of the links registered for a service
    pub fn peer_services(&self, service: ServiceType, mode: Mode) -> Vec<Link> {
        let mut links = Vec::new();
        self.for_each_peer(service, mode, |link| links.push(link.clone()));
        links
    }

    /// Visit every link registered for a service while holding the read lock.
    ///
    /// A link registered in both modes is visited once.
    pub fn for_each_peer<F>(&self, service: ServiceType, mode: Mode, mut f: F)
    where
        F: FnMut(&Link),
    {
        let inner = self.inner.read();
        let client = inner.client.get(&service).filter(|_| mode.includes_client());
        let server = inner.server.get(&service).filter(|_| mode.includes_server());

        if let Some(links) = client {
            links.iter().for_each(&mut f);
        }

        if let Some(links) = server {
            links
                .iter()
                .filter(|link| client.map_or(true, |c| !c.contains(*link)))
                .for_each(&mut f);
        }
    }

    /// Number of distinct links with any registration
    pub fn peer_count(&self) -> usize {
        let inner = self.inner.read();
        inner
            .client
            .values()
            .chain(inner.server.values())
            .flatten()
            .collect::<HashSet<_>>()
            .len()
    }
}
