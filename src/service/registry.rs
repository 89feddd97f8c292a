use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{Error, Result};
use crate::service::{Service, ServiceConnection};

struct Entry {
    service: Arc<dyn Service>,
    started: bool,
    accept_lock: Arc<Mutex<()>>,
}

#[derive(Default)]
struct RegistryState {
    services: HashMap<String, Entry>,
    shut_down: bool,
}

/// Started service returned by a registry lookup
///
/// Deliveries through [`ServiceHandle::accept_connection`] are serialized per
/// service instance, whichever client's dispatch thread performs them.
#[derive(Clone)]
pub struct ServiceHandle {
    service: Arc<dyn Service>,
    accept_lock: Arc<Mutex<()>>,
}

impl ServiceHandle {
    pub fn id(&self) -> &str {
        self.service.id()
    }

    pub fn service(&self) -> &Arc<dyn Service> {
        &self.service
    }

    pub fn accept_connection(&self, connection: ServiceConnection) {
        let _guard = self
            .accept_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.service.accept_connection(connection);
    }
}

impl fmt::Debug for ServiceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceHandle")
            .field("id", &self.id())
            .finish()
    }
}

/// Registry of services by ID, owned by a supervisor
///
/// A single lock covers lookup and lazy start, so each service is started
/// exactly once however many dispatch threads race for it.
#[derive(Default)]
pub struct ServiceRegistry {
    state: Mutex<RegistryState>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a service, replacing any service with the same ID
    ///
    /// The replaced service is stopped, outside the registry lock, if it had
    /// been started. The new one is not started until it is first looked up.
    pub fn register_service(&self, service: Arc<dyn Service>) {
        let id = service.id().to_string();
        let replaced = {
            let mut state = self.lock();
            if state.shut_down {
                tracing::warn!(service = %id, "registry is shut down, ignoring registration");
                return;
            }

            let entry = Entry {
                service,
                started: false,
                accept_lock: Arc::new(Mutex::new(())),
            };
            state
                .services
                .insert(id.clone(), entry)
                .filter(|previous| previous.started)
        };
        tracing::debug!(service = %id, "service registered");

        if let Some(previous) = replaced {
            previous.service.stop();
            tracing::info!(service = %id, "replaced service stopped");
        }
    }

    /// Look up a service, starting it on first use
    ///
    /// Returns `Ok(None)` for unknown IDs and after [`shutdown`](Self::shutdown).
    /// A failing `start` leaves the service unstarted so a later lookup
    /// retries it.
    pub fn get_service(&self, id: &str) -> Result<Option<ServiceHandle>> {
        let mut state = self.lock();
        if state.shut_down {
            return Ok(None);
        }
        let Some(entry) = state.services.get_mut(id) else {
            return Ok(None);
        };

        if !entry.started {
            entry.service.start().map_err(|e| {
                tracing::warn!(service = %id, error = %e, "service failed to start");
                match e {
                    Error::ServiceStart { .. } => e,
                    other => Error::ServiceStart {
                        id: id.to_string(),
                        reason: other.to_string(),
                    },
                }
            })?;
            entry.started = true;
            tracing::info!(service = %id, "service started");
        }

        Ok(Some(ServiceHandle {
            service: Arc::clone(&entry.service),
            accept_lock: Arc::clone(&entry.accept_lock),
        }))
    }

    /// Stop every started service; later lookups return `None`
    pub fn shutdown(&self) {
        let started: Vec<(String, Arc<dyn Service>)> = {
            let mut state = self.lock();
            if state.shut_down {
                return;
            }
            state.shut_down = true;
            state
                .services
                .drain()
                .filter(|(_, entry)| entry.started)
                .map(|(id, entry)| (id, entry.service))
                .collect()
        };
        for (id, service) in started {
            service.stop();
            tracing::info!(service = %id, "service stopped");
        }
    }

    pub fn is_started(&self, id: &str) -> bool {
        self.lock().services.get(id).is_some_and(|e| e.started)
    }

    /// IDs of the registered services, in no particular order
    pub fn service_ids(&self) -> Vec<String> {
        self.lock().services.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{OnceLock, Weak};
    use std::thread;

    #[derive(Default)]
    struct Counting {
        id: String,
        starts: AtomicUsize,
        stops: AtomicUsize,
        fail_start: bool,
    }

    impl Counting {
        fn new(id: &str) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                ..Default::default()
            })
        }
    }

    impl Service for Counting {
        fn id(&self) -> &str {
            &self.id
        }

        fn start(&self) -> Result<()> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            if self.fail_start {
                return Err(Error::Pipe("no backing store".to_string()));
            }
            Ok(())
        }

        fn stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }

        fn accept_connection(&self, _connection: ServiceConnection) {}
    }

    #[test]
    fn test_lazy_start() {
        let registry = ServiceRegistry::new();
        let service = Counting::new("clock");
        registry.register_service(service.clone());

        assert!(!registry.is_started("clock"));
        assert_eq!(service.starts.load(Ordering::SeqCst), 0);

        let handle = registry.get_service("clock").unwrap().unwrap();
        assert_eq!(handle.id(), "clock");
        registry.get_service("clock").unwrap().unwrap();
        assert_eq!(service.starts.load(Ordering::SeqCst), 1);
        assert!(registry.is_started("clock"));
    }

    #[test]
    fn test_unknown_service() {
        let registry = ServiceRegistry::new();
        assert!(registry.get_service("missing").unwrap().is_none());
    }

    #[test]
    fn test_concurrent_lookup_starts_once() {
        let registry = Arc::new(ServiceRegistry::new());
        let service = Counting::new("clock");
        registry.register_service(service.clone());

        let workers: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || registry.get_service("clock").unwrap().is_some())
            })
            .collect();
        for worker in workers {
            assert!(worker.join().unwrap());
        }
        assert_eq!(service.starts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_replacement_stops_started_service() {
        let registry = ServiceRegistry::new();
        let old = Counting::new("clock");
        let new = Counting::new("clock");
        registry.register_service(old.clone());
        registry.get_service("clock").unwrap();

        registry.register_service(new.clone());
        assert_eq!(old.stops.load(Ordering::SeqCst), 1);
        assert!(!registry.is_started("clock"));
        assert_eq!(registry.len(), 1);

        registry.get_service("clock").unwrap();
        assert_eq!(new.starts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_replacing_unstarted_service_does_not_stop_it() {
        let registry = ServiceRegistry::new();
        let old = Counting::new("clock");
        registry.register_service(old.clone());
        registry.register_service(Counting::new("clock"));
        assert_eq!(old.stops.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_shutdown_stops_started_services_once() {
        let registry = ServiceRegistry::new();
        let started = Counting::new("a");
        let idle = Counting::new("b");
        registry.register_service(started.clone());
        registry.register_service(idle.clone());
        registry.get_service("a").unwrap();

        registry.shutdown();
        registry.shutdown();

        assert_eq!(started.stops.load(Ordering::SeqCst), 1);
        assert_eq!(idle.stops.load(Ordering::SeqCst), 0);
        assert!(registry.get_service("a").unwrap().is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_failed_start_is_reported_and_retried() {
        let registry = ServiceRegistry::new();
        let service = Arc::new(Counting {
            id: "flaky".to_string(),
            fail_start: true,
            ..Default::default()
        });
        registry.register_service(service.clone());

        let err = registry.get_service("flaky").unwrap_err();
        assert!(matches!(err, Error::ServiceStart { ref id, .. } if id == "flaky"));
        assert!(!registry.is_started("flaky"));

        registry.get_service("flaky").unwrap_err();
        assert_eq!(service.starts.load(Ordering::SeqCst), 2);
    }

    /// Looks at its registry while stopping
    struct Inspecting {
        registry: OnceLock<Weak<ServiceRegistry>>,
        seen_while_stopping: Mutex<Option<usize>>,
    }

    impl Inspecting {
        fn new(registry: &Arc<ServiceRegistry>) -> Arc<Self> {
            let service = Arc::new(Self {
                registry: OnceLock::new(),
                seen_while_stopping: Mutex::new(None),
            });
            let _ = service.registry.set(Arc::downgrade(registry));
            service
        }

        fn seen(&self) -> Option<usize> {
            *self.seen_while_stopping.lock().unwrap()
        }
    }

    impl Service for Inspecting {
        fn id(&self) -> &str {
            "inspecting"
        }

        fn stop(&self) {
            let registry = self.registry.get().and_then(Weak::upgrade).unwrap();
            *self.seen_while_stopping.lock().unwrap() = Some(registry.len());
        }

        fn accept_connection(&self, _connection: ServiceConnection) {}
    }

    #[test]
    fn test_stop_may_use_the_registry() {
        let registry = Arc::new(ServiceRegistry::new());
        let first = Inspecting::new(&registry);
        registry.register_service(first.clone());
        registry.get_service("inspecting").unwrap();

        let second = Inspecting::new(&registry);
        registry.register_service(second.clone());
        assert_eq!(first.seen(), Some(1));

        registry.get_service("inspecting").unwrap();
        registry.shutdown();
        assert_eq!(second.seen(), Some(0));
    }
}
