//! End-to-end tests of service requests through a supervisor

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

use isolink::session::{ClientSession, END_SESSION, START_SESSION};
use isolink::{
    Connection, Context, Error, Message, RequestDispatcher, RequestStatus, Service,
    ServiceConnection, ServiceRegistry, SessionOptions, Supervisor, SupervisorConfig, link,
};

/// Keeps every connection it is handed
#[derive(Default)]
struct Recorder {
    id: &'static str,
    starts: AtomicUsize,
    accepted: Mutex<Vec<ServiceConnection>>,
}

impl Recorder {
    fn new(id: &'static str) -> Arc<Self> {
        Arc::new(Self {
            id,
            ..Default::default()
        })
    }

    fn take(&self) -> Vec<ServiceConnection> {
        std::mem::take(&mut *self.accepted.lock().unwrap())
    }
}

impl Service for Recorder {
    fn id(&self) -> &str {
        self.id
    }

    fn start(&self) -> isolink::Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        // widen the window for concurrent lookups
        thread::sleep(Duration::from_millis(20));
        Ok(())
    }

    fn accept_connection(&self, connection: ServiceConnection) {
        self.accepted.lock().unwrap().push(connection);
    }
}

/// Counts how many deliveries overlap
#[derive(Default)]
struct Overlap {
    in_flight: AtomicUsize,
    max_seen: AtomicUsize,
    accepted: AtomicUsize,
}

impl Service for Overlap {
    fn id(&self) -> &str {
        "overlap"
    }

    fn accept_connection(&self, _connection: ServiceConnection) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_seen.fetch_max(now, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(20));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.accepted.fetch_add(1, Ordering::SeqCst);
    }
}

fn bounded() -> SupervisorConfig {
    SupervisorConfig::builder()
        .handshake_timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

#[test]
fn test_round_trip_delivers_mirrored_connection() {
    let supervisor = Supervisor::new(bounded());
    let recorder = Recorder::new("recorder");
    supervisor.register_service(recorder.clone());

    let requestor = supervisor.attach_client(&Context::task("app")).unwrap();
    let client = requestor.request_service("recorder").unwrap().unwrap();

    let mut accepted = recorder.take();
    assert_eq!(accepted.len(), 1);
    let service = accepted.pop().unwrap();

    let echo = thread::spawn(move || {
        let msg = service.receive().unwrap();
        service.send(msg).unwrap();
        service
    });
    client.send(Message::text("there and back")).unwrap();
    assert_eq!(client.receive().unwrap().into_text().unwrap(), "there and back");
    let service = echo.join().unwrap();

    // the service side is the peer of the client context
    assert_eq!(service.peer(), requestor.context().id());

    requestor.close();
    supervisor.join_clients();
}

#[test]
fn test_unknown_service_is_refused() {
    let supervisor = Supervisor::new(bounded());
    let recorder = Recorder::new("recorder");
    supervisor.register_service(recorder.clone());
    let requestor = supervisor.attach_client(&Context::task("app")).unwrap();

    assert!(requestor.request_service("nope").unwrap().is_none());
    assert!(recorder.take().is_empty());

    // the control connection is still in step
    assert!(requestor.request_service("recorder").unwrap().is_some());
    assert_eq!(recorder.take().len(), 1);

    requestor.close();
    supervisor.join_clients();
}

#[test]
fn test_error_status_on_the_wire() {
    let supervisor = Context::supervisor("ams");
    let client = Context::task("app");
    let dispatcher = RequestDispatcher::new(
        Arc::new(ServiceRegistry::new()),
        supervisor.clone(),
        SessionOptions::default(),
    );
    let (server_side, client_side) = Connection::pair(&supervisor, &client);
    let handle = dispatcher.spawn(server_side, client.clone()).unwrap();

    client_side.send(Message::text(START_SESSION)).unwrap();
    client_side.send(Message::text("nope")).unwrap();
    let status = client_side.receive().unwrap().into_data().unwrap();
    assert_eq!(&status[..], &[0, 0, 0, 1]);
    assert_eq!(RequestStatus::from_bytes(&status), Some(RequestStatus::Error));
    // a refused session ends right after the status

    drop(client_side);
    handle.join().unwrap();
}

#[test]
fn test_mixed_messages_arrive_in_order() {
    let supervisor = Supervisor::new(bounded());
    let recorder = Recorder::new("recorder");
    supervisor.register_service(recorder.clone());
    let requestor = supervisor.attach_client(&Context::task("app")).unwrap();
    let client = requestor.request_service("recorder").unwrap().unwrap();
    let service = recorder.take().pop().unwrap();

    let app = requestor.context().clone();
    let sender = thread::spawn(move || {
        let (tx, rx) = link(&app, &app);
        client.send(Message::data(vec![1u8, 2, 3])).unwrap();
        client.send(Message::text("two")).unwrap();
        client.send(Message::link(rx)).unwrap();
        client.send(Message::text("four")).unwrap();
        (client, tx)
    });

    assert_eq!(&service.receive().unwrap().into_data().unwrap()[..], &[1, 2, 3]);
    assert_eq!(service.receive().unwrap().into_text().unwrap(), "two");
    let moved = service.receive().unwrap().into_receiver().unwrap();
    assert_eq!(service.receive().unwrap().into_text().unwrap(), "four");

    let (_client, tx) = sender.join().unwrap();
    let sending = thread::spawn(move || tx.send(Message::text("through the moved end")));
    assert_eq!(
        moved.receive().unwrap().into_text().unwrap(),
        "through the moved end"
    );
    sending.join().unwrap().unwrap();

    requestor.close();
    supervisor.join_clients();
}

#[test]
fn test_concurrent_lookups_start_once() {
    let registry = Arc::new(ServiceRegistry::new());
    let recorder = Recorder::new("recorder");
    registry.register_service(recorder.clone());

    let barrier = Arc::new(Barrier::new(8));
    let lookups: Vec<_> = (0..8)
        .map(|_| {
            let registry = Arc::clone(&registry);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                registry.get_service("recorder").unwrap().is_some()
            })
        })
        .collect();

    for lookup in lookups {
        assert!(lookup.join().unwrap());
    }
    assert_eq!(recorder.starts.load(Ordering::SeqCst), 1);
}

#[test]
fn test_close_propagates_to_peer() {
    let supervisor = Supervisor::new(bounded());
    let recorder = Recorder::new("recorder");
    supervisor.register_service(recorder.clone());
    let requestor = supervisor.attach_client(&Context::task("app")).unwrap();
    let client = requestor.request_service("recorder").unwrap().unwrap();
    let service = recorder.take().pop().unwrap();

    let blocked = thread::spawn(move || service.receive());
    thread::sleep(Duration::from_millis(20));
    client.close();

    assert!(matches!(blocked.join().unwrap(), Err(Error::ConnectionClosed)));
    assert!(matches!(
        client.send(Message::text("late")),
        Err(Error::ConnectionClosed)
    ));

    requestor.close();
    supervisor.join_clients();
}

#[test]
fn test_moved_endpoint_is_usable_by_receiver_only() {
    let a = Context::task("a");
    let b = Context::task("b");
    let (a_side, b_side) = Connection::pair(&a, &b);
    let (tx, rx) = link(&b, &a);

    // `tx` is moved into the message; the sending side keeps nothing
    let handover = thread::spawn(move || b_side.send(Message::link(tx)).map(|()| b_side));
    let received = a_side.receive().unwrap().into_sender().unwrap();
    let _b_side = handover.join().unwrap().unwrap();

    let reader = thread::spawn(move || rx.receive().unwrap().into_text().unwrap());
    received.send(Message::text("capability")).unwrap();
    assert_eq!(reader.join().unwrap(), "capability");
}

#[test]
fn test_protocol_violation_does_not_stop_dispatch() {
    let supervisor = Context::supervisor("ams");
    let client = Context::task("app");
    let registry = Arc::new(ServiceRegistry::new());
    let recorder = Recorder::new("recorder");
    registry.register_service(recorder.clone());
    let dispatcher = RequestDispatcher::new(
        Arc::clone(&registry),
        supervisor.clone(),
        SessionOptions::default(),
    );
    let (server_side, client_side) = Connection::pair(&supervisor, &client);
    let handle = dispatcher.spawn(server_side, client.clone()).unwrap();

    // receive both links but finish the session without acknowledging them
    client_side.send(Message::text(START_SESSION)).unwrap();
    client_side.send(Message::text("recorder")).unwrap();
    client_side.receive().unwrap().into_data().unwrap();
    let s2c = client_side.receive().unwrap().into_receiver().unwrap();
    let _c2s = client_side.receive().unwrap().into_sender().unwrap();
    client_side.send(Message::text(END_SESSION)).unwrap();
    assert!(s2c.receive().is_err());
    assert!(recorder.take().is_empty());

    // the next, well-formed session still succeeds
    let options = SessionOptions::default().with_timeout(Duration::from_secs(5));
    let connection = ClientSession::new(&client_side, &options)
        .request("recorder")
        .unwrap();
    assert!(connection.is_some());
    assert_eq!(recorder.take().len(), 1);

    drop(client_side);
    handle.join().unwrap();
}

#[test]
fn test_sessions_from_one_context_do_not_interleave() {
    let supervisor = Supervisor::new(bounded());
    let recorder = Recorder::new("recorder");
    supervisor.register_service(recorder.clone());
    let requestor = Arc::new(supervisor.attach_client(&Context::task("app")).unwrap());

    let barrier = Arc::new(Barrier::new(4));
    let requests: Vec<_> = (0..4)
        .map(|_| {
            let requestor = Arc::clone(&requestor);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                requestor.request_service("recorder").unwrap().is_some()
            })
        })
        .collect();
    for request in requests {
        assert!(request.join().unwrap());
    }
    assert_eq!(recorder.take().len(), 4);
    assert_eq!(recorder.starts.load(Ordering::SeqCst), 1);

    requestor.close();
    supervisor.join_clients();
    assert_eq!(supervisor.active_clients(), 0);
}

#[test]
fn test_shutdown_stops_services_and_refuses_requests() {
    let supervisor = Supervisor::new(bounded());
    let recorder = Recorder::new("recorder");
    supervisor.register_service(recorder.clone());
    let requestor = supervisor.attach_client(&Context::task("app")).unwrap();
    assert!(requestor.request_service("recorder").unwrap().is_some());

    supervisor.shutdown();
    assert!(requestor.request_service("recorder").unwrap().is_none());

    requestor.close();
    supervisor.join_clients();
}

#[test]
fn test_deliveries_to_one_service_are_serialized() {
    let supervisor = Supervisor::new(bounded());
    let overlap = Arc::new(Overlap::default());
    supervisor.register_service(overlap.clone());

    let clients = 6;
    let barrier = Arc::new(Barrier::new(clients));
    let requests: Vec<_> = (0..clients)
        .map(|i| {
            let requestor = supervisor
                .attach_client(&Context::task(format!("client-{i}")))
                .unwrap();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let connected = requestor.request_service("overlap").unwrap().is_some();
                requestor.close();
                connected
            })
        })
        .collect();
    for request in requests {
        assert!(request.join().unwrap());
    }

    supervisor.join_clients();
    assert_eq!(overlap.accepted.load(Ordering::SeqCst), clients);
    assert_eq!(overlap.max_seen.load(Ordering::SeqCst), 1);
}
