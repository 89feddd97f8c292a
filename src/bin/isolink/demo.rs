use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context as _, anyhow, bail};
use isolink::{
    ConnectionListener, Context, Error, Message, PipeClient, PipeConnection, PipeService, Service,
    ServiceConnection, ServiceRequestor, Supervisor, SupervisorConfig,
};
use serde::Serialize;

use crate::cli::DemoArgs;
use crate::error::CliResult;

const ECHO_SERVICE: &str = "isolink.echo";
const PIPE_NAME: &str = "isolink.demo";

/// Replies to every message with the same message
struct EchoService;

struct EchoListener;

impl ConnectionListener for EchoListener {
    fn on_message(&self, connection: &ServiceConnection, msg: Message) {
        if let Err(e) = connection.send(msg) {
            tracing::debug!(connection = %connection.id(), error = %e, "echo reply failed");
        }
    }

    fn on_connection_closed(&self, connection: &ServiceConnection) {
        tracing::debug!(connection = %connection.id(), "echo client gone");
    }
}

impl Service for EchoService {
    fn id(&self) -> &str {
        ECHO_SERVICE
    }

    fn start(&self) -> isolink::Result<()> {
        tracing::info!(service = ECHO_SERVICE, "echo service started");
        Ok(())
    }

    fn accept_connection(&self, connection: ServiceConnection) {
        if let Err(e) = connection.set_listener(EchoListener) {
            tracing::warn!(error = %e, "failed to start echo listener");
        }
    }
}

#[derive(Debug, Serialize)]
struct DemoReport {
    clients: usize,
    messages_echoed: usize,
    missing_service_refused: usize,
    pipe_server_version: String,
    pipe_reply: String,
    elapsed_ms: u128,
}

pub fn execute(args: DemoArgs, config: SupervisorConfig) -> CliResult<()> {
    let started = Instant::now();
    let supervisor = Supervisor::new(config);
    supervisor.register_service(Arc::new(EchoService));
    supervisor.register_service(Arc::new(PipeService::new(supervisor.context())));

    let mut workers = Vec::with_capacity(args.clients);
    for i in 0..args.clients {
        let requestor = supervisor.attach_client(&Context::task(format!("client-{i}")))?;
        let messages = args.messages;
        workers.push(thread::spawn(move || echo_client(&requestor, messages)));
    }

    let mut messages_echoed = 0;
    let mut missing_service_refused = 0;
    for worker in workers {
        let (echoed, refused) = worker
            .join()
            .map_err(|_| anyhow!("client thread panicked"))??;
        messages_echoed += echoed;
        if refused {
            missing_service_refused += 1;
        }
    }

    let (pipe_server_version, pipe_reply) = pipe_round_trip(&supervisor)?;

    supervisor.join_clients();
    supervisor.shutdown();

    let report = DemoReport {
        clients: args.clients,
        messages_echoed,
        missing_service_refused,
        pipe_server_version,
        pipe_reply,
        elapsed_ms: started.elapsed().as_millis(),
    };
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("clients:          {}", report.clients);
        println!("messages echoed:  {}", report.messages_echoed);
        println!("refused lookups:  {}", report.missing_service_refused);
        println!("pipe server:      {} v{}", PIPE_NAME, report.pipe_server_version);
        println!("pipe reply:       {}", report.pipe_reply);
        println!("elapsed:          {} ms", report.elapsed_ms);
    }
    Ok(())
}

/// Returns the number of echoed messages and whether an unknown service
/// was refused
fn echo_client(requestor: &ServiceRequestor, messages: usize) -> CliResult<(usize, bool)> {
    let name = requestor.context().name().to_string();
    let echo = requestor
        .request_service(ECHO_SERVICE)?
        .ok_or_else(|| anyhow!("{ECHO_SERVICE} is not registered"))?;

    for seq in 0..messages {
        let text = format!("{name} #{seq}");
        echo.send(Message::text(text.clone()))?;
        let reply = echo.receive()?.into_text()?;
        if reply != text {
            bail!("echo mismatch: sent {text:?}, got {reply:?}");
        }
    }
    echo.close();

    let refused = requestor.request_service("isolink.missing")?.is_none();
    requestor.close();
    Ok((messages, refused))
}

fn pipe_round_trip(supervisor: &Supervisor) -> CliResult<(String, String)> {
    let server_side = supervisor.attach_client(&Context::task("pipe-server"))?;
    let client_side = supervisor.attach_client(&Context::task("pipe-client"))?;
    let (bound_tx, bound_rx) = mpsc::channel();

    let server = thread::spawn(move || -> CliResult<()> {
        let pipes = PipeClient::connect(&server_side)?;
        let server = pipes.bind_server(PIPE_NAME, "1.2")?;
        let _ = bound_tx.send(());
        let pipe = server.accept()?;
        let request = pipe.receive()?;
        pipe.send(String::from_utf8_lossy(&request).to_uppercase().into_bytes())?;
        // wait for the client to hang up before tearing down
        while pipe.receive().is_ok() {}
        server.close()?;
        server_side.close();
        Ok(())
    });

    bound_rx
        .recv()
        .map_err(|_| anyhow!("pipe server exited before binding"))?;
    let pipes = PipeClient::connect(&client_side)?;
    let pipe = connect_when_accepting(&pipes, PIPE_NAME, "1.0")?;
    pipe.send("hello over a pipe")?;
    let reply = String::from_utf8_lossy(&pipe.receive()?).into_owned();
    let version = pipe.server_version().to_string();
    pipe.close();
    client_side.close();

    server
        .join()
        .map_err(|_| anyhow!("pipe server thread panicked"))?
        .context("pipe server failed")?;
    Ok((version, reply))
}

/// A bound server may not have posted its accept yet
fn connect_when_accepting(
    pipes: &PipeClient,
    name: &str,
    version: &str,
) -> CliResult<PipeConnection> {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        match pipes.connect_to(name, version) {
            Err(Error::Pipe(reason)) if Instant::now() < deadline => {
                tracing::debug!(reason = %reason, "pipe server not ready, retrying");
                thread::sleep(Duration::from_millis(20));
            }
            result => return result.with_context(|| format!("failed to connect to pipe {name}")),
        }
    }
}
