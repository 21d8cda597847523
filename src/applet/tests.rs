use super::*;
use crate::interpreter::{ContextStatus, ExecutionContext, Interpreter, ProgramOutcome, Value};
use crate::registry::{Arguments, CommandRegistry, PipeRegistry};
use crate::{parser, stdlib};
use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::AtomicUsize;

/* ===================== Stub Server ===================== */

#[derive(Default)]
struct StubFactory {
    sinks: Mutex<Vec<ResponseSink>>,
    stops: Arc<AtomicUsize>,
    fail: bool,
    /// Startup latency of every server
    delay: Duration,
}

impl StubFactory {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    fn last_sink(&self) -> ResponseSink {
        self.sinks.lock().unwrap().last().cloned().expect("No server created")
    }

    fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ServerFactory for StubFactory {
    fn supports(&self, kind: &str) -> bool {
        kinds::BUILTIN_KINDS.contains(&kind)
    }

    async fn create_server(&self, config: ServerConfig) -> anyhow::Result<Box<dyn ServerHandle>> {
        tokio::time::sleep(self.delay).await;
        if self.fail {
            anyhow::bail!("address in use");
        }
        self.sinks.lock().unwrap().push(config.sink);
        Ok(Box::new(StubHandle {
            address: SocketAddr::from(([127, 0, 0, 1], config.port)),
            stops: Arc::clone(&self.stops),
        }))
    }
}

/// Counts every stop call, so double teardown would show up
struct StubHandle {
    address: SocketAddr,
    stops: Arc<AtomicUsize>,
}

#[async_trait]
impl ServerHandle for StubHandle {
    fn address(&self) -> SocketAddr {
        self.address
    }

    async fn stop(self: Box<Self>) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

fn launcher(factory: &Arc<StubFactory>, ports: std::ops::RangeInclusive<u16>) -> AppletLauncher {
    AppletLauncher::new(factory.clone(), Arc::new(PortAllocator::new(ports)))
}

/* ===================== Lifecycle ===================== */

#[tokio::test]
async fn test_response_resolves_and_releases() {
    let factory = Arc::new(StubFactory::default());
    let launcher = launcher(&factory, 6000..=6009);

    let session = launcher.launch(kinds::confirm("Deploy?")).await.unwrap();
    let port = session.address().port();
    assert_eq!(session.state(), AppletState::Serving);
    assert!(launcher.ports().is_allocated(port));
    assert_eq!(launcher.active_ids(), vec![session.id().to_string()]);

    let sink = factory.last_sink();
    assert_eq!(sink.input(), &json!({"message": "Deploy?"}));
    sink.respond(json!({"confirmed": true})).unwrap();

    assert_eq!(session.wait().await, Ok(json!({"confirmed": true})));
    assert_eq!(sink.state(), AppletState::Resolved);
    assert!(!launcher.ports().is_allocated(port));
    assert_eq!(factory.stops(), 1);
    assert!(launcher.active_ids().is_empty());
}

#[tokio::test]
async fn test_terminate_twice_tears_down_once() {
    let factory = Arc::new(StubFactory::default());
    let launcher = launcher(&factory, 6010..=6019);

    let session = launcher.launch(kinds::confirm("Deploy?")).await.unwrap();
    let port = session.address().port();
    let id = session.id().to_string();
    let terminator = session.terminator();

    assert!(terminator.terminate().await);
    assert!(!terminator.terminate().await);

    assert_eq!(factory.stops(), 1);
    assert!(!launcher.ports().is_allocated(port));
    assert_eq!(terminator.state(), AppletState::Terminated);
    assert_eq!(session.wait().await, Err(AppletError::Terminated { id }));
    assert_eq!(factory.stops(), 1);
}

#[tokio::test]
async fn test_terminate_after_response_does_not_reject() {
    let factory = Arc::new(StubFactory::default());
    let launcher = launcher(&factory, 6020..=6029);

    let session = launcher.launch(kinds::confirm("Deploy?")).await.unwrap();
    factory.last_sink().respond(json!({"confirmed": false})).unwrap();

    assert!(!session.terminator().terminate().await);
    assert_eq!(session.wait().await, Ok(json!({"confirmed": false})));
    assert_eq!(factory.stops(), 1);
}

#[tokio::test]
async fn test_timeout_settles_and_late_response_is_rejected() {
    let factory = Arc::new(StubFactory::default());
    let launcher = launcher(&factory, 6030..=6039);

    let request = kinds::confirm("Deploy?").with_timeout(Duration::from_millis(50));
    let session = launcher.launch(request).await.unwrap();
    let id = session.id().to_string();
    let deadline = session.deadline();
    let port = session.address().port();
    let sink = factory.last_sink();

    assert_eq!(
        session.wait().await,
        Err(AppletError::Timeout { id, deadline })
    );
    assert_eq!(sink.respond(json!({"confirmed": true})), Err(RespondError::AlreadySettled));
    assert_eq!(sink.state(), AppletState::TimedOut);
    assert!(!launcher.ports().is_allocated(port));
    assert_eq!(factory.stops(), 1);
}

#[tokio::test]
async fn test_timeout_fires_at_reported_deadline_despite_slow_startup() {
    let factory = Arc::new(StubFactory::slow(Duration::from_millis(150)));
    let launcher = launcher(&factory, 6130..=6139);

    let request = kinds::confirm("Deploy?").with_timeout(Duration::from_millis(300));
    let session = launcher.launch(request).await.unwrap();
    let deadline = session.deadline();

    assert!(matches!(session.wait().await, Err(AppletError::Timeout { .. })));
    let late = Utc::now() - deadline;
    assert!(late > chrono::Duration::milliseconds(-5), "fired {} early", -late);
    assert!(
        late < chrono::Duration::milliseconds(100),
        "fired {} after the reported deadline",
        late
    );
}

#[tokio::test]
async fn test_second_response_is_rejected() {
    let factory = Arc::new(StubFactory::default());
    let launcher = launcher(&factory, 6040..=6049);

    let session = launcher.launch(kinds::confirm("Deploy?")).await.unwrap();
    let sink = factory.last_sink();

    sink.respond(json!({"confirmed": true})).unwrap();
    assert_eq!(
        sink.respond(json!({"confirmed": false})),
        Err(RespondError::AlreadySettled)
    );
    assert_eq!(session.wait().await, Ok(json!({"confirmed": true})));
}

#[tokio::test]
async fn test_invalid_response_leaves_instance_pending() {
    let factory = Arc::new(StubFactory::default());
    let launcher = launcher(&factory, 6050..=6059);

    let options = [json!("blue"), json!("green")];
    let session = launcher.launch(kinds::select("Colour?", &options)).await.unwrap();
    let sink = factory.last_sink();

    assert!(matches!(
        sink.respond(json!({"choice": "red"})),
        Err(RespondError::Invalid(_))
    ));
    assert_eq!(sink.state(), AppletState::Serving);

    sink.respond(json!({"choice": "green"})).unwrap();
    assert_eq!(session.wait().await, Ok(json!({"choice": "green"})));
}

/* ===================== Launch Failures ===================== */

#[tokio::test]
async fn test_ports_exhausted_until_released() {
    let factory = Arc::new(StubFactory::default());
    let launcher = launcher(&factory, 6060..=6060);

    let first = launcher.launch(kinds::confirm("One?")).await.unwrap();
    match launcher.launch(kinds::confirm("Two?")).await {
        Err(AppletError::PortsExhausted { start, end }) => assert_eq!((start, end), (6060, 6060)),
        other => panic!("Expected PortsExhausted, got {:?}", other),
    }

    launcher.terminate(first.id()).await.unwrap();
    let second = launcher.launch(kinds::confirm("Two?")).await.unwrap();
    assert_eq!(second.address().port(), 6060);
}

#[tokio::test]
async fn test_input_schema_violation_allocates_nothing() {
    let factory = Arc::new(StubFactory::default());
    let launcher = launcher(&factory, 6070..=6079);

    let result = launcher.launch(kinds::select("Colour?", &[])).await;

    assert!(matches!(result, Err(AppletError::Validation { .. })));
    assert_eq!(launcher.ports().in_use(), 0);
    assert!(factory.sinks.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_kind_and_unknown_id() {
    let factory = Arc::new(StubFactory::default());
    let launcher = launcher(&factory, 6080..=6089);

    let result = launcher.launch(AppletRequest::new("survey", json!({}))).await;
    assert_eq!(
        result.map(|_| ()),
        Err(AppletError::UnknownKind { kind: "survey".to_string() })
    );
    assert_eq!(
        launcher.terminate("missing").await,
        Err(AppletError::NotFound { id: "missing".to_string() })
    );
}

#[tokio::test]
async fn test_server_failure_releases_port() {
    let factory = Arc::new(StubFactory::failing());
    let launcher = launcher(&factory, 6090..=6099);

    let result = launcher.launch(kinds::confirm("Deploy?")).await;

    assert!(matches!(result, Err(AppletError::Server { .. })));
    assert_eq!(launcher.ports().in_use(), 0);
    assert!(launcher.active_ids().is_empty());
}

#[tokio::test]
async fn test_terminate_all() {
    let factory = Arc::new(StubFactory::default());
    let launcher = launcher(&factory, 6100..=6109);

    let a = launcher.launch(kinds::confirm("A?")).await.unwrap();
    let b = launcher.launch(kinds::confirm("B?")).await.unwrap();
    assert_eq!(launcher.active_ids().len(), 2);

    launcher.terminate_all().await;

    assert!(launcher.active_ids().is_empty());
    assert_eq!(launcher.ports().in_use(), 0);
    assert!(matches!(a.wait().await, Err(AppletError::Terminated { .. })));
    assert!(matches!(b.wait().await, Err(AppletError::Terminated { .. })));
    assert_eq!(factory.stops(), 2);
}

/* ===================== HTTP Surface ===================== */

#[tokio::test]
async fn test_axum_server_wire_surface() {
    let launcher = AppletLauncher::new(
        Arc::new(AxumServerFactory::new()),
        Arc::new(PortAllocator::new(47310..=47329)),
    );
    let session = launcher.launch(kinds::confirm("Ship it?")).await.unwrap();
    let url = session.url();
    let client = reqwest::Client::new();

    let liveness: JsonValue = client.get(&url).send().await.unwrap().json().await.unwrap();
    assert_eq!(liveness["status"], "ok");
    assert_eq!(liveness["applet"], "confirm");
    assert_eq!(liveness["id"], session.id());

    let input: JsonValue = client
        .get(format!("{}/input", url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(input["input"]["message"], "Ship it?");

    let respond = format!("{}/respond", url);
    let malformed = client
        .post(&respond)
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(malformed.status().as_u16(), 400);

    let invalid = client
        .post(&respond)
        .json(&json!({"confirmed": "yes"}))
        .send()
        .await
        .unwrap();
    assert_eq!(invalid.status().as_u16(), 422);

    let accepted = client
        .post(&respond)
        .json(&json!({"confirmed": true}))
        .send()
        .await
        .unwrap();
    assert_eq!(accepted.status().as_u16(), 200);
    let body: JsonValue = accepted.json().await.unwrap();
    assert_eq!(body, json!({"ok": true}));

    let again = client
        .post(&respond)
        .json(&json!({"confirmed": false}))
        .send()
        .await
        .unwrap();
    assert_eq!(again.status().as_u16(), 409);

    assert_eq!(session.wait().await, Ok(json!({"confirmed": true})));
    assert_eq!(launcher.ports().in_use(), 0);
}

/// Client that never reuses a connection to a server that has since stopped
fn fresh_connections() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_axum_port_is_reusable_after_terminate() {
    let launcher = AppletLauncher::new(
        Arc::new(AxumServerFactory::new()),
        Arc::new(PortAllocator::new(47341..=47341)),
    );
    let client = fresh_connections();

    let first = launcher.launch(kinds::confirm("One?")).await.unwrap();
    let liveness = client.get(first.url()).send().await.unwrap();
    assert_eq!(liveness.status().as_u16(), 200);
    launcher.terminate(first.id()).await.unwrap();
    assert_eq!(launcher.ports().in_use(), 0);

    let second = launcher.launch(kinds::confirm("Two?")).await.unwrap();
    assert_eq!(second.address().port(), 47341);
    let accepted = client
        .post(format!("{}/respond", second.url()))
        .json(&json!({"confirmed": true}))
        .send()
        .await
        .unwrap();
    assert_eq!(accepted.status().as_u16(), 200);
    assert_eq!(second.wait().await, Ok(json!({"confirmed": true})));
}

/* ===================== Interpreter Integration ===================== */

async fn human_interpreter() -> Interpreter {
    let mut commands = CommandRegistry::new();
    commands.add_bundle(stdlib::command_bundle());
    commands.reload().await.unwrap();
    let mut pipes = PipeRegistry::new();
    pipes.add_bundle(stdlib::pipe_bundle());
    pipes.reload().await.unwrap();
    Interpreter::new(Arc::new(commands), Arc::new(pipes))
}

#[tokio::test]
async fn test_confirm_suspends_program_until_response() {
    let factory = Arc::new(StubFactory::default());
    let launcher = Arc::new(launcher(&factory, 6110..=6119));
    let interpreter = human_interpreter().await;
    let program = parser::parse_program(
        "@human/confirm message=\"Deploy?\" output=approved\n\
         @utils/log message=\"approved\" if=approved",
    )
    .unwrap();

    let ctx = ExecutionContext::new().with_applet_launcher(Arc::clone(&launcher));
    let mut status = ctx.monitor().subscribe();
    let run = tokio::spawn(async move { interpreter.execute_program(&program, ctx).await });

    status
        .wait_for(|s| *s == ContextStatus::WaitingHumanValidation)
        .await
        .unwrap();
    factory.last_sink().respond(json!({"confirmed": true})).unwrap();

    let result = run.await.unwrap();
    assert_eq!(result.outcome, ProgramOutcome::Completed);
    assert_eq!(result.context.data.get("approved"), Some(&Value::Bool(true)));
    assert_eq!(result.context.user_logs, vec!["approved".to_string()]);
    assert_eq!(result.context.status, ContextStatus::Finished);
    assert!(launcher.active_ids().is_empty());
}

#[tokio::test]
async fn test_checkpoint_timeout_is_a_recoverable_failure() {
    let factory = Arc::new(StubFactory::default());
    let launcher = Arc::new(launcher(&factory, 6120..=6129));
    let interpreter = human_interpreter().await;
    let program = parser::parse_program(
        "@human/select options=[\"a\", \"b\"] timeout=0.05 output=choice\n\
         @utils/set input={choice | default:\"a\"} output=choice",
    )
    .unwrap();

    let ctx = ExecutionContext::new().with_applet_launcher(launcher);
    let result = interpreter.execute_program(&program, ctx).await;

    assert_eq!(result.outcome, ProgramOutcome::Completed);
    let history = result.context.history();
    assert!(!history[0].success);
    assert!(history[0].messages[0].contains("timed out"));
    assert_eq!(result.context.data.get("choice"), Some(&Value::from("a")));
}

/// Wait until the program is suspended on an applet other than `previous`
async fn next_checkpoint(
    status: &mut watch::Receiver<ContextStatus>,
    launcher: &AppletLauncher,
    previous: Option<&str>,
) -> String {
    loop {
        if *status.borrow_and_update() == ContextStatus::WaitingHumanValidation {
            if let Some(id) = launcher
                .active_ids()
                .into_iter()
                .find(|id| Some(id.as_str()) != previous)
            {
                return id;
            }
        }
        tokio::time::timeout(Duration::from_secs(5), status.changed())
            .await
            .expect("No checkpoint reached")
            .unwrap();
    }
}

#[tokio::test]
async fn test_back_to_back_checkpoints_share_one_port() {
    let launcher = Arc::new(AppletLauncher::new(
        Arc::new(AxumServerFactory::new()),
        Arc::new(PortAllocator::new(47340..=47340)),
    ));
    let interpreter = human_interpreter().await;
    let program = parser::parse_program(
        "@human/confirm message=\"First?\" output=first\n\
         @human/confirm message=\"Second?\" output=second",
    )
    .unwrap();

    let ctx = ExecutionContext::new().with_applet_launcher(Arc::clone(&launcher));
    let mut status = ctx.monitor().subscribe();
    let run = tokio::spawn(async move { interpreter.execute_program(&program, ctx).await });
    let client = fresh_connections();
    let respond = "http://127.0.0.1:47340/respond";

    let first = next_checkpoint(&mut status, &launcher, None).await;
    let accepted = client
        .post(respond)
        .json(&json!({"confirmed": true}))
        .send()
        .await
        .unwrap();
    assert_eq!(accepted.status().as_u16(), 200);

    next_checkpoint(&mut status, &launcher, Some(&first)).await;
    let accepted = client
        .post(respond)
        .json(&json!({"confirmed": false}))
        .send()
        .await
        .unwrap();
    assert_eq!(accepted.status().as_u16(), 200);

    let result = run.await.unwrap();
    assert_eq!(result.outcome, ProgramOutcome::Completed);
    assert!(result.context.history().iter().all(|log| log.success));
    assert_eq!(result.context.data.get("first"), Some(&Value::Bool(true)));
    assert_eq!(result.context.data.get("second"), Some(&Value::Bool(false)));
    assert_eq!(launcher.ports().in_use(), 0);
}

/* ===================== Checkpoint Status ===================== */

fn confirm_args() -> Arguments {
    let mut args = Arguments::new();
    args.insert("message", Value::from("Deploy?"));
    args
}

#[tokio::test]
async fn test_status_restored_when_checkpoint_is_aborted() {
    let factory = Arc::new(StubFactory::default());
    let launcher = Arc::new(launcher(&factory, 6140..=6149));
    let ctx = ExecutionContext::new().with_applet_launcher(Arc::clone(&launcher));
    let monitor = ctx.monitor().clone();
    let mut status = monitor.subscribe();

    let pending = tokio::spawn(async move { stdlib::human::confirm(&confirm_args(), &ctx).await });
    status
        .wait_for(|s| *s == ContextStatus::WaitingHumanValidation)
        .await
        .unwrap();

    pending.abort();
    assert!(pending.await.unwrap_err().is_cancelled());
    assert_eq!(monitor.get(), ContextStatus::Running);

    tokio::time::timeout(Duration::from_secs(5), async {
        while launcher.ports().in_use() > 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("Abandoned applet kept its port");
    assert!(launcher.active_ids().is_empty());
}

#[tokio::test]
async fn test_status_restored_after_terminated_checkpoint() {
    let factory = Arc::new(StubFactory::default());
    let launcher = Arc::new(launcher(&factory, 6150..=6159));
    let ctx = ExecutionContext::new().with_applet_launcher(Arc::clone(&launcher));
    let monitor = ctx.monitor().clone();
    let mut status = monitor.subscribe();

    let pending = tokio::spawn(async move { stdlib::human::confirm(&confirm_args(), &ctx).await });
    status
        .wait_for(|s| *s == ContextStatus::WaitingHumanValidation)
        .await
        .unwrap();
    launcher.terminate_all().await;

    assert!(!pending.await.unwrap().success);
    assert_eq!(monitor.get(), ContextStatus::Running);
    assert_eq!(launcher.ports().in_use(), 0);
}

#[tokio::test]
async fn test_status_restored_after_checkpoint_timeout() {
    let factory = Arc::new(StubFactory::default());
    let launcher = Arc::new(launcher(&factory, 6160..=6169));
    let ctx = ExecutionContext::new().with_applet_launcher(launcher);
    let mut args = confirm_args();
    args.insert("timeout", Value::Num(0.05));

    assert!(!stdlib::human::confirm(&args, &ctx).await.success);
    assert_eq!(ctx.monitor().get(), ContextStatus::Running);
}
