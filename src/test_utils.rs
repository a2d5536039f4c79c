use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep};
use txcore::ice::PendingIceCandidate;
use txcore::protocol::RequestEnvelope;
use txcore::types::call::CallId;
use txcore::types::events::{Event, EventHandler};

use crate::Client;
use crate::config::{ClientConfig, SessionConfig};
use crate::media::{
    MediaEngine, MediaEngineFactory, MediaError, MediaEvent, SessionDescription,
};
use crate::transport::mock::{MockServer, MockTransportFactory};

const WAIT_LIMIT: Duration = Duration::from_secs(2);
const POLL: Duration = Duration::from_millis(5);

/// Remote descriptions containing this marker are rejected by
/// [`MockMediaEngine`].
pub const MALFORMED_SDP: &str = "malformed";

/// Media engine that records what the negotiator does with it.
pub struct MockMediaEngine {
    pub call_id: CallId,
    events: mpsc::Sender<MediaEvent>,
    local: Mutex<Option<SessionDescription>>,
    remote: Mutex<Vec<SessionDescription>>,
    candidates: Mutex<Vec<PendingIceCandidate>>,
    offers: Mutex<Vec<bool>>,
    fail_restart_offer: AtomicBool,
    closed: AtomicBool,
}

impl MockMediaEngine {
    pub fn new(call_id: CallId) -> (Arc<Self>, mpsc::Receiver<MediaEvent>) {
        let (tx, rx) = mpsc::channel(64);
        let engine = Arc::new(Self {
            call_id,
            events: tx,
            local: Mutex::new(None),
            remote: Mutex::new(Vec::new()),
            candidates: Mutex::new(Vec::new()),
            offers: Mutex::new(Vec::new()),
            fail_restart_offer: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });
        (engine, rx)
    }

    pub fn added_candidates(&self) -> Vec<PendingIceCandidate> {
        self.candidates.lock().unwrap().clone()
    }

    pub fn remote_descriptions(&self) -> Vec<SessionDescription> {
        self.remote.lock().unwrap().clone()
    }

    /// The `ice_restart` flag of every offer created so far.
    pub fn offers(&self) -> Vec<bool> {
        self.offers.lock().unwrap().clone()
    }

    pub fn set_fail_restart_offer(&self, fail: bool) {
        self.fail_restart_offer.store(fail, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Delivers an engine callback to the call.
    pub async fn emit(&self, event: MediaEvent) {
        self.events.send(event).await.unwrap();
    }
}

#[async_trait]
impl MediaEngine for MockMediaEngine {
    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription, MediaError> {
        self.offers.lock().unwrap().push(ice_restart);
        if ice_restart && self.fail_restart_offer.load(Ordering::SeqCst) {
            return Err(MediaError::CreateOffer("restart refused".into()));
        }
        let n = self.offers.lock().unwrap().len();
        Ok(SessionDescription::offer(format!("v=0 offer {n}")))
    }

    async fn create_answer(&self) -> Result<SessionDescription, MediaError> {
        Ok(SessionDescription::answer("v=0 local answer"))
    }

    async fn set_local_description(&self, description: &SessionDescription) -> Result<(), MediaError> {
        *self.local.lock().unwrap() = Some(description.clone());
        Ok(())
    }

    async fn set_remote_description(
        &self,
        description: &SessionDescription,
    ) -> Result<(), MediaError> {
        if description.sdp.contains(MALFORMED_SDP) {
            return Err(MediaError::SetRemote("unparseable sdp".into()));
        }
        self.remote.lock().unwrap().push(description.clone());
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: &PendingIceCandidate) -> Result<(), MediaError> {
        self.candidates.lock().unwrap().push(candidate.clone());
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.local.lock().unwrap().clone()
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Hands out [`MockMediaEngine`]s and remembers them per call.
#[derive(Default)]
pub struct MockMediaFactory {
    engines: Mutex<Vec<Arc<MockMediaEngine>>>,
    fail_restart_offers: AtomicBool,
    create_delay: Mutex<Duration>,
}

impl MockMediaFactory {
    /// Newest engine created for `call_id`.
    pub fn engine(&self, call_id: CallId) -> Option<Arc<MockMediaEngine>> {
        self.engines
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|e| e.call_id == call_id)
            .cloned()
    }

    pub fn engine_count(&self, call_id: CallId) -> usize {
        self.engines
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.call_id == call_id)
            .count()
    }

    pub fn set_fail_restart_offers(&self, fail: bool) {
        self.fail_restart_offers.store(fail, Ordering::SeqCst);
    }

    /// Makes every later `create_engine` take `delay`.
    pub fn set_create_delay(&self, delay: Duration) {
        *self.create_delay.lock().unwrap() = delay;
    }
}

#[async_trait]
impl MediaEngineFactory for MockMediaFactory {
    async fn create_engine(
        &self,
        call_id: CallId,
        _ice_servers: &[String],
    ) -> Result<(Arc<dyn MediaEngine>, mpsc::Receiver<MediaEvent>), MediaError> {
        let delay = *self.create_delay.lock().unwrap();
        if !delay.is_zero() {
            sleep(delay).await;
        }
        let (engine, events) = MockMediaEngine::new(call_id);
        engine.set_fail_restart_offer(self.fail_restart_offers.load(Ordering::SeqCst));
        self.engines.lock().unwrap().push(engine.clone());
        Ok((engine, events))
    }
}

/// Records every event the client publishes.
#[derive(Default)]
pub struct EventLog {
    events: Mutex<Vec<Event>>,
}

impl EventHandler for EventLog {
    fn handle_event(&self, event: &Event) {
        self.events.lock().unwrap().push(event.clone());
    }
}

impl EventLog {
    pub fn all(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| pred(e)).count()
    }

    /// First recorded event matching `pred`, waiting for it if necessary.
    pub async fn wait_for(&self, pred: impl Fn(&Event) -> bool) -> Event {
        let deadline = Instant::now() + WAIT_LIMIT;
        loop {
            if let Some(event) = self.events.lock().unwrap().iter().find(|e| pred(e)) {
                return event.clone();
            }
            if Instant::now() > deadline {
                panic!("event never arrived; saw {:?}", self.all());
            }
            sleep(POLL).await;
        }
    }
}

/// Polls `cond` until it holds.
pub async fn eventually(what: &str, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + WAIT_LIMIT;
    while !cond() {
        if Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        sleep(POLL).await;
    }
}

/// Waits until `server` has seen at least `count` requests of `method` and
/// returns them.
pub async fn wait_for_requests(
    server: &MockServer,
    method: &str,
    count: usize,
) -> Vec<RequestEnvelope> {
    eventually(method, || server.requests_for(method).len() >= count).await;
    server.requests_for(method)
}

/// Short timers so scenarios finish quickly.
pub fn test_config() -> ClientConfig {
    ClientConfig {
        host: "rtc.test".into(),
        gathering_idle: Duration::from_millis(10),
        gathering_max: Duration::from_millis(50),
        renegotiation_grace: Duration::from_millis(50),
        reconnect_delay: Duration::from_millis(20),
        reconnect_timeout: Duration::from_millis(300),
        request_timeout: Duration::from_millis(500),
        registration_retry_delay: Duration::from_millis(100),
        push_invite_timeout: Duration::from_millis(500),
        ..ClientConfig::default()
    }
}

pub fn test_session() -> SessionConfig {
    let mut session = SessionConfig::with_password("alice", "secret");
    session.caller_id_number = Some("1000".into());
    session
}

/// A client wired to in-memory transport and media.
pub struct TestHarness {
    pub client: Arc<Client>,
    pub transport: Arc<MockTransportFactory>,
    pub media: Arc<MockMediaFactory>,
    pub events: Arc<EventLog>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: ClientConfig) -> Self {
        let transport = Arc::new(MockTransportFactory::new());
        let media = Arc::new(MockMediaFactory::default());
        let events = Arc::new(EventLog::default());
        let client = Client::new(config, transport.clone(), media.clone());
        client.add_event_handler(events.clone());
        Self {
            client,
            transport,
            media,
            events,
        }
    }

    /// Connected, logged in and registered.
    pub async fn connected() -> Self {
        Self::connected_with(test_config()).await
    }

    pub async fn connected_with(config: ClientConfig) -> Self {
        let harness = Self::with_config(config);
        harness
            .client
            .connect(Some(test_session()), None)
            .await
            .unwrap();
        harness.register(1).await;
        harness
    }

    /// Answers the `nth` login on the current socket and reports the gateway
    /// registered.
    pub async fn register(&self, nth: usize) {
        let server = self.server();
        let logins = wait_for_requests(&server, "login", 1).await;
        let login = logins.last().unwrap();
        server
            .push(frames::login_result(&login.id, "sess-1"))
            .await;
        server.push(frames::gateway("REGED")).await;
        let events = self.events.clone();
        eventually("client ready", || {
            events.count(|e| matches!(e, Event::ClientReady { .. })) >= nth
        })
        .await;
    }

    pub fn server(&self) -> Arc<MockServer> {
        self.transport.latest().expect("no socket was opened")
    }
}

/// Server frames in wire shape.
pub mod frames {
    use serde_json::{Value, json};
    use txcore::types::call::CallId;

    pub fn login_result(id: &str, session_id: &str) -> Value {
        json!({"jsonrpc": "2.0", "id": id, "result": {"message": "logged in", "sessid": session_id}})
    }

    pub fn gateway(state: &str) -> Value {
        json!({"jsonrpc": "2.0", "id": 900, "method": "telnyx_rtc.gatewayState", "params": {"state": state}})
    }

    pub fn invite(call_id: CallId, sdp: &str) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": 901,
            "method": "telnyx_rtc.invite",
            "params": {
                "callID": call_id,
                "sdp": sdp,
                "caller_id_name": "Bob",
                "caller_id_number": "2000",
                "telnyx_session_id": "ts-1",
                "telnyx_leg_id": "tl-1"
            }
        })
    }

    pub fn attach(call_id: CallId, sdp: &str) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": 902,
            "method": "telnyx_rtc.attach",
            "params": {"callID": call_id, "sdp": sdp}
        })
    }

    pub fn ringing(call_id: CallId) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": 903,
            "method": "telnyx_rtc.ringing",
            "params": {"callID": call_id, "caller_id_name": "Bob", "caller_id_number": "2000"}
        })
    }

    pub fn answer(call_id: CallId, sdp: Option<&str>) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": 904,
            "method": "telnyx_rtc.answer",
            "params": {"callID": call_id, "sdp": sdp}
        })
    }

    pub fn media(call_id: CallId, sdp: Option<&str>) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": 905,
            "method": "telnyx_rtc.media",
            "params": {"callID": call_id, "sdp": sdp}
        })
    }

    pub fn bye(call_id: CallId, cause: &str, code: i32) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": 906,
            "method": "telnyx_rtc.bye",
            "params": {"callID": call_id, "cause": cause, "causeCode": code}
        })
    }

    pub fn update_media_answer(id: &str, call_id: CallId, sdp: &str) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {"action": "updateMedia", "callID": call_id, "sdp": sdp}
        })
    }

    pub fn modify_ack(id: &str, call_id: CallId, action: &str) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {"action": action, "callID": call_id}
        })
    }

    pub fn result(id: &str) -> Value {
        json!({"jsonrpc": "2.0", "id": id, "result": {"message": "OK"}})
    }

    pub fn error(id: &str, code: i64, message: &str) -> Value {
        json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}})
    }

    pub fn client_ready() -> Value {
        json!({"jsonrpc": "2.0", "id": 902, "method": "telnyx_rtc.clientReady", "params": {}})
    }

    pub fn ping(id: u64) -> Value {
        json!({"jsonrpc": "2.0", "id": id, "method": "telnyx_rtc.ping", "params": {"serno": id}})
    }
}
