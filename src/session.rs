//! Login, gateway registration tracking and other session-scoped traffic.

use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::AbortHandle;
use tokio::time::sleep;
use txcore::protocol::{
    AttachCallParams, AttachUserVariables, DisablePushParams, InboundMessage, LoginParams,
    RequestPayload, ServerError, StateParams, UserVariables,
};
use txcore::types::call::CallPhase;
use txcore::types::events::Event;
use txcore::types::gateway::GatewayState;
use txcore::types::push::PushMetaData;

use crate::calls::CallError;
use crate::client::{Client, ClientError};
use crate::config::{Credentials, DEFAULT_PUSH_PROVIDER, SessionConfig};
use crate::connection::lock;
use crate::request::RequestError;

/// Authentication context and registration progress of the current login.
#[derive(Default)]
pub(crate) struct SessionState {
    pub(crate) config: Option<SessionConfig>,
    pub(crate) push: Option<PushMetaData>,
    pub(crate) server_url: Option<String>,
    pub(crate) session_id: Option<String>,
    pub(crate) gateway: Option<GatewayState>,
    pub(crate) ready_emitted: bool,
    /// A registration timeout or failure was already reported.
    pub(crate) registration_settled: bool,
    pub(crate) gateway_reconnects: u32,
    pub(crate) pending_push_attach: bool,
    registration_watchdog: Option<AbortHandle>,
}

impl SessionState {
    fn cancel_watchdog(&mut self) {
        if let Some(watchdog) = self.registration_watchdog.take() {
            watchdog.abort();
        }
    }
}

fn login_params(
    session: &SessionConfig,
    user_agent: &str,
    sessid: Option<String>,
    for_push: bool,
) -> LoginParams {
    let (login, passwd, login_token) = match &session.credentials {
        Credentials::Password { user, password } => (Some(user.clone()), Some(password.clone()), None),
        Credentials::Token(token) => (None, None, Some(token.clone())),
    };
    LoginParams {
        login,
        passwd,
        login_token,
        user_variables: session.push.as_ref().map(|push| UserVariables {
            push_device_token: Some(push.device_token.clone()),
            push_notification_provider: Some(push.provider.clone()),
        }),
        login_params: for_push
            .then(|| BTreeMap::from([("attach_call".to_string(), "true".to_string())])),
        sessid,
        user_agent: Some(user_agent.to_string()),
    }
}

impl Client {
    /// Sends a login for `session`, replacing whatever session was there.
    /// Completion is reported through `LoggedIn` and `ClientReady`.
    pub fn login(self: &Arc<Self>, session: SessionConfig) -> Result<(), ClientError> {
        log::set_max_level(session.log_level.to_level_filter());

        // Calls waiting for re-attach need the server to recognise the old session.
        let reattach = self
            .calls
            .all()
            .iter()
            .any(|call| matches!(call.phase(), CallPhase::Reconnecting(_)));

        let params = {
            let mut state = lock(&self.session);
            state.cancel_watchdog();
            let previous = state.session_id.take();
            state.gateway = None;
            state.ready_emitted = false;
            state.registration_settled = false;
            let params = login_params(
                &session,
                &self.config.user_agent,
                previous.filter(|_| reattach),
                state.push.is_some(),
            );
            state.config = Some(session);
            params
        };

        info!(target: "Client/Session", "Logging in{}", if reattach { " (re-attach)" } else { "" });
        self.send_request(RequestPayload::Login(params))?;
        Ok(())
    }

    pub(crate) fn handle_login_result(self: &Arc<Self>, session_id: String) {
        info!(target: "Client/Session", "Logged in, session {session_id}");
        lock(&self.session).session_id = Some(session_id.clone());
        self.core_events.dispatch(&Event::LoggedIn { session_id });
        self.start_registration_watchdog();
    }

    /// Polls the gateway state while registration is pending and reports a
    /// single timeout if it never completes.
    fn start_registration_watchdog(self: &Arc<Self>) {
        let retries = self.config.registration_retries;
        let delay = self.config.registration_retry_delay;
        let client = self.clone();

        let task = tokio::spawn(async move {
            for attempt in 1..=retries {
                sleep(delay).await;
                if client.is_registered() {
                    return;
                }
                debug!(
                    target: "Client/Session",
                    "Gateway not registered yet, polling ({attempt}/{retries})"
                );
                let poll = RequestPayload::GatewayState(StateParams::default());
                if let Err(e) = client.send_request(poll) {
                    debug!(target: "Client/Session", "Gateway poll not sent: {e}");
                }
            }
            sleep(delay).await;
            if !client.is_registered() {
                client.settle_registration(Event::RegistrationTimeout);
            }
        });

        let mut state = lock(&self.session);
        state.cancel_watchdog();
        state.registration_watchdog = Some(task.abort_handle());
    }

    pub(crate) fn handle_gateway_state(self: &Arc<Self>, gateway: GatewayState) {
        let changed = {
            let mut state = lock(&self.session);
            state.gateway.replace(gateway.clone()).as_ref() != Some(&gateway)
        };
        if changed {
            debug!(target: "Client/Session", "Gateway state {gateway}");
            self.core_events.dispatch(&Event::GatewayStateChanged {
                state: gateway.clone(),
            });
        }

        match gateway {
            GatewayState::Registered => self.on_registered(),
            GatewayState::NoRegistrar | GatewayState::Expired => {
                self.settle_registration(Event::RegistrationTimeout)
            }
            GatewayState::Failed => {
                self.settle_registration(Event::RegistrationFailed { state: gateway })
            }
            GatewayState::FailWait => self.on_gateway_fail_wait(),
            other => debug!(target: "Client/Session", "Registration in progress ({other})"),
        }
    }

    fn on_registered(self: &Arc<Self>) {
        let (ready, attach_provider) = {
            let mut state = lock(&self.session);
            state.cancel_watchdog();
            state.gateway_reconnects = 0;
            let ready = if state.ready_emitted {
                None
            } else {
                state.ready_emitted = true;
                Some(state.session_id.clone().unwrap_or_default())
            };
            let attach = std::mem::take(&mut state.pending_push_attach).then(|| {
                state
                    .config
                    .as_ref()
                    .and_then(|c| c.push.as_ref())
                    .map(|p| p.provider.clone())
                    .unwrap_or_else(|| DEFAULT_PUSH_PROVIDER.to_string())
            });
            (ready, attach)
        };
        self.connection.set_logged_in(true);

        if let Some(session_id) = ready {
            info!(target: "Client/Session", "Client ready");
            self.core_events.dispatch(&Event::ClientReady { session_id });
        }
        if let Some(provider) = attach_provider {
            debug!(target: "Client/Session", "Asking the server to re-deliver the pushed call");
            let attach = RequestPayload::AttachCalls(AttachCallParams {
                user_variables: AttachUserVariables {
                    push_notification_environment: None,
                    push_notification_provider: provider,
                },
            });
            if let Err(e) = self.send_request(attach) {
                warn!(target: "Client/Session", "attachCalls not sent: {e}");
            }
        }
        self.finish_recovery_if_done();
    }

    fn on_gateway_fail_wait(self: &Arc<Self>) {
        let retry = {
            let mut state = lock(&self.session);
            let auto = state.config.as_ref().is_some_and(|c| c.auto_reconnect);
            if auto && state.gateway_reconnects < self.config.max_gateway_reconnects {
                state.gateway_reconnects += 1;
                Some(state.gateway_reconnects)
            } else {
                None
            }
        };
        match retry {
            Some(attempt) => {
                warn!(target: "Client/Session", "Gateway in FAIL_WAIT, reconnecting (attempt {attempt})");
                let client = self.clone();
                tokio::spawn(async move { client.force_reconnect().await });
            }
            None => self.settle_registration(Event::RegistrationFailed {
                state: GatewayState::FailWait,
            }),
        }
    }

    /// Reports a registration timeout/failure, at most once per login.
    fn settle_registration(&self, event: Event) {
        let first = {
            let mut state = lock(&self.session);
            state.cancel_watchdog();
            !std::mem::replace(&mut state.registration_settled, true)
        };
        if first {
            warn!(target: "Client/Session", "Registration did not complete: {event:?}");
            self.core_events.dispatch(&event);
        }
    }

    /// Server-side `clientReady`.
    pub(crate) fn handle_client_ready(&self) {
        let ready = {
            let state = lock(&self.session);
            (state.gateway == Some(GatewayState::Registered))
                .then(|| state.session_id.clone().unwrap_or_default())
        };
        match ready {
            Some(session_id) => self.core_events.dispatch(&Event::ClientReady { session_id }),
            None => {
                let poll = RequestPayload::GatewayState(StateParams::default());
                if let Err(e) = self.send_request(poll) {
                    debug!(target: "Client/Session", "Gateway poll not sent: {e}");
                }
            }
        }
    }

    /// An error envelope nobody was waiting for.
    pub(crate) fn handle_server_error(&self, id: Option<String>, error: ServerError) {
        warn!(
            target: "Client/Session",
            "Server error {} for {}: {}",
            error.code.code(),
            id.as_deref().unwrap_or("unsolicited frame"),
            error.message
        );
        self.core_events.dispatch(&Event::ServerError {
            code: error.code,
            message: error.message,
        });
    }

    /// Stops push delivery for this device. The outcome is also published as
    /// `DisablePushResult`.
    pub async fn disable_push(&self) -> Result<bool, ClientError> {
        let params = {
            let state = lock(&self.session);
            let session = state.config.as_ref().ok_or(ClientError::NoSession)?;
            let push = session.push.as_ref().ok_or(ClientError::NoSession)?;
            let (user, login_token) = match &session.credentials {
                Credentials::Password { user, .. } => (Some(user.clone()), None),
                Credentials::Token(token) => (None, Some(token.clone())),
            };
            DisablePushParams {
                user,
                login_token,
                user_agent: UserVariables {
                    push_device_token: Some(push.device_token.clone()),
                    push_notification_provider: Some(push.provider.clone()),
                },
            }
        };

        let (success, message) = match self.request(RequestPayload::DisablePush(params)).await {
            Ok(InboundMessage::RequestResult { result, .. }) => (
                true,
                result
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or_default()
                    .to_string(),
            ),
            Ok(other) => (true, other.kind().to_string()),
            Err(RequestError::Server(error)) => (false, error.message),
            Err(RequestError::Timeout) => return Err(ClientError::Timeout),
            Err(e) => return Err(e.into()),
        };
        self.core_events
            .dispatch(&Event::DisablePushResult { success, message });
        Ok(success)
    }

    pub fn session_id(&self) -> Option<String> {
        lock(&self.session).session_id.clone()
    }

    pub(crate) fn require_session_id(&self) -> Result<String, CallError> {
        self.session_id().ok_or(CallError::NotLoggedIn)
    }

    /// Caller id name/number of the current session.
    pub(crate) fn caller_id(&self) -> (Option<String>, Option<String>) {
        let state = lock(&self.session);
        match &state.config {
            Some(session) => (session.caller_id_name.clone(), session.caller_id_number.clone()),
            None => (None, None),
        }
    }

    pub(crate) fn is_registered(&self) -> bool {
        lock(&self.session).gateway == Some(GatewayState::Registered)
    }

    pub(crate) fn session_config(&self) -> Option<SessionConfig> {
        lock(&self.session).config.clone()
    }

    pub(crate) fn reset_session(&self) {
        let mut state = lock(&self.session);
        state.cancel_watchdog();
        *state = SessionState::default();
    }

    pub(crate) fn cancel_registration_watchdog(&self) {
        lock(&self.session).cancel_watchdog();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PushCredentials;
    use crate::test_utils::{
        TestHarness, eventually, frames, test_config, test_session, wait_for_requests,
    };
    use std::time::Duration;

    const GATEWAY_STATE: &str = "telnyx_rtc.gatewayState";

    /// Connected and logged in, gateway not registered yet.
    async fn logged_in(h: &TestHarness, session: SessionConfig) {
        h.client.connect(Some(session), None).await.unwrap();
        let server = h.server();
        let logins = wait_for_requests(&server, "login", 1).await;
        server
            .push(frames::login_result(&logins[0].id, "sess-1"))
            .await;
        h.events
            .wait_for(|e| matches!(e, Event::LoggedIn { .. }))
            .await;
    }

    fn slow_polling_config() -> crate::config::ClientConfig {
        let mut config = test_config();
        config.registration_retry_delay = Duration::from_secs(5);
        config.reconnect_timeout = Duration::from_secs(2);
        config
    }

    fn failed_with(state: GatewayState) -> impl Fn(&Event) -> bool {
        move |e| matches!(e, Event::RegistrationFailed { state: s } if *s == state)
    }

    #[test]
    fn test_password_login_params() {
        let mut session = SessionConfig::with_password("alice", "secret");
        session.push = Some(PushCredentials {
            device_token: "fcm-1".into(),
            provider: "android".into(),
        });
        let params = login_params(&session, "ua/1", None, false);
        assert_eq!(params.login.as_deref(), Some("alice"));
        assert_eq!(params.passwd.as_deref(), Some("secret"));
        assert!(params.login_token.is_none());
        assert_eq!(
            params.user_variables.unwrap().push_device_token.as_deref(),
            Some("fcm-1")
        );
        assert!(params.login_params.is_none());
    }

    #[test]
    fn test_push_login_asks_for_call_attach() {
        let session = SessionConfig::with_token("tok");
        let params = login_params(&session, "ua/1", Some("old-session".into()), true);
        assert_eq!(params.login_token.as_deref(), Some("tok"));
        assert_eq!(params.sessid.as_deref(), Some("old-session"));
        assert_eq!(
            params.login_params.unwrap().get("attach_call").map(String::as_str),
            Some("true")
        );
    }

    #[tokio::test]
    async fn test_expired_gateway_is_a_timeout_and_failed_a_failure() {
        let h = TestHarness::with_config(slow_polling_config());
        logged_in(&h, test_session()).await;
        h.server().push(frames::gateway("EXPIRED")).await;
        h.events
            .wait_for(|e| matches!(e, Event::RegistrationTimeout))
            .await;

        let h = TestHarness::with_config(slow_polling_config());
        logged_in(&h, test_session()).await;
        h.server().push(frames::gateway("FAILED")).await;
        h.events.wait_for(failed_with(GatewayState::Failed)).await;
        assert_eq!(
            h.events
                .count(|e| matches!(e, Event::RegistrationTimeout | Event::ClientReady { .. })),
            0
        );
        assert!(!h.client.is_logged_in());
    }

    #[tokio::test]
    async fn test_fail_wait_reconnects_and_registers_again() {
        let h = TestHarness::connected_with(slow_polling_config()).await;
        let transport = h.transport.clone();

        h.server().push(frames::gateway("FAIL_WAIT")).await;
        eventually("redial", || transport.dial_count() == 2).await;
        h.register(2).await;

        assert!(h.client.is_connected());
        assert!(h.client.is_logged_in());
        let client = h.client.clone();
        eventually("recovery finished", || {
            !lock(&client.recovery).is_running()
        })
        .await;
        assert_eq!(lock(&h.client.session).gateway_reconnects, 0);
    }

    #[tokio::test]
    async fn test_fail_wait_gives_up_after_the_reconnect_limit() {
        let h = TestHarness::connected_with(slow_polling_config()).await;
        let transport = h.transport.clone();

        for dial in 2..=4 {
            h.server().push(frames::gateway("FAIL_WAIT")).await;
            eventually("redial", || transport.dial_count() == dial).await;
            wait_for_requests(&h.server(), "login", 1).await;
        }
        h.server().push(frames::gateway("FAIL_WAIT")).await;
        h.events.wait_for(failed_with(GatewayState::FailWait)).await;

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(transport.dial_count(), 4);
    }

    #[tokio::test]
    async fn test_fail_wait_without_auto_reconnect_fails_registration() {
        let h = TestHarness::with_config(slow_polling_config());
        let mut session = test_session();
        session.auto_reconnect = false;
        logged_in(&h, session).await;

        h.server().push(frames::gateway("FAIL_WAIT")).await;
        h.events.wait_for(failed_with(GatewayState::FailWait)).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.transport.dial_count(), 1);
        assert!(h.client.is_connected());
    }

    #[tokio::test]
    async fn test_server_client_ready_reemits_or_polls() {
        let h = TestHarness::connected().await;
        h.server().push(frames::client_ready()).await;
        let events = h.events.clone();
        eventually("second ClientReady", || {
            events.count(|e| matches!(e, Event::ClientReady { .. })) == 2
        })
        .await;
        assert!(h.server().requests_for(GATEWAY_STATE).is_empty());

        let h = TestHarness::with_config(slow_polling_config());
        logged_in(&h, test_session()).await;
        let server = h.server();
        server.push(frames::client_ready()).await;
        wait_for_requests(&server, GATEWAY_STATE, 1).await;
        assert_eq!(
            h.events.count(|e| matches!(e, Event::ClientReady { .. })),
            0
        );
    }
}
