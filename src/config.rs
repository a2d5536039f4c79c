use std::fmt;
use std::time::Duration;

use txcore::health::NOMINAL_PING_INTERVAL;
use txcore::types::push::PushMetaData;

pub const TELNYX_PROD_HOST: &str = "rtc.telnyx.com";
pub const TELNYX_PORT: u16 = 443;
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.telnyx.com:3478";
pub const DEFAULT_TURN_SERVER: &str = "turn:turn.telnyx.com:3478?transport=tcp";
pub const DEFAULT_PUSH_PROVIDER: &str = "android";

const USER_AGENT: &str = concat!("telnyx-rtc-rust/", env!("CARGO_PKG_VERSION"));

/// Static settings of a [`crate::Client`]: where to connect and how long to
/// wait for things.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    /// STUN/TURN urls handed to the media engine. Candidates produced through
    /// them are the only ones forwarded once a call is up.
    pub ice_servers: Vec<String>,
    pub user_agent: String,
    pub ping_interval: Duration,
    /// Delay between gateway-state polls while registration is pending.
    pub registration_retry_delay: Duration,
    pub registration_retries: u32,
    pub reconnect_delay: Duration,
    /// How long calls may stay in recovery before they are dropped.
    pub reconnect_timeout: Duration,
    pub max_gateway_reconnects: u32,
    pub request_timeout: Duration,
    /// ICE gathering is considered complete after this much silence.
    pub gathering_idle: Duration,
    pub gathering_max: Duration,
    pub renegotiation_grace: Duration,
    pub push_invite_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: TELNYX_PROD_HOST.to_string(),
            port: TELNYX_PORT,
            ice_servers: vec![
                DEFAULT_STUN_SERVER.to_string(),
                DEFAULT_TURN_SERVER.to_string(),
            ],
            user_agent: USER_AGENT.to_string(),
            ping_interval: NOMINAL_PING_INTERVAL,
            registration_retry_delay: Duration::from_secs(3),
            registration_retries: 3,
            reconnect_delay: Duration::from_secs(1),
            reconnect_timeout: Duration::from_secs(60),
            max_gateway_reconnects: 3,
            request_timeout: Duration::from_secs(10),
            gathering_idle: Duration::from_millis(400),
            gathering_max: Duration::from_secs(3),
            renegotiation_grace: Duration::from_millis(500),
            push_invite_timeout: Duration::from_secs(10),
        }
    }
}

impl ClientConfig {
    /// WebSocket url, carrying the push identity when connecting for a push.
    pub fn server_url(&self, push: Option<&PushMetaData>) -> String {
        let mut url = format!("wss://{}:{}/", self.host, self.port);
        if let Some(voice_sdk_id) = push.and_then(|p| p.voice_sdk_id.as_deref()) {
            url.push_str("?voice_sdk_id=");
            url.push_str(&urlencoding::encode(voice_sdk_id));
        }
        url
    }

    /// Copy pointed at the relay named in a push, if it names one.
    pub fn with_relay_hint(&self, push: &PushMetaData) -> Self {
        let mut config = self.clone();
        if let Some(ip) = &push.rtc_ip {
            config.host = ip.clone();
        }
        if let Some(port) = push.rtc_port {
            config.port = port;
        }
        config
    }
}

#[derive(Clone)]
pub enum Credentials {
    Password { user: String, password: String },
    Token(String),
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Password { user, .. } => f
                .debug_struct("Password")
                .field("user", user)
                .field("password", &"<redacted>")
                .finish(),
            Self::Token(_) => f.debug_tuple("Token").field(&"<redacted>").finish(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct PushCredentials {
    pub device_token: String,
    /// `android` or `ios`.
    pub provider: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogLevel {
    None,
    Error,
    Warning,
    #[default]
    Info,
    Debug,
    All,
}

impl LogLevel {
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            Self::None => log::LevelFilter::Off,
            Self::Error => log::LevelFilter::Error,
            Self::Warning => log::LevelFilter::Warn,
            Self::Info => log::LevelFilter::Info,
            Self::Debug => log::LevelFilter::Debug,
            Self::All => log::LevelFilter::Trace,
        }
    }
}

/// Authentication context. Replaced as a whole on every login.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub credentials: Credentials,
    pub caller_id_name: Option<String>,
    pub caller_id_number: Option<String>,
    pub push: Option<PushCredentials>,
    pub log_level: LogLevel,
    pub auto_reconnect: bool,
}

impl SessionConfig {
    pub fn with_password(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self::new(Credentials::Password {
            user: user.into(),
            password: password.into(),
        })
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self::new(Credentials::Token(token.into()))
    }

    fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            caller_id_name: None,
            caller_id_number: None,
            push: None,
            log_level: LogLevel::default(),
            auto_reconnect: true,
        }
    }
}
