use chrono::Local;
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use telnyx_rtc::media::SignalingOnlyEngineFactory;
use telnyx_rtc::transport::TokioWebSocketTransportFactory;
use telnyx_rtc::{Client, ClientConfig, Event, EventHandler, InviteOptions, SessionConfig};
use tokio::sync::mpsc;

// Signaling demo against a live server. Media is not wired in, so calls come
// up without audio.
//
// Usage:
//   cargo run -- --user alice --password secret dial 15551234567
//   cargo run -- --token <jwt> listen

#[derive(Parser)]
#[command(name = "telnyx-rtc", about = "Call-control signaling demo")]
struct Args {
    #[arg(long, default_value = telnyx_rtc::config::TELNYX_PROD_HOST)]
    host: String,
    #[arg(long, default_value_t = telnyx_rtc::config::TELNYX_PORT)]
    port: u16,
    #[arg(short, long, requires = "password")]
    user: Option<String>,
    #[arg(short, long)]
    password: Option<String>,
    #[arg(short, long, conflicts_with = "user")]
    token: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Place a call and hang up after a while.
    Dial {
        destination: String,
        #[arg(long)]
        caller_name: Option<String>,
        #[arg(long)]
        caller_number: Option<String>,
        /// Seconds to stay on the call once it is up.
        #[arg(long, default_value_t = 10)]
        hangup_after: u64,
    },
    /// Wait for incoming calls and answer them.
    Listen,
}

/// Forwards events to the main task.
struct Forwarder(mpsc::UnboundedSender<Event>);

impl EventHandler for Forwarder {
    fn handle_event(&self, event: &Event) {
        let _ = self.0.send(event.clone());
    }
}

fn main() {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{:<5}] [{}] - {}",
                Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let session = match (&args.user, &args.password, &args.token) {
        (Some(user), Some(password), _) => SessionConfig::with_password(user, password),
        (None, _, Some(token)) => SessionConfig::with_token(token),
        _ => {
            error!("Either --user/--password or --token is required");
            return;
        }
    };

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to build tokio runtime: {e}");
            return;
        }
    };

    rt.block_on(async move {
        let config = ClientConfig {
            host: args.host,
            port: args.port,
            ..ClientConfig::default()
        };
        let client = Client::new(
            config,
            Arc::new(TokioWebSocketTransportFactory::new()),
            Arc::new(SignalingOnlyEngineFactory::new()),
        );
        let (tx, mut events) = mpsc::unbounded_channel();
        client.add_event_handler(Arc::new(Forwarder(tx)));

        if let Err(e) = client.connect(Some(session), None).await {
            error!("Could not connect: {e}");
            return;
        }

        loop {
            let event = tokio::select! {
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted, shutting down");
                    break;
                }
            };

            match (&event, &args.command) {
                (
                    Event::ClientReady { .. },
                    Command::Dial {
                        destination,
                        caller_name,
                        caller_number,
                        ..
                    },
                ) => {
                    let options = InviteOptions {
                        caller_name: caller_name.clone(),
                        caller_number: caller_number.clone(),
                        ..InviteOptions::new(destination.clone())
                    };
                    match client.new_invite(options).await {
                        Ok(call) => info!("Dialing {destination} as {}", call.id()),
                        Err(e) => {
                            error!("Could not dial: {e}");
                            break;
                        }
                    }
                }
                (Event::ClientReady { .. }, Command::Listen) => info!("Waiting for calls"),
                (Event::CallAnswered { call_id }, Command::Dial { hangup_after, .. }) => {
                    info!("Call {call_id} answered, hanging up in {hangup_after}s");
                    let client = client.clone();
                    let call_id = *call_id;
                    let wait = Duration::from_secs(*hangup_after);
                    tokio::spawn(async move {
                        tokio::time::sleep(wait).await;
                        if let Err(e) = client.end_call(call_id) {
                            warn!("Hangup failed: {e}");
                        }
                    });
                }
                (Event::IncomingCall(incoming), Command::Listen) => {
                    let from = incoming.caller_number.clone().unwrap_or_default();
                    info!("Answering call {} from {from}", incoming.call_id);
                    if let Err(e) = client.accept_call(incoming.call_id, &from, Vec::new()) {
                        warn!("Could not answer: {e}");
                    }
                }
                (Event::CallEnded { call_id, reason }, Command::Dial { .. }) => {
                    info!("Call {call_id} ended: {reason:?}");
                    break;
                }
                (
                    Event::RegistrationFailed { .. }
                    | Event::RegistrationTimeout
                    | Event::ReconnectionTimeout,
                    _,
                ) => {
                    error!("Giving up: {event:?}");
                    break;
                }
                _ => info!("{event:?}"),
            }
        }

        client.disconnect().await;
    });
}
