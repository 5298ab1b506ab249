use clap::Parser;
use rtsp::{ClientConfig, ClientEvent, Credentials, EventKind, MediaProtocol, RtspClient};
use std::thread;
use std::time::Duration;

#[derive(Parser)]
#[command(
    name = "rtsp-play",
    about = "Play an RTSP presentation and report session events"
)]
struct Args {
    /// Presentation URL (rtsp://, rtspu:// or http://)
    url: String,

    /// Media carrier to try first: tcp, udp or ip
    #[arg(long, short, default_value = "udp")]
    transport: MediaProtocol,

    #[arg(long, short)]
    user: Option<String>,

    #[arg(long, short, default_value = "")]
    password: String,

    /// Seconds to play before tearing down
    #[arg(long, short, default_value_t = 10)]
    duration: u64,
}

fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let config = ClientConfig {
        media_protocol: args.transport,
        credentials: args.user.as_deref().map(|u| Credentials::new(u, &args.password)),
        ..Default::default()
    };
    let client = match RtspClient::with_config(&args.url, config) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("Invalid location: {}", e);
            return;
        }
    };

    for kind in [
        EventKind::Connected,
        EventKind::Playing,
        EventKind::Paused,
        EventKind::Stopped,
        EventKind::Disconnected,
    ] {
        client.subscribe(kind, |source, event| {
            let media = match event {
                ClientEvent::Playing(Some(m)) | ClientEvent::Stopped(Some(m)) | ClientEvent::Paused(Some(m)) => {
                    format!(" ({})", m.media_type)
                }
                _ => String::new(),
            };
            println!("{:?}{} {}", event.kind(), media, source.location);
        });
    }

    if let Err(e) = client.start_playing(None, None, None) {
        eprintln!("Failed to play {}: {}", args.url, e);
        client.dispose();
        return;
    }

    println!(
        "Playing over {} for {}s (session {})",
        client.media_protocol(),
        args.duration,
        client.session_id().unwrap_or_default()
    );
    thread::sleep(Duration::from_secs(args.duration));

    for context in client.transport_contexts() {
        println!(
            "{}: {} RTP packets, {} bytes",
            context.media.media_type,
            context.stats.rtp_packets(),
            context.stats.total_bytes()
        );
    }
    client.stop_playing();
}
