use clap::Parser;
use rtsp::{AccessData, AccessKind, AccessRequest, Server, ServerConfig, ServerEvent};
use std::io;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "rtsp-relay",
    about = "RTSP relay server: publishers ANNOUNCE, viewers DESCRIBE the same stream"
)]
struct Args {
    /// Listen host, also advertised in generated SDP
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Listen port
    #[arg(long, short, default_value_t = 5544)]
    port: u16,

    /// First UDP port handed to publishers
    #[arg(long, default_value_t = 56000)]
    port_start: u16,

    /// Last UDP port handed to publishers
    #[arg(long, default_value_t = 57000)]
    port_end: u16,

    /// Server header and SDP tool name
    #[arg(long, default_value = "RTSP SERVER")]
    server_name: String,

    /// Access kinds (auth, media) to deny instead of logging and allowing
    #[arg(long = "deny", value_name = "KIND")]
    deny: Vec<String>,
}

fn log_access(request: &AccessRequest) -> Result<AccessData, String> {
    let connection = request.connection();
    match request {
        AccessRequest::Auth { .. } => tracing::info!(
            connection_id = %connection.id,
            peer_addr = %connection.peer_addr,
            url = %connection.target.url,
            user_agent = %connection.target.user_agent,
            "auth"
        ),
        AccessRequest::Media { media, .. } => tracing::info!(
            connection_id = %connection.id,
            media_id = %media.id,
            name = %media.name,
            role = %media.role,
            "media"
        ),
    }
    Ok(AccessData::new())
}

fn log_event(event: &ServerEvent) {
    match event {
        ServerEvent::PortLocked(port) | ServerEvent::PortUnlocked(port) => {
            tracing::debug!(port, ?event, "port")
        }
        _ => tracing::info!(?event, "event"),
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let config = ServerConfig {
        host: args.host,
        port: args.port,
        server_name: args.server_name,
        port_range: args.port_start..=args.port_end,
        access: args.deny.clone(),
        ..ServerConfig::default()
    };

    let mut server = match Server::new(config) {
        Ok(server) => server,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            return;
        }
    };

    let _events = server.subscribe(log_event);
    for kind in [AccessKind::Auth, AccessKind::Media] {
        if args.deny.iter().any(|denied| denied == kind.as_str()) {
            continue;
        }
        if let Err(e) = server.access(kind, log_access) {
            eprintln!("Failed to register {} handler: {}", kind, e);
            return;
        }
    }

    let addr = match server.start() {
        Ok(addr) => addr,
        Err(e) => {
            eprintln!("Failed to start server: {}", e);
            return;
        }
    };

    println!("RTSP relay on {}, press Enter to stop", addr);
    let mut input = String::new();
    if let Err(e) = io::stdin().read_line(&mut input) {
        eprintln!("Failed to read stdin: {}", e);
    }

    server.stop();
}
