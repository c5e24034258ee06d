use clap::{Args, Parser, Subcommand};
use framing_length_prefixed::FixlenOptions;
use transport_tcp_client::{Client, ClientConfig};
use transport_tcp_server::{Server, ServerConfig};

#[derive(Parser)]
#[command(name = "echo-demo", about = "length-framed echo server/client built on session-api")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an echo server.
    Serve(ServeArgs),
    /// Connect to an echo server and send one line.
    Send(SendArgs),
}

#[derive(Args)]
struct ServeArgs {
    #[arg(long, default_value = "127.0.0.1:7070", env = "ECHO_ADDR")]
    addr: String,
    #[arg(long, default_value_t = 200_000)]
    max_conn: usize,
}

#[derive(Args)]
struct SendArgs {
    #[arg(long, default_value = "127.0.0.1:7070", env = "ECHO_ADDR")]
    addr: String,
    #[arg(long, default_value = "hello")]
    message: String,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Serve(args) => serve(args),
        Commands::Send(args) => send(args),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn protocol_config() -> String {
    FixlenOptions::default().to_config_json().expect("default fixlen options are valid")
}

fn serve(args: ServeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let cfg = ServerConfig {
        addr: args.addr,
        max_conn: args.max_conn,
        send_chan_size: 1024,
        protocol_name: "fixlen".to_string(),
        protocol_config_json: protocol_config(),
    };
    let server = Server::new(cfg);
    server.run(|session| {
        while let Ok(msg) = session.receive() {
            tracing::info!(session_id = session.id(), bytes = msg.len(), "echoing message");
            if session.send(msg).is_err() {
                break;
            }
        }
    })?;
    Ok(())
}

fn send(args: SendArgs) -> Result<(), Box<dyn std::error::Error>> {
    let cfg = ClientConfig {
        addr: args.addr,
        conn_num: 1,
        protocol_name: "fixlen".to_string(),
        protocol_config_json: protocol_config(),
        ..Default::default()
    };
    let client = Client::new(cfg);
    let message = args.message;
    client.run(move |session| {
        session.send(message.clone().into_bytes()).expect("send");
        match session.receive() {
            Ok(reply) => println!("{}", String::from_utf8_lossy(&reply)),
            Err(e) => eprintln!("receive failed: {e}"),
        }
    })?;
    Ok(())
}
