//! Interactive chat client.

use std::path::PathBuf;

use clap::Parser;
use console::style;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::Level;

use chat_protocol::client::{ChatClient, ClientCommand};
use chat_protocol::config::{parse_port, NetworkConfig};
use chat_protocol::core::packet::{Packet, UserListEntry};
use chat_protocol::utils::logging;
use chat_protocol::PacketWriter;

/// Example chat client. Don't use this for a real chat system.
#[derive(Parser)]
#[command(name = "chat-client")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Username to announce
    username: String,

    /// Server host name or address
    server: String,

    /// SOCKS v4 proxy as host:port
    #[arg(short, long, value_name = "HOST:PORT")]
    socks: Option<String>,

    /// Enable simple XOR "encryption"
    #[arg(short = 'x', long)]
    xor: bool,

    /// Enable TLS (connects to port + 1)
    #[arg(short = 'l', long)]
    tls: bool,

    /// Skip server certificate verification
    #[arg(long, requires = "tls")]
    insecure: bool,

    /// Buffer binary frames into a single write
    #[arg(short)]
    buffered: bool,

    /// Use the text protocol instead of binary
    #[arg(short, long, conflicts_with = "udp")]
    text: bool,

    /// Talk to the server over UDP
    #[arg(short, long, conflicts_with_all = ["tls", "socks"])]
    udp: bool,

    /// Base server port. Accepts 0x-prefixed hex.
    #[arg(short, long, value_parser = parse_port)]
    port: Option<u16>,

    /// Enable console colour output
    #[arg(long)]
    color: bool,

    /// TOML configuration file; flags override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn add_message(username: &str, message: &str) {
    println!("{}: {}", style(username).green(), message);
}

fn write_error(message: &str) {
    println!("{}", style(message).red());
}

fn show_user_list(entries: &[UserListEntry]) {
    println!("User List");
    for entry in entries {
        println!("{} - {}", entry.username, entry.hostname);
    }
}

fn print_help() {
    let rows = [
        ("/quit [message]   ", "Quit client with optional message"),
        ("/msg user message ", "Send a message to a specific user"),
        ("/list             ", "List other users on the system"),
        ("/help             ", "This help"),
    ];
    println!("{}", style("Command Help").white().bold());
    for (command, text) in rows {
        println!("{}: {}", style(command).white().bold(), text);
    }
}

/// Show one packet from the server. Returns `true` once the session is over.
fn show_packet(packet: &Packet) -> bool {
    match packet {
        Packet::Message { username, message } => add_message(username, message),
        Packet::Goodbye { message } => {
            add_message("Server", message);
            return true;
        }
        Packet::Hello {
            username, hostname, ..
        } => add_message(username, &format!("Hey I just joined from {hostname}!!11!")),
        Packet::UserList { entries } => show_user_list(entries),
        other => println!("Unsupported packet type, {}", other.command().name()),
    }
    false
}

async fn process_line(writer: &mut PacketWriter, username: &str, line: &str) {
    let command = ClientCommand::parse(line);
    match &command {
        ClientCommand::Help => print_help(),
        ClientCommand::Invalid(reason) => write_error(reason),
        _ => {
            if let Some(packet) = command.to_packet(username) {
                if !writer.write_packet(&packet).await {
                    write_error("Failed to send");
                }
            }
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = match &cli.config {
        Some(path) => NetworkConfig::from_file(path)?,
        None => NetworkConfig::from_env()?,
    };
    config.client.username = cli.username.clone();
    config.client.host = cli.server.clone();
    if let Some(port) = cli.port {
        config.client.port = port;
    }
    if cli.socks.is_some() {
        config.client.socks_proxy = cli.socks.clone();
    }
    config.client.xor |= cli.xor;
    config.client.tls |= cli.tls;
    config.client.verify_tls &= !cli.insecure;
    config.client.buffered |= cli.buffered;
    config.client.text |= cli.text;
    config.client.udp |= cli.udp;

    config.logging.log_level = if cli.verbose { Level::DEBUG } else { Level::WARN };
    logging::init(&config.logging)?;

    println!(
        "Connecting to {}:{}",
        config.client.host,
        config.client.connect_port()?
    );
    let mut client = ChatClient::connect(&config.client).await?;
    let key = client.handshake(&config.client).await?;
    if key != 0 {
        println!("ReKeying connection to key 0x{key:02X}");
    }

    let username = client.username().to_string();
    let (mut reader, mut writer) = client.into_split();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => process_line(&mut writer, &username, line.trim_end()).await,
                None => break,
            },
            packet = reader.read_packet() => match packet {
                Ok(Packet::Ping) => {
                    writer.write_packet(&Packet::Ping).await;
                }
                Ok(packet) => {
                    if show_packet(&packet) {
                        break;
                    }
                }
                Err(_) => {
                    show_packet(&Packet::goodbye("Connection Closed :("));
                    break;
                }
            },
        }
    }

    writer.dispose().await;
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    console::set_colors_enabled(cli.color);

    println!("ChatClient");
    println!("WARNING: Don't use this for a real chat system!!!");

    if let Err(e) = run(cli).await {
        write_error(&format!("Error: {e}"));
    }
}
