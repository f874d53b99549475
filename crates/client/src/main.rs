//! RemoteCtl interactive client.

use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use client::protocol::Response;
use client::{parse_line, tls, ClientDriver, Download, ReplCommand};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader, Lines, Stdin};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// RemoteCtl - run commands and transfer files on a remote host
#[derive(Parser, Debug)]
#[command(name = "remotectl", version, about, long_about = None)]
struct Cli {
    /// Daemon host name or address
    #[arg(default_value = "127.0.0.1")]
    host: String,

    /// Daemon port
    #[arg(short, long, default_value_t = 9999)]
    port: u16,

    /// PEM file with the certificate(s) to trust for the daemon
    #[arg(long)]
    ca: PathBuf,

    /// Name to verify the daemon certificate against (defaults to the host)
    #[arg(long)]
    server_name: Option<String>,

    /// Account name
    #[arg(short, long)]
    login: String,

    /// Password (prompted for when omitted)
    #[arg(long)]
    password: Option<String>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut input = BufReader::new(tokio::io::stdin()).lines();

    let password = match cli.password.clone() {
        Some(password) => password,
        None => {
            prompt("Password: ")?;
            input
                .next_line()
                .await?
                .map(|line| line.trim().to_string())
                .context("No password given")?
        }
    };

    let connector = tls::load_connector(&cli.ca)?;
    let addr = socket_addr(&cli.host, cli.port);
    let server_name = cli.server_name.as_deref().unwrap_or(&cli.host);

    let mut driver = ClientDriver::connect(&addr, server_name, &connector)
        .await
        .with_context(|| format!("Failed to connect to {addr}"))?;

    if !driver.authenticate(&cli.login, &password).await? {
        eprintln!("Authentication failed");
        std::process::exit(1);
    }
    println!("Connected to {addr} as {}", cli.login);

    let result = run_repl(&mut driver, &mut input).await;
    if let Err(e) = driver.disconnect().await {
        tracing::debug!("Disconnect failed: {}", e);
    }
    result
}

/// Read commands until `exit`, end of input, or a lost connection.
async fn run_repl<S>(
    driver: &mut ClientDriver<S>,
    input: &mut Lines<BufReader<Stdin>>,
) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite,
{
    loop {
        prompt("remotectl> ")?;
        let Some(line) = input.next_line().await? else {
            println!();
            return Ok(());
        };

        let command = match parse_line(&line) {
            Ok(command) => command,
            Err(usage) => {
                eprintln!("{usage}");
                continue;
            }
        };

        let outcome = match command {
            ReplCommand::Empty => continue,
            ReplCommand::Exit => return Ok(()),
            ReplCommand::Shell(text) => driver.execute_command(&text).await.map(print_response),
            ReplCommand::Upload(path) => driver.upload_file(&path).await.map(print_response),
            ReplCommand::Download { name, dest_dir } => driver
                .download_file(&name, &dest_dir)
                .await
                .map(|download| match download {
                    Download::Saved { path, bytes } => {
                        println!("Saved {} ({bytes} bytes)", path.display());
                    }
                    Download::Refused(reason) => eprintln!("ERROR: {reason}"),
                }),
        };

        match outcome {
            Ok(()) => {}
            Err(e) if e.is_connection_closed() => {
                return Err(e).context("Connection to daemon lost");
            }
            Err(e) => eprintln!("{e}"),
        }
    }
}

fn print_response(response: Response) {
    match response {
        Response::Result(text) => println!("{text}"),
        Response::Error(text) => eprintln!("ERROR: {text}"),
        Response::Unexpected(text) => eprintln!("Unexpected response: {text}"),
    }
}

fn prompt(text: &str) -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    stdout.write_all(text.as_bytes())?;
    stdout.flush()
}

/// Join host and port, bracketing bare IPv6 addresses.
fn socket_addr(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose { "debug" } else { "warn" })
    });
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
