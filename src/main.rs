//! FGP Recorder Gateway - browser task recording and replay via CDP.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fgp_daemon::{cleanup_socket, FgpServer};
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};

use fgp_task_recorder::config::RecorderConfig;
use fgp_task_recorder::service::RecorderService;

const DEFAULT_SOCKET: &str = "~/.fgp/services/recorder/daemon.sock";
const DEFAULT_LOG_FILTER: &str = "fgp_task_recorder=debug,fgp_daemon=debug,chromiumoxide=warn";

#[derive(Parser)]
#[command(name = "recorder-gateway")]
#[command(about = "FGP daemon for recording and replaying browser tasks via Chrome DevTools Protocol")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output JSON (for agent consumption)
    #[arg(long, global = true)]
    json: bool,

    /// Socket path
    #[arg(short, long, global = true, default_value = DEFAULT_SOCKET)]
    socket: String,

    /// Session ID (optional)
    #[arg(long, global = true)]
    session: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the recorder daemon
    Start {
        /// Run in foreground
        #[arg(short, long)]
        foreground: bool,

        /// Run browser in headed mode (required for live recording)
        #[arg(long)]
        headed: bool,

        /// Config file (defaults to ~/.fgp/services/recorder/config.json)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Recording server base URL
        #[arg(long)]
        api_url: Option<String>,
    },

    /// Stop the recorder daemon
    Stop,

    /// Check daemon status
    Status,

    /// Navigate to URL
    Open { url: String },

    /// Viewport screenshot as a PNG data URL
    Screenshot,

    /// Element at a viewport point
    ResolvePoint { x: f64, y: f64 },

    /// Element best covering the region between two corners
    ResolveRegion { x1: f64, y1: f64, x2: f64, y2: f64 },

    /// Scroll a `frame >>> element` selector into view
    ScrollIntoView { selector: String },

    /// Click the center of a bounding box
    ClickAtBbox {
        x: i64,
        y: i64,
        width: i64,
        height: i64,
    },

    /// Type text into the focused element
    KeyboardInput { text: String },

    /// Scroll the page, or at a bounding box given as x,y,width,height
    Scroll {
        /// up or down
        direction: String,
        #[arg(long, value_delimiter = ',')]
        bbox: Option<Vec<i64>>,
    },

    /// Text painted inside a bounding box
    TextInBbox {
        x: i64,
        y: i64,
        width: i64,
        height: i64,
        /// Sampling stride in pixels
        #[arg(long)]
        stride: Option<f64>,
    },

    /// Live recording
    Record {
        #[command(subcommand)]
        action: RecordAction,
    },

    /// Toggle hover highlighting while recording
    Hover {
        /// Force highlighting off (true) or on (false)
        #[arg(long)]
        disabled: Option<bool>,
    },

    /// Session management for parallel requests
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },
}

#[derive(Subcommand)]
enum RecordAction {
    /// Start recording a new task (or resume an unfinished one)
    Start { task_name: Option<String> },
    /// Pause recording
    Pause,
    /// Resume recording
    Resume,
    /// Stop recording and save the task
    Stop,
    /// Show recording flags
    Status,
}

#[derive(Subcommand)]
enum SessionAction {
    /// Create a new isolated session
    New {
        /// Session ID
        #[arg(long)]
        id: String,
    },
    /// List active sessions
    List,
    /// Close a session
    Close {
        /// Session ID to close
        #[arg(long)]
        id: String,
    },
}

/// Build params with optional session_id
fn with_session(mut params: serde_json::Value, session: Option<String>) -> serde_json::Value {
    if let (Some(sid), Some(obj)) = (session, params.as_object_mut()) {
        obj.insert("session_id".to_string(), serde_json::Value::String(sid));
    }
    params
}

fn bbox_json(x: i64, y: i64, width: i64, height: i64) -> serde_json::Value {
    serde_json::json!({"x": x, "y": y, "width": width, "height": height})
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let socket = cli.socket;
    let session = cli.session;
    let json = cli.json;
    let call = |method: &str, params: serde_json::Value| {
        cmd_call_daemon(&socket, method, with_session(params, session.clone()), json)
    };

    match cli.command {
        Commands::Start {
            foreground,
            headed,
            config,
            api_url,
        } => {
            let path = config.unwrap_or_else(RecorderConfig::default_path);
            let mut config = RecorderConfig::load(&path)?;
            if headed {
                config.headless = false;
            }
            if let Some(url) = api_url {
                config.api_url = url;
            }
            cmd_start(&socket, foreground, config)
        }
        Commands::Stop => cmd_stop(&socket),
        Commands::Status => cmd_status(&socket),
        Commands::Open { url } => call("recorder.open", serde_json::json!({"url": url})),
        Commands::Screenshot => call("recorder.screenshot", serde_json::json!({})),
        Commands::ResolvePoint { x, y } => {
            call("recorder.resolve_point", serde_json::json!({"x": x, "y": y}))
        }
        Commands::ResolveRegion { x1, y1, x2, y2 } => call(
            "recorder.resolve_region",
            serde_json::json!({"x1": x1, "y1": y1, "x2": x2, "y2": y2}),
        ),
        Commands::ScrollIntoView { selector } => call(
            "recorder.scroll_into_view",
            serde_json::json!({"selector": selector}),
        ),
        Commands::ClickAtBbox {
            x,
            y,
            width,
            height,
        } => call(
            "recorder.click_at_bbox",
            serde_json::json!({"bbox": bbox_json(x, y, width, height)}),
        ),
        Commands::KeyboardInput { text } => {
            call("recorder.keyboard_input", serde_json::json!({"text": text}))
        }
        Commands::Scroll { direction, bbox } => {
            let mut params = serde_json::json!({"direction": direction});
            match bbox.as_deref() {
                Some([x, y, w, h]) => params["bbox"] = bbox_json(*x, *y, *w, *h),
                Some(_) => anyhow::bail!("--bbox takes x,y,width,height"),
                None => {}
            }
            call("recorder.scroll", params)
        }
        Commands::TextInBbox {
            x,
            y,
            width,
            height,
            stride,
        } => {
            let mut params = serde_json::json!({"bbox": bbox_json(x, y, width, height)});
            if let Some(stride) = stride {
                params["stride"] = serde_json::json!(stride);
            }
            call("recorder.text_in_bbox", params)
        }
        Commands::Record { action } => match action {
            RecordAction::Start { task_name } => {
                let params = match task_name {
                    Some(name) => serde_json::json!({"task_name": name}),
                    None => serde_json::json!({}),
                };
                call("recorder.record.start", params)
            }
            RecordAction::Pause => call("recorder.record.pause", serde_json::json!({})),
            RecordAction::Resume => call("recorder.record.resume", serde_json::json!({})),
            RecordAction::Stop => call("recorder.record.stop", serde_json::json!({})),
            RecordAction::Status => call("recorder.record.status", serde_json::json!({})),
        },
        Commands::Hover { disabled } => {
            let params = match disabled {
                Some(d) => serde_json::json!({"disabled": d}),
                None => serde_json::json!({}),
            };
            call("recorder.hover.toggle", params)
        }
        Commands::Session { action } => match action {
            SessionAction::New { id } => {
                cmd_call_daemon(&socket, "recorder.session.new", serde_json::json!({"id": id}), json)
            }
            SessionAction::List => {
                cmd_call_daemon(&socket, "recorder.session.list", serde_json::json!({}), json)
            }
            SessionAction::Close { id } => cmd_call_daemon(
                &socket,
                "recorder.session.close",
                serde_json::json!({"id": id}),
                json,
            ),
        },
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn serve(socket_path: &str, config: RecorderConfig) -> Result<()> {
    init_tracing();
    tracing::info!("Recording server: {}", config.api_url);

    let service = RecorderService::new(config).context("Failed to create RecorderService")?;
    let server = FgpServer::new(service, socket_path).context("Failed to create FGP server")?;
    server.serve().context("Server error")?;
    Ok(())
}

fn cmd_start(socket: &str, foreground: bool, config: RecorderConfig) -> Result<()> {
    config.validate()?;
    let socket_path = shellexpand::tilde(socket).to_string();

    if let Some(parent) = Path::new(&socket_path).parent() {
        std::fs::create_dir_all(parent).context("Failed to create socket directory")?;
    }

    let pid_file = format!("{}.pid", socket_path);

    println!("Starting recorder-gateway daemon...");
    println!("Socket: {}", socket_path);
    println!("Mode: {}", if config.headless { "headless" } else { "headed" });

    if foreground {
        serve(&socket_path, config)
    } else {
        use daemonize::Daemonize;

        let daemonize = Daemonize::new().pid_file(&pid_file).working_directory("/tmp");

        match daemonize.start() {
            Ok(_) => serve(&socket_path, config),
            Err(e) => {
                eprintln!("Failed to daemonize: {}", e);
                std::process::exit(1);
            }
        }
    }
}

fn cmd_stop(socket: &str) -> Result<()> {
    let socket_path = shellexpand::tilde(socket).to_string();
    let pid_file = format!("{}.pid", socket_path);

    let pid_str = std::fs::read_to_string(&pid_file)
        .context("Failed to read PID file - daemon may not be running")?;
    let pid: i32 = pid_str.trim().parse().context("Invalid PID in file")?;

    println!("Stopping recorder-gateway daemon (PID: {})...", pid);

    unsafe {
        libc::kill(pid, libc::SIGTERM);
    }

    std::thread::sleep(std::time::Duration::from_millis(500));

    let _ = cleanup_socket(&socket_path, Some(Path::new(&pid_file)));
    let _ = std::fs::remove_file(&pid_file);

    println!("Daemon stopped.");
    Ok(())
}

fn cmd_status(socket: &str) -> Result<()> {
    let socket_path = shellexpand::tilde(socket).to_string();

    if !Path::new(&socket_path).exists() {
        println!("Status: NOT RUNNING");
        println!("Socket {} does not exist", socket_path);
        return Ok(());
    }

    match UnixStream::connect(&socket_path) {
        Ok(mut stream) => {
            let request = r#"{"id":"status","v":1,"method":"health","params":{}}"#;
            writeln!(stream, "{}", request)?;
            stream.flush()?;

            let mut reader = BufReader::new(stream);
            let mut response = String::new();
            reader.read_line(&mut response)?;

            println!("Status: RUNNING");
            println!("Socket: {}", socket_path);
            println!("Health: {}", response.trim());
        }
        Err(e) => {
            println!("Status: NOT RESPONDING");
            println!("Socket exists but connection failed: {}", e);
        }
    }

    Ok(())
}

fn cmd_call_daemon(
    socket: &str,
    method: &str,
    params: serde_json::Value,
    json_output: bool,
) -> Result<()> {
    let socket_path = shellexpand::tilde(socket).to_string();

    let mut stream = UnixStream::connect(&socket_path)
        .context("Failed to connect to daemon. Is it running? Try: recorder-gateway start --headed")?;

    let request = serde_json::json!({
        "id": uuid::Uuid::new_v4().to_string(),
        "v": 1,
        "method": method,
        "params": params,
    });

    writeln!(stream, "{}", request)?;
    stream.flush()?;

    let mut reader = BufReader::new(stream);
    let mut response = String::new();
    reader.read_line(&mut response)?;

    if json_output {
        println!("{}", response.trim());
    } else if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(&response) {
        if let Some(result) = parsed.get("result") {
            println!("{}", serde_json::to_string_pretty(result)?);
        } else if let Some(error) = parsed.get("error") {
            eprintln!("Error: {}", error);
            std::process::exit(1);
        } else {
            println!("{}", serde_json::to_string_pretty(&parsed)?);
        }
    } else {
        println!("{}", response.trim());
    }

    Ok(())
}
