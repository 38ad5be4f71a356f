//! CLI mode for rxfer - run a single transfer from the command line.

mod progress;

use std::path::PathBuf;

use bytes::Bytes;
use reqwest::Method;

use crate::{Error, Result, TransferConfig, TransferKind, TransferRequest, Transfers};

use progress::{BarProgress, print_summary};

/// What to transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Download `url`, writing the body to `output` or stdout.
    Get { url: String, output: Option<PathBuf> },
    /// Send `body` to `url` and print the response.
    Post { url: String, body: String },
    /// Upload the file at `path` to `url`.
    Put { url: String, path: PathBuf },
}

/// Parsed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Transfer to run.
    pub command: Command,
    /// Extra request headers as `(name, value)`.
    pub headers: Vec<(String, String)>,
    /// Configuration file overriding the default location.
    pub config: Option<PathBuf>,
}

/// Prints usage information.
pub fn print_usage() {
    eprintln!("Usage: rxfer <COMMAND> [OPTIONS]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  get <url> [-o <file>]     Download a URL (to stdout unless -o is given)");
    eprintln!("  post <url> <text>         POST text and print the response body");
    eprintln!("  put <url> <file>          PUT the contents of a file");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -o, --output <file>       Where to write a download");
    eprintln!("  -H, --header <name:value> Add a request header (repeatable)");
    eprintln!("  -c, --config <file>       Configuration file (default: ~/.config/rxfer/config.toml)");
    eprintln!("  -h, --help                Show this help");
}

fn usage_error(message: impl Into<String>) -> Error {
    Error::InvalidRequest(message.into())
}

/// Parses command-line arguments (without the program name).
///
/// Returns `Ok(None)` when help was requested.
///
/// # Errors
///
/// Returns [`Error::InvalidRequest`] for unknown flags or missing arguments.
pub fn parse_args(args: &[String]) -> Result<Option<Invocation>> {
    let mut positional = Vec::new();
    let mut output = None;
    let mut headers = Vec::new();
    let mut config = None;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-h" | "--help" => return Ok(None),
            "-o" | "--output" => {
                let value = iter
                    .next()
                    .ok_or_else(|| usage_error("--output requires a value"))?;
                output = Some(PathBuf::from(value));
            }
            "-c" | "--config" => {
                let value = iter
                    .next()
                    .ok_or_else(|| usage_error("--config requires a value"))?;
                config = Some(PathBuf::from(value));
            }
            "-H" | "--header" => {
                let value = iter
                    .next()
                    .ok_or_else(|| usage_error("--header requires a value"))?;
                let (name, value) = value
                    .split_once(':')
                    .ok_or_else(|| usage_error(format!("header {value:?} is not name:value")))?;
                headers.push((name.trim().to_string(), value.trim().to_string()));
            }
            flag if flag.starts_with('-') => {
                return Err(usage_error(format!("unknown option {flag}")));
            }
            _ => positional.push(arg.clone()),
        }
    }

    let mut positional = positional.into_iter();
    let Some(verb) = positional.next() else {
        return Ok(None);
    };
    let url = positional
        .next()
        .ok_or_else(|| usage_error(format!("{verb} requires a URL")))?;

    let command = match verb.as_str() {
        "get" => Command::Get { url, output },
        "post" => Command::Post {
            url,
            body: positional
                .next()
                .ok_or_else(|| usage_error("post requires a body"))?,
        },
        "put" => Command::Put {
            url,
            path: positional
                .next()
                .map(PathBuf::from)
                .ok_or_else(|| usage_error("put requires a file"))?,
        },
        other => return Err(usage_error(format!("unknown command {other}"))),
    };

    if let Some(extra) = positional.next() {
        return Err(usage_error(format!("unexpected argument {extra}")));
    }

    Ok(Some(Invocation {
        command,
        headers,
        config,
    }))
}

fn build_request(method: Method, url: &str, headers: &[(String, String)]) -> Result<TransferRequest> {
    headers
        .iter()
        .try_fold(TransferRequest::parse(method, url)?, |request, (name, value)| {
            request.header(name, value)
        })
}

fn write_output(data: &Bytes, output: Option<&PathBuf>) -> Result<()> {
    match output {
        Some(path) => std::fs::write(path, data)?,
        None => {
            use std::io::Write;
            std::io::stdout().write_all(data)?;
        }
    }
    Ok(())
}

/// Runs the CLI with the given arguments (without the program name).
///
/// # Errors
///
/// Returns an error if the arguments are invalid or the transfer fails.
pub async fn run(args: Vec<String>) -> Result<()> {
    let Some(invocation) = parse_args(&args)? else {
        print_usage();
        return Ok(());
    };

    let config = match &invocation.config {
        Some(path) => TransferConfig::load(path)?,
        None => TransferConfig::load_or_default()?,
    };
    let transfers = Transfers::new(config)?;
    let headers = &invocation.headers;

    match &invocation.command {
        Command::Get { url, output } => {
            let request = build_request(Method::GET, url, headers)?;
            let reporter = BarProgress::new(url);
            let (data, stats) = transfers.download(request).finish_with(&reporter).await?;
            write_output(&data, output.as_ref())?;
            if output.is_some() {
                print_summary(TransferKind::Download, url, &stats);
            }
        }
        Command::Post { url, body } => {
            let request = build_request(Method::POST, url, headers)?;
            let reporter = BarProgress::new(url);
            let (response, stats) = transfers
                .upload(request, Bytes::from(body.clone()))
                .finish_with(&reporter)
                .await?;
            print_summary(TransferKind::Upload, url, &stats);
            if let Some(response) = response {
                println!("{}", String::from_utf8_lossy(&response));
            }
        }
        Command::Put { url, path } => {
            let request = build_request(Method::PUT, url, headers)?;
            let reporter = BarProgress::new(&path.display().to_string());
            let (path, stats) = transfers
                .upload_file(request, path)
                .finish_with(&reporter)
                .await?;
            print_summary(TransferKind::FileUpload, &path.display().to_string(), &stats);
        }
    }

    Ok(())
}
