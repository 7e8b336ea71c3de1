use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use ferron_rpc::{http, Client, CodecKind, Server};
use ferrond::config::{self, ConfigFile};
use ferrond::service;
use serde_json::Value;

#[derive(Parser, Debug)]
#[command(name = "ferrond")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the built-in services over TCP and, optionally, HTTP.
    Serve {
        #[arg(long)]
        listen: Option<String>,
        #[arg(long)]
        http_listen: Option<String>,
        #[arg(long)]
        codec: Option<String>,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Issue one call against a running daemon and print the reply.
    Call {
        #[arg(long, default_value = config::DEFAULT_LISTEN)]
        addr: String,
        #[arg(long, default_value = "binary")]
        codec: String,
        /// Use the single-exchange HTTP transport instead of a stream.
        #[arg(long)]
        http: bool,
        service_method: String,
        /// Argument value, JSON-encoded.
        #[arg(default_value = "null")]
        args: String,
    },
}

#[tokio::main]
async fn main() {
    env_logger::init();
    match Args::parse().command {
        Command::Serve {
            listen,
            http_listen,
            codec,
            config,
        } => run_serve(listen, http_listen, codec, config).await,
        Command::Call {
            addr,
            codec,
            http,
            service_method,
            args,
        } => run_call(addr, codec, http, service_method, args).await,
    }
}

async fn run_serve(
    listen: Option<String>,
    http_listen: Option<String>,
    codec: Option<String>,
    config_path: Option<PathBuf>,
) {
    let file = match config_path {
        Some(path) => ConfigFile::load(&path).expect("load config file"),
        None => ConfigFile::default(),
    };
    let settings = config::resolve(listen, http_listen, codec, &file).expect("resolve settings");
    let registry = service::builtin_registry().expect("register builtin services");
    let server = Arc::new(Server::new(registry));

    if let Some(http_addr) = settings.http_listen.clone() {
        let listener = tokio::net::TcpListener::bind(&http_addr)
            .await
            .expect("bind http listener");
        log::info!("ferrond listening on http://{http_addr}");
        let http_server = Arc::clone(&server);
        tokio::spawn(async move {
            let _ = http::serve(listener, http_server).await;
        });
    }

    let listener = tokio::net::TcpListener::bind(&settings.listen)
        .await
        .expect("bind rpc listener");
    log::info!(
        "ferrond listening on rpc://{} codec={}",
        settings.listen,
        settings.codec
    );
    server.serve(listener, settings.codec).await.expect("serve rpc");
}

async fn run_call(addr: String, codec: String, http: bool, service_method: String, args: String) {
    let params: Value = serde_json::from_str(&args).expect("parse args as JSON");
    let outcome = if http {
        http::call(&addr, &service_method, &params).await
    } else {
        let kind: CodecKind = codec.parse().expect("parse codec name");
        match Client::dial(addr.as_str(), kind).await {
            Ok(client) => client.call::<Value>(&service_method, params).await,
            Err(err) => Err(err),
        }
    };
    match outcome {
        Ok(value) => println!("{value}"),
        Err(err) => {
            eprintln!("call failed: {err}");
            std::process::exit(1);
        }
    }
}
