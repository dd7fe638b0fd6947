use http_dispatch::{
    compose, gone, log_all, CompleteRequest, DispatchOptions, HandlerError, HandlerResult,
    HttpServer, Outcome, Responder, Route, RouteTable, ServerConfig, ServerError, ServerResult,
    Status,
};
use log::LevelFilter;
use serde_json::json;
use std::env;
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;

fn main() -> ServerResult<()> {
    let args: Vec<String> = env::args().collect();
    if args.get(1).map(String::as_str) == Some("--save-config") {
        let path = args.get(2).map(String::as_str).unwrap_or("server.json");
        return save_default_config(path);
    }

    let config = if args.len() > 1 && Path::new(&args[1]).exists() {
        ServerConfig::from_json_file(&args[1])?
    } else {
        ServerConfig::new()
    };

    let level = match env::var("HTTP_DISPATCH_LOG").as_deref() {
        Ok("debug") => LevelFilter::Debug,
        Ok("warn") => LevelFilter::Warn,
        Ok("off") => LevelFilter::Off,
        _ => LevelFilter::Info,
    };
    setup_logging(level)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.worker_threads)
        .enable_all()
        .build()?;
    runtime.block_on(run(config))
}

async fn run(config: ServerConfig) -> ServerResult<()> {
    let mut server = HttpServer::bind(&config)?;

    let routes = RouteTable::new()
        .with(Route::new("/do?", do_something).methods(["GET", "POST"]).max_body_size(1024))
        .with(Route::new("/hello", hello).exact())
        .with(Route::new("/later", later).methods(["GET"]))
        .with(Route::new("/old/", gone));

    let options = DispatchOptions::from_config(&config)
        .with_logger(log_all())
        .with_error_observer(|reason, request, _resp, message| {
            log::warn!(
                "{} ({}) on {}: {}",
                reason,
                reason.code(),
                request.url().unwrap_or("<no url>"),
                message
            );
        });

    if !compose(&mut server, routes, options) {
        return Err(ServerError::Config("could not compose routes onto the server".to_string()));
    }

    let (stop_tx, mut stop_rx) = mpsc::unbounded_channel();
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    })
    .map_err(|err| ServerError::Config(format!("Error setting Ctrl-C handler: {}", err)))?;

    println!(
        "Starting server on {} with {} worker threads",
        server.local_addr()?,
        config.worker_threads
    );
    server
        .serve_until(async move {
            stop_rx.recv().await;
            println!("Received shutdown signal. Stopping server...");
        })
        .await
}

fn do_something(req: &CompleteRequest, resp: &Responder) -> HandlerResult {
    let query = req.url().split_once('?').map_or("", |(_, query)| query);
    let mut answer = json!({
        "say": format!("do: {}", query),
        "method": req.method(),
    });
    if req.method() == "POST" {
        answer["postbody"] = json!(req.body());
    }
    resp.send_json(Status::Ok.code(), &answer, &[], None);
    Ok(Outcome::Done)
}

fn hello(req: &CompleteRequest, resp: &Responder) -> HandlerResult {
    let name = req.query_param("name").unwrap_or("world".into());
    let body = format!("hello, {}\n", name);
    resp.send(
        Status::Ok.code(),
        Some(body.as_bytes()),
        &[("Content-Type", "text/plain; charset=UTF-8")],
        None,
    );
    Ok(Outcome::Done)
}

fn later(req: &CompleteRequest, resp: &Responder) -> HandlerResult {
    let delay = match req.query_param("ms") {
        Some(ms) => ms
            .parse::<u64>()
            .map_err(|_| HandlerError::new(format!("bad delay: {}", ms)))?,
        None => 100,
    };
    let resp = resp.clone();
    Ok(Outcome::pending(async move {
        tokio::time::sleep(Duration::from_millis(delay)).await;
        resp.send_json(Status::Ok.code(), &json!({ "waited_ms": delay }), &[], None);
        Ok(())
    }))
}

fn setup_logging(level: LevelFilter) -> ServerResult<()> {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {}] {}",
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .level_for("http_dispatch::mark", LevelFilter::Info)
        .chain(std::io::stderr())
        .apply()
        .map_err(|err| ServerError::Config(format!("Error setting up logging: {}", err)))
}

// Save default configuration to a file
fn save_default_config(path: &str) -> ServerResult<()> {
    let config = ServerConfig::new();
    config.save_to_json_file(path)?;
    println!("Default configuration saved to: {}", path);
    Ok(())
}
