//! Drives simulated requests through a probe, then prints the metrics the
//! tracing observer recorded.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context};
use bytes::Bytes;
use clap::Parser;
use http::{Method, StatusCode};
use metrics_exporter_prometheus::PrometheusBuilder;
use reqprobe_core::{Completion, HookList, Operation, Payload, RequestContext};
use reqprobe_server::logging::{init_logging, LoggingConfig};
use reqprobe_server::{
    Probe, ProbeBuilder, StderrObserver, TracingObserver, TracingObserverConfig,
};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "probe-demo", about = "Simulated request traffic through a reqprobe pipeline")]
struct Args {
    /// Number of simulated requests.
    #[arg(long, env = "PROBE_DEMO_REQUESTS", default_value_t = 200)]
    requests: usize,
    /// Number of producer threads.
    #[arg(long, env = "PROBE_DEMO_WORKERS", default_value_t = 4)]
    workers: usize,
    /// Deliver on the request threads instead of a background thread.
    #[arg(long)]
    sync: bool,
    /// Log as JSON.
    #[arg(long, env = "PROBE_DEMO_JSON")]
    json: bool,
    /// Fail every Nth request; 0 disables failures.
    #[arg(long, default_value_t = 7)]
    fail_every: usize,
    /// Also print every record to stderr.
    #[arg(long)]
    stderr: bool,
    /// Application setting reported at startup, as KEY=VALUE. Repeatable.
    #[arg(long = "setting", value_parser = parse_setting)]
    settings: Vec<(String, String)>,
}

fn parse_setting(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(key, value)| (key.trim().to_string(), value.to_string()))
        .filter(|(key, _)| !key.is_empty())
        .ok_or_else(|| format!("expected KEY=VALUE, got {raw:?}"))
}

#[derive(Debug, Clone, Copy)]
enum DemoOp {
    ListPets,
    GetPet,
    CreatePet,
}

impl Operation for DemoOp {
    fn name(&self) -> &'static str {
        match self {
            Self::ListPets => "LIST_PETS",
            Self::GetPet => "GET_PET",
            Self::CreatePet => "CREATE_PET",
        }
    }
}

#[derive(Debug, Serialize)]
struct Pet {
    id: u64,
    name: String,
}

fn simulate_request(probe: &Probe<DemoOp>, index: usize, fail_every: usize) -> anyhow::Result<()> {
    let op = match index % 3 {
        0 => DemoOp::ListPets,
        1 => DemoOp::GetPet,
        _ => DemoOp::CreatePet,
    };
    let (method, uri) = match op {
        DemoOp::ListPets => (Method::GET, "/pets".to_string()),
        DemoOp::GetPet => (Method::GET, format!("/pets/{index}")),
        DemoOp::CreatePet => (Method::POST, "/pets".to_string()),
    };
    let port = u16::try_from(40_000 + index % 20_000).unwrap_or(40_000);
    let hooks = Arc::new(HookList::new());
    let ctx = Arc::new(
        RequestContext::builder(method, uri)
            .request_id(Uuid::new_v4().to_string())
            .remote_addr(SocketAddr::from(([127, 0, 0, 1], port)))
            .hooks(hooks.clone())
            .build(),
    );

    probe.attach_to(&ctx, op);
    probe.on_enter_handler(op, &ctx, "PetHandler");

    let pet = Pet {
        id: u64::try_from(index)?,
        name: format!("pet-{index}"),
    };
    if let DemoOp::CreatePet = op {
        let body = Bytes::from(serde_json::to_vec(&pet).context("encoding request body")?);
        probe.on_before_payload_read_shared(op, &ctx, "PetHandler", body);
        probe.on_after_payload_read(op, &ctx, "PetHandler", Some(Arc::new(pet) as Payload));
    }

    thread::sleep(Duration::from_millis(u64::try_from(index % 5)?));
    probe.on_metric(op, &ctx, "rows", i64::try_from(index % 17)?);

    if fail_every > 0 && index % fail_every == fail_every - 1 {
        hooks.fire_end(&Completion::failed(
            StatusCode::INTERNAL_SERVER_ERROR,
            anyhow!("simulated storage failure for request {index}"),
        ));
        return Ok(());
    }

    probe.on_before_send_response(op, &ctx, None);
    hooks.fire_body_end(StatusCode::OK);
    hooks.fire_end(&Completion::ok(StatusCode::OK));
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if let Err(err) = init_logging(&LoggingConfig {
        json: args.json,
        ..LoggingConfig::default()
    }) {
        eprintln!("probe-demo: {err}");
    }
    let metrics = PrometheusBuilder::new()
        .install_recorder()
        .context("installing metrics recorder")?;

    let settings: BTreeMap<String, String> = args.settings.iter().cloned().collect();
    let mut builder = ProbeBuilder::<DemoOp>::new().with_observer(TracingObserver::new(
        TracingObserverConfig {
            settings,
            ..TracingObserverConfig::default()
        },
    ));
    if args.stderr {
        builder = builder.with_observer(StderrObserver::new());
    }
    if !args.sync {
        builder = builder.async_delivery();
    }
    let probe = builder.build()?;

    probe.on_startup();
    probe.on_launched("probe-demo", Uuid::new_v4().to_string());

    let workers = args.workers.max(1);
    let handles: Vec<_> = (0..workers)
        .map(|worker| {
            let probe = probe.clone();
            let (requests, fail_every) = (args.requests, args.fail_every);
            thread::Builder::new()
                .name(format!("demo-worker-{worker}"))
                .spawn(move || -> anyhow::Result<()> {
                    for index in (worker..requests).step_by(workers) {
                        simulate_request(&probe, index, fail_every)?;
                    }
                    Ok(())
                })
        })
        .collect::<Result<_, _>>()
        .context("spawning demo workers")?;

    for handle in handles {
        handle
            .join()
            .map_err(|_| anyhow!("demo worker panicked"))??;
    }

    probe.on_shutdown();
    probe.shutdown();
    println!("{}", metrics.render());
    Ok(())
}
