//! # traceloop - Main Entry Point
//!
//! Demo driver for the tracer facade. It attaches a number of simulated
//! containers, runs a scripted syscall workload inside each of them and polls
//! every container's ring on an interval, printing the correlated events as
//! text or JSON lines.
//!
//! The loop ends on Ctrl+C or when `--duration` expires. A final read drains
//! what is left before the tracer is stopped.

#![allow(clippy::too_many_lines)]

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{bounded, Receiver};
use log::{debug, info, warn};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use traceloop::cli::Args;
use traceloop::config::TracerConfig;
use traceloop::domain::{MountNsId, Pid, TraceloopError};
use traceloop::enrichment::{CommonData, ContainerRegistry, Enricher};
use traceloop::event::CorrelatedEvent;
use traceloop::kernel::simulated::{SimulatedKernel, SyscallInvocation};
use traceloop::syscalls::SyscallTable;
use traceloop::tracer::Tracer;

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;

/// Mount namespace id of the first simulated container
const FIRST_MOUNT_NS_ID: u64 = 4_026_532_200;
const FIRST_WORKLOAD_PID: u32 = 1_000;
const WORKLOAD_STEP: Duration = Duration::from_millis(40);

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    if err.chain().any(|cause| cause.is::<serde_json::Error>()) {
        EXIT_USAGE
    } else {
        EXIT_ERROR
    }
}

/// Build the tracer configuration from an optional JSON file and the flags
fn load_config(args: &Args) -> Result<TracerConfig> {
    let mut config = match &args.config {
        Some(path) => read_config_file(path)?,
        None => TracerConfig::default(),
    };
    if let Some(pages) = args.pages {
        config.perf_buffer_pages = pages;
    }
    if let Some(ref root) = args.tracefs {
        config.tracefs_root = Some(root.clone());
    }
    Ok(config)
}

fn read_config_file(path: &Path) -> Result<TracerConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Invalid config file {}", path.display()))
}

struct SimulatedContainer {
    id: String,
    mount_ns_id: MountNsId,
    pid: Pid,
}

fn simulated_containers(count: u32) -> Vec<SimulatedContainer> {
    (0..count)
        .map(|i| SimulatedContainer {
            id: format!("demo-{i}"),
            mount_ns_id: MountNsId(FIRST_MOUNT_NS_ID + u64::from(i)),
            pid: Pid(FIRST_WORKLOAD_PID + i),
        })
        .collect()
}

/// One pass of the scripted workload of a container
#[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
fn workload_script(container: &SimulatedContainer, step: u64) -> Vec<SyscallInvocation> {
    let mntns = container.mount_ns_id;
    let pid = container.pid.0;
    let fd = 3 + step % 4;
    let line = format!("request {step} from {}\n", container.id);
    let hosts = b"127.0.0.1 localhost\n".to_vec();

    let mut script = vec![
        SyscallInvocation::new(mntns, "openat")
            .arg(0, u64::from(libc::AT_FDCWD as u32))
            .string_arg(1, "/etc/hosts")
            .returns(fd.try_into().unwrap_or(3)),
        SyscallInvocation::new(mntns, "read")
            .arg(0, fd)
            .buffer_arg(1, hosts.clone())
            .arg(2, 4096)
            .returns(hosts.len().try_into().unwrap_or(0)),
        SyscallInvocation::new(mntns, "close").arg(0, fd),
        SyscallInvocation::new(mntns, "write")
            .arg(0, 1)
            .buffer_arg(1, line.as_bytes())
            .arg(2, line.len() as u64)
            .returns(line.len().try_into().unwrap_or(0)),
        SyscallInvocation::new(mntns, "getpid").returns(pid.into()),
    ];

    if step % 5 == 0 {
        script.push(
            SyscallInvocation::new(mntns, "openat")
                .arg(0, u64::from(libc::AT_FDCWD as u32))
                .string_arg(1, "/var/run/secrets/token")
                .returns(-i64::from(libc::ENOENT)),
        );
    }
    if step % 7 == 0 {
        script.push(
            SyscallInvocation::new(mntns, "getcwd")
                .buffer_arg(0, b"/srv\0".to_vec())
                .arg(1, 4096)
                .returns(5),
        );
    }

    script
        .into_iter()
        .map(|inv| inv.pid(pid).comm("demo-app").cpu((step % 4) as u16))
        .collect()
}

/// Drive the scripted workload of every container until `stop` is set
fn spawn_workload(
    kernel: Arc<SimulatedKernel>,
    containers: Arc<Vec<SimulatedContainer>>,
    stop: Arc<AtomicBool>,
) -> JoinHandle<u64> {
    std::thread::spawn(move || {
        let mut step = 0u64;
        while !stop.load(Ordering::Acquire) {
            for container in containers.iter() {
                for invocation in workload_script(container, step) {
                    if let Err(e) = kernel.invoke(&invocation) {
                        warn!("Workload of {} skipped a syscall: {e}", container.id);
                    }
                }
            }
            step += 1;
            std::thread::sleep(WORKLOAD_STEP);
        }
        step
    })
}

/// Print event batches until every sender is gone
fn spawn_printer(rx: Receiver<Vec<CorrelatedEvent>>, json: bool) -> JoinHandle<Result<u64>> {
    std::thread::spawn(move || {
        let stdout = std::io::stdout();
        let mut out = BufWriter::new(stdout.lock());
        let mut printed = 0u64;

        for batch in rx {
            for event in &batch {
                if json {
                    let line = serde_json::to_string(event).context("Failed to encode event")?;
                    writeln!(out, "{line}")?;
                } else {
                    writeln!(out, "{event}")?;
                }
                printed += 1;
            }
            out.flush()?;
        }
        Ok(printed)
    })
}

/// Read every container once and forward non-empty batches
fn poll_containers(
    tracer: &Tracer<Arc<SimulatedKernel>>,
    containers: &[SimulatedContainer],
    tx: &crossbeam_channel::Sender<Vec<CorrelatedEvent>>,
) -> Result<usize> {
    let mut total = 0;
    for container in containers {
        match tracer.read(&container.id) {
            Ok(events) if events.is_empty() => {}
            Ok(events) => {
                total += events.len();
                if tx.send(events).is_err() {
                    anyhow::bail!("Event printer exited");
                }
            }
            Err(e) if e.is_retryable() => {
                warn!("Read of {} failed, retrying next poll: {e}", container.id);
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", container.id));
            }
        }
    }
    Ok(total)
}

#[tokio::main]
async fn run() -> Result<()> {
    let args = Args::parse();
    let quiet = args.quiet;

    let config = load_config(&args)?;
    let table = Arc::new(match config.tracefs_root {
        Some(ref root) => SyscallTable::load(root),
        None => SyscallTable::builtin(),
    });

    if !quiet {
        eprintln!("traceloop v{}", env!("CARGO_PKG_VERSION"));
        eprintln!("arch: {:?}, {} syscalls", table.arch(), table.len());
    }

    let kernel = Arc::new(SimulatedKernel::with_host_cpus(Arc::clone(&table)));
    let registry = Arc::new(ContainerRegistry::new(
        std::env::var("NODE_NAME").unwrap_or_else(|_| "localhost".to_string()),
    ));
    let tracer = Tracer::new(Arc::clone(&kernel), table, config)
        .context("Failed to start tracer")?
        .with_enricher(Arc::clone(&registry) as Arc<dyn Enricher>);

    // ── Attach simulated containers ─────────────────────────────────────
    let containers = Arc::new(simulated_containers(args.containers));
    for container in containers.iter() {
        registry.insert(
            container.mount_ns_id,
            CommonData {
                namespace: "default".to_string(),
                pod: format!("{}-pod", container.id),
                container: container.id.clone(),
                ..CommonData::default()
            },
        );
        tracer
            .attach(&container.id, container.mount_ns_id)
            .with_context(|| format!("Failed to attach {}", container.id))?;
        debug!("{} runs workload {} in {}", container.id, container.pid, container.mount_ns_id);
    }

    if !quiet {
        eprintln!(
            "containers: {}, cpus: {}, ring: {} bytes/cpu",
            containers.len(),
            kernel.cpu_count(),
            tracer.config().ring_bytes_per_cpu()
        );
    }

    let stop_workload = Arc::new(AtomicBool::new(false));
    let workload =
        spawn_workload(Arc::clone(&kernel), Arc::clone(&containers), Arc::clone(&stop_workload));

    let (tx, rx) = bounded(1000);
    let printer = spawn_printer(rx, args.json);

    // Setup Ctrl+C handler
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let started = Instant::now();
    let duration_limit =
        if args.duration > 0 { Some(Duration::from_secs(args.duration)) } else { None };
    let mut ticker = tokio::time::interval(Duration::from_millis(args.interval));
    let mut exit_reason = "interrupted";
    let mut polled = 0usize;

    // Main polling loop
    loop {
        if let Some(limit) = duration_limit {
            if started.elapsed() >= limit {
                exit_reason = "duration limit reached";
                break;
            }
        }

        tokio::select! {
            _ = ticker.tick() => {
                polled += poll_containers(&tracer, &containers, &tx)?;
            }
            _ = &mut ctrl_c => {
                break;
            }
        }
    }

    // ── Teardown ────────────────────────────────────────────────────────
    stop_workload.store(true, Ordering::Release);
    let steps = workload.join().unwrap_or_default();

    for container in containers.iter() {
        match tracer.detach(container.mount_ns_id) {
            Ok(()) | Err(TraceloopError::RoutingNotFound(_)) => {}
            Err(e) => warn!("Failed to detach {}: {e}", container.id),
        }
    }
    polled += poll_containers(&tracer, &containers, &tx)?;
    tracer.stop();
    info!("Workload ran {steps} steps");

    drop(tx);
    let printed = match printer.join() {
        Ok(result) => result?,
        Err(_) => anyhow::bail!("Event printer panicked"),
    };

    if !quiet {
        eprintln!(
            "\n{}: {:.1}s, {} events read, {} printed",
            exit_reason,
            started.elapsed().as_secs_f64(),
            polled,
            printed
        );
    }

    Ok(())
}
