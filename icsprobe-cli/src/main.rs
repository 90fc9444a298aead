//! icsprobe command-line interface
//!
//! Thin facade over the library crates: argument validation, session
//! construction per transport, report rendering, and Ctrl-C wiring.

mod args;

use args::{Cli, Commands, TargetArgs, Transport};
use icsprobe_attack::{
    EffectScanner, HttpObservationSource, ObservationSource, ScanConfig, ScanReport,
    SustainConfig, SustainOutcome, SustainReport, SustainedWriteAttack,
};
use icsprobe_core::{payload, DeviceSession, Error, MemoryWindow, Result};
use icsprobe_protocols::{CertificateBundle, OpcUaConfig, OpcUaSession, S7Config, S7Session};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

#[tokio::main]
async fn main() {
    let cli = Cli::parse_args();
    init_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn init_logging(verbose: u8) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let json = cli.json;
    match cli.command {
        Commands::Scan {
            target,
            block,
            start,
            end,
            status_url,
            pattern,
            probe_size,
            settle_ms,
            tolerance,
        } => {
            let config = ScanConfig {
                pattern: pattern.parse()?,
                probe_size,
                settle_delay: Duration::from_millis(settle_ms),
                tolerance,
            };
            let observer = HttpObservationSource::new(status_url)?;
            let mut session = build_session(&target)?;
            session.connect().await?;
            let result =
                cmd_scan(session.as_mut(), &observer, config, block, start, end, json).await;
            session.disconnect().await;
            result
        }
        Commands::Sustain {
            target,
            block,
            offset,
            data,
            pattern,
            length,
            duration_secs,
            interval_ms,
            status_url,
        } => {
            let bytes = sustain_payload(data, pattern, length)?;
            let window = MemoryWindow::new(block, offset, bytes.len() as u16);
            let config = SustainConfig::new(
                window,
                bytes,
                Duration::from_secs(duration_secs),
                Duration::from_millis(interval_ms),
            );
            let observer = match status_url {
                Some(url) => Some(HttpObservationSource::new(url)?),
                None => None,
            };
            let mut session = build_session(&target)?;
            session.connect().await?;
            let result = cmd_sustain(session.as_mut(), config, observer, json).await;
            session.disconnect().await;
            result
        }
        Commands::Read {
            target,
            block,
            offset,
            length,
        } => {
            let window = MemoryWindow::new(block, offset, length);
            let mut session = build_session(&target)?;
            session.connect().await?;
            let result = cmd_read(session.as_mut(), window, json).await;
            session.disconnect().await;
            result
        }
        Commands::Write {
            target,
            block,
            offset,
            data,
        } => {
            let bytes = payload::from_hex(&data)?;
            if bytes.is_empty() || bytes.len() > usize::from(u16::MAX) {
                return Err(Error::invalid_parameter(
                    "data",
                    format!("payload must be 1..=65535 bytes, got {}", bytes.len()),
                ));
            }
            let window = MemoryWindow::new(block, offset, bytes.len() as u16);
            let mut session = build_session(&target)?;
            session.connect().await?;
            let result = cmd_write(session.as_mut(), window, bytes, json).await;
            session.disconnect().await;
            result
        }
        Commands::Probe { endpoint } => cmd_probe(&endpoint, json).await,
        Commands::GenCert {
            out_dir,
            application_uri,
            common_name,
        } => {
            let bundle = CertificateBundle::generate(&out_dir, &application_uri, &common_name)?;
            if json {
                print_json(&json!({
                    "cert_path": bundle.cert_path(),
                    "key_path": bundle.key_path(),
                    "thumbprint": bundle.thumbprint_hex(),
                }))?;
            } else {
                println!("certificate: {}", bundle.cert_path().display());
                println!("private key: {}", bundle.key_path().display());
                println!("thumbprint:  {}", bundle.thumbprint_hex());
            }
            Ok(())
        }
    }
}

/// The two transports have different concrete session types; the
/// dispatch happens once here and the command helpers take the trait
/// object.
fn build_session(target: &TargetArgs) -> Result<Box<dyn DeviceSession>> {
    Ok(match target.transport {
        Transport::S7 => Box::new(build_s7(target)?),
        Transport::Opcua => Box::new(build_opcua(target)?),
    })
}

fn build_s7(target: &TargetArgs) -> Result<S7Session> {
    let host = target
        .host
        .as_deref()
        .ok_or_else(|| Error::invalid_parameter("host", "required for the s7 transport"))?;
    let config = S7Config::new(host)
        .with_port(target.port)
        .with_rack_slot(target.rack, target.slot);
    Ok(S7Session::new(config))
}

fn build_opcua(target: &TargetArgs) -> Result<OpcUaSession> {
    let endpoint = target.endpoint.as_deref().ok_or_else(|| {
        Error::invalid_parameter("endpoint", "required for the opcua transport")
    })?;
    let mut config = OpcUaConfig::new(endpoint)
        .with_security(
            target.security_policy.parse()?,
            target.security_mode.parse()?,
        )
        .with_namespace(target.namespace);
    if let (Some(cert), Some(key)) = (&target.cert, &target.key) {
        config = config.with_certificate(CertificateBundle::load(cert, key)?);
    }
    Ok(OpcUaSession::new(config))
}

fn sustain_payload(data: Option<String>, pattern: Option<String>, length: u16) -> Result<Vec<u8>> {
    match (data, pattern) {
        (Some(hex), None) => {
            let bytes = payload::from_hex(&hex)?;
            if bytes.is_empty() {
                return Err(Error::invalid_parameter("data", "payload must not be empty"));
            }
            Ok(bytes)
        }
        (None, Some(name)) => payload::generate(&name, usize::from(length)),
        _ => Err(Error::invalid_parameter(
            "data",
            "provide exactly one of --data or --pattern",
        )),
    }
}

/// Stop flag flipped by the first Ctrl-C
fn wire_ctrl_c(cancel: Arc<AtomicBool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping at the next safe point");
            cancel.store(true, Ordering::Relaxed);
        }
    });
}

async fn cmd_scan(
    session: &mut dyn DeviceSession,
    observer: &HttpObservationSource,
    config: ScanConfig,
    block: u16,
    start: u32,
    end: u32,
    json: bool,
) -> Result<()> {
    let scanner = EffectScanner::new(config);
    wire_ctrl_c(scanner.cancel_flag());

    let report = scanner.scan(session, observer, block, start, end).await?;
    if json {
        print_json(&report)?;
    } else {
        render_scan(&report);
    }
    Ok(())
}

fn render_scan(report: &ScanReport) {
    println!(
        "Scan of DB{}: {} offsets tested, {} effects, {} write errors",
        report.block,
        report.offsets_tested,
        report.effects.len(),
        report.errors.len()
    );
    for (offset, fields) in report.offset_map() {
        let fields: Vec<&str> = fields.iter().map(String::as_str).collect();
        println!("  offset {:>5}  {}", offset, fields.join(", "));
    }
    for effect in &report.effects {
        println!(
            "    {} @ {}: {} -> {}",
            effect.field, effect.offset, effect.baseline, effect.after
        );
    }
    for error in &report.errors {
        println!("  offset {:>5}  write failed: {}", error.offset, error.error);
    }
    if !report.restore_failures.is_empty() {
        println!(
            "  WARNING: original bytes not restored at offsets {:?}",
            report.restore_failures
        );
    }
    if report.cancelled {
        println!("  scan cancelled before completing the range");
    }
}

async fn cmd_sustain(
    session: &mut dyn DeviceSession,
    config: SustainConfig,
    observer: Option<HttpObservationSource>,
    json: bool,
) -> Result<()> {
    let attack = SustainedWriteAttack::new(config);
    wire_ctrl_c(attack.cancel_flag());

    let observer = observer
        .as_ref()
        .map(|o| o as &dyn ObservationSource);
    let report = attack.run(session, observer).await?;
    if json {
        print_json(&report)?;
    } else {
        render_sustain(&report);
    }
    Ok(())
}

fn render_sustain(report: &SustainReport) {
    let outcome = match report.outcome {
        SustainOutcome::Completed => "completed",
        SustainOutcome::Cancelled => "cancelled",
        SustainOutcome::AbortedEarly => "aborted early (write failure streak)",
    };
    println!("Sustained write {} {}", report.id, outcome);
    println!(
        "  window {}  ticks {}  ok {}  failed {}  elapsed {}ms",
        report.window, report.ticks, report.writes_ok, report.writes_failed, report.elapsed_ms
    );
    if !report.samples.is_empty() {
        println!("  {} status samples collected", report.samples.len());
    }
}

async fn cmd_read(session: &mut dyn DeviceSession, window: MemoryWindow, json: bool) -> Result<()> {
    let data = session.read(&window).await?;
    if json {
        print_json(&json!({
            "block": window.block,
            "offset": window.offset,
            "length": window.length,
            "hex": payload::to_hex(&data),
        }))?;
    } else {
        println!("{} = {}", window, payload::to_hex(&data));
    }
    Ok(())
}

async fn cmd_write(
    session: &mut dyn DeviceSession,
    window: MemoryWindow,
    data: Vec<u8>,
    json: bool,
) -> Result<()> {
    session.write(&window, &data).await?;
    if json {
        print_json(&json!({
            "block": window.block,
            "offset": window.offset,
            "written": window.length,
        }))?;
    } else {
        println!("wrote {} bytes to {}", window.length, window);
    }
    Ok(())
}

async fn cmd_probe(endpoint: &str, json: bool) -> Result<()> {
    let ack = OpcUaSession::probe(endpoint).await?;
    if json {
        print_json(&json!({
            "endpoint": endpoint,
            "protocol_version": ack.protocol_version,
            "receive_buffer_size": ack.receive_buffer_size,
            "send_buffer_size": ack.send_buffer_size,
            "max_message_size": ack.max_message_size,
            "max_chunk_count": ack.max_chunk_count,
        }))?;
    } else {
        println!("{} acknowledged:", endpoint);
        println!("  protocol version    {}", ack.protocol_version);
        println!("  receive buffer      {}", ack.receive_buffer_size);
        println!("  send buffer         {}", ack.send_buffer_size);
        println!("  max message size    {}", ack.max_message_size);
        println!("  max chunk count     {}", ack.max_chunk_count);
    }
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|e| Error::protocol(format!("report serialization: {e}")))?;
    println!("{rendered}");
    Ok(())
}
