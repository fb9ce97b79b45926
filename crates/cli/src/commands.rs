//! Subcommand implementations.

use std::io::Read;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::ValueEnum;
use codeco::edifact::{parse_segments, ParsedSegment};
use codeco::{
    CodecoEncoder, ContainerSnapshot, EncodeError, EncodeRequest, GateOperation, GatewayEvent,
    MessageReference, Timestamp, TransmissionId, TransmissionLogEntry,
};
use tracing::{info, warn};

use crate::config::GatewayConfig;
use crate::gateway::Gateway;

/// How entries are printed.
#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Which entries `logs` prints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFilter {
    All,
    Failed,
    Pending,
}

/// Renders one gate event from `input` (`-` for stdin) as EDIFACT.
pub fn encode(config: &GatewayConfig, input: &Path) -> anyhow::Result<()> {
    let event: GatewayEvent = serde_json::from_str(&read_input(input)?)
        .context("input is not a gate event")?;
    let (operation, containers) = gate_operation(event)?;
    let payload = render(config, &operation, containers)?;
    println!("{payload}");
    Ok(())
}

fn gate_operation(event: GatewayEvent) -> anyhow::Result<(GateOperation, Vec<ContainerSnapshot>)> {
    match event {
        GatewayEvent::GateInCompleted {
            container,
            operation,
        } => Ok((operation, vec![container])),
        GatewayEvent::GateOutCompleted {
            containers,
            operation,
            ..
        } => Ok((operation, containers)),
        other => bail!(
            "expected GATE_IN_COMPLETED or GATE_OUT_COMPLETED, got {}",
            other.event_kind()
        ),
    }
}

fn render(
    config: &GatewayConfig,
    operation: &GateOperation,
    containers: Vec<ContainerSnapshot>,
) -> anyhow::Result<String> {
    let first = containers.first().ok_or(EncodeError::NoEquipment)?;
    let (partner_code, partner) = config.registry().resolve_for_client(&first.client_code);
    let prepared_at = Timestamp::now();

    let payload = CodecoEncoder::new(config.encoder.options()).encode(&EncodeRequest {
        kind: operation.kind,
        containers,
        occurred_at: operation.completed_at,
        prepared_at,
        reference: MessageReference::generate(prepared_at, 1),
        sender: partner.sender_code.clone(),
        recipient: partner_code,
        yard: Some(operation.yard.clone()),
        transport: operation.transport.clone(),
    })?;
    Ok(payload)
}

/// Prints the segments of an EDIFACT file (`-` for stdin).
pub fn inspect(input: &Path) -> anyhow::Result<()> {
    let segments = parse_segments(&read_input(input)?)?;
    for (index, segment) in segments.iter().enumerate() {
        println!("{:>3}  {}", index + 1, describe(segment));
    }
    println!("{} segments", segments.len());
    Ok(())
}

fn describe(segment: &ParsedSegment) -> String {
    let elements: Vec<String> = segment.elements.iter().map(|e| e.join(":")).collect();
    if elements.is_empty() {
        segment.tag.clone()
    } else {
        format!("{} {}", segment.tag, elements.join(" | "))
    }
}

/// Replays a JSON-lines file of gate events through a running gateway.
pub async fn run(
    config: &GatewayConfig,
    events: &Path,
    linger: Duration,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let gateway = Gateway::build(config).await?;
    let mut poller = gateway.poller();
    poller.start();

    let content = tokio::fs::read_to_string(events)
        .await
        .with_context(|| format!("failed to read {}", events.display()))?;

    let mut published = 0usize;
    for (index, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let event: GatewayEvent = serde_json::from_str(line)
            .with_context(|| format!("{}:{} is not a gateway event", events.display(), index + 1))?;
        let kind = event.event_kind();
        let report = gateway.bus().publish(event).await;
        if !report.all_succeeded() {
            warn!(event_kind = %kind, failed = report.failed, "Some handlers failed");
        }
        published += 1;
    }
    info!(published, "Replayed gate events");

    gateway.settle().await;
    if !linger.is_zero() {
        info!(linger_secs = linger.as_secs(), "Waiting for acknowledgments");
        tokio::select! {
            _ = tokio::time::sleep(linger) => {}
            _ = tokio::signal::ctrl_c() => info!("Interrupted"),
        }
    }
    poller.stop().await;

    print_entries(&gateway.manager().get_transmission_logs().await?, format)?;
    gateway.shutdown().await;
    Ok(())
}

/// Prints the transmission log.
pub async fn logs(
    config: &GatewayConfig,
    filter: LogFilter,
    format: OutputFormat,
) -> anyhow::Result<()> {
    if config.store.path.is_none() {
        warn!("No store.path configured; the in-memory log is empty");
    }
    let gateway = Gateway::build(config).await?;
    let manager = gateway.manager();
    let entries = match filter {
        LogFilter::All => manager.get_transmission_logs().await?,
        LogFilter::Failed => manager.get_failed_transmissions().await?,
        LogFilter::Pending => manager.get_pending_transmissions().await?,
    };
    print_entries(&entries, format)?;
    gateway.shutdown().await;
    Ok(())
}

/// Retries one failed entry of the durable log.
pub async fn retry(config: &GatewayConfig, id: &str, format: OutputFormat) -> anyhow::Result<()> {
    if config.store.path.is_none() {
        bail!("retry needs a durable log; set store.path");
    }
    let id: TransmissionId = id
        .parse()
        .with_context(|| format!("'{id}' is not a transmission id"))?;

    let gateway = Gateway::build(config).await?;
    gateway.manager().retry_failed_transmission(id).await?;
    gateway.manager().wait_for_deliveries().await;

    let entry = gateway.manager().get_transmission(id).await?;
    print_entries(std::slice::from_ref(&entry), format)?;
    gateway.shutdown().await;
    Ok(())
}

fn print_entries(entries: &[TransmissionLogEntry], format: OutputFormat) -> anyhow::Result<()> {
    for entry in entries {
        match format {
            OutputFormat::Json => println!("{}", serde_json::to_string(entry)?),
            OutputFormat::Text => println!("{}", summarize(entry)),
        }
    }
    Ok(())
}

fn summarize(entry: &TransmissionLogEntry) -> String {
    let mut line = format!(
        "{}  {:<12}  {:<8}  {}  {}  retries={}",
        entry.id,
        entry.status,
        entry.partner_code,
        entry.container_number,
        entry.file_name,
        entry.retry_count,
    );
    if let Some(booking) = &entry.booking_reference {
        line.push_str("  booking=");
        line.push_str(booking.as_str());
    }
    if entry.sandbox {
        line.push_str("  [sandbox]");
    }
    if let Some(error) = &entry.error_message {
        line.push_str("  error: ");
        line.push_str(error);
    }
    line
}

fn read_input(input: &Path) -> anyhow::Result<String> {
    if input == Path::new("-") {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("failed to read stdin")?;
        return Ok(buffer);
    }
    std::fs::read_to_string(input).with_context(|| format!("failed to read {}", input.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use codeco::{
        BookingReference, ClientCode, ContainerId, ContainerNumber, LoadStatus, NewTransmission,
        OperationId, OperationKind, OperatorId, PartnerCode, TransmissionStatus, YardId,
    };

    fn gate_in_event() -> GatewayEvent {
        let container = ContainerSnapshot {
            id: ContainerId::new("c-1").unwrap(),
            number: ContainerNumber::new("MSKU1234567").unwrap(),
            size: "20ft".to_string(),
            container_type: "dry".to_string(),
            client_code: ClientCode::new("Maersk").unwrap(),
            load_status: LoadStatus::Empty,
            gate_in_at: Some(Timestamp::now()),
            gate_out_at: None,
            damage_notes: Vec::new(),
            seal_numbers: Vec::new(),
            temperature_celsius: None,
            gross_weight_kg: None,
        };
        GatewayEvent::GateInCompleted {
            operation: GateOperation {
                id: OperationId::new("op-1").unwrap(),
                kind: OperationKind::GateIn,
                container_ids: vec![container.id.clone()],
                operator: OperatorId::new("clerk").unwrap(),
                yard: YardId::new("Y1").unwrap(),
                completed_at: Timestamp::now(),
                booking_reference: None,
                transport: None,
            },
            container,
        }
    }

    #[test]
    fn test_render_uses_configured_sender_and_location() {
        let config = GatewayConfig::from_toml(
            "[encoder]\nsender_code = \"DEPOT01\"\nlocation_code = \"NLRTM\"\n",
        )
        .unwrap();
        let (operation, containers) = gate_operation(gate_in_event()).unwrap();

        let payload = render(&config, &operation, containers).unwrap();

        assert!(payload.contains("+DEPOT01+DEFAULT+"));
        assert!(payload.contains("LOC+165+NLRTM"));
        let segments = parse_segments(&payload).unwrap();
        assert_eq!(segments.first().map(|s| s.tag.as_str()), Some("UNA"));
        assert_eq!(segments.last().map(|s| s.tag.as_str()), Some("UNZ"));
    }

    #[test]
    fn test_non_gate_event_is_rejected() {
        let event = GatewayEvent::EdiTransmissionCompleted {
            entity_id: OperationId::new("op-1").unwrap(),
            transmission_id: TransmissionId::new_random(),
        };
        assert!(gate_operation(event).is_err());
    }

    #[test]
    fn test_describe_joins_components() {
        let segment = ParsedSegment {
            tag: "EQD".to_string(),
            elements: vec![
                vec!["CN".to_string()],
                vec!["MSKU1234567".to_string()],
                vec!["22G1".to_string(), "102".to_string(), "5".to_string()],
            ],
        };
        assert_eq!(describe(&segment), "EQD CN | MSKU1234567 | 22G1:102:5");
    }

    #[test]
    fn test_summarize_shows_booking_and_sandbox() {
        let entry = TransmissionLogEntry::pending(
            NewTransmission {
                operation_id: OperationId::new("op-7"),
                operation: OperationKind::GateOut,
                booking_reference: BookingReference::new("BK-7"),
                container_numbers: vec![ContainerNumber::new("MSKU1234567").unwrap()],
                file_name: "CODECO_x.edi".to_string(),
                message_reference: MessageReference::new("COD1").unwrap(),
                partner_code: PartnerCode::default_partner(),
                sandbox: true,
                payload: String::new(),
            },
            Timestamp::now(),
        )
        .unwrap();

        let line = summarize(&entry);

        assert!(line.contains("PENDING"));
        assert!(line.contains("booking=BK-7"));
        assert!(line.ends_with("[sandbox]"));
    }

    #[tokio::test]
    async fn test_run_replays_events_into_durable_log() {
        let dir = tempfile::tempdir().unwrap();
        let events = dir.path().join("events.jsonl");
        let line = serde_json::to_string(&gate_in_event()).unwrap();
        std::fs::write(&events, format!("{line}\n\n")).unwrap();

        let mut config = GatewayConfig::default();
        config.store.path = Some(dir.path().join("log.jsonl"));
        config.outbox.directory = dir.path().join("outbox");

        run(&config, &events, Duration::ZERO, OutputFormat::Json)
            .await
            .unwrap();

        let gateway = Gateway::build(&config).await.unwrap();
        let entries = gateway.manager().get_transmission_logs().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, TransmissionStatus::Sent);
        assert!(entries[0].sandbox);
        gateway.shutdown().await;
    }

    #[tokio::test]
    async fn test_retry_requires_durable_log() {
        let config = GatewayConfig::default();
        let err = retry(&config, &TransmissionId::new_random().to_string(), OutputFormat::Text)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("store.path"));
    }
}
