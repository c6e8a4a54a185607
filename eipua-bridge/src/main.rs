//! EtherNet/IP to OPC UA bridge daemon.

use anyhow::{Context, Result};
use tracing::info;

use eipua_bridge::bridge::BridgeLoop;
use eipua_bridge::config::EipUaBridgeConfig;
use eipua_bridge::device::DeviceLink;
use eipua_bridge::health;
use eipua_bridge::offsets::OffsetTable;
use eipua_bridge::server::ServerLink;
use eipua_bridge::sim::{MemoryServer, SimulatedDevice};
use eipua_bridge_framework::{BridgeArgs, BridgeConfig, ShutdownSignal};

#[tokio::main]
async fn main() -> Result<()> {
    let args = BridgeArgs::parse_with_default("eipua-bridge.json5");

    let config = EipUaBridgeConfig::load(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    let _log_guard =
        eipua_bridge_framework::init_logging(&config, &args).context("Failed to init logging")?;

    let server_client = MemoryServer::m800().with_nodes(config.server.nodes.values());

    if args.check {
        let report = health::check(&config, &server_client).await;
        println!("{}", serde_json::to_string(&report)?);
        std::process::exit(report.exit_code());
    }

    info!("Starting eipua-bridge");
    info!("Loaded configuration from {:?}", args.config);

    let eds = config.load_eds()?;
    if let Some(eds) = &eds {
        let device = eds.device_info();
        info!(
            vendor = %device.vendor,
            product = %device.product_name,
            revision = %device.revision,
            "Loaded EDS"
        );
    }

    let assembly_size = config.resolve_assembly_size(eds.as_ref())?;
    let offsets = OffsetTable::from_assembly_size(assembly_size);
    let channels = config.channel_map();
    info!(
        assembly_size,
        slots = offsets.len(),
        instance = config.device.input_assembly.instance_id,
        "Input assembly layout"
    );

    let device = DeviceLink::new(SimulatedDevice::m800(&offsets, &channels), &config.device);
    let server = ServerLink::new(server_client, &config.server);
    let mut bridge = BridgeLoop::new(device, server, offsets, channels, config.poll_interval());

    let shutdown = ShutdownSignal::new();
    shutdown.listen_for_os_signals();

    let report = bridge.run(shutdown).await;
    info!(
        cycles = report.cycles,
        writes_ok = report.writes_ok,
        writes_failed = report.writes_failed,
        "eipua-bridge stopped"
    );

    Ok(())
}
