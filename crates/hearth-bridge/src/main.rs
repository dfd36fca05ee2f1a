//! Hearth bridge binary.
//!
//! # Usage
//!
//! ```bash
//! # Default ports, persistent storage, simulated burner
//! hearth-bridge --storage /var/lib/hearth/hearth.redb --simulate
//!
//! # Ephemeral bring-up on custom ports
//! hearth-bridge --operational-port 15540 --commissioning-port 15550 --simulate
//! ```

use clap::Parser;
use rand::rngs::OsRng;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use hearth_bridge::{
    BridgeError, Coordinator, CoordinatorConfig, DnssdAdvertiser, DnssdConfig, RedbStorage,
    TransportConfig, UdpTransport, dnssd, sensor,
};
use hearth_core::clusters;

/// Matter bridge for a pellet burner's flame, fan and temperature.
#[derive(Parser, Debug)]
#[command(name = "hearth-bridge")]
#[command(about = "Matter bridge exposing burner sensors over WiFi")]
#[command(version)]
struct Args {
    /// Operational UDP port
    #[arg(long, default_value_t = 5540)]
    operational_port: u16,

    /// Commissioning UDP port
    #[arg(long, default_value_t = 5550)]
    commissioning_port: u16,

    /// Setup PIN (8 ASCII digits), normally derived from the device key
    #[arg(long, default_value = "20202021")]
    setup_pin: String,

    /// Vendor id advertised over DNS-SD (test vendor by default)
    #[arg(long, default_value_t = 0xFFF1)]
    vendor_id: u16,

    /// Product id advertised over DNS-SD
    #[arg(long, default_value_t = 0x8001)]
    product_id: u16,

    /// Storage database path
    #[arg(long, default_value = "hearth.redb")]
    storage: std::path::PathBuf,

    /// Disable DNS-SD advertisement (for closed test networks)
    #[arg(long)]
    no_dnssd: bool,

    /// Run the simulated burner instead of a live sensor feed
    #[arg(long)]
    simulate: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), BridgeError> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("hearth bridge starting");

    let storage = RedbStorage::open(&args.storage)?;
    let transport = UdpTransport::bind(&TransportConfig {
        operational_port: args.operational_port,
        commissioning_port: args.commissioning_port,
    })
    .await?;
    let operational_port = transport.operational_port();

    let coordinator = Coordinator::new(
        transport,
        &storage,
        &CoordinatorConfig { setup_pin: args.setup_pin.clone(), first_pase_session_id: 1 },
    )?;

    let discriminator = coordinator.discriminator();
    let hostname = dnssd::hostname(discriminator);

    // Commissioning banner: everything a user needs to pair the device.
    tracing::info!(
        discriminator,
        setup_pin = %args.setup_pin,
        hostname = %hostname,
        port = operational_port,
        "ready for commissioning"
    );

    let mut advertiser = None;
    if !args.no_dnssd {
        let mut dnssd = DnssdAdvertiser::new()?;
        dnssd.start(
            &DnssdConfig {
                discriminator,
                vendor_id: args.vendor_id,
                product_id: args.product_id,
                device_type: Some(clusters::advertised_device_type()),
                commissionable: !coordinator.is_commissioned(),
                port: operational_port,
            },
            &mut OsRng,
        )?;
        advertiser = Some(dnssd);
    }

    if args.simulate {
        tracing::info!("simulated burner enabled");
        sensor::spawn_simulator(coordinator.sensor_queue());
    }

    let result = coordinator.run().await;

    if let Some(dnssd) = advertiser {
        dnssd.shutdown();
    }
    result
}
