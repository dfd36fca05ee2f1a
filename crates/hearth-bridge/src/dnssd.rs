//! DNS-SD advertisement of the commissionable service.
//!
//! A commissionable Matter device announces `_matterc._udp` with TXT
//! records carrying the discriminator, vendor/product pair, device
//! type, and commissioning mode. The instance name is 64 fresh random
//! bits rendered as 16 uppercase hex digits, regenerated on every
//! advertisement start so a device cannot be tracked across
//! commissioning windows.

use mdns_sd::{ServiceDaemon, ServiceInfo};
use rand::RngCore;

use crate::error::BridgeError;

/// Service type for commissionable discovery.
pub const SERVICE_TYPE: &str = "_matterc._udp.local.";

/// Advertisement parameters.
#[derive(Debug, Clone)]
pub struct DnssdConfig {
    /// 12-bit discriminator
    pub discriminator: u16,
    /// Vendor id
    pub vendor_id: u16,
    /// Product id
    pub product_id: u16,
    /// Advertised device type, if any
    pub device_type: Option<u32>,
    /// Commissioning mode open
    pub commissionable: bool,
    /// UDP port controllers should use (operational port)
    pub port: u16,
}

/// Commissionable-service advertiser.
pub struct DnssdAdvertiser {
    daemon: ServiceDaemon,
    registered: Option<String>,
}

impl DnssdAdvertiser {
    /// Start the responder daemon.
    pub fn new() -> Result<Self, BridgeError> {
        let daemon = ServiceDaemon::new().map_err(|e| BridgeError::Dnssd(e.to_string()))?;
        Ok(Self { daemon, registered: None })
    }

    /// Start (or restart) the advertisement.
    ///
    /// Returns the fresh instance name.
    pub fn start(
        &mut self,
        config: &DnssdConfig,
        rng: &mut dyn RngCore,
    ) -> Result<String, BridgeError> {
        self.stop();

        let instance = fresh_instance_name(rng);
        let hostname = format!("{}.local.", hostname(config.discriminator));
        let txt = txt_records(config);
        let txt_pairs: Vec<(&str, &str)> =
            txt.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();

        let info = ServiceInfo::new(
            SERVICE_TYPE,
            &instance,
            &hostname,
            "",
            config.port,
            &txt_pairs[..],
        )
        .map_err(|e| BridgeError::Dnssd(e.to_string()))?
        .enable_addr_auto();

        let fullname = info.get_fullname().to_string();
        self.daemon.register(info).map_err(|e| BridgeError::Dnssd(e.to_string()))?;
        self.registered = Some(fullname);
        tracing::info!(instance, port = config.port, "dns-sd advertisement started");
        Ok(instance)
    }

    /// Withdraw the advertisement, if one is active.
    pub fn stop(&mut self) {
        if let Some(fullname) = self.registered.take() {
            if let Err(e) = self.daemon.unregister(&fullname) {
                tracing::warn!(error = %e, "dns-sd unregister failed");
            }
        }
    }

    /// Shut the responder down cleanly.
    pub fn shutdown(mut self) {
        self.stop();
        if let Err(e) = self.daemon.shutdown() {
            tracing::warn!(error = %e, "dns-sd shutdown failed");
        }
    }
}

/// Advertised hostname: `matter-<DDDD>`, discriminator in 4 uppercase
/// hex digits.
#[must_use]
pub fn hostname(discriminator: u16) -> String {
    format!("matter-{discriminator:04X}")
}

/// Fresh 16-hex-digit uppercase instance name from 64 random bits.
#[must_use]
pub fn fresh_instance_name(rng: &mut dyn RngCore) -> String {
    let mut bits = [0u8; 8];
    rng.fill_bytes(&mut bits);
    format!("{:016X}", u64::from_be_bytes(bits))
}

/// TXT records per the commissionable-node discovery rules.
#[must_use]
pub fn txt_records(config: &DnssdConfig) -> Vec<(String, String)> {
    let mut records = vec![
        ("D".to_string(), config.discriminator.to_string()),
        ("VP".to_string(), format!("{},{}", config.vendor_id, config.product_id)),
    ];
    if let Some(device_type) = config.device_type {
        records.push(("DT".to_string(), format!("0x{device_type:04X}")));
    }
    records.push(("CM".to_string(), if config.commissionable { "1" } else { "0" }.to_string()));
    records
}
