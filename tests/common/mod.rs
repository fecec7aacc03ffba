// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared harness for the relay end-to-end suites.

use chrono::{DateTime, TimeZone, Utc};
use srm_client::{MockTransport, RegulatorTransport};
use srm_core::{
    ComplianceProfile, Environment, OrderKind, OrderLine, OrderSnapshot, PaymentMethod,
    ServiceType,
};
use srm_crypto::SecretStore;
use srm_store::{ReceiptSink, Store};
use srm_worker::{Clock, ManualClock, MemoryEntitySource, Worker, WorkerConfig};
use std::sync::Arc;

/// A relay wired entirely to in-memory doubles.
pub struct TestRelay {
    pub store: Store,
    pub secrets: SecretStore,
    pub source: Arc<MemoryEntitySource>,
    pub transport: Arc<MockTransport>,
    pub clock: Arc<ManualClock>,
    pub worker: Worker,
}

/// Fixed start instant for every suite: 2026-03-14 12:00:00 UTC.
pub fn start_instant() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap()
}

/// Generate a consistent device keypair + self-signed certificate.
pub fn device_material() -> (String, String) {
    let key_pair = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
    let params = rcgen::CertificateParams::new(vec!["pos-device.local".into()]).unwrap();
    let cert = params.self_signed(&key_pair).unwrap();
    (key_pair.serialize_pem(), cert.pem())
}

/// Build a relay around the given transport.
pub fn relay(transport: MockTransport, network_enabled: bool) -> TestRelay {
    let store = Store::open_in_memory().unwrap();
    let secrets = SecretStore::new([7u8; 32]);
    let source = Arc::new(MemoryEntitySource::new());
    let transport = Arc::new(transport);
    let clock = Arc::new(ManualClock::new(start_instant()));
    let worker = Worker::new(
        store.clone(),
        secrets.clone(),
        Arc::clone(&source) as Arc<dyn srm_worker::EntitySource>,
        Arc::clone(&transport) as Arc<dyn RegulatorTransport>,
        Arc::clone(&clock) as Arc<dyn Clock>,
        WorkerConfig {
            environment: Environment::Development,
            base_url: "https://reg.example".into(),
            network_enabled,
            allow_storage_writes: true,
            receipt_sink: ReceiptSink::Storage,
        },
    );
    TestRelay {
        store,
        secrets,
        source,
        transport,
        clock,
        worker,
    }
}

/// Seed an active profile for a tenant/device with real key material.
pub async fn seed_profile(relay: &TestRelay, tenant: &str, device: &str) -> ComplianceProfile {
    let (private_key_pem, certificate_pem) = device_material();
    let now = relay.clock.now();
    let profile = ComplianceProfile {
        tenant_id: tenant.into(),
        branch_id: "b-1".into(),
        device_id: device.into(),
        environment: Environment::Development,
        partner_id: "partner-9".into(),
        certificate_code: "FOB201999999".into(),
        software_id: "sev-11".into(),
        software_version: "1.4.2".into(),
        protocol_version: "A".into(),
        partner_version: "1.0".into(),
        certification_case: None,
        authorization_code: "X9X9-X9X9".into(),
        private_key_pem,
        certificate_pem,
        certificate_chain_pem: None,
        gst_number: "123456789RT0001".into(),
        qst_number: "1234567890TQ0001".into(),
        is_active: true,
        created_at: now,
        updated_at: now,
    };
    relay.store.save_profile(&relay.secrets, &profile).await.unwrap();
    profile
}

/// The canonical dine-in sale: subtotal 15.99, GST 0.80, QST 1.59,
/// tip 0.00, total 18.38.
pub fn sale_order(tenant: &str, order_id: &str, at: DateTime<Utc>) -> OrderSnapshot {
    order_with(tenant, order_id, OrderKind::Sale, at, "15.99", "0.80", "1.59", "18.38", "30.00")
}

/// Build an order with explicit amounts (line price doubles as the
/// knob correction tests turn).
#[allow(clippy::too_many_arguments)]
pub fn order_with(
    tenant: &str,
    order_id: &str,
    kind: OrderKind,
    at: DateTime<Utc>,
    subtotal: &str,
    gst: &str,
    qst: &str,
    total: &str,
    line_price: &str,
) -> OrderSnapshot {
    OrderSnapshot {
        order_id: order_id.into(),
        tenant_id: tenant.into(),
        branch_id: "b-1".into(),
        device_id: "dev-1".into(),
        kind,
        timestamp: at,
        lines: vec![OrderLine {
            description: "Table d'hôte".into(),
            quantity: 1,
            unit_price: line_price.parse().unwrap(),
            line_total: line_price.parse().unwrap(),
        }],
        subtotal: subtotal.parse().unwrap(),
        gst: gst.parse().unwrap(),
        qst: qst.parse().unwrap(),
        tip: "0.00".parse().unwrap(),
        total: total.parse().unwrap(),
        payment_method: PaymentMethod::Card,
        service_type: ServiceType::DineIn,
    }
}
