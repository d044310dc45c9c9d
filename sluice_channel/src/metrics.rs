use sluice_observability::{Counter, UpDownCounter};

pub struct RegistryMetrics {
    pub open_channels: UpDownCounter<i64>,
    pub created_channels: Counter<u64>,
    pub failed_channels: Counter<u64>,
}

impl Default for RegistryMetrics {
    fn default() -> Self {
        let meter = sluice_observability::meter("registry");
        Self {
            open_channels: meter
                .i64_up_down_counter("registry.channels.open")
                .with_description("the number of cached open channels")
                .build(),
            created_channels: meter
                .u64_counter("registry.channels.created")
                .with_description("channels opened against the ingestion service")
                .build(),
            failed_channels: meter
                .u64_counter("registry.channels.failed")
                .with_description("failed attempts to open a channel")
                .build(),
        }
    }
}
