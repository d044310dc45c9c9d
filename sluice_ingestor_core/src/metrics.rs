use sluice_observability::Counter;

pub struct IngestionMetrics {
    pub submitted_rows: Counter<u64>,
    pub succeeded_units: Counter<u64>,
    pub failed_units: Counter<u64>,
}

impl Default for IngestionMetrics {
    fn default() -> Self {
        let meter = sluice_observability::meter("ingestion");
        Self {
            submitted_rows: meter
                .u64_counter("ingestion.rows.submitted")
                .with_unit("{row}")
                .with_description("rows submitted to ingestion channels")
                .build(),
            succeeded_units: meter
                .u64_counter("ingestion.units.succeeded")
                .with_unit("{unit}")
                .with_description("units routed to success")
                .build(),
            failed_units: meter
                .u64_counter("ingestion.units.failed")
                .with_unit("{unit}")
                .with_description("units routed to failure")
                .build(),
        }
    }
}
