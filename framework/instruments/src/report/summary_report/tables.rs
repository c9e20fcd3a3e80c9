use tabled::Tabled;

#[derive(Tabled)]
pub struct OutcomeRow {
    pub outcome: String,
    pub count: u64,
    #[tabled(rename = "rate_%", display = "float2")]
    pub rate_percent: f64,
}

#[derive(Tabled)]
pub struct OperationRow {
    pub operation_id: String,
    pub total_operations: u64,
    pub success: u64,
    pub conflict: u64,
    pub client_error: u64,
    pub server_error: u64,
    pub timeout: u64,
    #[tabled(display = "float2")]
    pub avg_time_ms: f64,
    #[tabled(display = "float2")]
    pub p50_time_ms: f64,
    #[tabled(display = "float2")]
    pub p95_time_ms: f64,
    #[tabled(display = "float2")]
    pub p99_time_ms: f64,
    #[tabled(display = "float2")]
    pub max_time_ms: f64,
}

#[derive(Tabled)]
pub struct CounterRow {
    pub name: String,
    pub value: u64,
}

fn float2(n: &f64) -> String {
    format!("{:.2}", n)
}
