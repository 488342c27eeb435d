use anyhow::Result;
use clap::Args;
use comfy_table::Table;
use yellowcab_core::config::PipelineConfig;
use yellowcab_core::dashboard::{DashboardReader, SampleSummary, TripSample};
use yellowcab_core::db::PgServer;

#[derive(Args, Debug, Clone)]
pub struct DashboardArgs {
    /// Number of trips in the sample
    #[arg(long)]
    pub limit: Option<i64>,
    /// Browse one mart table instead of the trip dashboard
    #[arg(long)]
    pub table: Option<String>,
    #[arg(long, default_value_t = 20)]
    pub page_size: i64,
    #[arg(long, default_value_t = 0)]
    pub offset: i64,
}

pub async fn show(config: &PipelineConfig, args: &DashboardArgs) -> Result<()> {
    let mart = config.mart()?;
    let pool = PgServer::from_config(&mart.database)
        .pool(&mart.database.database)
        .await?;
    let reader = DashboardReader::new(pool.clone(), &config.dashboard);

    let result = match &args.table {
        Some(table) => browse(&reader, table, args).await,
        None => overview(&reader, args.limit).await,
    };
    pool.close().await;
    result
}

async fn browse(reader: &DashboardReader, table: &str, args: &DashboardArgs) -> Result<()> {
    let count = reader.table_row_count(table).await?;
    let rows = reader.table_page(table, args.page_size, args.offset).await?;

    println!("{table}: {count} rows");
    let mut view = Table::new();
    let header: Vec<String> = rows
        .first()
        .and_then(|row| row.as_object())
        .map(|object| object.keys().cloned().collect())
        .unwrap_or_default();
    view.set_header(header.clone());
    for row in &rows {
        view.add_row(
            header
                .iter()
                .map(|column| match row.get(column) {
                    Some(serde_json::Value::String(text)) => text.clone(),
                    Some(serde_json::Value::Null) | None => String::new(),
                    Some(other) => other.to_string(),
                })
                .collect::<Vec<_>>(),
        );
    }
    println!("{view}");
    Ok(())
}

async fn overview(reader: &DashboardReader, limit: Option<i64>) -> Result<()> {
    let sample = reader.trip_sample(limit).await?;
    let summary = SampleSummary::from_trips(&sample);
    println!(
        "{} trips sampled, total {:.0}$, {:.2}% cancelled",
        summary.trips, summary.total_amount, summary.cancelled_pct
    );
    println!("{}", sample_table(&sample));

    let aggregates = reader.aggregates().await?;

    let mut zones = Table::new();
    zones.set_header(vec!["Pickup zone", "Trips", "Dropoff zone", "Trips"]);
    let depth = aggregates
        .top_pickup_zones
        .len()
        .max(aggregates.top_dropoff_zones.len());
    for i in 0..depth {
        let pickup = aggregates.top_pickup_zones.get(i);
        let dropoff = aggregates.top_dropoff_zones.get(i);
        zones.add_row(vec![
            pickup.and_then(|z| z.zone.clone()).unwrap_or_default(),
            pickup.map(|z| z.trips.to_string()).unwrap_or_default(),
            dropoff.and_then(|z| z.zone.clone()).unwrap_or_default(),
            dropoff.map(|z| z.trips.to_string()).unwrap_or_default(),
        ]);
    }
    println!("{zones}");

    let mut hours = Table::new();
    hours.set_header(vec!["Hour", "Trips"]);
    for hour in &aggregates.trips_per_hour {
        hours.add_row(vec![format!("{}h", hour.hour), hour.trips.to_string()]);
    }
    println!("{hours}");

    let mut payments = Table::new();
    payments.set_header(vec!["Payment method", "Trips", "Total"]);
    for payment in &aggregates.payments {
        payments.add_row(vec![
            payment.payment_method.clone(),
            payment.trips.to_string(),
            format!("{:.2}", payment.total_amount),
        ]);
    }
    println!("{payments}");

    let mut vendors = Table::new();
    vendors.set_header(vec!["Vendor", "Trips", "Revenue"]);
    for vendor in &aggregates.vendors {
        vendors.add_row(vec![
            vendor.vendor_name.clone(),
            vendor.trips.to_string(),
            format!("{:.2}", vendor.revenue),
        ]);
    }
    println!("{vendors}");
    Ok(())
}

fn sample_table(sample: &[TripSample]) -> Table {
    let mut table = Table::new();
    table.set_header(vec![
        "Vendor", "Month", "Week", "Day", "Hour", "Pickup", "Dropoff", "Total", "Payment",
    ]);
    let number = |value: Option<i32>| value.map(|v| v.to_string()).unwrap_or_default();
    for trip in sample {
        table.add_row(vec![
            trip.vendor_name.clone(),
            number(trip.month),
            number(trip.week),
            number(trip.day),
            number(trip.hour),
            trip.zone_pickup.clone().unwrap_or_default(),
            trip.zone_dropoff.clone().unwrap_or_default(),
            trip.total_amount.map(|v| format!("{v:.2}")).unwrap_or_default(),
            trip.payment_method.clone(),
        ]);
    }
    table
}
