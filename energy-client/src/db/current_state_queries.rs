use anyhow::Result;
use sqlx::PgPool;

use crate::domain::{MeterCurrentState, VehicleCurrentState};

pub async fn meter_current_state(pool: &PgPool, meter_id: &str) -> Result<Option<MeterCurrentState>> {
    let row = sqlx::query_as::<_, MeterCurrentState>(
        r#"
        SELECT meter_id, kwh_consumed_ac, voltage, last_reading_at, created_at, updated_at
        FROM meter_current_state
        WHERE meter_id = $1
        "#,
    )
    .bind(meter_id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

pub async fn vehicle_current_state(
    pool: &PgPool,
    vehicle_id: &str,
) -> Result<Option<VehicleCurrentState>> {
    let row = sqlx::query_as::<_, VehicleCurrentState>(
        r#"
        SELECT vehicle_id, soc, kwh_delivered_dc, battery_temp, last_reading_at, created_at, updated_at
        FROM vehicle_current_state
        WHERE vehicle_id = $1
        "#,
    )
    .bind(vehicle_id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}
