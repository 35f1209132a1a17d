pub mod analytics_queries;
pub mod current_state_queries;
pub mod history_queries;

pub use analytics_queries::{
    FleetMeterAggregate, FleetVehicleAggregate, MeterWindowAggregate, VehicleWindowAggregate,
};
