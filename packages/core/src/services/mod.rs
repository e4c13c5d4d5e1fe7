pub mod provider;
pub mod sensor;

#[cfg(test)]
pub mod mock_sensor;

pub use provider::SensorApi;
pub use sensor::SensorClient;
