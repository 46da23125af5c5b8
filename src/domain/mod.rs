// Domain layer - Readings, measurement outcomes and chart models
pub mod chart;
pub mod reading;
pub mod window;
