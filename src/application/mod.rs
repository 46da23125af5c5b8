// Application layer - Recorder lifecycle, readings pipeline and graph use cases
pub mod graph_service;
pub mod graph_updater;
pub mod measurement;
pub mod readings_log;
pub mod readings_queue;
pub mod recorder;
pub mod recorder_pool;
pub mod recorder_registry;
pub mod results_writer;

#[cfg(test)]
pub mod testing;
