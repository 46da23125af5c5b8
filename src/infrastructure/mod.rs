// Infrastructure layer - External dependencies and adapters
pub mod config;
pub mod csv_log;
pub mod method_factory;
pub mod speedtest_cli;
pub mod webdriver;
