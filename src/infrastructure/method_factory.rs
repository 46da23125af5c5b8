// Builds the concrete measurement method for each recording method
use crate::application::measurement::{MeasurementError, MeasurementFactory, MeasurementMethod};
use crate::domain::reading::{Browser, RecordingMethod};
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::speedtest_cli::SpeedtestCli;
use crate::infrastructure::website_speed_test::WebsiteSpeedTest;

pub struct DefaultMeasurementFactory {
    config: AppConfig,
}

impl DefaultMeasurementFactory {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }
}

impl MeasurementFactory for DefaultMeasurementFactory {
    fn create(
        &self,
        method: RecordingMethod,
        browser: Option<Browser>,
    ) -> Result<Box<dyn MeasurementMethod>, MeasurementError> {
        if !method.uses_browser() {
            return Ok(Box::new(SpeedtestCli::new(self.config.speedtest.clone())));
        }

        let profile = self
            .config
            .websites
            .profile(method)
            .cloned()
            .ok_or_else(|| MeasurementError::Resource(format!("no website profile for {method}")))?;
        if profile.url.is_empty() || profile.value_selector.is_empty() {
            return Err(MeasurementError::Resource(format!(
                "website profile for {method} needs a url and a value_selector"
            )));
        }
        Ok(Box::new(WebsiteSpeedTest::new(
            method,
            browser.unwrap_or_default(),
            self.config.webdriver.clone(),
            profile,
        )))
    }
}
