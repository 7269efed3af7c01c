use tracing::info;

use crate::cancel::CancelToken;
use crate::config::Settings;
use crate::error::HarvestError;
use crate::http::HttpTransport;
use crate::search::{HttpPageSource, PageSource};

#[cfg(feature = "browser")]
pub use headless::BrowserPageSource;

/// Opens the page source a harvest should use: a Chrome session when the
/// browser is wanted and compiled in, a plain HTTP client otherwise.
pub fn open_page_source(
    settings: &Settings,
    cancel: &CancelToken,
) -> Result<Box<dyn PageSource>, HarvestError> {
    if settings.use_browser {
        #[cfg(feature = "browser")]
        {
            let source =
                BrowserPageSource::launch(settings.headless, settings.timeout, cancel.clone())?;
            info!(headless = settings.headless, "browser.launched");
            return Ok(Box::new(source));
        }
        #[cfg(not(feature = "browser"))]
        {
            tracing::warn!("browser.unavailable; built without the browser feature");
        }
    }
    info!("search.http_only");
    Ok(Box::new(http_page_source(settings, cancel)?))
}

pub fn http_page_source(
    settings: &Settings,
    cancel: &CancelToken,
) -> Result<HttpPageSource<HttpTransport>, HarvestError> {
    Ok(HttpPageSource::new(
        HttpTransport::new(settings.timeout)?,
        settings.retry_policy(),
        cancel.clone(),
    ))
}

#[cfg(feature = "browser")]
mod headless {
    use std::sync::Arc;
    use std::time::Duration;

    use headless_chrome::{Browser, LaunchOptions, Tab};
    use tracing::debug;

    use crate::cancel::CancelToken;
    use crate::error::HarvestError;
    use crate::search::PageSource;

    const SETTLE: Duration = Duration::from_millis(1500);
    const CONTENT_SELECTOR: &str = "table";

    pub struct BrowserPageSource {
        // Dropping the browser closes Chrome, so it lives as long as the tab.
        _browser: Browser,
        tab: Arc<Tab>,
        cancel: CancelToken,
    }

    impl BrowserPageSource {
        pub fn launch(
            headless: bool,
            timeout: Duration,
            cancel: CancelToken,
        ) -> Result<Self, HarvestError> {
            let options = LaunchOptions::default_builder()
                .headless(headless)
                .build()
                .map_err(|err| HarvestError::Browser(err.to_string()))?;
            let browser = Browser::new(options).map_err(browser_error)?;
            let tab = browser.new_tab().map_err(browser_error)?;
            tab.set_default_timeout(timeout);
            Ok(Self {
                _browser: browser,
                tab,
                cancel,
            })
        }
    }

    impl PageSource for BrowserPageSource {
        fn fetch_page(&self, url: &str) -> Result<String, HarvestError> {
            debug!(url, "browser.navigate");
            self.tab
                .navigate_to(url)
                .and_then(|tab| tab.wait_until_navigated())
                .map_err(browser_error)?;
            // Result tables are rendered client-side; an empty search never
            // gets one, which is not an error.
            if self.tab.wait_for_element(CONTENT_SELECTOR).is_err() {
                debug!(url, "browser.no_table");
            }
            settle(&self.cancel, SETTLE)?;
            self.tab.get_content().map_err(browser_error)
        }
    }

    /// Gives client-side rendering time to finish unless the run is cancelled.
    fn settle(cancel: &CancelToken, delay: Duration) -> Result<(), HarvestError> {
        if cancel.sleep(delay) {
            Ok(())
        } else {
            Err(HarvestError::Interrupted)
        }
    }

    fn browser_error(err: impl std::fmt::Display) -> HarvestError {
        HarvestError::Browser(err.to_string())
    }

    #[cfg(test)]
    mod tests {
        use std::time::Instant;

        use assert_matches::assert_matches;

        use super::*;

        #[test]
        fn settle_waits_out_the_delay() {
            assert_matches!(settle(&CancelToken::new(), Duration::from_millis(20)), Ok(()));
        }

        #[test]
        fn settle_returns_early_once_cancelled() {
            let cancel = CancelToken::new();
            cancel.cancel();
            let started = Instant::now();
            assert_matches!(settle(&cancel, SETTLE), Err(HarvestError::Interrupted));
            assert!(started.elapsed() < SETTLE);
        }
    }
}
