use anyhow::{Context, Result};
use std::time::Duration;
use thirtyfour::prelude::*;
use thirtyfour::Key;
use tokio::runtime::Runtime;

/// A single page-rendering session. Calls are blocking and not reentrant.
pub trait PageRenderer {
    /// Navigate to `url` and return the rendered markup once the page has
    /// had time to settle.
    fn fetch(&mut self, url: &str) -> Result<String>;

    /// Best-effort close of any modal overlay. Never fails.
    fn dismiss_overlay(&mut self);
}

#[derive(Debug, Clone)]
pub struct RendererOptions {
    pub webdriver_url: String,
    pub headless: bool,
    /// Pause after navigation before the markup is read.
    pub settle_delay: Duration,
    /// Pause after each overlay-dismissal gesture.
    pub overlay_pause: Duration,
}

impl Default for RendererOptions {
    fn default() -> Self {
        Self {
            webdriver_url: "http://localhost:9515".to_string(),
            headless: false,
            settle_delay: Duration::from_secs(5),
            overlay_pause: Duration::from_secs(1),
        }
    }
}

/// Chrome driven over WebDriver, with its own runtime so callers stay
/// synchronous.
pub struct WebDriverRenderer {
    runtime: Runtime,
    driver: WebDriver,
    options: RendererOptions,
}

impl WebDriverRenderer {
    pub fn new(options: RendererOptions) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Failed to start runtime for browser session")?;

        let driver = runtime
            .block_on(async {
                let mut caps = DesiredCapabilities::chrome();
                caps.add_arg("--no-sandbox")?;
                caps.add_arg("--disable-dev-shm-usage")?;
                if options.headless {
                    caps.add_arg("--headless=new")?;
                }
                WebDriver::new(options.webdriver_url.as_str(), caps).await
            })
            .with_context(|| {
                format!(
                    "Failed to start Chrome via WebDriver at {}. Make sure chromedriver is running.",
                    options.webdriver_url
                )
            })?;

        Ok(Self {
            runtime,
            driver,
            options,
        })
    }

    pub fn quit(self) -> Result<()> {
        self.runtime
            .block_on(self.driver.quit())
            .context("Failed to close browser session")
    }
}

impl PageRenderer for WebDriverRenderer {
    fn fetch(&mut self, url: &str) -> Result<String> {
        let settle = self.options.settle_delay;
        self.runtime.block_on(async {
            self.driver
                .goto(url)
                .await
                .with_context(|| format!("Failed to navigate to {}", url))?;
            tokio::time::sleep(settle).await;
            self.driver
                .source()
                .await
                .context("Failed to read page source")
        })
    }

    fn dismiss_overlay(&mut self) {
        let pause = self.options.overlay_pause;
        self.runtime.block_on(async {
            match self.driver.find(By::Tag("body")).await {
                Ok(body) => match body.send_keys(Key::Escape + "").await {
                    Ok(()) => {
                        tokio::time::sleep(pause).await;
                        tracing::debug!("Sent ESC to close overlay");
                    }
                    Err(e) => tracing::debug!("ESC not delivered: {}", e),
                },
                Err(e) => tracing::debug!("No body to send ESC to: {}", e),
            }

            let buttons = match self
                .driver
                .find_all(By::XPath("//button[contains(@class,'artdeco-modal__dismiss')]"))
                .await
            {
                Ok(buttons) => buttons,
                Err(e) => {
                    tracing::debug!("Overlay dismiss lookup failed: {}", e);
                    return;
                }
            };

            for button in buttons {
                if button.click().await.is_ok() {
                    tracing::debug!("Clicked overlay dismiss button");
                    tokio::time::sleep(pause).await;
                    break;
                }
            }
        });
    }
}
