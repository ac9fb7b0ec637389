use base64::{engine::general_purpose, Engine as _};
use headless_chrome::{Browser, LaunchOptionsBuilder};

use crate::error::ConversionError;

/// Render HTML to PDF with a headless browser.
///
/// The markup is handed over as a base64 data URL so no temporary file
/// or local server is involved. Spawning a browser per call is slow but
/// keeps renders isolated from each other.
pub fn html_to_pdf(html: &str) -> Result<Vec<u8>, ConversionError> {
    let options = LaunchOptionsBuilder::default()
        .headless(true)
        .build()
        .map_err(|e| ConversionError::Render(anyhow::anyhow!("{}", e)))?;
    let browser =
        Browser::new(options).map_err(|e| ConversionError::Render(anyhow::anyhow!("{}", e)))?;
    let tab = browser
        .wait_for_initial_tab()
        .map_err(|e| ConversionError::Render(anyhow::anyhow!("{}", e)))?;

    let url = format!(
        "data:text/html;base64,{}",
        general_purpose::STANDARD.encode(html)
    );
    tab.navigate_to(&url)
        .map_err(|e| ConversionError::Render(anyhow::anyhow!("{}", e)))?;
    tab.wait_until_navigated()
        .map_err(|e| ConversionError::Render(anyhow::anyhow!("{}", e)))?;

    let pdf = tab
        .print_to_pdf(None)
        .map_err(|e| ConversionError::Render(anyhow::anyhow!("{}", e)))?;
    Ok(pdf)
}
