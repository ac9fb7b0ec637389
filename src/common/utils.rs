use std::collections::HashMap;

use crate::error::Error;

/// Replace `${name}` template variables in document content.
pub fn replace_template_variables(content: &str, variables: &HashMap<String, String>) -> String {
    let mut result = content.to_string();
    for (key, value) in variables {
        result = result.replace(&format!("${{{}}}", key), value);
    }
    result
}

/// Download a remote document.
pub async fn fetch_bytes(url: &str) -> Result<Vec<u8>, Error> {
    let response = reqwest::get(url)
        .await
        .map_err(|e| Error::ResourceNotFound {
            path: url.to_string(),
            source: Some(e),
        })?;
    if !response.status().is_success() {
        return Err(Error::ResourceNotFound {
            path: url.to_string(),
            source: None,
        });
    }
    let bytes = response
        .bytes()
        .await
        .map_err(|e| Error::ResourceNotFound {
            path: url.to_string(),
            source: Some(e),
        })?;
    Ok(bytes.to_vec())
}
