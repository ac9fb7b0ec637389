use std::env;

/// Runtime configuration, read once at startup.
///
/// The keystore location and password are always injected from the
/// environment so that deployments can rotate credentials without a
/// rebuild.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub body_limit_bytes: usize,
    pub keystore: KeystoreConfig,
}

#[derive(Clone, Debug)]
pub struct KeystoreConfig {
    pub path: String,
    pub password: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, String> {
        let port = env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse::<u16>()
            .map_err(|e| format!("PORT is not a valid port number: {}", e))?;

        let body_limit_bytes = env::var("MAX_UPLOAD_BYTES")
            .unwrap_or_else(|_| (100 * 1024 * 1024).to_string())
            .parse::<usize>()
            .map_err(|e| format!("MAX_UPLOAD_BYTES is not a valid size: {}", e))?;

        let keystore_path =
            env::var("KEYSTORE_PATH").map_err(|_| "KEYSTORE_PATH not set".to_string())?;
        let keystore_password =
            env::var("KEYSTORE_PASSWORD").map_err(|_| "KEYSTORE_PASSWORD not set".to_string())?;

        Ok(AppConfig {
            port,
            body_limit_bytes,
            keystore: KeystoreConfig {
                path: keystore_path,
                password: keystore_password,
            },
        })
    }
}
