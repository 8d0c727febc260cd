use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    /// Root holding one directory per published version
    pub package_dir: PathBuf,
    /// Only this product's manifest is served when set
    pub product_type: Option<String>,
    pub log_level: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        Self {
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5000),
            package_dir: PathBuf::from(
                std::env::var("PACKAGE_DIR").unwrap_or_else(|_| "packages".into()),
            ),
            product_type: std::env::var("PRODUCT_TYPE")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
        }
    }

    pub fn serves_product(&self, product: &str) -> bool {
        self.product_type
            .as_deref()
            .map_or(true, |configured| configured == product)
    }
}
