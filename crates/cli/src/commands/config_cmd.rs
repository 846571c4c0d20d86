//! `mindloop config`: Configuration management commands.

use mindloop_config::AppConfig;

pub fn show() -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    if config.model.api_key.is_some() {
        config.model.api_key = Some("[REDACTED]".into());
    }
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

pub fn init(force: bool) -> Result<(), Box<dyn std::error::Error>> {
    let dir = AppConfig::config_dir();
    let path = dir.join("config.toml");
    if path.exists() && !force {
        println!("⚠️  {} already exists. Use --force to overwrite.", path.display());
        return Ok(());
    }
    std::fs::create_dir_all(&dir)?;
    std::fs::write(&path, AppConfig::default_toml())?;
    println!("📝 Wrote default configuration to {}", path.display());
    Ok(())
}

pub fn validate() -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Validating configuration...");

    match AppConfig::load() {
        Ok(config) => {
            println!("   ✅ Config parsed successfully");
            if !config.has_api_key() {
                println!("   ⚠️  No API key set (MINDLOOP_API_KEY or OPENAI_API_KEY)");
            }
            println!();
            println!("   Provider:  {}", config.model.provider);
            println!("   Model:     {}", config.model.model);
            println!("   Storage:   {:?}", config.storage.backend);
            println!("   Retries:   {} attempts", config.retry.max_attempts);
            Ok(())
        }
        Err(e) => {
            println!("   ❌ Config error: {e}");
            Err(e.into())
        }
    }
}

pub fn path() {
    println!("{}", AppConfig::config_dir().join("config.toml").display());
}
