use super::run::load;
use crate::config::generate::generate_starter_config;
use std::fs;
use std::path::{Path, PathBuf};

/// Print the effective configuration, defaults filled in.
pub fn dump(config_path: Option<&Path>, file: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load(config_path, file)?;
    print!("{}", serde_yaml::to_string(&config)?);
    Ok(())
}

pub fn init(stdout: bool) -> Result<(), Box<dyn std::error::Error>> {
    write_config(&generate_starter_config(), stdout)
}

fn write_config(config_content: &str, stdout: bool) -> Result<(), Box<dyn std::error::Error>> {
    if stdout {
        print!("{}", config_content);
        return Ok(());
    }

    // Try ~/.config/shovel first, then /etc/shovel
    let user_config = dirs::home_dir().and_then(|home_dir| {
        let user_config = home_dir.join(".config/shovel/config.yml");
        let parent = user_config.parent()?;
        match fs::create_dir_all(parent) {
            Ok(_) => Some(user_config),
            Err(_) => {
                eprintln!("Warning: Could not create directory {}", parent.display());
                eprintln!("Falling back to /etc/shovel/config.yml");
                None
            }
        }
    });
    let config_path = user_config.unwrap_or_else(|| PathBuf::from("/etc/shovel/config.yml"));

    if config_path.exists() {
        return Err(format!(
            "config file already exists at {}; remove it first or use --stdout",
            config_path.display()
        )
        .into());
    }

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&config_path, config_content)?;

    println!("Config file written to {}", config_path.display());
    Ok(())
}
