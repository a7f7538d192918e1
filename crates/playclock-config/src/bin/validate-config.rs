//! Config validation CLI tool
//!
//! Validates a playclockd configuration file and reports any errors.

use playclock_util::default_config_path;
use std::path::PathBuf;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    let config_path = match args.get(1) {
        Some(path) => PathBuf::from(path),
        None => {
            let default_path = default_config_path();
            eprintln!("Usage: validate-config [config-file]");
            eprintln!();
            eprintln!("Validates a playclockd configuration file.");
            eprintln!();
            eprintln!("If no path is provided, uses: {}", default_path.display());
            eprintln!();
            eprintln!("Example:");
            eprintln!("  validate-config {}", default_path.display());
            eprintln!("  validate-config config.example.toml");
            return ExitCode::from(2);
        }
    };

    // Check file exists
    if !config_path.exists() {
        eprintln!(
            "Error: Configuration file not found: {}",
            config_path.display()
        );
        return ExitCode::from(1);
    }

    // Try to load and validate
    match playclock_config::load_config(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!();
            println!("Summary:");
            println!(
                "  Config version: {}",
                playclock_config::CURRENT_CONFIG_VERSION
            );
            println!("  Socket: {}", config.service.socket_path.display());
            println!("  Data dir: {}", config.service.data_dir.display());
            println!(
                "  Tick interval: {}ms",
                config.service.tick_interval.as_millis()
            );
            println!("  Devices: {}", config.devices.len());

            if !config.devices.is_empty() {
                println!();
                println!("Devices:");
                for device in &config.devices {
                    println!("  - {} [{}]: {}", device.id.as_str(), device.kind, device.name);
                }
            }

            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed");
            eprintln!();
            match &e {
                playclock_config::ConfigError::ReadError(io_err) => {
                    eprintln!("Failed to read file: {}", io_err);
                }
                playclock_config::ConfigError::ParseError(parse_err) => {
                    eprintln!("TOML parse error:");
                    eprintln!("  {}", parse_err);
                }
                playclock_config::ConfigError::ValidationFailed { errors } => {
                    eprintln!("Validation errors ({}):", errors.len());
                    for err in errors {
                        eprintln!("  - {}", err);
                    }
                }
                playclock_config::ConfigError::UnsupportedVersion(ver) => {
                    eprintln!(
                        "Unsupported config version: {} (expected {})",
                        ver,
                        playclock_config::CURRENT_CONFIG_VERSION
                    );
                }
            }
            ExitCode::from(1)
        }
    }
}
